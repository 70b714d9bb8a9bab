use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Config;
use crate::controller::MutationPolicy;
use crate::notice::Locale;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiConfig>,
    pub cache: Option<CacheConfig>,
    pub session: Option<SessionConfig>,
    pub lists: Option<ListsConfig>,
    pub display: Option<DisplayConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub read_token: Option<String>,
    pub language: Option<String>,
    pub region: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
    pub stale_secs: Option<u64>,
    pub cache_secs: Option<u64>,
    pub retry: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListsConfig {
    /// `concurrent` or `serialized`.
    pub mutation_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// `en` or `ko`.
    pub locale: Option<String>,
    pub search_debounce_ms: Option<u64>,
}

/// Platform config directory path: `<config_dir>/cinelist/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cinelist").join("config.toml"))
}

/// Load config by cascading CWD `.cinelist.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> Result<ConfigFile, ConfigError> {
    let platform = match config_path() {
        Some(p) => load_from_path(&p)?,
        None => None,
    };
    let cwd = load_from_path(Path::new(".cinelist.toml"))?;

    Ok(match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    })
}

/// Load a config from a specific path. A missing file is `Ok(None)`; an
/// unreadable or malformed one is an error.
pub fn load_from_path(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn merge_section<T: Default>(
    base: Option<T>,
    overlay: Option<T>,
    f: impl FnOnce(T, T) -> T,
) -> Option<T> {
    match (base, overlay) {
        (None, None) => None,
        (b, o) => Some(f(b.unwrap_or_default(), o.unwrap_or_default())),
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api: merge_section(base.api, overlay.api, |b, o| ApiConfig {
            api_key: o.api_key.or(b.api_key),
            read_token: o.read_token.or(b.read_token),
            language: o.language.or(b.language),
            region: o.region.or(b.region),
            timeout_secs: o.timeout_secs.or(b.timeout_secs),
            requests_per_second: o.requests_per_second.or(b.requests_per_second),
        }),
        cache: merge_section(base.cache, overlay.cache, |b, o| CacheConfig {
            path: o.path.or(b.path),
            stale_secs: o.stale_secs.or(b.stale_secs),
            cache_secs: o.cache_secs.or(b.cache_secs),
            retry: o.retry.or(b.retry),
        }),
        session: merge_section(base.session, overlay.session, |b, o| SessionConfig {
            path: o.path.or(b.path),
        }),
        lists: merge_section(base.lists, overlay.lists, |b, o| ListsConfig {
            mutation_policy: o.mutation_policy.or(b.mutation_policy),
        }),
        display: merge_section(base.display, overlay.display, |b, o| DisplayConfig {
            locale: o.locale.or(b.locale),
            search_debounce_ms: o.search_debounce_ms.or(b.search_debounce_ms),
        }),
    }
}

impl ConfigFile {
    /// Overwrite `config` with every value set in this file.
    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(api) = &self.api {
            if api.api_key.is_some() {
                config.api_key.clone_from(&api.api_key);
            }
            if api.read_token.is_some() {
                config.read_token.clone_from(&api.read_token);
            }
            if let Some(language) = &api.language {
                config.language.clone_from(language);
            }
            if let Some(region) = &api.region {
                config.region.clone_from(region);
            }
            if let Some(secs) = api.timeout_secs {
                config.request_timeout_secs = secs;
            }
            if let Some(rps) = api.requests_per_second {
                if rps == 0 {
                    return Err(ConfigError::Invalid {
                        key: "api.requests_per_second",
                        message: "must be at least 1".into(),
                    });
                }
                config.requests_per_second = rps;
            }
        }
        if let Some(cache) = &self.cache {
            if let Some(path) = &cache.path {
                config.cache_path = Some(PathBuf::from(path));
            }
            if let Some(secs) = cache.stale_secs {
                config.stale_time_secs = secs;
            }
            if let Some(secs) = cache.cache_secs {
                config.cache_time_secs = secs;
            }
            if let Some(retry) = cache.retry {
                config.query_retry = retry;
            }
        }
        if let Some(path) = self.session.as_ref().and_then(|s| s.path.as_ref()) {
            config.session_path = Some(PathBuf::from(path));
        }
        if let Some(policy) = self.lists.as_ref().and_then(|l| l.mutation_policy.as_ref()) {
            config.mutation_policy = policy
                .parse::<MutationPolicy>()
                .map_err(|message| ConfigError::Invalid {
                    key: "lists.mutation_policy",
                    message,
                })?;
        }
        if let Some(display) = &self.display {
            if let Some(locale) = &display.locale {
                config.locale = locale
                    .parse::<Locale>()
                    .map_err(|message| ConfigError::Invalid {
                        key: "display.locale",
                        message,
                    })?;
            }
            if let Some(ms) = display.search_debounce_ms {
                config.search_debounce_ms = ms;
            }
        }
        Ok(())
    }
}
