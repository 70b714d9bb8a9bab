use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod account;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod config_file;
pub mod controller;
pub mod gateway;
pub mod images;
pub mod model;
pub mod notice;
pub mod optimistic;
pub mod rate_limit;
pub mod search;
pub mod session;
pub mod store;
pub mod wizard;

// Re-export for convenience
pub use account::AccountController;
pub use auth::{AuthError, Authenticator, LoginFlow, PendingLogin};
pub use cache::{DEFAULT_CACHE_TIME, DEFAULT_RETRY, DEFAULT_STALE_TIME, QueryCache};
pub use catalog::{Catalog, Feed};
pub use config_file::ConfigError;
pub use controller::{ControllerError, ListController, MutationOutcome, MutationPolicy};
pub use gateway::{AccountGateway, ApiError, ListGateway, TmdbClient};
pub use model::{ListId, MediaKind, MediaRef};
pub use notice::{Locale, Notice, NoticeLevel, Notices};
pub use search::{DEFAULT_DEBOUNCE, DebouncedSearch};
pub use session::{AuthState, SessionError, TokenStore};
pub use store::{ListStore, UserStore};
pub use wizard::ListWizard;

/// Default per-API-version request rate.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 20;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Cache(#[from] cache::CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Runtime configuration for the client.
#[derive(Clone)]
pub struct Config {
    /// v3 API key, sent as `api_key`.
    pub api_key: Option<String>,
    /// v4 application read access token.
    pub read_token: Option<String>,
    pub v3_base_url: String,
    pub v4_base_url: String,
    /// Language for catalog requests, e.g. `ko-KR`.
    pub language: String,
    /// Region for release-date feeds.
    pub region: String,
    pub request_timeout_secs: u64,
    pub requests_per_second: u32,
    /// Path to the persistent SQLite query cache (optional).
    /// When unset the cache lives in memory only.
    pub cache_path: Option<PathBuf>,
    pub stale_time_secs: u64,
    pub cache_time_secs: u64,
    pub query_retry: u32,
    /// Where credentials are kept. `None` keeps them in memory.
    pub session_path: Option<PathBuf>,
    pub mutation_policy: MutationPolicy,
    pub search_debounce_ms: u64,
    pub locale: Locale,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("read_token", &self.read_token.as_ref().map(|_| "***"))
            .field("v3_base_url", &self.v3_base_url)
            .field("v4_base_url", &self.v4_base_url)
            .field("language", &self.language)
            .field("region", &self.region)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("requests_per_second", &self.requests_per_second)
            .field("cache_path", &self.cache_path)
            .field("stale_time_secs", &self.stale_time_secs)
            .field("cache_time_secs", &self.cache_time_secs)
            .field("query_retry", &self.query_retry)
            .field("session_path", &self.session_path)
            .field("mutation_policy", &self.mutation_policy)
            .field("search_debounce_ms", &self.search_debounce_ms)
            .field("locale", &self.locale)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            read_token: None,
            v3_base_url: gateway::endpoints::V3_BASE_URL.to_string(),
            v4_base_url: gateway::endpoints::V4_BASE_URL.to_string(),
            language: "ko-KR".to_string(),
            region: "KR".to_string(),
            request_timeout_secs: 10,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            cache_path: None,
            stale_time_secs: DEFAULT_STALE_TIME.as_secs(),
            cache_time_secs: DEFAULT_CACHE_TIME.as_secs(),
            query_retry: DEFAULT_RETRY,
            session_path: None,
            mutation_policy: MutationPolicy::default(),
            search_debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            locale: Locale::default(),
        }
    }
}

/// Build a [`QueryCache`] from configuration.
///
/// If `cache_path` is set, opens a persistent SQLite-backed cache.
/// Otherwise, or if opening fails, returns an in-memory-only cache.
pub fn build_query_cache(
    cache_path: Option<&Path>,
    stale_time_secs: u64,
    cache_time_secs: u64,
    retry: u32,
) -> Arc<QueryCache> {
    let stale_time = Duration::from_secs(stale_time_secs);
    let cache_time = Duration::from_secs(cache_time_secs);
    if let Some(path) = cache_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match QueryCache::open(path, stale_time, cache_time) {
            Ok(cache) => {
                tracing::info!(path = %path.display(), "opened persistent cache");
                return Arc::new(cache.with_retry(retry));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open cache, falling back to in-memory");
            }
        }
    }
    Arc::new(QueryCache::new(stale_time, cache_time).with_retry(retry))
}

/// Open the credential store at `session_path`, or an in-memory one.
pub fn open_token_store(session_path: Option<&Path>) -> Result<Arc<TokenStore>, SessionError> {
    Ok(Arc::new(match session_path {
        Some(path) => TokenStore::open(path)?,
        None => TokenStore::in_memory(),
    }))
}

/// Every component wired to one client, one cache and one notice channel.
pub struct Cinelist {
    config: Config,
    client: Arc<TmdbClient>,
    notices: Notices,
    user: Arc<UserStore>,
    lists: Arc<ListController>,
    account: AccountController,
    auth: Authenticator,
    catalog: Arc<Catalog>,
}

impl Cinelist {
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let tokens = open_token_store(config.session_path.as_deref())?;
        let client = Arc::new(TmdbClient::new(&config, tokens)?);
        let cache = build_query_cache(
            config.cache_path.as_deref(),
            config.stale_time_secs,
            config.cache_time_secs,
            config.query_retry,
        );
        let notices = Notices::new(config.locale);
        let user = Arc::new(UserStore::default());

        let lists = ListController::new(
            client.clone(),
            Arc::new(ListStore::default()),
            notices.clone(),
        )
        .with_policy(config.mutation_policy);
        let account = AccountController::new(client.clone(), user.clone(), notices.clone());
        let auth = Authenticator::new(client.clone(), user.clone(), notices.clone());
        let catalog = Catalog::new(client.clone(), cache, config.region.clone());

        tracing::debug!(config = ?config, state = ?auth.auth_state(), "client ready");
        Ok(Self {
            config,
            client,
            notices,
            user,
            lists: Arc::new(lists),
            account,
            auth,
            catalog: Arc::new(catalog),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &Arc<TmdbClient> {
        &self.client
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn user(&self) -> &Arc<UserStore> {
        &self.user
    }

    pub fn lists(&self) -> &Arc<ListController> {
        &self.lists
    }

    pub fn account(&self) -> &AccountController {
        &self.account
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        self.catalog.cache()
    }

    /// A debounced search over the catalog. Must be called inside a runtime.
    pub fn search(&self) -> DebouncedSearch {
        DebouncedSearch::spawn(
            self.catalog.clone(),
            Duration::from_millis(self.config.search_debounce_ms),
        )
    }

    pub fn wizard(&self) -> ListWizard {
        ListWizard::new(self.lists.clone())
    }
}
