//! Persistent credential storage.
//!
//! Credentials live in an [`ArcSwap`] so request paths read them without
//! locking. Every update is written through to a JSON file (mode 0600 on
//! unix) when the store was opened with a path.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How the current user is known to TMDB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Anonymous,
    Guest,
    Authenticated,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_session_id: Option<String>,
    /// v4 user access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Numeric v3 account id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<u64>,
    /// Opaque v4 account object id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_object_id: Option<String>,
}

impl Credentials {
    pub fn auth_state(&self) -> AuthState {
        if self.session_id.is_some() || self.access_token.is_some() {
            AuthState::Authenticated
        } else if self.guest_session_id.is_some() {
            AuthState::Guest
        } else {
            AuthState::Anonymous
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("session_id", &redact(&self.session_id))
            .field("guest_session_id", &redact(&self.guest_session_id))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("account_id", &self.account_id)
            .field("account_object_id", &self.account_object_id)
            .finish()
    }
}

pub struct TokenStore {
    current: ArcSwap<Credentials>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn in_memory() -> Self {
        Self::with_credentials(Credentials::default())
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            current: ArcSwap::from_pointee(credentials),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open (or create) a store backed by `path`.
    ///
    /// An unreadable or corrupt file is logged and treated as signed out.
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let credentials = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt session file");
                Credentials::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Credentials::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            state = ?credentials.auth_state(),
            "session store opened"
        );

        Ok(Self {
            current: ArcSwap::from_pointee(credentials),
            path: Some(path.to_path_buf()),
            write_lock: Mutex::new(()),
        })
    }

    /// `<data_dir>/cinelist/session.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("cinelist").join("session.json"))
    }

    pub fn has_persistence(&self) -> bool {
        self.path.is_some()
    }

    pub fn snapshot(&self) -> Arc<Credentials> {
        self.current.load_full()
    }

    pub fn auth_state(&self) -> AuthState {
        self.current.load().auth_state()
    }

    /// Apply `f` to a copy of the credentials, publish it and persist it.
    pub fn update(&self, f: impl FnOnce(&mut Credentials)) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = Credentials::clone(&self.current.load());
        f(&mut next);
        self.persist(&next)?;
        self.current.store(Arc::new(next));
        Ok(())
    }

    /// Forget everything and remove the backing file.
    pub fn clear(&self) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.current.store(Arc::new(Credentials::default()));
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn persist(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(credentials)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
