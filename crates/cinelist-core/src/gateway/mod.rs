//! Remote API gateway: the traits the controllers consume and the TMDB
//! implementation behind them.

pub mod endpoints;
pub mod mock;
pub mod tmdb;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::model::{
    AccountStates, CreatedList, ListDetails, ListId, ListSummary, MediaRef, MovieSummary,
    MutationResponse, NewList, RatedMovie,
};

pub use tmdb::TmdbClient;

/// Boxed future returned by gateway trait methods.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Failure of a single remote call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("not authorized: {message}")]
    Unauthorized { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("rejected by server (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

impl ApiError {
    /// Map a non-success HTTP status and body to an error, pulling
    /// `status_message` out of the TMDB error envelope when present.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["status_message"].as_str().map(String::from))
            .unwrap_or_default();
        match status {
            401 | 403 => ApiError::Unauthorized { message },
            404 => ApiError::NotFound { message },
            429 => ApiError::RateLimited { retry_after: None },
            _ => ApiError::Rejected { status, message },
        }
    }

    /// The server-provided message, if the server sent one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::NotFound { message }
            | ApiError::Rejected { message, .. }
                if !message.is_empty() =>
            {
                Some(message)
            }
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout | ApiError::RateLimited { .. } => true,
            ApiError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// Turn a `success: false` envelope into an error.
pub fn ensure_success(resp: MutationResponse) -> Result<MutationResponse, ApiError> {
    if resp.success {
        Ok(resp)
    } else {
        Err(ApiError::Rejected {
            status: 200,
            message: resp.status_message,
        })
    }
}

/// List endpoints consumed by [`ListController`](crate::controller::ListController).
pub trait ListGateway: Send + Sync {
    /// Authoritative list state, all pages merged.
    fn get_list<'a>(&'a self, list_id: ListId) -> GatewayFuture<'a, ListDetails>;

    fn add_items<'a>(
        &'a self,
        list_id: ListId,
        items: &'a [MediaRef],
    ) -> GatewayFuture<'a, MutationResponse>;

    fn remove_items<'a>(
        &'a self,
        list_id: ListId,
        items: &'a [MediaRef],
    ) -> GatewayFuture<'a, MutationResponse>;

    fn delete_list<'a>(&'a self, list_id: ListId) -> GatewayFuture<'a, MutationResponse>;

    fn create_list<'a>(&'a self, list: &'a NewList) -> GatewayFuture<'a, CreatedList>;

    fn update_list<'a>(
        &'a self,
        list_id: ListId,
        list: &'a NewList,
    ) -> GatewayFuture<'a, MutationResponse>;

    /// Every list owned by the signed-in account, all pages merged.
    fn account_lists<'a>(&'a self) -> GatewayFuture<'a, Vec<ListSummary>>;

    fn item_status<'a>(&'a self, list_id: ListId, media: MediaRef) -> GatewayFuture<'a, bool>;
}

/// Per-movie account endpoints consumed by
/// [`AccountController`](crate::account::AccountController).
pub trait AccountGateway: Send + Sync {
    fn account_states<'a>(&'a self, movie_id: u64) -> GatewayFuture<'a, AccountStates>;

    fn set_favorite<'a>(
        &'a self,
        media: MediaRef,
        favorite: bool,
    ) -> GatewayFuture<'a, MutationResponse>;

    fn set_watchlist<'a>(
        &'a self,
        media: MediaRef,
        watchlist: bool,
    ) -> GatewayFuture<'a, MutationResponse>;

    /// `value` is on TMDB's 0.5–10 scale.
    fn rate_movie<'a>(&'a self, movie_id: u64, value: f64) -> GatewayFuture<'a, MutationResponse>;

    fn delete_rating<'a>(&'a self, movie_id: u64) -> GatewayFuture<'a, MutationResponse>;

    /// Rated movies of the current session (account or guest), all pages.
    fn rated_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<RatedMovie>>;

    fn favorite_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<MovieSummary>>;

    fn watchlist_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<MovieSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_extracts_status_message() {
        let body = r#"{"success":false,"status_code":34,"status_message":"The resource you requested could not be found."}"#;
        let err = ApiError::from_status(404, body);
        assert!(err.is_not_found());
        assert_eq!(
            err.remote_message(),
            Some("The resource you requested could not be found.")
        );
    }

    #[test]
    fn from_status_maps_auth_and_server_errors() {
        assert!(matches!(
            ApiError::from_status(401, "{}"),
            ApiError::Unauthorized { .. }
        ));
        let err = ApiError::from_status(503, "<html>");
        assert!(matches!(err, ApiError::Rejected { status: 503, .. }));
        assert!(err.is_transient());
        assert_eq!(err.remote_message(), None);
    }

    #[test]
    fn not_found_is_not_transient() {
        assert!(!ApiError::from_status(404, "").is_transient());
        assert!(ApiError::Timeout.is_transient());
    }

    #[test]
    fn ensure_success_rejects_false_envelope() {
        let resp = MutationResponse {
            success: false,
            status_code: 3,
            status_message: "Invalid media type".into(),
        };
        let err = ensure_success(resp).unwrap_err();
        assert_eq!(err.remote_message(), Some("Invalid media type"));
        assert!(ensure_success(MutationResponse::ok()).is_ok());
    }
}
