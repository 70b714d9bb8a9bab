//! Sign-in flows and the user store they drive.
//!
//! Both TMDB flows hand the user an approval URL and finish once the user
//! has approved the request token in a browser:
//!
//! - v4: request token → access token → v3 session via conversion. Needed for
//!   lists, which only exist on the v4 API.
//! - v3: request token → session id. Enough for favorites, watchlist and
//!   ratings.

use std::sync::Arc;

use thiserror::Error;

use crate::gateway::endpoints::{v3_approval_url, v4_approval_url};
use crate::gateway::{ApiError, TmdbClient};
use crate::model::AccountDetails;
use crate::notice::{Action, Notices};
use crate::session::{AuthState, Credentials, SessionError, TokenStore};
use crate::store::UserStore;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlow {
    V4,
    V3,
}

/// A request token waiting for the user's approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub flow: LoginFlow,
    pub request_token: String,
    pub approval_url: String,
}

pub struct Authenticator {
    client: Arc<TmdbClient>,
    user: Arc<UserStore>,
    notices: Notices,
}

impl Authenticator {
    pub fn new(client: Arc<TmdbClient>, user: Arc<UserStore>, notices: Notices) -> Self {
        let auth = Self {
            client,
            user,
            notices,
        };
        auth.sync_user();
        auth
    }

    fn tokens(&self) -> &Arc<TokenStore> {
        self.client.tokens()
    }

    pub fn auth_state(&self) -> AuthState {
        self.user.read(|u| u.auth)
    }

    /// Mirror the stored credentials into the user store.
    pub fn sync_user(&self) {
        let auth = self.tokens().auth_state();
        self.user.update(|u| {
            u.auth = auth;
            if auth != AuthState::Authenticated {
                u.account = None;
            }
        });
    }

    pub async fn begin_login(
        &self,
        flow: LoginFlow,
        redirect_to: Option<&str>,
    ) -> Result<PendingLogin, AuthError> {
        let pending = match flow {
            LoginFlow::V4 => {
                let token = self.client.request_token_v4(redirect_to).await?;
                PendingLogin {
                    flow,
                    approval_url: v4_approval_url(&token),
                    request_token: token,
                }
            }
            LoginFlow::V3 => {
                let token = self.client.request_token_v3().await?;
                PendingLogin {
                    flow,
                    approval_url: v3_approval_url(&token, redirect_to),
                    request_token: token,
                }
            }
        };
        tracing::debug!(flow = ?flow, "request token issued");
        Ok(pending)
    }

    /// Exchange the approved token, store the credentials and load the
    /// account.
    pub async fn complete_login(
        &self,
        pending: &PendingLogin,
    ) -> Result<AccountDetails, AuthError> {
        self.user.update(|u| u.loading = true);
        let result = self.exchange(pending).await;
        self.user.update(|u| u.loading = false);
        match result {
            Ok(account) => {
                tracing::info!(account_id = account.id, "signed in");
                self.notices.success(Action::SignIn);
                Ok(account)
            }
            Err(e) => {
                tracing::warn!(error = %e, "sign-in failed");
                if let AuthError::Api(api) = &e {
                    self.notices.failure(Action::SignIn, api);
                }
                Err(e)
            }
        }
    }

    async fn exchange(&self, pending: &PendingLogin) -> Result<AccountDetails, AuthError> {
        let credentials = match pending.flow {
            LoginFlow::V4 => {
                let access = self.client.access_token_v4(&pending.request_token).await?;
                let session_id = self
                    .client
                    .convert_to_v3_session(&access.access_token)
                    .await?;
                Credentials {
                    session_id: Some(session_id),
                    access_token: Some(access.access_token),
                    account_object_id: Some(access.account_id),
                    ..Credentials::default()
                }
            }
            LoginFlow::V3 => Credentials {
                session_id: Some(
                    self.client
                        .create_session_v3(&pending.request_token)
                        .await?,
                ),
                ..Credentials::default()
            },
        };
        self.tokens().update(|c| *c = credentials)?;
        self.sync_user();
        self.load_account().await
    }

    /// Fetch the account and remember its numeric id.
    pub async fn load_account(&self) -> Result<AccountDetails, AuthError> {
        let account = self.client.account_details().await?;
        self.tokens().update(|c| c.account_id = Some(account.id))?;
        self.user.update(|u| u.account = Some(account.clone()));
        Ok(account)
    }

    /// Start a guest session. Guests can rate but have no lists.
    pub async fn guest(&self) -> Result<(), AuthError> {
        let guest_session_id = self.client.create_guest_session().await?;
        self.tokens().update(|c| {
            *c = Credentials {
                guest_session_id: Some(guest_session_id),
                ..Credentials::default()
            }
        })?;
        self.sync_user();
        tracing::info!("guest session started");
        Ok(())
    }

    /// Forget the stored credentials. Remote revocation is best-effort.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let credentials = self.tokens().snapshot();
        if let Some(token) = &credentials.access_token {
            if let Err(e) = self.client.revoke_access_token_v4(token).await {
                tracing::warn!(error = %e, "access token revocation failed");
            }
        } else if let Some(session) = &credentials.session_id
            && let Err(e) = self.client.delete_session_v3(session).await
        {
            tracing::warn!(error = %e, "session deletion failed");
        }
        self.tokens().clear()?;
        self.sync_user();
        self.notices.success(Action::SignOut);
        Ok(())
    }
}
