//! Per-movie account state: favorite, watchlist and rating.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::controller::ControllerError;
use crate::gateway::{AccountGateway, ApiError, ensure_success};
use crate::model::{AccountStates, MediaRef, MovieSummary, RatedMovie};
use crate::notice::{Action, Locale, Notices};
use crate::optimistic::perform_optimistic;
use crate::session::AuthState;
use crate::store::{Store, UserStore};

/// Smallest percent that rounds to TMDB's minimum rating of 0.5.
pub const MIN_RATING_PERCENT: u8 = 3;

/// Convert a 0–100 rating to TMDB's 0.5–10 scale: divide by 10 and round to
/// the nearest half step. Accepts `MIN_RATING_PERCENT..=100`.
pub fn rating_value(percent: u8) -> Result<f64, ControllerError> {
    if !(MIN_RATING_PERCENT..=100).contains(&percent) {
        return Err(ControllerError::InvalidRating(percent));
    }
    Ok((f64::from(percent) / 10.0 * 2.0).round() / 2.0)
}

pub struct AccountController {
    gateway: Arc<dyn AccountGateway>,
    user: Arc<UserStore>,
    states: Store<HashMap<u64, AccountStates>>,
    notices: Notices,
}

impl AccountController {
    pub fn new(gateway: Arc<dyn AccountGateway>, user: Arc<UserStore>, notices: Notices) -> Self {
        Self {
            gateway,
            user,
            states: Store::default(),
            notices,
        }
    }

    pub fn cached_states(&self, movie_id: u64) -> Option<AccountStates> {
        self.states.read(|m| m.get(&movie_id).cloned())
    }

    pub fn subscribe(&self) -> watch::Receiver<HashMap<u64, AccountStates>> {
        self.states.subscribe()
    }

    fn auth(&self) -> AuthState {
        self.user.read(|u| u.auth)
    }

    fn require(&self, action: Action, allowed: &[AuthState]) -> Result<(), ControllerError> {
        if allowed.contains(&self.auth()) {
            return Ok(());
        }
        let message = match self.notices.locale() {
            Locale::En => "Sign in to use this feature.",
            Locale::Ko => "로그인이 필요한 기능입니다.",
        };
        self.notices.error(action, message);
        Err(ControllerError::AuthRequired)
    }

    fn remote_error(&self, action: Action, e: ApiError) -> ControllerError {
        self.notices.failure(action, &e);
        ControllerError::Remote { action, source: e }
    }

    /// Favorite, watchlist and rating for one movie.
    ///
    /// Anonymous users get the empty state without a request. Guests have no
    /// favorites or watchlist; their rating comes from the guest session's
    /// rated movies.
    pub async fn load_states(&self, movie_id: u64) -> Result<AccountStates, ControllerError> {
        let states = match self.auth() {
            AuthState::Anonymous => AccountStates::default(),
            AuthState::Guest => {
                let rated = self
                    .gateway
                    .rated_movies()
                    .await
                    .map_err(|e| self.remote_error(Action::LoadAccount, e))?;
                AccountStates {
                    rated: rated
                        .iter()
                        .find(|r| r.movie.id == movie_id)
                        .and_then(RatedMovie::value),
                    ..AccountStates::default()
                }
            }
            AuthState::Authenticated => self
                .gateway
                .account_states(movie_id)
                .await
                .map_err(|e| self.remote_error(Action::LoadAccount, e))?,
        };
        self.states.update(|m| {
            m.insert(movie_id, states.clone());
        });
        Ok(states)
    }

    async fn current(&self, movie_id: u64) -> Result<AccountStates, ControllerError> {
        match self.cached_states(movie_id) {
            Some(states) => Ok(states),
            None => self.load_states(movie_id).await,
        }
    }

    async fn mutate<Fut>(
        &self,
        movie_id: u64,
        action: Action,
        apply: impl FnOnce(&mut AccountStates),
        remote: impl FnOnce() -> Fut,
    ) -> Result<(), ControllerError>
    where
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let states = &self.states;
        perform_optimistic(
            move || states.read(|m| m.get(&movie_id).cloned()),
            move || states.update(|m| apply(m.entry(movie_id).or_default())),
            remote,
            move |previous| {
                states.update(|m| match previous {
                    Some(prev) => {
                        m.insert(movie_id, prev);
                    }
                    None => {
                        m.remove(&movie_id);
                    }
                })
            },
        )
        .await
        .map_err(|e| {
            tracing::warn!(movie_id, %action, error = %e, "account change rolled back");
            self.remote_error(action, e)
        })?;
        tracing::info!(movie_id, %action, "account change confirmed");
        Ok(())
    }

    /// Flip the favorite flag. Returns the new value.
    pub async fn toggle_favorite(&self, movie_id: u64) -> Result<bool, ControllerError> {
        self.require(Action::ToggleFavorite, &[AuthState::Authenticated])?;
        let next = !self.current(movie_id).await?.favorite;
        let gateway = &self.gateway;
        self.mutate(
            movie_id,
            Action::ToggleFavorite,
            |s| s.favorite = next,
            move || async move {
                ensure_success(gateway.set_favorite(MediaRef::movie(movie_id), next).await?)
                    .map(|_| ())
            },
        )
        .await?;
        Ok(next)
    }

    /// Flip the watchlist flag. Returns the new value.
    pub async fn toggle_watchlist(&self, movie_id: u64) -> Result<bool, ControllerError> {
        self.require(Action::ToggleWatchlist, &[AuthState::Authenticated])?;
        let next = !self.current(movie_id).await?.watchlist;
        let gateway = &self.gateway;
        self.mutate(
            movie_id,
            Action::ToggleWatchlist,
            |s| s.watchlist = next,
            move || async move {
                ensure_success(gateway.set_watchlist(MediaRef::movie(movie_id), next).await?)
                    .map(|_| ())
            },
        )
        .await?;
        Ok(next)
    }

    /// Rate on the 0–100 scale. Returns the value sent to TMDB.
    pub async fn rate(&self, movie_id: u64, percent: u8) -> Result<f64, ControllerError> {
        self.require(Action::Rate, &[AuthState::Authenticated, AuthState::Guest])?;
        let value = rating_value(percent)?;
        let gateway = &self.gateway;
        self.mutate(
            movie_id,
            Action::Rate,
            |s| s.rated = Some(value),
            move || async move {
                ensure_success(gateway.rate_movie(movie_id, value).await?).map(|_| ())
            },
        )
        .await?;
        Ok(value)
    }

    pub async fn delete_rating(&self, movie_id: u64) -> Result<(), ControllerError> {
        self.require(
            Action::DeleteRating,
            &[AuthState::Authenticated, AuthState::Guest],
        )?;
        let gateway = &self.gateway;
        self.mutate(
            movie_id,
            Action::DeleteRating,
            |s| s.rated = None,
            move || async move {
                ensure_success(gateway.delete_rating(movie_id).await?).map(|_| ())
            },
        )
        .await
    }

    pub async fn favorites(&self) -> Result<Vec<MovieSummary>, ControllerError> {
        self.require(Action::LoadAccount, &[AuthState::Authenticated])?;
        self.gateway
            .favorite_movies()
            .await
            .map_err(|e| self.remote_error(Action::LoadAccount, e))
    }

    pub async fn watchlist(&self) -> Result<Vec<MovieSummary>, ControllerError> {
        self.require(Action::LoadAccount, &[AuthState::Authenticated])?;
        self.gateway
            .watchlist_movies()
            .await
            .map_err(|e| self.remote_error(Action::LoadAccount, e))
    }

    pub async fn rated(&self) -> Result<Vec<RatedMovie>, ControllerError> {
        self.require(
            Action::LoadAccount,
            &[AuthState::Authenticated, AuthState::Guest],
        )?;
        self.gateway
            .rated_movies()
            .await
            .map_err(|e| self.remote_error(Action::LoadAccount, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{Call, MockGateway, MockResponse};
    use crate::store::UserState;

    fn controller(gateway: Arc<MockGateway>, auth: AuthState) -> AccountController {
        let user = Arc::new(UserStore::new(UserState {
            auth,
            ..UserState::default()
        }));
        AccountController::new(gateway, user, Notices::default())
    }

    #[test]
    fn rating_scale() {
        assert_eq!(rating_value(85), Ok(8.5));
        assert_eq!(rating_value(100), Ok(10.0));
        assert_eq!(rating_value(72), Ok(7.0));
        assert_eq!(rating_value(5), Ok(0.5));
        assert_eq!(rating_value(3), Ok(0.5));
        assert_eq!(rating_value(4), Ok(0.5));
        assert_eq!(rating_value(8), Ok(1.0));
        assert_eq!(rating_value(2), Err(ControllerError::InvalidRating(2)));
        assert_eq!(rating_value(0), Err(ControllerError::InvalidRating(0)));
        assert_eq!(rating_value(101), Err(ControllerError::InvalidRating(101)));
    }

    #[tokio::test]
    async fn anonymous_is_refused_before_network() {
        let gateway = Arc::new(MockGateway::new());
        let c = controller(gateway.clone(), AuthState::Anonymous);
        let mut notices = c.notices.subscribe();

        assert_eq!(
            c.toggle_favorite(550).await,
            Err(ControllerError::AuthRequired)
        );
        assert_eq!(c.rate(550, 80).await, Err(ControllerError::AuthRequired));
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(
            notices.recv().await.unwrap().message,
            "Sign in to use this feature."
        );
    }

    #[tokio::test]
    async fn toggle_favorite_confirms() {
        let gateway = Arc::new(MockGateway::new());
        let c = controller(gateway.clone(), AuthState::Authenticated);
        assert_eq!(c.toggle_favorite(550).await, Ok(true));
        assert!(c.cached_states(550).unwrap().favorite);
        assert!(gateway.server_states(550).favorite);
        assert_eq!(c.toggle_favorite(550).await, Ok(false));
        assert!(!gateway.server_states(550).favorite);
    }

    #[tokio::test]
    async fn failed_watchlist_toggle_rolls_back() {
        let gateway = Arc::new(
            MockGateway::new()
                .with_states(
                    550,
                    AccountStates {
                        watchlist: true,
                        ..Default::default()
                    },
                )
                .with_sequence(vec![MockResponse::Fail(ApiError::Timeout)]),
        );
        let c = controller(gateway.clone(), AuthState::Authenticated);
        c.load_states(550).await.unwrap();

        let err = c.toggle_watchlist(550).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Remote {
                action: Action::ToggleWatchlist,
                ..
            }
        ));
        assert!(c.cached_states(550).unwrap().watchlist);
    }

    #[tokio::test]
    async fn guest_states_come_from_rated_list() {
        let gateway = Arc::new(MockGateway::new().with_states(
            27205,
            AccountStates {
                rated: Some(9.0),
                ..Default::default()
            },
        ));
        let c = controller(gateway.clone(), AuthState::Guest);
        let states = c.load_states(27205).await.unwrap();
        assert_eq!(states.rated, Some(9.0));
        assert!(!states.favorite);
        assert_eq!(gateway.calls(), vec![Call::RatedMovies]);
    }

    #[tokio::test]
    async fn guest_can_rate_and_unrate() {
        let gateway = Arc::new(MockGateway::new());
        let c = controller(gateway.clone(), AuthState::Guest);
        assert_eq!(c.rate(603, 85).await, Ok(8.5));
        assert_eq!(gateway.server_states(603).rated, Some(8.5));
        c.delete_rating(603).await.unwrap();
        assert_eq!(c.cached_states(603).unwrap().rated, None);
        assert_eq!(
            c.toggle_watchlist(603).await,
            Err(ControllerError::AuthRequired)
        );
    }
}
