//! reqwest-backed TMDB client covering the v3 and v4 APIs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::endpoints;
use super::{AccountGateway, ApiError, GatewayFuture, ListGateway, ensure_success};
use crate::Config;
use crate::model::{
    AccountDetails, AccountStates, CreatedList, ListDetails, ListId, ListSummary, MediaRef,
    MovieSummary, MutationResponse, NewList, Paginated, RatedMovie,
};
use crate::rate_limit::{ApiVersion, RateLimiters, reject_rate_limited, with_rate_limit};
use crate::session::TokenStore;

/// Upper bound on pages fetched when merging a paginated collection.
const MAX_PAGES: u32 = 50;

/// How a v3 request identifies the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum V3Auth {
    App,
    Session,
    SessionOrGuest,
}

#[derive(Deserialize)]
struct ListPage {
    #[serde(flatten)]
    details: ListDetails,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Deserialize)]
struct RequestToken {
    request_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// v4 account object id.
    pub account_id: String,
}

#[derive(Deserialize)]
struct SessionId {
    session_id: String,
}

#[derive(Deserialize)]
struct GuestSession {
    guest_session_id: String,
}

pub struct TmdbClient {
    http: reqwest::Client,
    api_key: Option<String>,
    read_token: Option<String>,
    v3_base: String,
    v4_base: String,
    language: String,
    timeout: Duration,
    tokens: Arc<TokenStore>,
    limiters: Arc<RateLimiters>,
}

impl TmdbClient {
    pub fn new(config: &Config, tokens: Arc<TokenStore>) -> Result<Self, ApiError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cinelist/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            read_token: config.read_token.clone(),
            v3_base: config.v3_base_url.trim_end_matches('/').to_string(),
            v4_base: config.v4_base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            timeout,
            tokens,
            limiters: Arc::new(RateLimiters::new(config.requests_per_second)),
        })
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    // ── request plumbing ───────────────────────────────────────────────

    fn v3_params(&self, auth: V3Auth) -> Result<Vec<(&'static str, String)>, ApiError> {
        let mut params = Vec::with_capacity(3);
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        let creds = self.tokens.snapshot();
        match auth {
            V3Auth::App => {}
            V3Auth::Session => {
                let session = creds
                    .session_id
                    .clone()
                    .ok_or(ApiError::MissingCredential("session id"))?;
                params.push(("session_id", session));
            }
            V3Auth::SessionOrGuest => {
                if let Some(session) = &creds.session_id {
                    params.push(("session_id", session.clone()));
                } else if let Some(guest) = &creds.guest_session_id {
                    params.push(("guest_session_id", guest.clone()));
                } else {
                    return Err(ApiError::MissingCredential("session id"));
                }
            }
        }
        Ok(params)
    }

    /// v3 accepts either `api_key` or the read token as a bearer.
    fn v3_bearer(&self) -> Result<Option<String>, ApiError> {
        match (&self.api_key, &self.read_token) {
            (Some(_), _) => Ok(None),
            (None, Some(token)) => Ok(Some(token.clone())),
            (None, None) => Err(ApiError::MissingCredential("api key")),
        }
    }

    /// User-owned v4 paths need the user's access token, everything else
    /// runs on the application read token.
    fn v4_bearer(&self, path: &str) -> Result<String, ApiError> {
        if endpoints::requires_user_token(path) {
            self.tokens
                .snapshot()
                .access_token
                .clone()
                .ok_or(ApiError::MissingCredential("user access token"))
        } else {
            self.read_token
                .clone()
                .ok_or(ApiError::MissingCredential("application read token"))
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        version: ApiVersion,
        method: Method,
        path: &str,
        bearer: Option<String>,
        params: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let base = match version {
            ApiVersion::V3 => &self.v3_base,
            ApiVersion::V4 => &self.v4_base,
        };
        let url = format!("{base}{path}");
        let label = format!("{} {}{}", method, version.as_str(), path);
        tracing::trace!(request = %label, "tmdb request");

        let result = with_rate_limit(
            self.limiters.get(version),
            &label,
            self.timeout,
            || {
                let mut req = self.http.request(method.clone(), &url).query(params);
                if let Some(token) = &bearer {
                    req = req.bearer_auth(token);
                }
                if let Some(body) = &body {
                    req = req.json(body);
                }
                async move { decode(req.send().await?).await }
            },
        )
        .await;

        if let Err(e) = &result {
            tracing::debug!(request = %label, error = %e, "tmdb request failed");
        }
        result
    }

    async fn v3<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        auth: V3Auth,
        extra: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let mut params: Vec<(&str, String)> = self.v3_params(auth)?;
        params.extend(extra.iter().map(|(k, v)| (*k, v.clone())));
        let bearer = self.v3_bearer()?;
        self.send(ApiVersion::V3, method, path, bearer, &params, body)
            .await
    }

    async fn v4<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let bearer = self.v4_bearer(path)?;
        self.send(ApiVersion::V4, method, path, Some(bearer), params, body)
            .await
    }

    /// Public catalog GET in the configured language.
    pub async fn v3_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut extra = vec![("language", self.language.clone())];
        extra.extend(params.iter().map(|(k, v)| (*k, v.clone())));
        self.v3(Method::GET, path, V3Auth::App, &extra, None).await
    }

    fn object_id(&self) -> Result<String, ApiError> {
        self.tokens
            .snapshot()
            .account_object_id
            .clone()
            .ok_or(ApiError::MissingCredential("account object id"))
    }

    fn account_id(&self) -> Result<u64, ApiError> {
        self.tokens
            .snapshot()
            .account_id
            .ok_or(ApiError::MissingCredential("account id"))
    }

    async fn v4_movie_collection(&self, collection: &str) -> Result<Vec<MovieSummary>, ApiError> {
        let path = endpoints::account_movies(&self.object_id()?, collection);
        let pages = collect_pages(|page| {
            let path = path.as_str();
            async move {
                self.v4::<Paginated<MovieSummary>>(
                    Method::GET,
                    path,
                    &[("page", page.to_string())],
                    None,
                )
                .await
            }
        })
        .await;
        empty_on_not_found(pages)
    }

    // ── authentication ─────────────────────────────────────────────────

    /// Step one of the v4 flow: a request token the user must approve.
    pub async fn request_token_v4(&self, redirect_to: Option<&str>) -> Result<String, ApiError> {
        let body = redirect_to.map(|r| json!({ "redirect_to": r }));
        let token: RequestToken = self
            .v4(Method::POST, endpoints::REQUEST_TOKEN_V4, &[], body)
            .await?;
        Ok(token.request_token)
    }

    /// Exchange an approved v4 request token for a user access token.
    pub async fn access_token_v4(&self, request_token: &str) -> Result<AccessToken, ApiError> {
        self.v4(
            Method::POST,
            endpoints::ACCESS_TOKEN_V4,
            &[],
            Some(json!({ "request_token": request_token })),
        )
        .await
    }

    pub async fn revoke_access_token_v4(&self, access_token: &str) -> Result<(), ApiError> {
        let resp: MutationResponse = self
            .v4(
                Method::DELETE,
                endpoints::ACCESS_TOKEN_V4,
                &[],
                Some(json!({ "access_token": access_token })),
            )
            .await?;
        ensure_success(resp).map(|_| ())
    }

    /// Derive a v3 session id from a v4 access token.
    pub async fn convert_to_v3_session(&self, access_token: &str) -> Result<String, ApiError> {
        let session: SessionId = self
            .v3(
                Method::POST,
                endpoints::SESSION_CONVERT_V4,
                V3Auth::App,
                &[],
                Some(json!({ "access_token": access_token })),
            )
            .await?;
        Ok(session.session_id)
    }

    pub async fn request_token_v3(&self) -> Result<String, ApiError> {
        let token: RequestToken = self
            .v3(Method::GET, endpoints::REQUEST_TOKEN_V3, V3Auth::App, &[], None)
            .await?;
        Ok(token.request_token)
    }

    pub async fn create_session_v3(&self, request_token: &str) -> Result<String, ApiError> {
        let session: SessionId = self
            .v3(
                Method::POST,
                endpoints::SESSION_NEW,
                V3Auth::App,
                &[],
                Some(json!({ "request_token": request_token })),
            )
            .await?;
        Ok(session.session_id)
    }

    pub async fn delete_session_v3(&self, session_id: &str) -> Result<(), ApiError> {
        let resp: MutationResponse = self
            .v3(
                Method::DELETE,
                "/authentication/session",
                V3Auth::App,
                &[],
                Some(json!({ "session_id": session_id })),
            )
            .await?;
        ensure_success(resp).map(|_| ())
    }

    pub async fn create_guest_session(&self) -> Result<String, ApiError> {
        let guest: GuestSession = self
            .v3(Method::GET, endpoints::GUEST_SESSION_NEW, V3Auth::App, &[], None)
            .await?;
        Ok(guest.guest_session_id)
    }

    pub async fn account_details(&self) -> Result<AccountDetails, ApiError> {
        self.v3(Method::GET, endpoints::ACCOUNT, V3Auth::Session, &[], None)
            .await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    reject_rate_limited(&resp)?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::from_status(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Last page to fetch. Warns when the server has more than [`MAX_PAGES`],
/// since everything past the cap is silently absent from the result.
fn last_page(total_pages: u32, what: &str) -> u32 {
    if total_pages > MAX_PAGES {
        tracing::warn!(
            what,
            total_pages,
            max_pages = MAX_PAGES,
            "result truncated at page limit"
        );
    }
    total_pages.min(MAX_PAGES)
}

/// Fetch page 1, then every remaining page up to [`MAX_PAGES`].
async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Paginated<T>, ApiError>>,
{
    let first = fetch(1).await?;
    let total = last_page(first.total_pages, "collection");
    let mut out = first.results;
    for page in 2..=total {
        out.extend(fetch(page).await?.results);
    }
    Ok(out)
}

/// Account collections that were never created come back as 404.
fn empty_on_not_found<T>(result: Result<Vec<T>, ApiError>) -> Result<Vec<T>, ApiError> {
    match result {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}

fn items_body(items: &[MediaRef]) -> Value {
    json!({ "items": items })
}

fn list_body(list: &NewList) -> Value {
    json!({
        "name": list.name,
        "description": list.description,
        "public": list.public,
        "sort_by": list.sort_by,
        "iso_639_1": list.iso_639_1,
        "iso_3166_1": list.iso_3166_1,
    })
}

impl ListGateway for TmdbClient {
    fn get_list<'a>(&'a self, list_id: ListId) -> GatewayFuture<'a, ListDetails> {
        Box::pin(async move {
            let path = endpoints::list(list_id);
            let first: ListPage = self
                .v4(Method::GET, &path, &[("page", "1".to_string())], None)
                .await?;
            let mut details = first.details;
            for page in 2..=last_page(first.total_pages, &path) {
                let next: ListPage = self
                    .v4(Method::GET, &path, &[("page", page.to_string())], None)
                    .await?;
                details.items.extend(next.details.items);
            }
            Ok(details)
        })
    }

    fn add_items<'a>(
        &'a self,
        list_id: ListId,
        items: &'a [MediaRef],
    ) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let resp = self
                .v4(
                    Method::POST,
                    &endpoints::list_items(list_id),
                    &[],
                    Some(items_body(items)),
                )
                .await?;
            ensure_success(resp)
        })
    }

    fn remove_items<'a>(
        &'a self,
        list_id: ListId,
        items: &'a [MediaRef],
    ) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let resp = self
                .v4(
                    Method::DELETE,
                    &endpoints::list_items(list_id),
                    &[],
                    Some(items_body(items)),
                )
                .await?;
            ensure_success(resp)
        })
    }

    fn delete_list<'a>(&'a self, list_id: ListId) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let resp = self
                .v4(Method::DELETE, &endpoints::list(list_id), &[], None)
                .await?;
            ensure_success(resp)
        })
    }

    fn create_list<'a>(&'a self, list: &'a NewList) -> GatewayFuture<'a, CreatedList> {
        Box::pin(async move {
            let created: CreatedList = self
                .v4(Method::POST, endpoints::LIST, &[], Some(list_body(list)))
                .await?;
            if !created.success {
                return Err(ApiError::Rejected {
                    status: 200,
                    message: created.status_message,
                });
            }
            Ok(created)
        })
    }

    fn update_list<'a>(
        &'a self,
        list_id: ListId,
        list: &'a NewList,
    ) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let resp = self
                .v4(
                    Method::PUT,
                    &endpoints::list(list_id),
                    &[],
                    Some(list_body(list)),
                )
                .await?;
            ensure_success(resp)
        })
    }

    fn account_lists<'a>(&'a self) -> GatewayFuture<'a, Vec<ListSummary>> {
        Box::pin(async move {
            let path = endpoints::account_lists(&self.object_id()?);
            let lists = collect_pages(|page| {
                let path = path.as_str();
                async move {
                    self.v4::<Paginated<ListSummary>>(
                        Method::GET,
                        path,
                        &[("page", page.to_string())],
                        None,
                    )
                    .await
                }
            })
            .await;
            empty_on_not_found(lists)
        })
    }

    fn item_status<'a>(&'a self, list_id: ListId, media: MediaRef) -> GatewayFuture<'a, bool> {
        Box::pin(async move {
            #[derive(Deserialize)]
            struct ItemStatus {
                #[serde(default)]
                status: Option<String>,
                #[serde(default)]
                success: bool,
            }
            let params = [
                ("media_id", media.id.to_string()),
                ("media_type", media.kind.as_str().to_string()),
            ];
            match self
                .v4::<ItemStatus>(
                    Method::GET,
                    &endpoints::list_item_status(list_id),
                    &params,
                    None,
                )
                .await
            {
                Ok(s) => Ok(s.success && s.status.as_deref().is_none_or(|st| st == "present")),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        })
    }
}

impl AccountGateway for TmdbClient {
    fn account_states<'a>(&'a self, movie_id: u64) -> GatewayFuture<'a, AccountStates> {
        Box::pin(async move {
            self.v3(
                Method::GET,
                &endpoints::account_states(movie_id),
                V3Auth::Session,
                &[],
                None,
            )
            .await
        })
    }

    fn set_favorite<'a>(
        &'a self,
        media: MediaRef,
        favorite: bool,
    ) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let body = json!({
                "media_type": media.kind,
                "media_id": media.id,
                "favorite": favorite,
            });
            let resp = self
                .v3(
                    Method::POST,
                    &endpoints::account_favorite(self.account_id()?),
                    V3Auth::Session,
                    &[],
                    Some(body),
                )
                .await?;
            ensure_success(resp)
        })
    }

    fn set_watchlist<'a>(
        &'a self,
        media: MediaRef,
        watchlist: bool,
    ) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let body = json!({
                "media_type": media.kind,
                "media_id": media.id,
                "watchlist": watchlist,
            });
            let resp = self
                .v3(
                    Method::POST,
                    &endpoints::account_watchlist(self.account_id()?),
                    V3Auth::Session,
                    &[],
                    Some(body),
                )
                .await?;
            ensure_success(resp)
        })
    }

    fn rate_movie<'a>(&'a self, movie_id: u64, value: f64) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let resp = self
                .v3(
                    Method::POST,
                    &endpoints::movie_rating(movie_id),
                    V3Auth::SessionOrGuest,
                    &[],
                    Some(json!({ "value": value })),
                )
                .await?;
            ensure_success(resp)
        })
    }

    fn delete_rating<'a>(&'a self, movie_id: u64) -> GatewayFuture<'a, MutationResponse> {
        Box::pin(async move {
            let resp = self
                .v3(
                    Method::DELETE,
                    &endpoints::movie_rating(movie_id),
                    V3Auth::SessionOrGuest,
                    &[],
                    None,
                )
                .await?;
            ensure_success(resp)
        })
    }

    fn rated_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<RatedMovie>> {
        Box::pin(async move {
            let creds = self.tokens.snapshot();
            let rated = if creds.access_token.is_some() && creds.account_object_id.is_some() {
                let path = endpoints::account_movies(&self.object_id()?, "rated");
                collect_pages(|page| {
                    let path = path.as_str();
                    async move {
                        self.v4::<Paginated<RatedMovie>>(
                            Method::GET,
                            path,
                            &[("page", page.to_string())],
                            None,
                        )
                        .await
                    }
                })
                .await
            } else if let Some(guest) = &creds.guest_session_id {
                let path = endpoints::guest_rated_movies(guest);
                collect_pages(|page| {
                    let path = path.as_str();
                    async move {
                        self.v3::<Paginated<RatedMovie>>(
                            Method::GET,
                            path,
                            V3Auth::App,
                            &[("page", page.to_string())],
                            None,
                        )
                        .await
                    }
                })
                .await
            } else {
                return Err(ApiError::MissingCredential("session id"));
            };
            empty_on_not_found(rated)
        })
    }

    fn favorite_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<MovieSummary>> {
        Box::pin(self.v4_movie_collection("favorites"))
    }

    fn watchlist_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<MovieSummary>> {
        Box::pin(self.v4_movie_collection("watchlist"))
    }
}
