//! Endpoint paths, relative to the v3 or v4 base URL.

use crate::model::ListId;

pub const V3_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const V4_BASE_URL: &str = "https://api.themoviedb.org/4";
pub const WEB_BASE_URL: &str = "https://www.themoviedb.org";

pub const TRENDING_MOVIES: &str = "/trending/movie/day";
pub const UPCOMING_MOVIES: &str = "/movie/upcoming";
pub const TOP_RATED_MOVIES: &str = "/movie/top_rated";
pub const NOW_PLAYING_MOVIES: &str = "/movie/now_playing";
pub const POPULAR_MOVIES: &str = "/movie/popular";
pub const SEARCH_MOVIES: &str = "/search/movie";

pub fn movie_details(id: u64) -> String {
    format!("/movie/{id}")
}

pub fn movie_credits(id: u64) -> String {
    format!("/movie/{id}/credits")
}

pub fn similar_movies(id: u64) -> String {
    format!("/movie/{id}/similar")
}

pub fn movie_videos(id: u64) -> String {
    format!("/movie/{id}/videos")
}

pub fn person_details(id: u64) -> String {
    format!("/person/{id}")
}

pub fn person_movie_credits(id: u64) -> String {
    format!("/person/{id}/movie_credits")
}

pub fn account_states(movie_id: u64) -> String {
    format!("/movie/{movie_id}/account_states")
}

pub fn movie_rating(movie_id: u64) -> String {
    format!("/movie/{movie_id}/rating")
}

pub fn account_favorite(account_id: u64) -> String {
    format!("/account/{account_id}/favorite")
}

pub fn account_watchlist(account_id: u64) -> String {
    format!("/account/{account_id}/watchlist")
}

pub fn guest_rated_movies(guest_session_id: &str) -> String {
    format!("/guest_session/{guest_session_id}/rated/movies")
}

// v4

pub const LIST: &str = "/list";

pub fn list(list_id: ListId) -> String {
    format!("/list/{list_id}")
}

pub fn list_items(list_id: ListId) -> String {
    format!("/list/{list_id}/items")
}

pub fn list_item_status(list_id: ListId) -> String {
    format!("/list/{list_id}/item_status")
}

pub fn account_lists(account_object_id: &str) -> String {
    format!("/account/{account_object_id}/lists")
}

pub fn account_movies(account_object_id: &str, collection: &str) -> String {
    format!("/account/{account_object_id}/movie/{collection}")
}

// auth

pub const REQUEST_TOKEN_V3: &str = "/authentication/token/new";
pub const SESSION_NEW: &str = "/authentication/session/new";
pub const GUEST_SESSION_NEW: &str = "/authentication/guest_session/new";
pub const SESSION_CONVERT_V4: &str = "/authentication/session/convert/4";
pub const ACCOUNT: &str = "/account";
pub const REQUEST_TOKEN_V4: &str = "/auth/request_token";
pub const ACCESS_TOKEN_V4: &str = "/auth/access_token";

/// Whether a v4 path touches user-owned data and so needs the user's token.
pub fn requires_user_token(path: &str) -> bool {
    path.starts_with("/list") || path.starts_with("/account")
}

/// Page through approval for a v3 request token.
pub fn v3_approval_url(request_token: &str, redirect_to: Option<&str>) -> String {
    let mut url = format!("{WEB_BASE_URL}/authenticate/{request_token}");
    if let Some(redirect) = redirect_to {
        url.push_str(&format!("?redirect_to={}", urlencoding::encode(redirect)));
    }
    url
}

/// Page through approval for a v4 request token.
pub fn v4_approval_url(request_token: &str) -> String {
    format!(
        "{WEB_BASE_URL}/auth/access?request_token={}",
        urlencoding::encode(request_token)
    )
}
