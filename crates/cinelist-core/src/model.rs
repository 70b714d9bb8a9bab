//! Domain and wire types shared by the gateway, stores and controllers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque TMDB list identifier.
pub type ListId = u64;

/// Kind of media a list item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(kind, id)` reference to a movie or TV series.
///
/// Serializes in the shape the list item endpoints expect:
/// `{"media_type": "movie", "media_id": 550}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(rename = "media_type")]
    pub kind: MediaKind,
    #[serde(rename = "media_id")]
    pub id: u64,
}

impl MediaRef {
    pub fn movie(id: u64) -> Self {
        Self {
            kind: MediaKind::Movie,
            id,
        }
    }

    pub fn tv(id: u64) -> Self {
        Self {
            kind: MediaKind::Tv,
            id,
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Parses `movie:550`, `tv:1399`, or a bare id (treated as a movie).
impl FromStr for MediaRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, id) = match s.split_once(':') {
            Some(("movie", id)) => (MediaKind::Movie, id),
            Some(("tv", id)) => (MediaKind::Tv, id),
            Some((other, _)) => return Err(format!("unknown media kind '{}'", other)),
            None => (MediaKind::Movie, s),
        };
        let id = id
            .parse::<u64>()
            .map_err(|_| format!("invalid media id '{}'", id))?;
        Ok(Self { kind, id })
    }
}

/// One item of a list as returned by `GET /4/list/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawListEntry", into = "RawListEntry")]
pub struct ListEntry {
    pub media: MediaRef,
    /// Movie title or series name, absent for optimistic placeholders.
    pub title: Option<String>,
    pub poster_path: Option<String>,
}

impl ListEntry {
    /// Placeholder entry used while an add is still in flight.
    pub fn placeholder(media: MediaRef) -> Self {
        Self {
            media,
            title: None,
            poster_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawListEntry {
    id: u64,
    #[serde(default)]
    media_type: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
}

impl From<RawListEntry> for ListEntry {
    fn from(raw: RawListEntry) -> Self {
        let kind = raw.media_type.unwrap_or(MediaKind::Movie);
        Self {
            media: MediaRef { kind, id: raw.id },
            title: raw.title.or(raw.name),
            poster_path: raw.poster_path,
        }
    }
}

impl From<ListEntry> for RawListEntry {
    fn from(entry: ListEntry) -> Self {
        let (title, name) = match entry.media.kind {
            MediaKind::Movie => (entry.title, None),
            MediaKind::Tv => (None, entry.title),
        };
        Self {
            id: entry.media.id,
            media_type: Some(entry.media.kind),
            title,
            name,
            poster_path: entry.poster_path,
        }
    }
}

/// A fully loaded list with its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDetails {
    pub id: ListId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub public: bool,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub iso_639_1: Option<String>,
    #[serde(default)]
    pub iso_3166_1: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    /// v4 list pages carry their items under `results`.
    #[serde(default, alias = "results")]
    pub items: Vec<ListEntry>,
}

impl ListDetails {
    pub fn contains(&self, media: &MediaRef) -> bool {
        self.items.iter().any(|e| e.media == *media)
    }

    pub fn media(&self) -> Vec<MediaRef> {
        self.items.iter().map(|e| e.media).collect()
    }
}

/// A list as it appears in the account's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSummary {
    pub id: ListId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "number_of_items")]
    pub item_count: u32,
    #[serde(default)]
    pub favorite_count: u32,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub public: bool,
}

impl From<&ListDetails> for ListSummary {
    fn from(list: &ListDetails) -> Self {
        Self {
            id: list.id,
            name: list.name.clone(),
            description: list.description.clone(),
            item_count: list.items.len() as u32,
            favorite_count: 0,
            public: list.public,
        }
    }
}

/// Parameters for creating or editing a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewList {
    pub name: String,
    pub description: String,
    pub public: bool,
    pub sort_by: String,
    pub iso_639_1: String,
    pub iso_3166_1: String,
}

pub const DEFAULT_SORT_BY: &str = "original_order.asc";

impl NewList {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            public: false,
            sort_by: DEFAULT_SORT_BY.to_string(),
            iso_639_1: "ko".to_string(),
            iso_3166_1: "KR".to_string(),
        }
    }
}

/// Standard envelope returned by every mutating endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub status_message: String,
}

impl MutationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            status_code: 1,
            status_message: "Success.".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Response of `POST /4/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedList {
    pub id: ListId,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub status_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u32,
}

impl<T> Paginated<T> {
    pub fn empty() -> Self {
        Self {
            page: 1,
            results: Vec::new(),
            total_pages: 0,
            total_results: 0,
        }
    }
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: u64,
    pub name: String,
}

/// Full movie details from `GET /3/movie/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub vote_average: Option<f64>,
}

/// The reduced movie shape used by browse, search and similar endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRating {
    pub value: f64,
}

/// A movie from one of the rated collections. v3 guest sessions report
/// `rating`, v4 accounts report `account_rating.value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedMovie {
    #[serde(flatten)]
    pub movie: MovieSummary,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub account_rating: Option<AccountRating>,
}

impl RatedMovie {
    pub fn value(&self) -> Option<f64> {
        self.rating
            .or_else(|| self.account_rating.as_ref().map(|r| r.value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub credit_id: String,
    #[serde(default)]
    pub gender: Option<u8>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub credit_id: String,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    pub id: u64,
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub site: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub published_at: Option<String>,
}

impl Video {
    pub fn is_youtube_trailer(&self) -> bool {
        self.site == "YouTube" && self.kind == "Trailer"
    }

    pub fn watch_url(&self) -> Option<String> {
        (self.site == "YouTube").then(|| format!("https://www.youtube.com/watch?v={}", self.key))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Videos {
    pub id: u64,
    #[serde(default)]
    pub results: Vec<Video>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonDetails {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub deathday: Option<String>,
    #[serde(default)]
    pub gender: u8,
    #[serde(default)]
    pub biography: String,
    #[serde(default)]
    pub place_of_birth: Option<String>,
    #[serde(default)]
    pub profile_path: Option<String>,
    #[serde(default)]
    pub known_for_department: Option<String>,
    #[serde(default)]
    pub popularity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonCastCredit {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonCrewCredit {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub poster_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonMovieCredits {
    pub id: u64,
    #[serde(default)]
    pub cast: Vec<PersonCastCredit>,
    #[serde(default)]
    pub crew: Vec<PersonCrewCredit>,
}

/// Per-movie state for the signed-in account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountStates {
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub watchlist: bool,
    /// TMDB reports `false` when unrated and `{"value": 7.5}` otherwise.
    #[serde(default, deserialize_with = "rated_value")]
    pub rated: Option<f64>,
}

impl AccountStates {
    /// Rating on the 0–100 scale used by the client.
    pub fn rating_percent(&self) -> Option<u8> {
        self.rated.map(|v| (v * 10.0).round().clamp(0.0, 100.0) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmdbAvatar {
    #[serde(default)]
    pub avatar_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gravatar {
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
    #[serde(default)]
    pub gravatar: Option<Gravatar>,
    #[serde(default)]
    pub tmdb: Option<TmdbAvatar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Avatar,
}

fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(i)) => i != 0,
        None => false,
    })
}

fn rated_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Rated {
        Flag(bool),
        Number(f64),
        Value { value: f64 },
    }
    Ok(match Option::<Rated>::deserialize(deserializer)? {
        Some(Rated::Value { value }) | Some(Rated::Number(value)) => Some(value),
        _ => None,
    })
}
