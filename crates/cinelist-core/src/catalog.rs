//! Cached read-only catalog: browse feeds, movie and person pages, search.

use std::sync::Arc;

use futures_util::future::{try_join, try_join4};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::QueryCache;
use crate::gateway::endpoints;
use crate::gateway::{ApiError, GatewayFuture, TmdbClient};
use crate::model::{
    Credits, Movie, MovieSummary, Paginated, PersonDetails, PersonMovieCredits, Video, Videos,
};
use crate::search::SearchSource;

/// A browse feed on the home screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Trending,
    Popular,
    Upcoming,
    TopRated,
    NowPlaying,
}

impl Feed {
    pub const ALL: [Feed; 5] = [
        Feed::Trending,
        Feed::Popular,
        Feed::Upcoming,
        Feed::TopRated,
        Feed::NowPlaying,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Feed::Trending => endpoints::TRENDING_MOVIES,
            Feed::Popular => endpoints::POPULAR_MOVIES,
            Feed::Upcoming => endpoints::UPCOMING_MOVIES,
            Feed::TopRated => endpoints::TOP_RATED_MOVIES,
            Feed::NowPlaying => endpoints::NOW_PLAYING_MOVIES,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Feed::Trending => "trending",
            Feed::Popular => "popular",
            Feed::Upcoming => "upcoming",
            Feed::TopRated => "top_rated",
            Feed::NowPlaying => "now_playing",
        }
    }

    /// Release-date feeds are filtered by region.
    fn regional(self) -> bool {
        matches!(self, Feed::Upcoming | Feed::NowPlaying)
    }
}

/// Everything shown on a movie's detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct MoviePage {
    pub movie: Movie,
    pub credits: Credits,
    pub similar: Vec<MovieSummary>,
    pub trailers: Vec<Video>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonPage {
    pub person: PersonDetails,
    pub credits: PersonMovieCredits,
}

/// YouTube trailers only, in the order TMDB lists them.
pub fn trailers(videos: Videos) -> Vec<Video> {
    videos
        .results
        .into_iter()
        .filter(Video::is_youtube_trailer)
        .collect()
}

fn search_key(query: &str, page: u32) -> String {
    format!("search:{}:{page}", query.trim().to_lowercase())
}

pub struct Catalog {
    client: Arc<TmdbClient>,
    cache: Arc<QueryCache>,
    region: String,
}

impl Catalog {
    pub fn new(client: Arc<TmdbClient>, cache: Arc<QueryCache>, region: impl Into<String>) -> Self {
        Self {
            client,
            cache,
            region: region.into(),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    async fn cached<T>(
        &self,
        key: &str,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
    {
        self.cache
            .fetch(key, move || async move { self.client.v3_get(path, params).await })
            .await
    }

    pub async fn feed(&self, feed: Feed, page: u32) -> Result<Paginated<MovieSummary>, ApiError> {
        let mut params = vec![("page", page.to_string())];
        if feed.regional() {
            params.push(("region", self.region.clone()));
        }
        let key = format!("feed:{}:{page}", feed.key());
        self.cached(&key, feed.path(), &params).await
    }

    pub async fn movie(&self, id: u64) -> Result<Movie, ApiError> {
        self.cached(&format!("movie:{id}"), &endpoints::movie_details(id), &[])
            .await
    }

    pub async fn credits(&self, id: u64) -> Result<Credits, ApiError> {
        self.cached(
            &format!("movie:{id}:credits"),
            &endpoints::movie_credits(id),
            &[],
        )
        .await
    }

    pub async fn similar(&self, id: u64) -> Result<Vec<MovieSummary>, ApiError> {
        let page: Paginated<MovieSummary> = self
            .cached(
                &format!("movie:{id}:similar"),
                &endpoints::similar_movies(id),
                &[("page", "1".to_string())],
            )
            .await?;
        Ok(page.results)
    }

    pub async fn trailers(&self, id: u64) -> Result<Vec<Video>, ApiError> {
        let videos: Videos = self
            .cached(
                &format!("movie:{id}:videos"),
                &endpoints::movie_videos(id),
                &[],
            )
            .await?;
        Ok(trailers(videos))
    }

    pub async fn person(&self, id: u64) -> Result<PersonDetails, ApiError> {
        self.cached(&format!("person:{id}"), &endpoints::person_details(id), &[])
            .await
    }

    pub async fn person_credits(&self, id: u64) -> Result<PersonMovieCredits, ApiError> {
        self.cached(
            &format!("person:{id}:credits"),
            &endpoints::person_movie_credits(id),
            &[],
        )
        .await
    }

    /// Details, credits, similar titles and trailers, fetched concurrently.
    pub async fn movie_page(&self, id: u64) -> Result<MoviePage, ApiError> {
        let (movie, credits, similar, trailers) = try_join4(
            self.movie(id),
            self.credits(id),
            self.similar(id),
            self.trailers(id),
        )
        .await?;
        Ok(MoviePage {
            movie,
            credits,
            similar,
            trailers,
        })
    }

    pub async fn person_page(&self, id: u64) -> Result<PersonPage, ApiError> {
        let (person, credits) = try_join(self.person(id), self.person_credits(id)).await?;
        Ok(PersonPage { person, credits })
    }

    pub async fn search(&self, query: &str, page: u32) -> Result<Paginated<MovieSummary>, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Paginated::empty());
        }
        let params = [
            ("query", query.to_string()),
            ("page", page.to_string()),
            ("include_adult", "false".to_string()),
        ];
        self.cached(&search_key(query, page), endpoints::SEARCH_MOVIES, &params)
            .await
    }
}

impl SearchSource for Catalog {
    fn search_movies<'a>(
        &'a self,
        query: &'a str,
        page: u32,
    ) -> GatewayFuture<'a, Paginated<MovieSummary>> {
        Box::pin(self.search(query, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use crate::session::TokenStore;

    fn offline_client() -> Arc<TmdbClient> {
        let tokens = Arc::new(TokenStore::in_memory());
        Arc::new(TmdbClient::new(&Config::default(), tokens).unwrap())
    }

    fn video(key: &str, site: &str, kind: &str) -> Video {
        Video {
            id: key.to_string(),
            key: key.to_string(),
            name: String::new(),
            site: site.to_string(),
            kind: kind.to_string(),
            official: true,
            published_at: None,
        }
    }

    #[test]
    fn keeps_only_youtube_trailers() {
        let videos = Videos {
            id: 550,
            results: vec![
                video("a", "YouTube", "Teaser"),
                video("b", "YouTube", "Trailer"),
                video("c", "Vimeo", "Trailer"),
                video("d", "YouTube", "Trailer"),
            ],
        };
        let keys: Vec<String> = trailers(videos).into_iter().map(|v| v.key).collect();
        assert_eq!(keys, vec!["b", "d"]);
    }

    #[test]
    fn feed_paths_and_keys() {
        assert_eq!(Feed::Trending.path(), "/trending/movie/day");
        assert_eq!(Feed::TopRated.key(), "top_rated");
        assert!(Feed::Upcoming.regional());
        assert!(!Feed::Popular.regional());
    }

    #[test]
    fn search_keys_ignore_case_and_padding() {
        assert_eq!(search_key("  Fight Club ", 1), search_key("fight club", 1));
        assert_ne!(search_key("fight club", 1), search_key("fight club", 2));
    }

    #[tokio::test]
    async fn fresh_cache_entry_skips_network() {
        // No credentials: any network attempt would fail with MissingCredential.
        let client = offline_client();
        let cache = Arc::new(QueryCache::default());
        let cached = Paginated {
            page: 1,
            results: vec![MovieSummary {
                id: 550,
                title: "Fight Club".into(),
                poster_path: None,
                release_date: None,
                vote_average: None,
            }],
            total_pages: 1,
            total_results: 1,
        };
        cache.insert("feed:popular:1", &cached);
        let catalog = Catalog::new(client, cache, "KR");

        assert_eq!(catalog.feed(Feed::Popular, 1).await.unwrap(), cached);
        assert!(matches!(
            catalog.feed(Feed::Popular, 2).await,
            Err(ApiError::MissingCredential(_))
        ));
    }

    #[tokio::test]
    async fn blank_search_is_empty() {
        let client = offline_client();
        let catalog = Catalog::new(client, Arc::new(QueryCache::default()), "KR");
        let page = catalog.search("   ", 1).await.unwrap();
        assert!(page.results.is_empty());
    }
}
