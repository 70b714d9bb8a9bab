//! In-memory gateway for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::{AccountGateway, ApiError, GatewayFuture, ListGateway};
use crate::model::{
    AccountStates, CreatedList, ListDetails, ListEntry, ListId, ListSummary, MediaRef,
    MovieSummary, MutationResponse, NewList, Paginated, RatedMovie,
};
use crate::search::SearchSource;

/// Outcome scripted for the next mutating call on [`MockGateway`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Apply the mutation to the server state and succeed.
    Ok,
    /// Leave the server state untouched and fail.
    Fail(ApiError),
    /// Wait, then behave like the inner response.
    Delayed(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn not_found() -> Self {
        MockResponse::Fail(ApiError::NotFound {
            message: "The resource you requested could not be found.".into(),
        })
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        MockResponse::Delayed(delay, Box::new(inner))
    }
}

/// A recorded gateway call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    GetList(ListId),
    AddItems(ListId, Vec<MediaRef>),
    RemoveItems(ListId, Vec<MediaRef>),
    DeleteList(ListId),
    CreateList(String),
    UpdateList(ListId, String),
    AccountLists,
    ItemStatus(ListId, MediaRef),
    AccountStates(u64),
    SetFavorite(MediaRef, bool),
    SetWatchlist(MediaRef, bool),
    RateMovie(u64, f64),
    DeleteRating(u64),
    RatedMovies,
    FavoriteMovies,
    WatchlistMovies,
    Search(String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::AddItems(..)
                | Call::RemoveItems(..)
                | Call::DeleteList(_)
                | Call::CreateList(_)
                | Call::UpdateList(..)
                | Call::SetFavorite(..)
                | Call::SetWatchlist(..)
                | Call::RateMovie(..)
                | Call::DeleteRating(_)
        )
    }
}

/// Hand-rolled gateway holding a fake server state.
///
/// Mutating calls consume scripted [`MockResponse`]s in order and fall back
/// to [`MockResponse::Ok`] once the script is exhausted. Reads always
/// reflect the current server state unless [`fail_reads`](Self::fail_reads)
/// is set.
pub struct MockGateway {
    lists: Mutex<BTreeMap<ListId, ListDetails>>,
    states: Mutex<HashMap<u64, AccountStates>>,
    catalog: Vec<MovieSummary>,
    responses: Mutex<Vec<MockResponse>>,
    read_failure: Mutex<Option<ApiError>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
    call_count: AtomicUsize,
    next_id: AtomicU64,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(BTreeMap::new()),
            states: Mutex::new(HashMap::new()),
            catalog: Vec::new(),
            responses: Mutex::new(Vec::new()),
            read_failure: Mutex::new(None),
            delay: None,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            next_id: AtomicU64::new(1000),
        }
    }

    pub fn with_list(self, list: ListDetails) -> Self {
        self.lists.lock().unwrap().insert(list.id, list);
        self
    }

    pub fn with_states(self, movie_id: u64, states: AccountStates) -> Self {
        self.states.lock().unwrap().insert(movie_id, states);
        self
    }

    /// Movies returned by search, matched by case-insensitive title substring.
    pub fn with_catalog(mut self, movies: Vec<MovieSummary>) -> Self {
        self.catalog = movies;
        self
    }

    /// Script the outcomes of the next mutating calls, in call order.
    pub fn with_sequence(self, mut responses: Vec<MockResponse>) -> Self {
        responses.reverse();
        *self.responses.lock().unwrap() = responses;
        self
    }

    /// Simulated latency for every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, response: MockResponse) {
        self.responses.lock().unwrap().insert(0, response);
    }

    pub fn fail_reads(&self, error: Option<ApiError>) {
        *self.read_failure.lock().unwrap() = error;
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    /// What the fake server currently holds for `list_id`.
    pub fn server_list(&self, list_id: ListId) -> Option<ListDetails> {
        self.lists.lock().unwrap().get(&list_id).cloned()
    }

    pub fn server_media(&self, list_id: ListId) -> Vec<MediaRef> {
        self.server_list(list_id)
            .map(|l| l.media())
            .unwrap_or_default()
    }

    pub fn server_states(&self, movie_id: u64) -> AccountStates {
        self.states
            .lock()
            .unwrap()
            .get(&movie_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);
    }

    fn next_response(&self) -> MockResponse {
        self.responses.lock().unwrap().pop().unwrap_or(MockResponse::Ok)
    }

    fn write<'a, T, F>(&'a self, call: Call, apply: F) -> GatewayFuture<'a, T>
    where
        T: Send + 'a,
        F: FnOnce(&MockGateway) -> Result<T, ApiError> + Send + 'a,
    {
        self.record(call);
        let mut response = self.next_response();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            loop {
                match response {
                    MockResponse::Delayed(d, inner) => {
                        tokio::time::sleep(d).await;
                        response = *inner;
                    }
                    MockResponse::Fail(e) => return Err(e),
                    MockResponse::Ok => return apply(self),
                }
            }
        })
    }

    fn read<'a, T, F>(&'a self, call: Call, f: F) -> GatewayFuture<'a, T>
    where
        T: Send + 'a,
        F: FnOnce(&MockGateway) -> Result<T, ApiError> + Send + 'a,
    {
        self.record(call);
        let failure = self.read_failure.lock().unwrap().clone();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match failure {
                Some(e) => Err(e),
                None => f(self),
            }
        })
    }

    fn with_server_list<T>(
        &self,
        list_id: ListId,
        f: impl FnOnce(&mut ListDetails) -> T,
    ) -> Result<T, ApiError> {
        let mut lists = self.lists.lock().unwrap();
        match lists.get_mut(&list_id) {
            Some(list) => Ok(f(list)),
            None => Err(ApiError::NotFound {
                message: format!("list {list_id} not found"),
            }),
        }
    }

    fn update_states(&self, movie_id: u64, f: impl FnOnce(&mut AccountStates)) {
        f(self.states.lock().unwrap().entry(movie_id).or_default());
    }
}

/// A list holding the given movie ids, in order.
pub fn list_with_movies(id: ListId, name: &str, movie_ids: &[u64]) -> ListDetails {
    ListDetails {
        id,
        name: name.to_string(),
        description: String::new(),
        public: false,
        sort_by: None,
        iso_639_1: None,
        iso_3166_1: None,
        created_at: None,
        updated_at: None,
        items: movie_ids
            .iter()
            .map(|&m| ListEntry::placeholder(MediaRef::movie(m)))
            .collect(),
    }
}

pub fn movie(id: u64, title: &str) -> MovieSummary {
    MovieSummary {
        id,
        title: title.to_string(),
        poster_path: None,
        release_date: None,
        vote_average: None,
    }
}

impl ListGateway for MockGateway {
    fn get_list<'a>(&'a self, list_id: ListId) -> GatewayFuture<'a, ListDetails> {
        self.read(Call::GetList(list_id), move |gw| {
            gw.with_server_list(list_id, |l| l.clone())
        })
    }

    fn add_items<'a>(
        &'a self,
        list_id: ListId,
        items: &'a [MediaRef],
    ) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::AddItems(list_id, items.to_vec()), move |gw| {
            gw.with_server_list(list_id, |l| {
                for media in items {
                    if !l.contains(media) {
                        l.items.push(ListEntry::placeholder(*media));
                    }
                }
            })?;
            Ok(MutationResponse::ok())
        })
    }

    fn remove_items<'a>(
        &'a self,
        list_id: ListId,
        items: &'a [MediaRef],
    ) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::RemoveItems(list_id, items.to_vec()), move |gw| {
            gw.with_server_list(list_id, |l| {
                l.items.retain(|e| !items.contains(&e.media));
            })?;
            Ok(MutationResponse::ok())
        })
    }

    fn delete_list<'a>(&'a self, list_id: ListId) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::DeleteList(list_id), move |gw| {
            match gw.lists.lock().unwrap().remove(&list_id) {
                Some(_) => Ok(MutationResponse::ok()),
                None => Err(ApiError::NotFound {
                    message: format!("list {list_id} not found"),
                }),
            }
        })
    }

    fn create_list<'a>(&'a self, list: &'a NewList) -> GatewayFuture<'a, CreatedList> {
        self.write(Call::CreateList(list.name.clone()), move |gw| {
            let id = gw.next_id.fetch_add(1, Ordering::SeqCst);
            let mut details = list_with_movies(id, &list.name, &[]);
            details.description = list.description.clone();
            details.public = list.public;
            details.sort_by = Some(list.sort_by.clone());
            gw.lists.lock().unwrap().insert(id, details);
            Ok(CreatedList {
                id,
                success: true,
                status_message: "The item/record was created successfully.".into(),
            })
        })
    }

    fn update_list<'a>(
        &'a self,
        list_id: ListId,
        list: &'a NewList,
    ) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::UpdateList(list_id, list.name.clone()), move |gw| {
            gw.with_server_list(list_id, |l| {
                l.name = list.name.clone();
                l.description = list.description.clone();
                l.public = list.public;
            })?;
            Ok(MutationResponse::ok())
        })
    }

    fn account_lists<'a>(&'a self) -> GatewayFuture<'a, Vec<ListSummary>> {
        self.read(Call::AccountLists, |gw| {
            Ok(gw
                .lists
                .lock()
                .unwrap()
                .values()
                .map(ListSummary::from)
                .collect())
        })
    }

    fn item_status<'a>(&'a self, list_id: ListId, media: MediaRef) -> GatewayFuture<'a, bool> {
        self.read(Call::ItemStatus(list_id, media), move |gw| {
            gw.with_server_list(list_id, |l| l.contains(&media))
        })
    }
}

impl AccountGateway for MockGateway {
    fn account_states<'a>(&'a self, movie_id: u64) -> GatewayFuture<'a, AccountStates> {
        self.read(Call::AccountStates(movie_id), move |gw| {
            Ok(gw.server_states(movie_id))
        })
    }

    fn set_favorite<'a>(
        &'a self,
        media: MediaRef,
        favorite: bool,
    ) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::SetFavorite(media, favorite), move |gw| {
            gw.update_states(media.id, |s| s.favorite = favorite);
            Ok(MutationResponse::ok())
        })
    }

    fn set_watchlist<'a>(
        &'a self,
        media: MediaRef,
        watchlist: bool,
    ) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::SetWatchlist(media, watchlist), move |gw| {
            gw.update_states(media.id, |s| s.watchlist = watchlist);
            Ok(MutationResponse::ok())
        })
    }

    fn rate_movie<'a>(&'a self, movie_id: u64, value: f64) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::RateMovie(movie_id, value), move |gw| {
            gw.update_states(movie_id, |s| s.rated = Some(value));
            Ok(MutationResponse::ok())
        })
    }

    fn delete_rating<'a>(&'a self, movie_id: u64) -> GatewayFuture<'a, MutationResponse> {
        self.write(Call::DeleteRating(movie_id), move |gw| {
            gw.update_states(movie_id, |s| s.rated = None);
            Ok(MutationResponse::ok())
        })
    }

    fn rated_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<RatedMovie>> {
        self.read(Call::RatedMovies, |gw| {
            let states = gw.states.lock().unwrap();
            let mut rated: Vec<RatedMovie> = states
                .iter()
                .filter_map(|(&id, s)| {
                    s.rated.map(|value| RatedMovie {
                        movie: movie(id, ""),
                        rating: Some(value),
                        account_rating: None,
                    })
                })
                .collect();
            rated.sort_by_key(|r| r.movie.id);
            Ok(rated)
        })
    }

    fn favorite_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<MovieSummary>> {
        self.read(Call::FavoriteMovies, |gw| Ok(gw.collection(|s| s.favorite)))
    }

    fn watchlist_movies<'a>(&'a self) -> GatewayFuture<'a, Vec<MovieSummary>> {
        self.read(Call::WatchlistMovies, |gw| Ok(gw.collection(|s| s.watchlist)))
    }
}

impl MockGateway {
    fn collection(&self, keep: impl Fn(&AccountStates) -> bool) -> Vec<MovieSummary> {
        let mut ids: Vec<u64> = self
            .states
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| keep(s))
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|id| movie(id, "")).collect()
    }
}

impl SearchSource for MockGateway {
    fn search_movies<'a>(
        &'a self,
        query: &'a str,
        page: u32,
    ) -> GatewayFuture<'a, Paginated<MovieSummary>> {
        self.read(Call::Search(query.to_string()), move |gw| {
            let needle = query.to_lowercase();
            let results: Vec<MovieSummary> = gw
                .catalog
                .iter()
                .filter(|m| m.title.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            let total = results.len() as u32;
            Ok(Paginated {
                page,
                results,
                total_pages: 1,
                total_results: total,
            })
        })
    }
}
