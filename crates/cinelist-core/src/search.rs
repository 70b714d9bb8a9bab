//! Debounced movie search.
//!
//! Keystrokes go into a [`watch`] channel; a background task waits for the
//! input to settle before querying, and drops results for queries that were
//! superseded while the request was in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::gateway::GatewayFuture;
use crate::model::{MovieSummary, Paginated};
use crate::store::Store;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Anything that can answer a title search.
pub trait SearchSource: Send + Sync {
    fn search_movies<'a>(
        &'a self,
        query: &'a str,
        page: u32,
    ) -> GatewayFuture<'a, Paginated<MovieSummary>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    /// Latest input, possibly not yet searched.
    pub query: String,
    pub results: Vec<MovieSummary>,
    pub total_results: u32,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct DebouncedSearch {
    input: watch::Sender<String>,
    state: Arc<Store<SearchState>>,
    cancel: CancellationToken,
}

impl DebouncedSearch {
    /// Start the search task on the current runtime.
    pub fn spawn(source: Arc<dyn SearchSource>, delay: Duration) -> Self {
        let (input, rx) = watch::channel(String::new());
        let state = Arc::new(Store::default());
        let cancel = CancellationToken::new();
        tokio::spawn(run(source, delay, rx, state.clone(), cancel.clone()));
        Self {
            input,
            state,
            cancel,
        }
    }

    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.state.update(|s| s.query.clone_from(&query));
        self.input.send_replace(query);
    }

    pub fn state(&self) -> SearchState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DebouncedSearch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    source: Arc<dyn SearchSource>,
    delay: Duration,
    mut input: watch::Receiver<String>,
    state: Arc<Store<SearchState>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = input.changed() => if changed.is_err() { return },
        }

        // Restart the timer on every keystroke.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => break,
                changed = input.changed() => if changed.is_err() { return },
            }
        }

        let query = input.borrow_and_update().trim().to_string();
        if query.is_empty() {
            state.update(|s| {
                s.results.clear();
                s.total_results = 0;
                s.loading = false;
                s.error = None;
            });
            continue;
        }

        state.update(|s| {
            s.loading = true;
            s.error = None;
        });
        debug!(query = %query, "searching");
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            r = source.search_movies(&query, 1) => r,
        };

        if input.has_changed().unwrap_or(true) {
            debug!(query = %query, "discarding superseded search result");
            continue;
        }
        state.update(|s| {
            s.loading = false;
            match result {
                Ok(page) => {
                    s.total_results = page.total_results;
                    s.results = page.results;
                }
                Err(e) => {
                    s.results.clear();
                    s.total_results = 0;
                    s.error = Some(e.to_string());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ApiError;
    use crate::gateway::mock::{Call, MockGateway, movie};
    use tokio::time::sleep;

    fn catalog() -> Vec<MovieSummary> {
        vec![
            movie(348, "Alien"),
            movie(679, "Aliens"),
            movie(550, "Fight Club"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_keystrokes_searches_once() {
        let gateway = Arc::new(MockGateway::new().with_catalog(catalog()));
        let search = DebouncedSearch::spawn(gateway.clone(), DEFAULT_DEBOUNCE);

        for q in ["f", "fi", "fig", "figh", "fight"] {
            search.set_query(q);
            sleep(Duration::from_millis(100)).await;
        }
        sleep(Duration::from_millis(600)).await;

        assert_eq!(gateway.calls(), vec![Call::Search("fight".into())]);
        let state = search.state();
        assert_eq!(state.query, "fight");
        assert_eq!(state.results, vec![movie(550, "Fight Club")]);
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_query_clears_without_request() {
        let gateway = Arc::new(MockGateway::new().with_catalog(catalog()));
        let search = DebouncedSearch::spawn(gateway.clone(), DEFAULT_DEBOUNCE);

        search.set_query("alien");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(search.state().results.len(), 2);

        search.set_query("   ");
        sleep(Duration::from_millis(600)).await;
        assert!(search.state().results.is_empty());
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_result_is_dropped() {
        let gateway = Arc::new(
            MockGateway::new()
                .with_catalog(catalog())
                .with_delay(Duration::from_millis(300)),
        );
        let search = DebouncedSearch::spawn(gateway.clone(), DEFAULT_DEBOUNCE);

        search.set_query("alien");
        // request for "alien" is in flight from 500ms to 800ms
        sleep(Duration::from_millis(600)).await;
        search.set_query("aliens");

        sleep(Duration::from_millis(300)).await;
        let state = search.state();
        assert!(state.results.is_empty());
        assert!(state.loading);

        sleep(Duration::from_millis(800)).await;
        assert_eq!(search.state().results, vec![movie(679, "Aliens")]);
        assert_eq!(
            gateway.calls(),
            vec![Call::Search("alien".into()), Call::Search("aliens".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_kept_as_message() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_reads(Some(ApiError::Timeout));
        let search = DebouncedSearch::spawn(gateway.clone(), DEFAULT_DEBOUNCE);

        search.set_query("heat");
        sleep(Duration::from_millis(600)).await;
        let state = search.state();
        assert_eq!(state.error.as_deref(), Some("request timed out"));
        assert!(!state.loading);
    }
}
