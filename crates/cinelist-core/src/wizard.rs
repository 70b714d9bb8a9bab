//! Two-step list creation: name the list, then fill it.

use std::sync::Arc;

use tokio::sync::watch;

use crate::controller::{ControllerError, ListController, MutationOutcome};
use crate::model::{ListEntry, ListId, MediaRef, MovieSummary, NewList};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WizardStep {
    #[default]
    Details,
    AddItems,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WizardState {
    pub step: WizardStep,
    pub list_id: Option<ListId>,
    /// Movies added so far, in the order they were added.
    pub added: Vec<MovieSummary>,
    /// An add or remove is in flight.
    pub busy: bool,
}

pub struct ListWizard {
    controller: Arc<ListController>,
    state: Store<WizardState>,
}

impl ListWizard {
    pub fn new(controller: Arc<ListController>) -> Self {
        Self {
            controller,
            state: Store::default(),
        }
    }

    pub fn state(&self) -> WizardState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<WizardState> {
        self.state.subscribe()
    }

    fn list_id(&self) -> Result<ListId, ControllerError> {
        self.state
            .read(|s| s.list_id)
            .ok_or(ControllerError::NoListCreated)
    }

    /// Create the list and move on to adding items.
    pub async fn create(&self, new_list: &NewList) -> Result<ListId, ControllerError> {
        let list_id = self.controller.create_list(new_list).await?;
        self.state.update(|s| {
            s.step = WizardStep::AddItems;
            s.list_id = Some(list_id);
            s.added.clear();
        });
        Ok(list_id)
    }

    pub async fn add_movie(&self, movie: MovieSummary) -> Result<MutationOutcome, ControllerError> {
        let list_id = self.list_id()?;
        let entry = ListEntry {
            media: MediaRef::movie(movie.id),
            title: Some(movie.title.clone()),
            poster_path: movie.poster_path.clone(),
        };
        self.state.update(|s| s.busy = true);
        let result = self.controller.add_entry(list_id, entry).await;
        self.state.update(|s| {
            s.busy = false;
            if result.is_ok() && !s.added.iter().any(|m| m.id == movie.id) {
                s.added.push(movie);
            }
        });
        result
    }

    pub async fn remove_movie(&self, movie_id: u64) -> Result<MutationOutcome, ControllerError> {
        let list_id = self.list_id()?;
        self.state.update(|s| s.busy = true);
        let result = self
            .controller
            .remove_item(list_id, MediaRef::movie(movie_id))
            .await;
        self.state.update(|s| {
            s.busy = false;
            if result.is_ok() {
                s.added.retain(|m| m.id != movie_id);
            }
        });
        result
    }

    /// Finish and reset. Returns the id of the list that was built.
    pub fn complete(&self) -> Result<ListId, ControllerError> {
        let list_id = self.list_id()?;
        self.state.update(|s| s.step = WizardStep::Done);
        self.state.set(WizardState::default());
        Ok(list_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ApiError;
    use crate::gateway::mock::{MockGateway, MockResponse, movie};
    use crate::notice::Notices;
    use crate::store::ListStore;

    fn wizard(gateway: Arc<MockGateway>) -> ListWizard {
        let controller = ListController::new(
            gateway,
            Arc::new(ListStore::default()),
            Notices::default(),
        );
        ListWizard::new(Arc::new(controller))
    }

    #[tokio::test]
    async fn walks_through_steps() {
        let gateway = Arc::new(MockGateway::new());
        let w = wizard(gateway.clone());
        assert_eq!(w.state().step, WizardStep::Details);

        let id = w.create(&NewList::new("주말 영화", "")).await.unwrap();
        assert_eq!(w.state().step, WizardStep::AddItems);

        w.add_movie(movie(550, "Fight Club")).await.unwrap();
        w.add_movie(movie(603, "The Matrix")).await.unwrap();
        assert_eq!(
            w.add_movie(movie(550, "Fight Club")).await,
            Ok(MutationOutcome::Unchanged)
        );
        w.remove_movie(550).await.unwrap();

        let titles: Vec<String> = w.state().added.into_iter().map(|m| m.title).collect();
        assert_eq!(titles, vec!["The Matrix"]);
        assert_eq!(gateway.server_media(id), vec![MediaRef::movie(603)]);

        assert_eq!(w.complete(), Ok(id));
        assert_eq!(w.state(), WizardState::default());
    }

    #[tokio::test]
    async fn adding_before_create_is_refused() {
        let w = wizard(Arc::new(MockGateway::new()));
        assert_eq!(
            w.add_movie(movie(550, "Fight Club")).await,
            Err(ControllerError::NoListCreated)
        );
        assert_eq!(w.complete(), Err(ControllerError::NoListCreated));
    }

    #[tokio::test]
    async fn failed_add_is_not_tracked() {
        let gateway = Arc::new(MockGateway::new().with_sequence(vec![
            MockResponse::Ok,
            MockResponse::Fail(ApiError::Timeout),
        ]));
        let w = wizard(gateway.clone());
        w.create(&NewList::new("Noir", "")).await.unwrap();

        assert!(w.add_movie(movie(289, "Casablanca")).await.is_err());
        let state = w.state();
        assert!(state.added.is_empty());
        assert!(!state.busy);
    }
}
