//! Optimistic list mutations.
//!
//! Every mutation changes the [`ListStore`] before the server is asked, then
//! either keeps the change (server confirmed) or puts back the snapshot taken
//! just before it (server failed). Failures are published as notices and
//! returned to the caller. Nothing is retried here.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::gateway::{ApiError, ListGateway, ensure_success};
use crate::model::{ListDetails, ListEntry, ListId, ListSummary, MediaRef, NewList};
use crate::notice::{Action, Notices};
use crate::optimistic::{MutationPhase, perform_optimistic};
use crate::store::ListStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("list {0} is not loaded")]
    ListNotLoaded(ListId),
    #[error("sign in required")]
    AuthRequired,
    #[error("rating must be between 3 and 100, got {0}")]
    InvalidRating(u8),
    #[error("no list has been created yet")]
    NoListCreated,
    #[error("{action} failed: {source}")]
    Remote {
        action: Action,
        #[source]
        source: ApiError,
    },
}

impl ControllerError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ControllerError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// How overlapping mutations on the same list are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPolicy {
    /// Mutations run independently, each with its own snapshot. A failing
    /// mutation that settles after a newer one has applied rolls the newer
    /// change back locally too.
    #[default]
    Concurrent,
    /// Mutations on one list run one at a time, in call order. Different
    /// lists still proceed in parallel.
    SerializedPerList,
}

impl FromStr for MutationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "concurrent" => Ok(MutationPolicy::Concurrent),
            "serialized" | "serialized_per_list" => Ok(MutationPolicy::SerializedPerList),
            other => Err(format!(
                "unknown mutation policy '{other}' (expected concurrent or serialized)"
            )),
        }
    }
}

/// Whether a mutation changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// Already in the requested state; no request was sent.
    Unchanged,
}

pub struct ListController {
    gateway: Arc<dyn ListGateway>,
    store: Arc<ListStore>,
    notices: Notices,
    policy: MutationPolicy,
    locks: DashMap<ListId, Arc<Mutex<()>>>,
}

impl ListController {
    pub fn new(gateway: Arc<dyn ListGateway>, store: Arc<ListStore>, notices: Notices) -> Self {
        Self {
            gateway,
            store,
            notices,
            policy: MutationPolicy::default(),
            locks: DashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: MutationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> MutationPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<ListStore> {
        &self.store
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Wait for this list's turn under [`MutationPolicy::SerializedPerList`].
    async fn turn(&self, list_id: ListId) -> Option<OwnedMutexGuard<()>> {
        match self.policy {
            MutationPolicy::Concurrent => None,
            MutationPolicy::SerializedPerList => {
                let lock = self.locks.entry(list_id).or_default().clone();
                Some(lock.lock_owned().await)
            }
        }
    }

    async fn mutate<S, T, Fut>(
        &self,
        list_id: ListId,
        action: Action,
        snapshot: impl FnOnce() -> S,
        apply: impl FnOnce(),
        remote: impl FnOnce() -> Fut,
        rollback: impl FnOnce(S),
    ) -> Result<T, ControllerError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.store.begin_mutation(list_id);
        match perform_optimistic(snapshot, apply, remote, rollback).await {
            Ok(value) => {
                self.store.settle_mutation(list_id, MutationPhase::Confirmed);
                tracing::info!(list_id, %action, "mutation confirmed");
                self.notices.success(action);
                Ok(value)
            }
            Err(e) => {
                self.store.settle_mutation(list_id, MutationPhase::RolledBack);
                tracing::warn!(list_id, %action, error = %e, "mutation rolled back");
                self.notices.failure(action, &e);
                Err(ControllerError::Remote { action, source: e })
            }
        }
    }

    fn remote_error(&self, action: Action, e: ApiError) -> ControllerError {
        self.notices.failure(action, &e);
        ControllerError::Remote { action, source: e }
    }

    /// Add `media` to a loaded list.
    pub async fn add_item(
        &self,
        list_id: ListId,
        media: MediaRef,
    ) -> Result<MutationOutcome, ControllerError> {
        self.add_entry(list_id, ListEntry::placeholder(media)).await
    }

    /// Add an item with its display fields already known.
    pub async fn add_entry(
        &self,
        list_id: ListId,
        entry: ListEntry,
    ) -> Result<MutationOutcome, ControllerError> {
        let _turn = self.turn(list_id).await;
        let media = entry.media;

        match self.store.read(|s| s.details.get(&list_id).map(|l| l.contains(&media))) {
            None => return Err(ControllerError::ListNotLoaded(list_id)),
            Some(true) => {
                tracing::debug!(list_id, %media, "already in list");
                return Ok(MutationOutcome::Unchanged);
            }
            Some(false) => {}
        }

        let store = &self.store;
        let gateway = &self.gateway;
        let items = [media];
        let items = &items;
        self.mutate(
            list_id,
            Action::AddItem,
            move || store.snapshot_list(list_id),
            move || {
                store.update(|s| {
                    if let Some(list) = s.details.get_mut(&list_id)
                        && !list.contains(&media)
                    {
                        list.items.push(entry);
                    }
                    s.sync_count(list_id);
                })
            },
            move || async move { ensure_success(gateway.add_items(list_id, items).await?) },
            move |snapshot| store.restore_list(snapshot),
        )
        .await?;
        Ok(MutationOutcome::Applied)
    }

    /// Remove `media` from a loaded list.
    pub async fn remove_item(
        &self,
        list_id: ListId,
        media: MediaRef,
    ) -> Result<MutationOutcome, ControllerError> {
        let _turn = self.turn(list_id).await;

        match self.store.read(|s| s.details.get(&list_id).map(|l| l.contains(&media))) {
            None => return Err(ControllerError::ListNotLoaded(list_id)),
            Some(false) => {
                tracing::debug!(list_id, %media, "not in list");
                return Ok(MutationOutcome::Unchanged);
            }
            Some(true) => {}
        }

        let store = &self.store;
        let gateway = &self.gateway;
        let items = [media];
        let items = &items;
        self.mutate(
            list_id,
            Action::RemoveItem,
            move || store.snapshot_list(list_id),
            move || {
                store.update(|s| {
                    if let Some(list) = s.details.get_mut(&list_id) {
                        list.items.retain(|e| e.media != media);
                    }
                    s.sync_count(list_id);
                })
            },
            move || async move { ensure_success(gateway.remove_items(list_id, items).await?) },
            move |snapshot| store.restore_list(snapshot),
        )
        .await?;
        Ok(MutationOutcome::Applied)
    }

    /// Remove every item from a list.
    ///
    /// The items removed are the server's, fetched after the local list has
    /// been emptied, so items the local copy never saw are removed too.
    pub async fn clear_list(&self, list_id: ListId) -> Result<MutationOutcome, ControllerError> {
        let _turn = self.turn(list_id).await;

        match self.store.read(|s| s.items(list_id).map(|items| items.is_empty())) {
            None => return Err(ControllerError::ListNotLoaded(list_id)),
            Some(true) => {
                tracing::debug!(list_id, "list already empty");
                return Ok(MutationOutcome::Unchanged);
            }
            Some(false) => {}
        }

        let store = &self.store;
        let gateway = &self.gateway;
        let removed = self
            .mutate(
                list_id,
                Action::ClearList,
                move || store.snapshot_list(list_id),
                move || {
                    store.update(|s| {
                        if let Some(list) = s.details.get_mut(&list_id) {
                            list.items.clear();
                        }
                        if let Some(summary) = s.lists.iter_mut().find(|l| l.id == list_id) {
                            summary.item_count = 0;
                        }
                    })
                },
                move || async move {
                    let media = gateway.get_list(list_id).await?.media();
                    if media.is_empty() {
                        return Ok(0);
                    }
                    ensure_success(gateway.remove_items(list_id, &media).await?)?;
                    Ok::<usize, ApiError>(media.len())
                },
                move |snapshot| store.restore_list(snapshot),
            )
            .await?;

        tracing::debug!(list_id, removed, "list cleared");
        Ok(if removed == 0 {
            MutationOutcome::Unchanged
        } else {
            MutationOutcome::Applied
        })
    }

    /// Delete a list. It disappears from the collection at once and comes
    /// back at its old position if the server refuses.
    pub async fn delete_list(&self, list_id: ListId) -> Result<(), ControllerError> {
        let turn = self.turn(list_id).await;

        let store = &self.store;
        let gateway = &self.gateway;
        self.mutate(
            list_id,
            Action::DeleteList,
            move || store.snapshot_list(list_id),
            move || {
                store.update(|s| {
                    s.lists.retain(|l| l.id != list_id);
                    s.details.remove(&list_id);
                })
            },
            move || async move { ensure_success(gateway.delete_list(list_id).await?) },
            move |snapshot| store.restore_list(snapshot),
        )
        .await?;

        drop(turn);
        // Callers already queued on this list still hold the mutex.
        self.locks
            .remove_if(&list_id, |_, lock| Arc::strong_count(lock) == 1);
        self.store.update(|s| {
            if !s.is_pending(list_id) {
                s.mutations.remove(&list_id);
            }
        });
        Ok(())
    }

    /// Replace the collection with the account's lists.
    pub async fn load_lists(&self) -> Result<usize, ControllerError> {
        self.store.update(|s| {
            s.loading = true;
            s.error = None;
        });

        match self.gateway.account_lists().await {
            Ok(lists) => {
                let count = lists.len();
                self.store.update(|s| {
                    s.lists = lists;
                    s.loading = false;
                });
                tracing::info!(count, "lists loaded");
                Ok(count)
            }
            Err(e) => {
                let notice = self.notices.failure(Action::LoadLists, &e);
                self.store.update(|s| {
                    s.loading = false;
                    s.error = Some(notice.message);
                });
                Err(ControllerError::Remote {
                    action: Action::LoadLists,
                    source: e,
                })
            }
        }
    }

    /// Fetch one list's items into the store.
    pub async fn load_list(&self, list_id: ListId) -> Result<ListDetails, ControllerError> {
        let details = self
            .gateway
            .get_list(list_id)
            .await
            .map_err(|e| self.remote_error(Action::LoadList, e))?;
        tracing::debug!(list_id, items = details.items.len(), "list loaded");
        self.store.update(|s| {
            s.details.insert(list_id, details.clone());
            s.sync_count(list_id);
        });
        Ok(details)
    }

    /// Create a list. It is prepended to the collection and loaded empty.
    pub async fn create_list(&self, new_list: &NewList) -> Result<ListId, ControllerError> {
        let created = self
            .gateway
            .create_list(new_list)
            .await
            .map_err(|e| self.remote_error(Action::CreateList, e))?;

        let details = ListDetails {
            id: created.id,
            name: new_list.name.clone(),
            description: new_list.description.clone(),
            public: new_list.public,
            sort_by: Some(new_list.sort_by.clone()),
            iso_639_1: Some(new_list.iso_639_1.clone()),
            iso_3166_1: Some(new_list.iso_3166_1.clone()),
            created_at: None,
            updated_at: None,
            items: Vec::new(),
        };
        self.store.update(|s| {
            s.lists.retain(|l| l.id != created.id);
            s.lists.insert(0, ListSummary::from(&details));
            s.details.insert(created.id, details);
        });
        tracing::info!(list_id = created.id, name = %new_list.name, "list created");
        self.notices.success(Action::CreateList);
        Ok(created.id)
    }

    /// Edit a list's name, description and visibility.
    pub async fn update_list(
        &self,
        list_id: ListId,
        new_list: &NewList,
    ) -> Result<(), ControllerError> {
        let _turn = self.turn(list_id).await;

        let store = &self.store;
        let gateway = &self.gateway;
        self.mutate(
            list_id,
            Action::UpdateList,
            move || store.snapshot_list(list_id),
            move || {
                store.update(|s| {
                    if let Some(list) = s.details.get_mut(&list_id) {
                        list.name = new_list.name.clone();
                        list.description = new_list.description.clone();
                        list.public = new_list.public;
                        list.sort_by = Some(new_list.sort_by.clone());
                    }
                    if let Some(summary) = s.lists.iter_mut().find(|l| l.id == list_id) {
                        summary.name = new_list.name.clone();
                        summary.description = new_list.description.clone();
                        summary.public = new_list.public;
                    }
                })
            },
            move || async move { ensure_success(gateway.update_list(list_id, new_list).await?) },
            move |snapshot| store.restore_list(snapshot),
        )
        .await?;
        Ok(())
    }

    /// Ask the server whether `media` is in the list.
    pub async fn item_status(
        &self,
        list_id: ListId,
        media: MediaRef,
    ) -> Result<bool, ControllerError> {
        self.gateway
            .item_status(list_id, media)
            .await
            .map_err(|e| self.remote_error(Action::LoadList, e))
    }

    pub fn lists(&self) -> Vec<ListSummary> {
        self.store.read(|s| s.lists.clone())
    }

    pub fn list(&self, list_id: ListId) -> Option<ListDetails> {
        self.store.read(|s| s.details.get(&list_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{Call, MockGateway, MockResponse, list_with_movies};

    fn controller(gateway: Arc<MockGateway>) -> ListController {
        ListController::new(gateway, Arc::new(ListStore::default()), Notices::default())
    }

    #[test]
    fn policy_parses() {
        assert_eq!(
            "serialized".parse::<MutationPolicy>().unwrap(),
            MutationPolicy::SerializedPerList
        );
        assert_eq!(
            "Concurrent".parse::<MutationPolicy>().unwrap(),
            MutationPolicy::Concurrent
        );
        assert!("eventually".parse::<MutationPolicy>().is_err());
    }

    #[tokio::test]
    async fn unloaded_list_is_rejected_without_network() {
        let gateway = Arc::new(MockGateway::new().with_list(list_with_movies(8, "A", &[1])));
        let c = controller(gateway.clone());
        assert_eq!(
            c.add_item(8, MediaRef::movie(2)).await,
            Err(ControllerError::ListNotLoaded(8))
        );
        assert_eq!(
            c.remove_item(8, MediaRef::movie(1)).await,
            Err(ControllerError::ListNotLoaded(8))
        );
        assert_eq!(
            c.clear_list(8).await,
            Err(ControllerError::ListNotLoaded(8))
        );
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_keeps_lock_while_callers_are_queued() {
        let gateway = Arc::new(
            MockGateway::new()
                .with_list(list_with_movies(2, "A", &[1]))
                .with_list(list_with_movies(3, "B", &[]))
                .with_sequence(vec![MockResponse::delayed(
                    std::time::Duration::from_millis(50),
                    MockResponse::Ok,
                )]),
        );
        let c = controller(gateway.clone()).with_policy(MutationPolicy::SerializedPerList);
        c.load_lists().await.unwrap();
        c.load_list(2).await.unwrap();

        let (deleted, queued) = tokio::join!(c.delete_list(2), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            c.remove_item(2, MediaRef::movie(1)).await
        });

        assert!(deleted.is_ok());
        assert_eq!(queued, Err(ControllerError::ListNotLoaded(2)));
        // The queued caller waited on the same mutex, so it must outlive the delete.
        assert!(c.locks.contains_key(&2));

        c.delete_list(3).await.unwrap();
        assert!(!c.locks.contains_key(&3));
    }

    #[tokio::test]
    async fn add_entry_keeps_display_fields() {
        let gateway = Arc::new(MockGateway::new().with_list(list_with_movies(8, "A", &[])));
        let c = controller(gateway.clone());
        c.load_list(8).await.unwrap();

        let entry = ListEntry {
            media: MediaRef::movie(550),
            title: Some("Fight Club".into()),
            poster_path: Some("/fc.jpg".into()),
        };
        c.add_entry(8, entry.clone()).await.unwrap();
        assert_eq!(c.list(8).unwrap().items, vec![entry]);
    }

    #[tokio::test]
    async fn create_list_prepends_and_loads_empty() {
        let gateway = Arc::new(MockGateway::new().with_list(list_with_movies(1, "Old", &[5])));
        let c = controller(gateway.clone());
        c.load_lists().await.unwrap();

        let id = c.create_list(&NewList::new("New", "")).await.unwrap();
        let lists = c.lists();
        assert_eq!(lists[0].id, id);
        assert_eq!(lists[0].name, "New");
        assert_eq!(lists[1].id, 1);
        assert!(c.list(id).unwrap().items.is_empty());

        // immediately usable for adds
        c.add_item(id, MediaRef::movie(9)).await.unwrap();
        assert_eq!(gateway.server_media(id), vec![MediaRef::movie(9)]);
    }

    #[tokio::test]
    async fn update_list_rolls_back_metadata() {
        let gateway = Arc::new(
            MockGateway::new()
                .with_list(list_with_movies(8, "Favorites", &[1]))
                .with_sequence(vec![MockResponse::Fail(ApiError::Rejected {
                    status: 422,
                    message: "Name is too long".into(),
                })]),
        );
        let c = controller(gateway.clone());
        c.load_lists().await.unwrap();
        c.load_list(8).await.unwrap();

        let err = c
            .update_list(8, &NewList::new("x".repeat(500), ""))
            .await
            .unwrap_err();
        assert_eq!(
            err.api_error().and_then(ApiError::remote_message),
            Some("Name is too long")
        );
        assert_eq!(c.list(8).unwrap().name, "Favorites");
        assert_eq!(c.lists()[0].name, "Favorites");
    }

    #[tokio::test]
    async fn load_lists_failure_records_error() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_reads(Some(ApiError::Unauthorized {
            message: "Invalid API key: You must be granted a valid key.".into(),
        }));
        let c = controller(gateway.clone());
        assert!(c.load_lists().await.is_err());
        c.store().read(|s| {
            assert!(!s.loading);
            assert_eq!(
                s.error.as_deref(),
                Some("Invalid API key: You must be granted a valid key.")
            );
        });
    }

    #[tokio::test]
    async fn item_status_asks_server() {
        let gateway = Arc::new(MockGateway::new().with_list(list_with_movies(8, "A", &[101])));
        let c = controller(gateway.clone());
        assert!(c.item_status(8, MediaRef::movie(101)).await.unwrap());
        assert!(!c.item_status(8, MediaRef::tv(101)).await.unwrap());
        assert_eq!(gateway.calls()[0], Call::ItemStatus(8, MediaRef::movie(101)));
    }
}
