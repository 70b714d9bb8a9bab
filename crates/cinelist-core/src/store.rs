//! Observable in-memory state.
//!
//! [`Store`] wraps a [`watch`] channel: writers mutate in place and every
//! subscriber sees the new value. Reads and writes are synchronous and never
//! span an await point.

use std::collections::HashMap;

use tokio::sync::watch;

use crate::model::{AccountDetails, ListDetails, ListEntry, ListId, ListSummary};
use crate::optimistic::MutationPhase;
use crate::session::AuthState;

pub struct Store<T> {
    tx: watch::Sender<T>,
}

impl<T: Default> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Store<T> {
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx }
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Mutate in place and notify subscribers.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut out = None;
        self.tx.send_modify(|value| out = Some(f(value)));
        match out {
            Some(r) => r,
            None => unreachable!("send_modify always runs its closure"),
        }
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Store<T> {
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }
}

/// Status of the mutations issued against one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationStatus {
    /// Mutations issued but not yet settled.
    pub pending: u32,
    /// Phase of the most recently settled (or started) mutation.
    pub last: MutationPhase,
}

impl Default for MutationStatus {
    fn default() -> Self {
        Self {
            pending: 0,
            last: MutationPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListsState {
    /// The account's lists, most recently created first.
    pub lists: Vec<ListSummary>,
    /// Lists whose items have been loaded.
    pub details: HashMap<ListId, ListDetails>,
    pub mutations: HashMap<ListId, MutationStatus>,
    pub loading: bool,
    pub error: Option<String>,
}

impl ListsState {
    pub fn items(&self, list_id: ListId) -> Option<&[ListEntry]> {
        self.details.get(&list_id).map(|l| l.items.as_slice())
    }

    pub fn summary(&self, list_id: ListId) -> Option<&ListSummary> {
        self.lists.iter().find(|l| l.id == list_id)
    }

    pub fn is_pending(&self, list_id: ListId) -> bool {
        self.mutations
            .get(&list_id)
            .is_some_and(|m| m.pending > 0)
    }

    /// Keep the summary's count in step with loaded items.
    pub(crate) fn sync_count(&mut self, list_id: ListId) {
        let Some(count) = self.details.get(&list_id).map(|l| l.items.len() as u32) else {
            return;
        };
        if let Some(summary) = self.lists.iter_mut().find(|l| l.id == list_id) {
            summary.item_count = count;
        }
    }
}

/// Exact prior state of one list, captured before an optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot {
    pub list_id: ListId,
    pub details: Option<ListDetails>,
    pub summary: Option<ListSummary>,
    /// Index of the summary in the collection.
    pub position: Option<usize>,
}

pub type ListStore = Store<ListsState>;

impl ListStore {
    pub fn snapshot_list(&self, list_id: ListId) -> ListSnapshot {
        self.read(|s| ListSnapshot {
            list_id,
            details: s.details.get(&list_id).cloned(),
            summary: s.summary(list_id).cloned(),
            position: s.lists.iter().position(|l| l.id == list_id),
        })
    }

    /// Put one list back exactly as it was captured. Other lists are left
    /// alone; a summary that has since been removed is reinserted at its old
    /// position, or at the end if the collection has shrunk.
    pub fn restore_list(&self, snapshot: ListSnapshot) {
        self.update(|s| {
            match snapshot.details {
                Some(details) => {
                    s.details.insert(snapshot.list_id, details);
                }
                None => {
                    s.details.remove(&snapshot.list_id);
                }
            }
            let Some(summary) = snapshot.summary else {
                return;
            };
            match s.lists.iter_mut().find(|l| l.id == snapshot.list_id) {
                Some(slot) => *slot = summary,
                None => {
                    let at = snapshot.position.unwrap_or(usize::MAX).min(s.lists.len());
                    s.lists.insert(at, summary);
                }
            }
        });
    }

    pub fn begin_mutation(&self, list_id: ListId) {
        self.update(|s| {
            let status = s.mutations.entry(list_id).or_default();
            status.pending += 1;
            status.last = MutationPhase::Pending;
        });
    }

    pub fn settle_mutation(&self, list_id: ListId, phase: MutationPhase) {
        self.update(|s| {
            let status = s.mutations.entry(list_id).or_default();
            status.pending = status.pending.saturating_sub(1);
            status.last = phase;
        });
    }

    pub fn mutation_status(&self, list_id: ListId) -> MutationStatus {
        self.read(|s| s.mutations.get(&list_id).copied().unwrap_or_default())
    }

    pub fn list_media(&self, list_id: ListId) -> Option<Vec<crate::model::MediaRef>> {
        self.read(|s| s.details.get(&list_id).map(ListDetails::media))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    pub auth: AuthState,
    pub account: Option<AccountDetails>,
    pub loading: bool,
}

pub type UserStore = Store<UserState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::list_with_movies;
    use crate::model::MediaRef;

    fn state_with(list: ListDetails) -> ListStore {
        let store = ListStore::default();
        store.update(|s| {
            s.lists.push(ListSummary::from(&list));
            s.details.insert(list.id, list);
        });
        store
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let store = Store::new(1u32);
        let mut rx = store.subscribe();
        store.update(|v| *v += 1);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 2);
        assert_eq!(store.get(), 2);
    }

    #[test]
    fn update_returns_closure_result() {
        let store = Store::new(vec![1, 2, 3]);
        let popped = store.update(|v| v.pop());
        assert_eq!(popped, Some(3));
        assert_eq!(store.read(|v| v.len()), 2);
    }

    #[test]
    fn restore_list_undoes_item_changes() {
        let store = state_with(list_with_movies(8, "Favorites", &[101, 202]));
        let snapshot = store.snapshot_list(8);

        store.update(|s| {
            if let Some(l) = s.details.get_mut(&8) {
                l.items.clear();
            }
            s.sync_count(8);
        });
        assert_eq!(store.read(|s| s.summary(8).unwrap().item_count), 0);

        store.restore_list(snapshot);
        assert_eq!(
            store.list_media(8).unwrap(),
            vec![MediaRef::movie(101), MediaRef::movie(202)]
        );
        assert_eq!(store.read(|s| s.summary(8).unwrap().item_count), 2);
    }

    #[test]
    fn restore_reinserts_removed_list_without_touching_others() {
        let store = ListStore::default();
        store.update(|s| {
            for (id, name) in [(1, "Watched"), (2, "Favorites"), (3, "Later")] {
                let list = list_with_movies(id, name, &[]);
                s.lists.push(ListSummary::from(&list));
                s.details.insert(id, list);
            }
        });
        let snapshot = store.snapshot_list(2);
        assert_eq!(snapshot.position, Some(1));

        store.update(|s| {
            s.lists.retain(|l| l.id != 2);
            s.details.remove(&2);
        });
        // list 1 goes away and list 4 arrives before the rollback
        store.update(|s| {
            s.lists.retain(|l| l.id != 1);
            s.details.remove(&1);
            let list = list_with_movies(4, "New", &[]);
            s.lists.push(ListSummary::from(&list));
            s.details.insert(4, list);
        });

        store.restore_list(snapshot);
        let ids: Vec<_> = store.read(|s| s.lists.iter().map(|l| l.id).collect());
        assert_eq!(ids, vec![3, 2, 4]);
        assert!(store.read(|s| s.details.contains_key(&2)));
        assert!(!store.read(|s| s.details.contains_key(&1)));
    }

    #[test]
    fn mutation_status_tracks_pending_count() {
        let store = ListStore::default();
        store.begin_mutation(8);
        store.begin_mutation(8);
        assert!(store.read(|s| s.is_pending(8)));
        store.settle_mutation(8, MutationPhase::Confirmed);
        assert_eq!(store.mutation_status(8).pending, 1);
        store.settle_mutation(8, MutationPhase::RolledBack);
        let status = store.mutation_status(8);
        assert_eq!(status.pending, 0);
        assert_eq!(status.last, MutationPhase::RolledBack);
    }
}
