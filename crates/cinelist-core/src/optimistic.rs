//! Snapshot / apply / confirm-or-rollback.

use std::future::Future;

/// Lifecycle of one optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    /// Applied locally, remote call in flight.
    Pending,
    /// Remote call succeeded; local state kept.
    Confirmed,
    /// Remote call failed; local state restored from the snapshot.
    RolledBack,
}

/// Run one optimistic mutation.
///
/// `snapshot` captures the prior state, `apply` changes local state
/// immediately, and `remote` performs the server call. On failure the
/// captured state is handed to `rollback` before the error is returned.
/// Nothing is retried.
pub async fn perform_optimistic<S, T, E, Fut>(
    snapshot: impl FnOnce() -> S,
    apply: impl FnOnce(),
    remote: impl FnOnce() -> Fut,
    rollback: impl FnOnce(S),
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let saved = snapshot();
    apply();
    match remote().await {
        Ok(value) => Ok(value),
        Err(e) => {
            rollback(saved);
            Err(e)
        }
    }
}
