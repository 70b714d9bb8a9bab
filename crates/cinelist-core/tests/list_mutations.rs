//! End-to-end behaviour of optimistic list mutations against the mock
//! gateway: local state changes at once, survives confirmation and is put
//! back exactly on failure.

use std::sync::Arc;
use std::time::Duration;

use cinelist_core::gateway::mock::{Call, MockGateway, MockResponse, list_with_movies};
use cinelist_core::gateway::{ApiError, ListGateway};
use cinelist_core::notice::{Action, NoticeLevel, Notices};
use cinelist_core::model::NewList;
use cinelist_core::optimistic::MutationPhase;
use cinelist_core::{
    ControllerError, ListController, ListStore, MediaRef, MutationOutcome, MutationPolicy,
};
use tokio::time::sleep;

const FAVORITES: u64 = 8;

fn movies(ids: &[u64]) -> Vec<MediaRef> {
    ids.iter().map(|&id| MediaRef::movie(id)).collect()
}

async fn loaded(gateway: Arc<MockGateway>, policy: MutationPolicy) -> ListController {
    let controller = ListController::new(
        gateway.clone(),
        Arc::new(ListStore::default()),
        Notices::default(),
    )
    .with_policy(policy);
    controller.load_lists().await.unwrap();
    for summary in controller.lists() {
        controller.load_list(summary.id).await.unwrap();
    }
    controller
}

fn local(controller: &ListController, list_id: u64) -> Vec<MediaRef> {
    controller.store().list_media(list_id).unwrap_or_default()
}

#[tokio::test]
async fn add_then_confirm_appends_in_order() {
    let gateway =
        Arc::new(MockGateway::new().with_list(list_with_movies(FAVORITES, "Favorites", &[101, 202])));
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;

    let outcome = c.add_item(FAVORITES, MediaRef::movie(303)).await.unwrap();

    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(local(&c, FAVORITES), movies(&[101, 202, 303]));
    assert_eq!(gateway.server_media(FAVORITES), movies(&[101, 202, 303]));
    assert_eq!(
        c.store().read(|s| s.summary(FAVORITES).unwrap().item_count),
        3
    );
    let status = c.store().mutation_status(FAVORITES);
    assert_eq!(status.pending, 0);
    assert_eq!(status.last, MutationPhase::Confirmed);
}

#[tokio::test]
async fn add_of_present_item_sends_nothing() {
    let gateway =
        Arc::new(MockGateway::new().with_list(list_with_movies(FAVORITES, "Favorites", &[101, 202])));
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;
    let calls_before = gateway.call_count();

    let outcome = c.add_item(FAVORITES, MediaRef::movie(101)).await.unwrap();

    assert_eq!(outcome, MutationOutcome::Unchanged);
    assert_eq!(gateway.call_count(), calls_before);
    assert_eq!(local(&c, FAVORITES), movies(&[101, 202]));
}

#[tokio::test]
async fn remove_of_absent_item_sends_nothing() {
    let gateway =
        Arc::new(MockGateway::new().with_list(list_with_movies(FAVORITES, "Favorites", &[101])));
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;

    let outcome = c.remove_item(FAVORITES, MediaRef::tv(1399)).await.unwrap();

    assert_eq!(outcome, MutationOutcome::Unchanged);
    assert!(gateway.write_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_remove_restores_snapshot_and_notifies() {
    let gateway = Arc::new(
        MockGateway::new()
            .with_list(list_with_movies(FAVORITES, "Favorites", &[101, 202]))
            .with_sequence(vec![MockResponse::delayed(
                Duration::from_millis(50),
                MockResponse::not_found(),
            )]),
    );
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;
    let mut notices = c.notices().subscribe();

    let (result, in_flight) = tokio::join!(c.remove_item(FAVORITES, MediaRef::movie(202)), async {
        sleep(Duration::from_millis(10)).await;
        local(&c, FAVORITES)
    });

    assert_eq!(in_flight, movies(&[101]));
    match result {
        Err(ControllerError::Remote { action, source }) => {
            assert_eq!(action, Action::RemoveItem);
            assert!(source.is_not_found());
        }
        other => panic!("expected remote failure, got {other:?}"),
    }
    assert_eq!(local(&c, FAVORITES), movies(&[101, 202]));
    assert_eq!(
        c.store().mutation_status(FAVORITES).last,
        MutationPhase::RolledBack
    );

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.action, Action::RemoveItem);
    assert_eq!(
        notice.message,
        "The resource you requested could not be found."
    );
}

#[tokio::test]
async fn rejected_envelope_counts_as_failure() {
    let gateway = Arc::new(
        MockGateway::new()
            .with_list(list_with_movies(FAVORITES, "Favorites", &[101]))
            .with_sequence(vec![MockResponse::Fail(ApiError::Rejected {
                status: 200,
                message: "Item could not be added.".into(),
            })]),
    );
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;

    assert!(c.add_item(FAVORITES, MediaRef::movie(202)).await.is_err());
    assert_eq!(local(&c, FAVORITES), movies(&[101]));
}

#[tokio::test]
async fn clear_of_empty_list_sends_nothing() {
    let gateway = Arc::new(MockGateway::new().with_list(list_with_movies(9, "Empty", &[])));
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;
    let calls_before = gateway.call_count();

    assert_eq!(c.clear_list(9).await.unwrap(), MutationOutcome::Unchanged);
    assert_eq!(gateway.call_count(), calls_before);
}

#[tokio::test]
async fn clear_removes_items_only_the_server_knew() {
    let gateway =
        Arc::new(MockGateway::new().with_list(list_with_movies(FAVORITES, "Favorites", &[101, 202])));
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;
    // added from another device after we loaded
    gateway
        .add_items(FAVORITES, &[MediaRef::movie(404)])
        .await
        .unwrap();

    assert_eq!(c.clear_list(FAVORITES).await.unwrap(), MutationOutcome::Applied);
    assert!(local(&c, FAVORITES).is_empty());
    assert!(gateway.server_media(FAVORITES).is_empty());
    assert_eq!(
        gateway.calls().last(),
        Some(&Call::RemoveItems(FAVORITES, movies(&[101, 202, 404])))
    );
}

fn item_count(controller: &ListController, list_id: u64) -> Option<u32> {
    controller
        .store()
        .read(|s| s.summary(list_id).map(|l| l.item_count))
}

#[tokio::test]
async fn clear_rolls_back_when_server_read_fails() {
    let gateway =
        Arc::new(MockGateway::new().with_list(list_with_movies(FAVORITES, "Favorites", &[101, 202])));
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;
    gateway.fail_reads(Some(ApiError::Timeout));

    let result = c.clear_list(FAVORITES).await;

    assert!(matches!(
        result,
        Err(ControllerError::Remote {
            action: Action::ClearList,
            ..
        })
    ));
    assert_eq!(local(&c, FAVORITES), movies(&[101, 202]));
    assert_eq!(item_count(&c, FAVORITES), Some(2));
    assert!(gateway.write_calls().is_empty());
}

#[tokio::test]
async fn clear_rolls_back_when_removal_fails() {
    let gateway = Arc::new(
        MockGateway::new()
            .with_list(list_with_movies(FAVORITES, "Favorites", &[101, 202]))
            .with_sequence(vec![MockResponse::Fail(ApiError::Timeout)]),
    );
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;

    assert!(c.clear_list(FAVORITES).await.is_err());

    assert_eq!(local(&c, FAVORITES), movies(&[101, 202]));
    assert_eq!(item_count(&c, FAVORITES), Some(2));
    assert_eq!(gateway.server_media(FAVORITES), movies(&[101, 202]));
    assert_eq!(
        c.store().mutation_status(FAVORITES).last,
        MutationPhase::RolledBack
    );
}

#[tokio::test]
async fn failed_delete_restores_original_position() {
    let gateway = Arc::new(
        MockGateway::new()
            .with_list(list_with_movies(1, "Watched", &[550]))
            .with_list(list_with_movies(2, "Favorites", &[101]))
            .with_list(list_with_movies(3, "Later", &[]))
            .with_sequence(vec![MockResponse::Fail(ApiError::Timeout)]),
    );
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;
    let ids = |c: &ListController| c.lists().iter().map(|l| l.id).collect::<Vec<_>>();
    assert_eq!(ids(&c), vec![1, 2, 3]);

    assert!(c.delete_list(2).await.is_err());

    assert_eq!(ids(&c), vec![1, 2, 3]);
    assert_eq!(local(&c, 2), movies(&[101]));
    assert!(gateway.server_list(2).is_some());
}

#[tokio::test]
async fn delete_removes_list_everywhere() {
    let gateway = Arc::new(
        MockGateway::new()
            .with_list(list_with_movies(1, "Watched", &[550]))
            .with_list(list_with_movies(2, "Favorites", &[101])),
    );
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;

    c.delete_list(2).await.unwrap();

    assert_eq!(c.lists().len(), 1);
    assert!(c.list(2).is_none());
    assert!(gateway.server_list(2).is_none());
}

#[tokio::test]
async fn mutating_unloaded_list_is_an_error() {
    let gateway = Arc::new(MockGateway::new());
    let c = ListController::new(gateway.clone(), Arc::new(ListStore::default()), Notices::default());

    assert_eq!(
        c.add_item(77, MediaRef::movie(1)).await,
        Err(ControllerError::ListNotLoaded(77))
    );
    assert_eq!(gateway.call_count(), 0);
}

/// Two overlapping removes where the first one fails after the second has
/// been confirmed.
fn overlapping_removes() -> Arc<MockGateway> {
    Arc::new(
        MockGateway::new()
            .with_list(list_with_movies(FAVORITES, "Favorites", &[101, 202, 303]))
            .with_sequence(vec![
                MockResponse::delayed(Duration::from_millis(100), MockResponse::not_found()),
                MockResponse::delayed(Duration::from_millis(10), MockResponse::Ok),
            ]),
    )
}

#[tokio::test(start_paused = true)]
async fn concurrent_rollback_can_resurrect_confirmed_change() {
    let gateway = overlapping_removes();
    let c = loaded(gateway.clone(), MutationPolicy::Concurrent).await;

    let (first, second) = tokio::join!(
        c.remove_item(FAVORITES, MediaRef::movie(101)),
        c.remove_item(FAVORITES, MediaRef::movie(202)),
    );

    assert!(first.is_err());
    assert_eq!(second, Ok(MutationOutcome::Applied));
    assert_eq!(gateway.server_media(FAVORITES), movies(&[101, 303]));
    // The late rollback restores the first snapshot, which still had 202.
    assert_eq!(local(&c, FAVORITES), movies(&[101, 202, 303]));
}

#[tokio::test(start_paused = true)]
async fn serialized_policy_keeps_local_and_server_in_step() {
    let gateway = overlapping_removes();
    let c = loaded(gateway.clone(), MutationPolicy::SerializedPerList).await;

    let (first, second) = tokio::join!(
        c.remove_item(FAVORITES, MediaRef::movie(101)),
        c.remove_item(FAVORITES, MediaRef::movie(202)),
    );

    assert!(first.is_err());
    assert_eq!(second, Ok(MutationOutcome::Applied));
    assert_eq!(gateway.server_media(FAVORITES), movies(&[101, 303]));
    assert_eq!(local(&c, FAVORITES), gateway.server_media(FAVORITES));
    assert_eq!(
        gateway.write_calls(),
        vec![
            Call::RemoveItems(FAVORITES, movies(&[101])),
            Call::RemoveItems(FAVORITES, movies(&[202])),
        ]
    );
}

fn three_lists() -> MockGateway {
    MockGateway::new()
        .with_list(list_with_movies(1, "Watched", &[550]))
        .with_list(list_with_movies(2, "Favorites", &[101]))
        .with_list(list_with_movies(3, "Later", &[]))
}

fn list_ids(controller: &ListController) -> Vec<u64> {
    controller.lists().iter().map(|l| l.id).collect()
}

#[tokio::test(start_paused = true)]
async fn failed_delete_leaves_other_confirmed_deletes_alone() {
    for policy in [MutationPolicy::SerializedPerList, MutationPolicy::Concurrent] {
        let gateway = Arc::new(three_lists().with_sequence(vec![
            MockResponse::delayed(Duration::from_millis(100), MockResponse::not_found()),
            MockResponse::delayed(Duration::from_millis(10), MockResponse::Ok),
        ]));
        let c = loaded(gateway.clone(), policy).await;

        let (first, second) = tokio::join!(c.delete_list(1), c.delete_list(2));

        assert!(first.is_err(), "{policy:?}");
        assert_eq!(second, Ok(()), "{policy:?}");
        assert!(gateway.server_list(2).is_none());
        assert_eq!(list_ids(&c), vec![1, 3], "{policy:?}");
        assert_eq!(local(&c, 1), movies(&[550]));
        assert!(c.list(2).is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn list_created_during_failed_delete_survives_rollback() {
    let gateway = Arc::new(three_lists().with_sequence(vec![
        MockResponse::delayed(Duration::from_millis(100), MockResponse::not_found()),
        MockResponse::Ok,
    ]));
    let c = loaded(gateway.clone(), MutationPolicy::SerializedPerList).await;

    let (deleted, created) = tokio::join!(c.delete_list(2), async {
        sleep(Duration::from_millis(10)).await;
        c.create_list(&NewList::new("Weekend", "")).await
    });

    assert!(deleted.is_err());
    let created = created.unwrap();
    assert_eq!(list_ids(&c), vec![created, 2, 1, 3]);
    assert!(c.list(created).is_some());
    assert_eq!(local(&c, 2), movies(&[101]));
}
