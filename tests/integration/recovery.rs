//! Recovery scenario integration tests.
//!
//! Tests that verify the controller converges after storage failures and
//! interrupted reconciliations, without launching a firing twice.

use crate::common::{scheduler_with, t1, t2};
use cadence::testing::{FailingStorage, ScheduleObjectBuilder, owned_child};
use cadence::{
    ChildJob, ConcurrencyPolicy, Decision, InMemoryStorage, ObjectKey, SchedulerError, SkipReason,
    Storage,
};
use chrono::Duration;
use std::sync::Arc;

fn hourly(name: &str) -> cadence::ScheduleObject {
    ScheduleObjectBuilder::new(name, "0 * * * *")
        .created_at(t1() - Duration::minutes(10))
        .build()
}

/// Test: A status write that fails after the child was created does not
/// cause a second launch once storage recovers.
#[tokio::test]
async fn test_failed_status_write_does_not_launch_twice() {
    let storage = Arc::new(FailingStorage::new());
    let schedule = hourly("report");
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let (scheduler, _, recorder) =
        scheduler_with(storage.clone(), t1() + Duration::minutes(1)).await;

    storage.set_fail_update_status(true);
    let result = scheduler.sync_key(&schedule.key).await;
    assert!(matches!(result, Err(SchedulerError::Storage(_))));
    assert_eq!(storage.inner().list_children().await.unwrap().len(), 1);
    assert!(recorder.invoked().await.is_empty());

    storage.set_fail_update_status(false);
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();

    assert_eq!(outcome.decision, None);
    assert_eq!(outcome.last_schedule_time, Some(t1()));
    assert_eq!(outcome.active, 1);
    assert_eq!(storage.inner().list_children().await.unwrap().len(), 1);
}

/// Test: A failed create leaves the firing unrecorded, so it is retried.
#[tokio::test]
async fn test_failed_create_is_retried() {
    let storage = Arc::new(FailingStorage::new());
    let schedule = hourly("report");
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let (scheduler, _, recorder) =
        scheduler_with(storage.clone(), t1() + Duration::minutes(1)).await;

    storage.set_fail_create_child(true);
    assert!(scheduler.sync_key(&schedule.key).await.is_err());
    let stored = storage.get_schedule(&schedule.key).await.unwrap();
    assert_eq!(stored.status.last_schedule_time, None);
    assert!(recorder.invoked().await.is_empty());

    storage.set_fail_create_child(false);
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();
    assert_eq!(outcome.decision, Some(Decision::Fire { scheduled_time: t1() }));
    assert_eq!(recorder.invoked().await, vec![t1()]);
}

/// Test: A failed delete under Replace aborts before launching.
#[tokio::test]
async fn test_failed_replace_delete_launches_nothing() {
    let storage = Arc::new(FailingStorage::new());
    let schedule = ScheduleObjectBuilder::new("report", "0 * * * *")
        .created_at(t1() - Duration::minutes(10))
        .concurrency_policy(ConcurrencyPolicy::Replace)
        .last_schedule_time(t1())
        .build();
    storage.upsert_schedule(schedule.clone()).await.unwrap();
    storage
        .inner()
        .insert_child(owned_child(&schedule, t1()))
        .unwrap();

    let (scheduler, _, _) = scheduler_with(storage.clone(), t2() + Duration::minutes(1)).await;

    storage.set_fail_delete_child(true);
    assert!(scheduler.sync_key(&schedule.key).await.is_err());
    assert_eq!(storage.inner().list_children().await.unwrap().len(), 1);

    storage.set_fail_delete_child(false);
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();
    assert!(matches!(outcome.decision, Some(Decision::ReplaceAndFire { .. })));
    let children = storage.inner().list_children().await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].scheduled_time, Some(t2()));
}

/// Test: A name collision with an object the schedule does not own moves
/// past the firing without adopting the foreign object, and is reported as
/// a skip.
#[tokio::test]
async fn test_name_collision_with_foreign_object() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = hourly("report");
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let squatter = ChildJob::new(ObjectKey::new(
        "default",
        cadence::core::object::child_name("report", t1()),
    ));
    storage.insert_child(squatter.clone()).unwrap();

    let (scheduler, _, recorder) =
        scheduler_with(storage.clone(), t1() + Duration::minutes(1)).await;
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();

    assert!(matches!(outcome.decision, Some(Decision::SkipError { .. })));
    assert_eq!(outcome.launched, None);
    assert_eq!(outcome.active, 0);
    assert_eq!(outcome.last_schedule_time, Some(t1()));
    assert!(recorder.invoked().await.is_empty());
    assert_eq!(recorder.skipped().await, vec![SkipReason::Error]);
    assert_eq!(storage.get_child(&squatter.key).await.unwrap(), squatter);
}

/// Test: One failing schedule does not stop the rest of the pass.
#[tokio::test]
async fn test_failures_are_isolated_per_schedule() {
    let storage = Arc::new(FailingStorage::new());
    let due = hourly("due");
    let idle = ScheduleObjectBuilder::new("idle", "0 * * * *")
        .created_at(t1() - Duration::minutes(10))
        .suspended()
        .build();
    storage.upsert_schedule(due.clone()).await.unwrap();
    storage.upsert_schedule(idle.clone()).await.unwrap();

    let (scheduler, _, _) = scheduler_with(storage.clone(), t1() + Duration::minutes(1)).await;
    storage.set_fail_create_child(true);

    let report = scheduler.sync_all().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, due.key);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].key, idle.key);
}

/// Test: Failing to list objects fails the whole pass.
#[tokio::test]
async fn test_list_failures_fail_the_pass() {
    let storage = Arc::new(FailingStorage::new());
    storage.upsert_schedule(hourly("report")).await.unwrap();
    let (scheduler, _, _) = scheduler_with(storage.clone(), t1() + Duration::minutes(1)).await;

    storage.set_fail_list_schedules(true);
    assert!(matches!(
        scheduler.sync_all().await,
        Err(SchedulerError::Storage(_))
    ));

    storage.set_fail_list_schedules(false);
    storage.set_fail_list_children(true);
    assert!(scheduler.sync_all().await.is_err());

    storage.set_fail_list_children(false);
    let report = scheduler.sync_all().await.unwrap();
    assert_eq!(report.launched(), 1);
}

/// Test: A controller restarted on the same storage picks up where the
/// previous one stopped.
#[tokio::test]
async fn test_restart_resumes_from_stored_status() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = hourly("report");
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let (first, _, _) = scheduler_with(storage.clone(), t1() + Duration::minutes(1)).await;
    first.sync_all().await.unwrap();
    drop(first);

    let (second, clock, recorder) =
        scheduler_with(storage.clone(), t1() + Duration::minutes(2)).await;
    let report = second.sync_all().await.unwrap();
    assert_eq!(report.launched(), 0);

    clock.set(t2() + Duration::minutes(1));
    second.sync_all().await.unwrap();
    assert_eq!(recorder.invoked().await, vec![t2()]);
    assert_eq!(storage.list_children().await.unwrap().len(), 2);
}
