//! Reconciliation decision integration tests.
//!
//! Drives single schedules through `Scheduler::sync_key` against in-memory
//! storage and checks the launched children, recorded status, and events.

use crate::common::{scheduler_with, t1, t2};
use cadence::testing::{ScheduleObjectBuilder, finished_child, owned_child};
use cadence::{
    ChildJob, ChildRef, ConcurrencyPolicy, Decision, InMemoryStorage, JobOutcome, ObjectKey,
    ScheduleObject, SkipReason, Storage,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

const HOURLY: &str = "0 * * * *";

/// One row of the decision table.
struct Case {
    name: &'static str,
    policy: ConcurrencyPolicy,
    suspend: bool,
    deadline: Option<u64>,
    /// Last firing acted on before this reconciliation.
    ran_at: Option<DateTime<Utc>>,
    /// Whether a child for `ran_at` is still running.
    running: bool,
    now: DateTime<Utc>,

    expect_launch: Option<DateTime<Utc>>,
    expect_skip: Option<SkipReason>,
    expect_replaced: bool,
    expect_last_schedule_time: Option<DateTime<Utc>>,
    expect_active: usize,
}

fn created() -> DateTime<Utc> {
    t1() - Duration::minutes(10)
}

fn just_before_t1() -> DateTime<Utc> {
    t1() - Duration::minutes(1)
}

fn just_after_t1() -> DateTime<Utc> {
    t1() + Duration::minutes(1)
}

fn just_after_t2() -> DateTime<Utc> {
    t2() + Duration::minutes(1)
}

fn week_after_t1() -> DateTime<Utc> {
    t1() + Duration::days(7)
}

fn cases() -> Vec<Case> {
    use ConcurrencyPolicy::*;

    let mut cases = Vec::new();
    for policy in [Allow, Forbid, Replace] {
        cases.push(Case {
            name: "nothing due before first firing",
            policy,
            suspend: false,
            deadline: None,
            ran_at: None,
            running: false,
            now: just_before_t1(),
            expect_launch: None,
            expect_skip: None,
            expect_replaced: false,
            expect_last_schedule_time: None,
            expect_active: 0,
        });
        cases.push(Case {
            name: "first firing launches",
            policy,
            suspend: false,
            deadline: None,
            ran_at: None,
            running: false,
            now: just_after_t1(),
            expect_launch: Some(t1()),
            expect_skip: None,
            expect_replaced: false,
            expect_last_schedule_time: Some(t1()),
            expect_active: 1,
        });
        cases.push(Case {
            name: "suspended records without launching",
            policy,
            suspend: true,
            deadline: None,
            ran_at: None,
            running: false,
            now: just_after_t1(),
            expect_launch: None,
            expect_skip: None,
            expect_replaced: false,
            expect_last_schedule_time: Some(t1()),
            expect_active: 0,
        });
        cases.push(Case {
            name: "already ran this firing",
            policy,
            suspend: false,
            deadline: None,
            ran_at: Some(t1()),
            running: true,
            now: just_after_t1(),
            expect_launch: None,
            expect_skip: None,
            expect_replaced: false,
            expect_last_schedule_time: Some(t1()),
            expect_active: 1,
        });
        cases.push(Case {
            name: "second firing with nothing running",
            policy,
            suspend: false,
            deadline: None,
            ran_at: Some(t1()),
            running: false,
            now: just_after_t2(),
            expect_launch: Some(t2()),
            expect_skip: None,
            expect_replaced: false,
            expect_last_schedule_time: Some(t2()),
            expect_active: 1,
        });
        cases.push(Case {
            name: "second firing missed its deadline",
            policy,
            suspend: false,
            deadline: Some(10),
            ran_at: Some(t1()),
            running: false,
            now: just_after_t2(),
            expect_launch: None,
            expect_skip: Some(SkipReason::MissedDeadline),
            expect_replaced: false,
            expect_last_schedule_time: Some(t2()),
            expect_active: 0,
        });
        cases.push(Case {
            name: "week of missed firings within deadline launches latest",
            policy,
            suspend: false,
            deadline: Some(10),
            ran_at: Some(t1()),
            running: false,
            now: week_after_t1(),
            expect_launch: Some(week_after_t1()),
            expect_skip: None,
            expect_replaced: false,
            expect_last_schedule_time: Some(week_after_t1()),
            expect_active: 1,
        });
        cases.push(Case {
            name: "week of missed firings without deadline is too many",
            policy,
            suspend: false,
            deadline: None,
            ran_at: Some(t1()),
            running: false,
            now: week_after_t1(),
            expect_launch: None,
            expect_skip: Some(SkipReason::Error),
            expect_replaced: false,
            expect_last_schedule_time: Some(week_after_t1()),
            expect_active: 0,
        });
    }

    // Second firing while the first child still runs depends on the policy.
    cases.push(Case {
        name: "allow runs alongside",
        policy: Allow,
        suspend: false,
        deadline: None,
        ran_at: Some(t1()),
        running: true,
        now: just_after_t2(),
        expect_launch: Some(t2()),
        expect_skip: None,
        expect_replaced: false,
        expect_last_schedule_time: Some(t2()),
        expect_active: 2,
    });
    cases.push(Case {
        name: "forbid skips",
        policy: Forbid,
        suspend: false,
        deadline: None,
        ran_at: Some(t1()),
        running: true,
        now: just_after_t2(),
        expect_launch: None,
        expect_skip: Some(SkipReason::ConcurrencyPolicy),
        expect_replaced: false,
        expect_last_schedule_time: Some(t2()),
        expect_active: 1,
    });
    cases.push(Case {
        name: "replace deletes and launches",
        policy: Replace,
        suspend: false,
        deadline: None,
        ran_at: Some(t1()),
        running: true,
        now: just_after_t2(),
        expect_launch: Some(t2()),
        expect_skip: None,
        expect_replaced: true,
        expect_last_schedule_time: Some(t2()),
        expect_active: 1,
    });
    cases.push(Case {
        name: "suspended with child running",
        policy: Replace,
        suspend: true,
        deadline: None,
        ran_at: Some(t1()),
        running: true,
        now: just_after_t2(),
        expect_launch: None,
        expect_skip: None,
        expect_replaced: false,
        expect_last_schedule_time: Some(t2()),
        expect_active: 1,
    });

    cases
}

fn schedule_for(case: &Case) -> ScheduleObject {
    let mut builder = ScheduleObjectBuilder::new("report", HOURLY)
        .created_at(created())
        .concurrency_policy(case.policy);
    if case.suspend {
        builder = builder.suspended();
    }
    if let Some(secs) = case.deadline {
        builder = builder.starting_deadline_seconds(secs);
    }
    if let Some(at) = case.ran_at {
        builder = builder.last_schedule_time(at);
    }
    builder.build()
}

#[tokio::test]
async fn test_decision_table() {
    for case in cases() {
        let label = format!("{} ({})", case.name, case.policy.as_str());
        let storage = Arc::new(InMemoryStorage::new());
        let mut schedule = schedule_for(&case);

        let mut previous: Option<ChildJob> = None;
        if let Some(ran_at) = case.ran_at {
            let child = if case.running {
                owned_child(&schedule, ran_at)
            } else {
                finished_child(&schedule, ran_at, JobOutcome::Succeeded, ran_at)
            };
            if case.running {
                schedule.status.active.push(ChildRef::from(&child));
            }
            storage.insert_child(child.clone()).unwrap();
            previous = Some(child);
        }
        storage.upsert_schedule(schedule.clone()).await.unwrap();

        let (scheduler, _clock, recorder) = scheduler_with(storage.clone(), case.now).await;
        let outcome = scheduler.sync_key(&schedule.key).await.unwrap();

        let launched_for = outcome
            .decision
            .as_ref()
            .filter(|d| d.launches())
            .and_then(Decision::scheduled_time);
        assert_eq!(launched_for, case.expect_launch, "{}: launch", label);
        assert_eq!(outcome.launched.is_some(), case.expect_launch.is_some(), "{}: child", label);
        assert_eq!(
            outcome.decision.as_ref().and_then(Decision::skip_reason),
            case.expect_skip,
            "{}: skip",
            label
        );
        assert_eq!(
            outcome.last_schedule_time, case.expect_last_schedule_time,
            "{}: last schedule time",
            label
        );
        assert_eq!(outcome.active, case.expect_active, "{}: active", label);

        let stored = storage.get_schedule(&schedule.key).await.unwrap();
        assert_eq!(stored.status.last_schedule_time, case.expect_last_schedule_time, "{}: stored", label);
        assert_eq!(stored.status.active.len(), case.expect_active, "{}: stored active", label);

        if let Some(previous) = previous {
            let still_there = storage.get_child(&previous.key).await.is_ok();
            assert_eq!(still_there, !case.expect_replaced, "{}: previous child", label);
        }

        let invoked = recorder.invoked().await;
        assert_eq!(invoked, case.expect_launch.into_iter().collect::<Vec<_>>(), "{}: events", label);
        let skipped = recorder.skipped().await;
        assert_eq!(skipped, case.expect_skip.into_iter().collect::<Vec<_>>(), "{}: skip events", label);
    }
}

#[tokio::test]
async fn test_time_zone_schedule_fires_at_local_time() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = ScheduleObjectBuilder::new("standup", "0 9 * * *")
        .time_zone("America/New_York")
        .created_at(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        .build();
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let (scheduler, clock, _) =
        scheduler_with(storage.clone(), Utc.with_ymd_and_hms(2024, 3, 1, 13, 59, 0).unwrap()).await;
    let early = scheduler.sync_key(&schedule.key).await.unwrap();
    assert_eq!(early.launched, None);
    assert_eq!(
        early.next_firing,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap())
    );

    clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 14, 1, 0).unwrap());
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();
    assert_eq!(
        outcome.last_schedule_time,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap())
    );
    assert!(outcome.launched.is_some());
}

#[tokio::test]
async fn test_foreign_children_are_ignored() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = ScheduleObjectBuilder::new("report", HOURLY)
        .created_at(created())
        .concurrency_policy(ConcurrencyPolicy::Forbid)
        .build();
    let other = ScheduleObjectBuilder::new("other", HOURLY).build();
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    // Running, but owned by a different schedule; plus one with no owner.
    storage.insert_child(owned_child(&other, t1())).unwrap();
    storage
        .insert_child(ChildJob::new(ObjectKey::new("default", "loose")))
        .unwrap();

    let (scheduler, _, _) = scheduler_with(storage.clone(), just_after_t1()).await;
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();

    assert_eq!(outcome.decision, Some(Decision::Fire { scheduled_time: t1() }));
    assert_eq!(outcome.active, 1);
}

#[tokio::test]
async fn test_unlisted_running_child_is_adopted() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = ScheduleObjectBuilder::new("report", HOURLY)
        .created_at(created())
        .concurrency_policy(ConcurrencyPolicy::Forbid)
        .last_schedule_time(t1())
        .build();
    storage.upsert_schedule(schedule.clone()).await.unwrap();
    storage.insert_child(owned_child(&schedule, t1())).unwrap();

    let (scheduler, _, _) = scheduler_with(storage.clone(), just_after_t2()).await;
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();

    assert_eq!(outcome.active, 1);
    assert_eq!(
        outcome.decision.as_ref().and_then(Decision::skip_reason),
        Some(SkipReason::ConcurrencyPolicy)
    );
}

#[tokio::test]
async fn test_reference_to_missing_child_is_dropped() {
    let storage = Arc::new(InMemoryStorage::new());
    let mut schedule = ScheduleObjectBuilder::new("report", HOURLY)
        .created_at(created())
        .concurrency_policy(ConcurrencyPolicy::Forbid)
        .last_schedule_time(t1())
        .build();
    let vanished = owned_child(&schedule, t1());
    schedule.status.active.push(ChildRef::from(&vanished));
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let (scheduler, _, _) = scheduler_with(storage.clone(), just_after_t2()).await;
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();

    // The stale reference no longer blocks Forbid.
    assert_eq!(outcome.decision, Some(Decision::Fire { scheduled_time: t2() }));
    assert_eq!(outcome.active, 1);
}

#[tokio::test]
async fn test_finished_children_are_counted_once() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = ScheduleObjectBuilder::new("report", HOURLY)
        .created_at(created())
        .build();
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let (scheduler, clock, recorder) = scheduler_with(storage.clone(), just_after_t1()).await;
    let first = scheduler.sync_key(&schedule.key).await.unwrap().launched.unwrap();

    clock.set(just_after_t2());
    let second = scheduler.sync_key(&schedule.key).await.unwrap().launched.unwrap();

    let done = t2() + Duration::minutes(5);
    storage.start_child(&first, t1()).unwrap();
    storage.finish_child(&first, JobOutcome::Succeeded, done).unwrap();
    storage.start_child(&second, t2()).unwrap();
    storage.finish_child(&second, JobOutcome::Failed, done).unwrap();

    clock.set(t2() + Duration::minutes(10));
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();
    scheduler.sync_key(&schedule.key).await.unwrap();

    assert_eq!(outcome.active, 0);
    let mut finished = recorder.finished().await;
    finished.sort_by_key(|o| o.as_str());
    assert_eq!(finished, vec![JobOutcome::Failed, JobOutcome::Succeeded]);

    let stored = storage.get_schedule(&schedule.key).await.unwrap();
    assert_eq!(stored.status.last_successful_time, Some(done));
}

#[tokio::test]
async fn test_history_limits_prune_oldest_finished_children() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = ScheduleObjectBuilder::new("report", HOURLY)
        .created_at(created())
        .history_limits(2, 1)
        .last_schedule_time(t1() + Duration::hours(5))
        .build();
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    for hour in 0..4 {
        let at = t1() + Duration::hours(hour);
        storage
            .insert_child(finished_child(&schedule, at, JobOutcome::Succeeded, at))
            .unwrap();
    }
    for hour in 4..6 {
        let at = t1() + Duration::hours(hour);
        storage
            .insert_child(finished_child(&schedule, at, JobOutcome::Failed, at))
            .unwrap();
    }

    let (scheduler, _, _) =
        scheduler_with(storage.clone(), t1() + Duration::hours(5) + Duration::minutes(1)).await;
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();
    assert_eq!(outcome.decision, None);

    let mut remaining: Vec<DateTime<Utc>> = storage
        .list_children()
        .await
        .unwrap()
        .iter()
        .filter_map(|c| c.scheduled_time)
        .collect();
    remaining.sort();
    assert_eq!(
        remaining,
        vec![
            t1() + Duration::hours(2),
            t1() + Duration::hours(3),
            t1() + Duration::hours(5),
        ]
    );
}

#[tokio::test]
async fn test_invalid_schedule_is_reported_and_skipped() {
    let storage = Arc::new(InMemoryStorage::new());
    let schedule = ScheduleObjectBuilder::new("broken", "61 * * * *")
        .created_at(created())
        .build();
    storage.upsert_schedule(schedule.clone()).await.unwrap();

    let (scheduler, _, recorder) = scheduler_with(storage.clone(), just_after_t1()).await;
    let outcome = scheduler.sync_key(&schedule.key).await.unwrap();

    assert_eq!(outcome.last_schedule_time, Some(just_after_t1()));
    assert_eq!(recorder.skipped().await, vec![SkipReason::Error]);
    assert!(storage.list_children().await.unwrap().is_empty());
}
