//! Worker pool and pass deadline integration tests.
//!
//! Tests that verify passes over many schedules stay within the configured
//! number of workers, reconcile each schedule once, and stop starting new
//! work once their deadline has passed.

use crate::common::{scheduler_with, t1};
use async_trait::async_trait;
use cadence::testing::ScheduleObjectBuilder;
use cadence::{
    ChildJob, InMemoryStorage, ObjectKey, ScheduleObject, ScheduleStatus, Storage, StorageError,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Storage whose child creation takes a while and records how many
/// creations overlap.
struct SlowStorage {
    inner: InMemoryStorage,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowStorage {
    fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryStorage::new(),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for SlowStorage {
    async fn list_schedules(&self) -> Result<Vec<ScheduleObject>, StorageError> {
        self.inner.list_schedules().await
    }

    async fn get_schedule(&self, key: &ObjectKey) -> Result<ScheduleObject, StorageError> {
        self.inner.get_schedule(key).await
    }

    async fn upsert_schedule(&self, schedule: ScheduleObject) -> Result<(), StorageError> {
        self.inner.upsert_schedule(schedule).await
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: ScheduleStatus,
    ) -> Result<(), StorageError> {
        self.inner.update_status(key, status).await
    }

    async fn list_children(&self) -> Result<Vec<ChildJob>, StorageError> {
        self.inner.list_children().await
    }

    async fn list_children_in(&self, namespace: &str) -> Result<Vec<ChildJob>, StorageError> {
        self.inner.list_children_in(namespace).await
    }

    async fn get_child(&self, key: &ObjectKey) -> Result<ChildJob, StorageError> {
        self.inner.get_child(key).await
    }

    async fn create_child(
        &self,
        parent: &ScheduleObject,
        scheduled_time: DateTime<Utc>,
    ) -> Result<ChildJob, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.create_child(parent, scheduled_time).await
    }

    async fn delete_child(&self, key: &ObjectKey) -> Result<(), StorageError> {
        self.inner.delete_child(key).await
    }
}

async fn seed(storage: &dyn Storage, count: usize) {
    for i in 0..count {
        let schedule = ScheduleObjectBuilder::new(format!("job-{:02}", i), "0 * * * *")
            .namespace(if i % 2 == 0 { "even" } else { "odd" })
            .created_at(t1() - ChronoDuration::minutes(10))
            .build();
        storage.upsert_schedule(schedule).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pass_respects_worker_limit() {
    let storage = Arc::new(SlowStorage::new(Duration::from_millis(20)));
    seed(storage.as_ref(), 12).await;

    let (scheduler, _, _) = scheduler_with(storage.clone(), t1() + ChronoDuration::minutes(1)).await;
    let report = scheduler.with_workers(3).sync_all().await.unwrap();

    assert_eq!(report.outcomes.len(), 12);
    assert!(report.failures.is_empty());
    assert!(storage.max_in_flight() <= 3);
    assert!(storage.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_each_schedule_reconciled_once_per_pass() {
    let storage = Arc::new(InMemoryStorage::new());
    seed(storage.as_ref(), 20).await;

    let (scheduler, _, recorder) =
        scheduler_with(storage.clone(), t1() + ChronoDuration::minutes(1)).await;
    let report = scheduler.with_workers(4).sync_all().await.unwrap();

    let keys: HashSet<&ObjectKey> = report.outcomes.iter().map(|o| &o.key).collect();
    assert_eq!(keys.len(), 20);
    assert_eq!(report.launched(), 20);
    assert_eq!(recorder.invoked().await.len(), 20);
    assert_eq!(storage.list_children().await.unwrap().len(), 20);
    assert_eq!(storage.list_children_in("even").await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_children_of_one_schedule_do_not_affect_another() {
    let storage = Arc::new(InMemoryStorage::new());
    let forbid = ScheduleObjectBuilder::new("forbid", "0 * * * *")
        .created_at(t1() - ChronoDuration::minutes(10))
        .concurrency_policy(cadence::ConcurrencyPolicy::Forbid)
        .build();
    let allow = ScheduleObjectBuilder::new("allow", "0 * * * *")
        .created_at(t1() - ChronoDuration::minutes(10))
        .build();
    storage.upsert_schedule(forbid.clone()).await.unwrap();
    storage.upsert_schedule(allow.clone()).await.unwrap();
    storage
        .insert_child(cadence::testing::owned_child(&allow, t1() - ChronoDuration::hours(1)))
        .unwrap();

    let (scheduler, _, _) = scheduler_with(storage.clone(), t1() + ChronoDuration::minutes(1)).await;
    let report = scheduler.sync_all().await.unwrap();

    assert!(report.outcome(&forbid.key).unwrap().launched.is_some());
    assert_eq!(report.outcome(&allow.key).unwrap().active, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_truncates_and_next_pass_catches_up() {
    let storage = Arc::new(SlowStorage::new(Duration::from_millis(20)));
    seed(storage.as_ref(), 10).await;

    let (scheduler, _, _) = scheduler_with(storage.clone(), t1() + ChronoDuration::minutes(1)).await;
    let scheduler = scheduler.with_workers(1);

    let report = scheduler
        .sync_all_before(Some(Instant::now() + Duration::from_millis(30)))
        .await
        .unwrap();
    assert!(report.truncated);
    assert!(!report.outcomes.is_empty());
    assert!(report.outcomes.len() < 10);
    let first_pass = report.launched();

    let report = scheduler.sync_all().await.unwrap();
    assert!(!report.truncated);
    assert_eq!(report.outcomes.len(), 10);
    assert_eq!(report.launched(), 10 - first_pass);
    assert_eq!(storage.list_children().await.unwrap().len(), 10);
}
