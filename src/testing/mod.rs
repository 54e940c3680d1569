//! Testing utilities for users of the cadence library.
//!
//! This module provides helpers for testing reconciliation:
//!
//! - [`ScheduleObjectBuilder`]: Builds schedule objects with sensible defaults
//! - [`owned_child`]: Creates a child as if launched by a schedule
//! - [`FailingStorage`]: Wraps [`InMemoryStorage`] and fails chosen operations
//! - [`RecordingHandler`]: Captures emitted events for assertions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::core::object::{
    ChildJob, ConcurrencyPolicy, JobOutcome, ScheduleObject, ScheduleSpec, ScheduleStatus,
};
use crate::core::policy::SkipReason;
use crate::core::types::ObjectKey;
use crate::events::{Event, EventHandler};
use crate::storage::{InMemoryStorage, Storage, StorageError};

/// Builder for schedule objects used in tests.
///
/// # Example
///
/// ```
/// use cadence::testing::ScheduleObjectBuilder;
/// use cadence::ConcurrencyPolicy;
///
/// let schedule = ScheduleObjectBuilder::new("report", "*/5 * * * *")
///     .namespace("reports")
///     .concurrency_policy(ConcurrencyPolicy::Forbid)
///     .starting_deadline_seconds(60)
///     .build();
///
/// assert_eq!(schedule.key.to_string(), "reports/report");
/// assert_eq!(schedule.spec.starting_deadline_seconds, Some(60));
/// ```
#[derive(Debug, Clone)]
pub struct ScheduleObjectBuilder {
    key: ObjectKey,
    spec: ScheduleSpec,
    created_at: DateTime<Utc>,
    status: ScheduleStatus,
}

impl ScheduleObjectBuilder {
    /// Start a builder in the `default` namespace, created at the Unix epoch.
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            key: ObjectKey::new("default", name),
            spec: ScheduleSpec::new(expression),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            status: ScheduleStatus::default(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.key.namespace = namespace.into();
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn time_zone(mut self, tz: impl Into<String>) -> Self {
        self.spec.time_zone = Some(tz.into());
        self
    }

    pub fn concurrency_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.spec.concurrency_policy = policy;
        self
    }

    pub fn starting_deadline_seconds(mut self, secs: u64) -> Self {
        self.spec.starting_deadline_seconds = Some(secs);
        self
    }

    pub fn suspended(mut self) -> Self {
        self.spec.suspend = true;
        self
    }

    pub fn history_limits(mut self, successful: u32, failed: u32) -> Self {
        self.spec.successful_jobs_history_limit = Some(successful);
        self.spec.failed_jobs_history_limit = Some(failed);
        self
    }

    /// Pretend the schedule was last acted on at `at`.
    pub fn last_schedule_time(mut self, at: DateTime<Utc>) -> Self {
        self.status.last_schedule_time = Some(at);
        self
    }

    pub fn build(self) -> ScheduleObject {
        let mut schedule = ScheduleObject::new(self.key, self.spec, self.created_at);
        schedule.status = self.status;
        schedule
    }
}

/// A child of `parent` for the firing at `scheduled_time`, as the
/// reconciler would create it.
pub fn owned_child(parent: &ScheduleObject, scheduled_time: DateTime<Utc>) -> ChildJob {
    ChildJob::from_template(parent, scheduled_time)
}

/// Same as [`owned_child`], already finished with `outcome`.
pub fn finished_child(
    parent: &ScheduleObject,
    scheduled_time: DateTime<Utc>,
    outcome: JobOutcome,
    completed_at: DateTime<Utc>,
) -> ChildJob {
    let mut child = owned_child(parent, scheduled_time);
    child.mark_started(scheduled_time);
    child.mark_finished(outcome, completed_at);
    child
}

/// Storage wrapper that can be told to fail individual operations.
///
/// Every operation delegates to the wrapped [`InMemoryStorage`] unless its
/// flag is set, in which case it returns [`StorageError::Other`].
pub struct FailingStorage {
    inner: InMemoryStorage,
    fail_list_schedules: AtomicBool,
    fail_list_children: AtomicBool,
    fail_update_status: AtomicBool,
    fail_create_child: AtomicBool,
    fail_delete_child: AtomicBool,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStorage::new(),
            fail_list_schedules: AtomicBool::new(false),
            fail_list_children: AtomicBool::new(false),
            fail_update_status: AtomicBool::new(false),
            fail_create_child: AtomicBool::new(false),
            fail_delete_child: AtomicBool::new(false),
        }
    }

    /// The wrapped storage, for seeding and inspecting state.
    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    pub fn set_fail_list_schedules(&self, fail: bool) {
        self.fail_list_schedules.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list_children(&self, fail: bool) {
        self.fail_list_children.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update_status(&self, fail: bool) {
        self.fail_update_status.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_create_child(&self, fail: bool) {
        self.fail_create_child.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete_child(&self, fail: bool) {
        self.fail_delete_child.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Other(format!("injected {} error", operation)));
        }
        Ok(())
    }
}

impl Default for FailingStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn list_schedules(&self) -> Result<Vec<ScheduleObject>, StorageError> {
        Self::check(&self.fail_list_schedules, "list_schedules")?;
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
        Self::check(&self.fail_update_status, "update_status")?;
        self.inner.update_status(key, status).await
    }

    async fn list_children(&self) -> Result<Vec<ChildJob>, StorageError> {
        Self::check(&self.fail_list_children, "list_children")?;
        self.inner.list_children().await
    }

    async fn list_children_in(&self, namespace: &str) -> Result<Vec<ChildJob>, StorageError> {
        Self::check(&self.fail_list_children, "list_children")?;
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
        Self::check(&self.fail_create_child, "create_child")?;
        self.inner.create_child(parent, scheduled_time).await
    }

    async fn delete_child(&self, key: &ObjectKey) -> Result<(), StorageError> {
        Self::check(&self.fail_delete_child, "delete_child")?;
        self.inner.delete_child(key).await
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, in order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }

    /// Firing times of every launch, in order.
    pub async fn invoked(&self) -> Vec<DateTime<Utc>> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::FiringInvoked { scheduled_time, .. } => Some(*scheduled_time),
                _ => None,
            })
            .collect()
    }

    /// Reasons of every skip, in order.
    pub async fn skipped(&self) -> Vec<SkipReason> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::FiringSkipped { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    /// Outcomes of every finished child, in order.
    pub async fn finished(&self) -> Vec<JobOutcome> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::ChildFinished { outcome, .. } => Some(*outcome),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
