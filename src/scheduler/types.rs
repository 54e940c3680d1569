//! Scheduler type definitions.
//!
//! This module contains error types, state enums, command types, and the
//! per-object and per-pass reconciliation reports.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::policy::Decision;
use crate::core::types::ObjectKey;
use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Schedule object not found.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// A spawned reconciliation task panicked or was cancelled.
    #[error("reconcile task failed: {0}")]
    TaskFailed(String),
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Run a reconciliation pass immediately.
    SyncNow {
        response: oneshot::Sender<Result<SyncReport, SchedulerError>>,
    },
    /// Reconcile one schedule immediately.
    SyncSchedule {
        key: ObjectKey,
        response: oneshot::Sender<Result<SyncOutcome, SchedulerError>>,
    },
    /// Switch between running and paused; answered with the previous state.
    SetState {
        state: SchedulerState,
        response: oneshot::Sender<SchedulerState>,
    },
    /// Stop the loop.
    Shutdown { response: oneshot::Sender<()> },
}

/// Result of reconciling one schedule object.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub key: ObjectKey,
    /// What was decided, `None` when nothing was due.
    pub decision: Option<Decision>,
    /// Child launched by this reconciliation.
    pub launched: Option<ObjectKey>,
    /// Recorded last schedule time after the reconciliation.
    pub last_schedule_time: Option<DateTime<Utc>>,
    /// Number of children still running.
    pub active: usize,
    /// Next firing after now, for requeueing and display.
    pub next_firing: Option<DateTime<Utc>>,
}

/// Result of a pass over all schedule objects.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<SyncOutcome>,
    pub failures: Vec<(ObjectKey, SchedulerError)>,
    /// True when the pass stopped early because its deadline passed.
    pub truncated: bool,
    pub duration: Duration,
}

impl SyncReport {
    /// Outcome for `key`, if it was reconciled in this pass.
    pub fn outcome(&self, key: &ObjectKey) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| &o.key == key)
    }

    /// Number of children launched in this pass.
    pub fn launched(&self) -> usize {
        self.outcomes.iter().filter(|o| o.launched.is_some()).count()
    }
}
