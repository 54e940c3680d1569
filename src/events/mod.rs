//! Lifecycle events and event handling.
//!
//! The reconciler reports every decision it carries out, every child it sees
//! finish, and the wall time of its passes as [`Event`]s on an [`EventBus`].
//! Handlers turn them into logs or metrics; they never feed back into
//! decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::object::JobOutcome;
use crate::core::policy::SkipReason;
use crate::core::types::ObjectKey;

/// Lifecycle events emitted during reconciliation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A child was launched for a firing.
    FiringInvoked {
        schedule: ObjectKey,
        child: ObjectKey,
        scheduled_time: DateTime<Utc>,
        /// Names of running children deleted to make room (Replace policy).
        replaced: Vec<String>,
        timestamp: Instant,
    },

    /// A firing was not launched.
    FiringSkipped {
        schedule: ObjectKey,
        reason: SkipReason,
        scheduled_time: Option<DateTime<Utc>>,
        detail: Option<String>,
        timestamp: Instant,
    },

    /// A child launched by a schedule was observed to have finished.
    ChildFinished {
        schedule: ObjectKey,
        child: ObjectKey,
        outcome: JobOutcome,
        timestamp: Instant,
    },

    /// One schedule object was reconciled.
    SyncOneCompleted {
        schedule: ObjectKey,
        duration: Duration,
        timestamp: Instant,
    },

    /// A pass over all schedule objects finished.
    SyncAllCompleted {
        schedules: usize,
        failures: usize,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::FiringInvoked { timestamp, .. } => *timestamp,
            Event::FiringSkipped { timestamp, .. } => *timestamp,
            Event::ChildFinished { timestamp, .. } => *timestamp,
            Event::SyncOneCompleted { timestamp, .. } => *timestamp,
            Event::SyncAllCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// The schedule object the event is attributed to, if any.
    pub fn schedule(&self) -> Option<&ObjectKey> {
        match self {
            Event::FiringInvoked { schedule, .. }
            | Event::FiringSkipped { schedule, .. }
            | Event::ChildFinished { schedule, .. }
            | Event::SyncOneCompleted { schedule, .. } => Some(schedule),
            Event::SyncAllCompleted { .. } => None,
        }
    }

    /// Create a FiringInvoked event.
    pub fn firing_invoked(
        schedule: ObjectKey,
        child: ObjectKey,
        scheduled_time: DateTime<Utc>,
        replaced: Vec<String>,
    ) -> Self {
        Event::FiringInvoked {
            schedule,
            child,
            scheduled_time,
            replaced,
            timestamp: Instant::now(),
        }
    }

    /// Create a FiringSkipped event.
    pub fn firing_skipped(
        schedule: ObjectKey,
        reason: SkipReason,
        scheduled_time: Option<DateTime<Utc>>,
        detail: Option<String>,
    ) -> Self {
        Event::FiringSkipped {
            schedule,
            reason,
            scheduled_time,
            detail,
            timestamp: Instant::now(),
        }
    }

    /// Create a ChildFinished event.
    pub fn child_finished(schedule: ObjectKey, child: ObjectKey, outcome: JobOutcome) -> Self {
        Event::ChildFinished {
            schedule,
            child,
            outcome,
            timestamp: Instant::now(),
        }
    }

    /// Create a SyncOneCompleted event.
    pub fn sync_one_completed(schedule: ObjectKey, duration: Duration) -> Self {
        Event::SyncOneCompleted {
            schedule,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a SyncAllCompleted event.
    pub fn sync_all_completed(schedules: usize, failures: usize, duration: Duration) -> Self {
        Event::SyncAllCompleted {
            schedules,
            failures,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
