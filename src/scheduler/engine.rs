//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Reconciling every schedule object on a fixed tick
//! - Bounding how many objects are reconciled at once
//! - Stopping a pass that overruns its deadline
//! - Manual passes, pause and resume
//! - Event emission

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::reconcile::Reconciler;
use super::types::{SchedulerCommand, SchedulerError, SchedulerState, SyncOutcome, SyncReport};
use crate::core::clock::{Clock, SystemClock};
use crate::core::evaluator::DEFAULT_MAX_MISSED_SCHEDULES;
use crate::core::ownership::group_by_parent;
use crate::core::types::ObjectKey;
use crate::events::{Event, EventBus};
use crate::storage::{Storage, StorageError};

/// Default number of schedule objects reconciled concurrently.
pub const DEFAULT_WORKERS: usize = 4;

/// Default interval between reconciliation passes.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Periodic reconciler for all schedule objects in storage.
pub struct Scheduler<S: Storage> {
    /// Storage backend.
    storage: Arc<S>,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
    /// Source of the current time for schedule evaluation.
    clock: Arc<dyn Clock>,
    /// Interval between passes.
    tick_interval: Duration,
    /// Maximum number of objects reconciled at once.
    workers: usize,
    /// Unmet firings tolerated before a schedule is reported as broken.
    max_missed_schedules: usize,
    /// Time budget for one pass (None = unbounded).
    pass_timeout: Option<Duration>,
}

impl<S: Storage + 'static> Scheduler<S> {
    /// Create a new scheduler with the given storage.
    pub fn new(storage: S) -> Self {
        Self::with_storage(Arc::new(storage))
    }

    /// Create a new scheduler with shared storage.
    pub fn with_storage(storage: Arc<S>) -> Self {
        Self {
            storage,
            event_bus: Arc::new(EventBus::new()),
            clock: Arc::new(SystemClock),
            tick_interval: DEFAULT_TICK_INTERVAL,
            workers: DEFAULT_WORKERS,
            max_missed_schedules: DEFAULT_MAX_MISSED_SCHEDULES,
            pass_timeout: None,
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Set the clock used to evaluate schedules.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the number of objects reconciled concurrently. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set how many unmet firings a schedule may accumulate.
    pub fn with_max_missed_schedules(mut self, max: usize) -> Self {
        self.max_missed_schedules = max;
        self
    }

    /// Set the time budget for each periodic pass.
    pub fn with_pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = Some(timeout);
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    fn reconciler(&self) -> Reconciler<S> {
        Reconciler::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.clock),
            Arc::clone(&self.event_bus),
            self.max_missed_schedules,
        )
    }

    /// Reconcile the schedule object stored under `key`.
    pub async fn sync_key(&self, key: &ObjectKey) -> Result<SyncOutcome, SchedulerError> {
        let schedule = match self.storage.get_schedule(key).await {
            Ok(schedule) => schedule,
            Err(StorageError::NotFound(_)) => {
                return Err(SchedulerError::ScheduleNotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let children = self.storage.list_children_in(&key.namespace).await?;
        self.reconciler().sync_one(&schedule, &children).await
    }

    /// Reconcile every schedule object once.
    pub async fn sync_all(&self) -> Result<SyncReport, SchedulerError> {
        self.sync_all_before(None).await
    }

    /// Reconcile every schedule object once, starting no new work after
    /// `deadline`.
    ///
    /// Objects already being reconciled when the deadline passes are allowed
    /// to finish. Failures of individual objects are collected in the report;
    /// only failing to list objects fails the pass.
    pub async fn sync_all_before(
        &self,
        deadline: Option<Instant>,
    ) -> Result<SyncReport, SchedulerError> {
        let started = Instant::now();
        let schedules = self.storage.list_schedules().await?;
        let mut children = group_by_parent(self.storage.list_children().await?);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut report = SyncReport::default();
        let mut tasks = Vec::with_capacity(schedules.len());

        for schedule in schedules {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    remaining_from = %schedule.key,
                    "Reconciliation pass exceeded its deadline, deferring remaining schedules"
                );
                report.truncated = true;
                break;
            }

            let owned = children.remove(&schedule.uid).unwrap_or_default();
            let reconciler = self.reconciler();
            let key = schedule.key.clone();
            let task = tokio::spawn(async move {
                let _permit = permit;
                reconciler.sync_one(&schedule, &owned).await
            });
            tasks.push((key, task));
        }

        for (key, task) in tasks {
            match task.await {
                Ok(Ok(outcome)) => report.outcomes.push(outcome),
                Ok(Err(e)) => {
                    tracing::warn!(schedule = %key, error = %e, "Failed to reconcile schedule");
                    report.failures.push((key, e));
                }
                Err(e) => {
                    tracing::error!(schedule = %key, error = %e, "Reconcile task panicked");
                    report
                        .failures
                        .push((key, SchedulerError::TaskFailed(e.to_string())));
                }
            }
        }

        report.duration = started.elapsed();
        self.event_bus
            .emit(Event::sync_all_completed(
                report.outcomes.len() + report.failures.len(),
                report.failures.len(),
                report.duration,
            ))
            .await;

        Ok(report)
    }

    /// Start the scheduler and return a handle for controlling it.
    pub fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// One periodic pass, bounded by the pass timeout.
    async fn pass(&self) -> Result<SyncReport, SchedulerError> {
        let deadline = self.pass_timeout.map(|t| Instant::now() + t);
        self.sync_all_before(deadline).await
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current_state = *state.read().await;
                    if current_state == SchedulerState::Running {
                        match self.pass().await {
                            Ok(report) => tracing::debug!(
                                reconciled = report.outcomes.len(),
                                failed = report.failures.len(),
                                launched = report.launched(),
                                truncated = report.truncated,
                                "Reconciliation pass finished"
                            ),
                            Err(e) => tracing::warn!(error = %e, "Reconciliation pass failed"),
                        }
                    }
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::SyncNow { response } => {
                            let result = self.pass().await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::SyncSchedule { key, response } => {
                            let _ = response.send(self.sync_key(&key).await);
                        }
                        SchedulerCommand::SetState { state: next, response } => {
                            let mut s = state.write().await;
                            let previous = std::mem::replace(&mut *s, next);
                            drop(s);
                            if previous != next {
                                tracing::info!(from = ?previous, to = ?next, "Scheduler state changed");
                            }
                            let _ = response.send(previous);
                        }
                        SchedulerCommand::Shutdown { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Stopped;
                            drop(s);
                            tracing::info!("Scheduler stopped");
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }
}
