//! Single-object reconciliation.
//!
//! [`Reconciler::sync_one`] drives one schedule object through evaluation,
//! carries out the resulting decision against storage, and persists the
//! updated status. It holds no state of its own between calls; everything it
//! needs to resume is in the object's status and the children in storage.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use super::types::{SchedulerError, SyncOutcome};
use crate::core::clock::Clock;
use crate::core::evaluator::unmet_firings;
use crate::core::object::{ChildJob, ChildRef, JobOutcome, ScheduleObject, ScheduleStatus, child_name};
use crate::core::ownership::{parent_uid_of, sort_by_start_time};
use crate::core::policy::{Decision, PolicyContext, Resolution};
use crate::core::types::ObjectKey;
use crate::events::{Event, EventBus};
use crate::storage::{Storage, StorageError};

/// Reconciles individual schedule objects against storage.
pub struct Reconciler<S: Storage> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    max_missed_schedules: usize,
}

impl<S: Storage> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            event_bus: Arc::clone(&self.event_bus),
            max_missed_schedules: self.max_missed_schedules,
        }
    }
}

impl<S: Storage> Reconciler<S> {
    pub fn new(
        storage: Arc<S>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        max_missed_schedules: usize,
    ) -> Self {
        Self {
            storage,
            clock,
            event_bus,
            max_missed_schedules,
        }
    }

    /// Reconcile `schedule` given the children currently in storage.
    ///
    /// `children` may contain objects owned by other schedules; only those
    /// controlled by `schedule` are considered. The wall time is reported
    /// whether or not reconciliation succeeds.
    pub async fn sync_one(
        &self,
        schedule: &ScheduleObject,
        children: &[ChildJob],
    ) -> Result<SyncOutcome, SchedulerError> {
        let started = Instant::now();
        let result = self.reconcile(schedule, children).await;
        self.event_bus
            .emit(Event::sync_one_completed(
                schedule.key.clone(),
                started.elapsed(),
            ))
            .await;
        result
    }

    async fn reconcile(
        &self,
        schedule: &ScheduleObject,
        children: &[ChildJob],
    ) -> Result<SyncOutcome, SchedulerError> {
        let key = &schedule.key;
        let spec = &schedule.spec;
        let now = self.clock.now();

        let owned: Vec<&ChildJob> = children
            .iter()
            .filter(|c| parent_uid_of(c) == Some(&schedule.uid))
            .collect();

        let mut status = schedule.status.clone();
        let mut events = track_active(key, &mut status, &owned);

        let launched: Vec<DateTime<Utc>> = owned.iter().filter_map(|c| c.scheduled_time).collect();
        let policy = PolicyContext {
            concurrency_policy: spec.concurrency_policy,
            suspend: spec.suspend,
            active: &status.active,
            launched: &launched,
        };

        let (resolution, next_firing) = match spec.parse_schedule() {
            Err(e) => {
                tracing::error!(
                    schedule = %key,
                    expression = %spec.schedule,
                    error = %e,
                    "Unparseable schedule"
                );
                (policy.decide_on_error(e.to_string(), now), None)
            }
            Ok(parsed) => {
                let since = status
                    .last_schedule_time
                    .unwrap_or(schedule.creation_timestamp);
                let resolution = match unmet_firings(
                    &parsed,
                    since,
                    now,
                    spec.starting_deadline(),
                    self.max_missed_schedules,
                ) {
                    Ok(unmet) => {
                        if unmet.discarded() > 0 && !spec.suspend {
                            tracing::warn!(
                                schedule = %key,
                                discarded = unmet.discarded(),
                                "Multiple unmet firings, acting on the latest only"
                            );
                        }
                        policy.decide(&unmet)
                    }
                    Err(e) => {
                        tracing::warn!(
                            schedule = %key,
                            since = %since,
                            error = %e,
                            "Cannot determine if schedule is due"
                        );
                        policy.decide_on_error(e.to_string(), now)
                    }
                };
                (resolution, parsed.next_after(now))
            }
        };

        let launch = self.execute(schedule, &resolution, &mut status).await?;
        let (launched_child, decision) = match launch {
            Some(Launch::Running(child)) => (Some(child), resolution.decision),
            Some(Launch::Blocked(reason)) => (None, Some(Decision::SkipError { reason })),
            None => (None, resolution.decision),
        };
        if let Some(child) = &launched_child
            && !status.is_active(&child.uid)
        {
            status.active.push(ChildRef::from(child));
        }

        if let Some(at) = resolution.record {
            status.record_schedule_time(at);
        }

        if status != schedule.status {
            self.storage.update_status(key, status.clone()).await?;
        }

        self.prune_history(schedule, &owned).await;

        if let Some(decision) = &decision {
            events.extend(decision_event(key, decision, launched_child.as_ref()));
        }
        for event in events {
            self.event_bus.emit(event).await;
        }

        Ok(SyncOutcome {
            key: key.clone(),
            decision,
            launched: launched_child.map(|c| c.key),
            last_schedule_time: status.last_schedule_time,
            active: status.active.len(),
            next_firing,
        })
    }

    /// Carry out the decision. Returns `None` for decisions that launch
    /// nothing.
    async fn execute(
        &self,
        schedule: &ScheduleObject,
        resolution: &Resolution,
        status: &mut ScheduleStatus,
    ) -> Result<Option<Launch>, StorageError> {
        let key = &schedule.key;
        match &resolution.decision {
            None => Ok(None),
            Some(Decision::Fire { scheduled_time }) => {
                self.launch(schedule, *scheduled_time).await.map(Some)
            }
            Some(Decision::ReplaceAndFire {
                superseded,
                scheduled_time,
            }) => {
                for old in superseded {
                    let old_key = ObjectKey::new(key.namespace.clone(), old.name.clone());
                    match self.storage.delete_child(&old_key).await {
                        Ok(()) | Err(StorageError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                    tracing::info!(schedule = %key, child = %old_key, "Deleted superseded child");
                    status.remove_active(&old.uid);
                }
                self.launch(schedule, *scheduled_time).await.map(Some)
            }
            Some(Decision::SkipConcurrencyPolicy { scheduled_time }) => {
                tracing::info!(
                    schedule = %key,
                    scheduled_time = %scheduled_time,
                    active = status.active.len(),
                    "Not starting child because an earlier one is still running"
                );
                Ok(None)
            }
            Some(Decision::SkipMissedDeadline { scheduled_time }) => {
                tracing::warn!(
                    schedule = %key,
                    scheduled_time = %scheduled_time,
                    "Missed starting deadline for firing"
                );
                Ok(None)
            }
            Some(Decision::SkipError { .. }) => Ok(None),
        }
    }

    async fn launch(
        &self,
        schedule: &ScheduleObject,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Launch, StorageError> {
        let key = &schedule.key;
        match self.storage.create_child(schedule, scheduled_time).await {
            Ok(child) => {
                tracing::info!(
                    schedule = %key,
                    child = %child.key,
                    scheduled_time = %scheduled_time,
                    "Launched child"
                );
                Ok(Launch::Running(child))
            }
            Err(StorageError::DuplicateKey(_)) => {
                let child_key = ObjectKey::new(
                    key.namespace.clone(),
                    child_name(&key.name, scheduled_time),
                );
                let existing = self.storage.get_child(&child_key).await?;
                if parent_uid_of(&existing) == Some(&schedule.uid)
                    && existing.scheduled_time == Some(scheduled_time)
                {
                    tracing::info!(schedule = %key, child = %child_key, "Child already exists");
                    Ok(Launch::Running(existing))
                } else {
                    tracing::warn!(
                        schedule = %key,
                        child = %child_key,
                        scheduled_time = %scheduled_time,
                        "Child name is taken by another object"
                    );
                    Ok(Launch::Blocked(format!(
                        "child name {} is taken by an object not launched for {}",
                        child_key, scheduled_time
                    )))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the oldest finished children beyond the history limits.
    /// Failures are logged and retried on the next reconciliation.
    async fn prune_history(&self, schedule: &ScheduleObject, owned: &[&ChildJob]) {
        let spec = &schedule.spec;
        for (outcome, limit) in [
            (JobOutcome::Succeeded, spec.successful_history_limit()),
            (JobOutcome::Failed, spec.failed_history_limit()),
        ] {
            let mut finished: Vec<ChildJob> = owned
                .iter()
                .filter(|c| c.outcome() == Some(outcome))
                .map(|c| (*c).clone())
                .collect();
            if finished.len() <= limit {
                continue;
            }
            sort_by_start_time(&mut finished);
            let excess = finished.len() - limit;
            for child in &finished[..excess] {
                match self.storage.delete_child(&child.key).await {
                    Ok(()) | Err(StorageError::NotFound(_)) => {
                        tracing::debug!(
                            schedule = %schedule.key,
                            child = %child.key,
                            outcome = outcome.as_str(),
                            "Pruned finished child"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            schedule = %schedule.key,
                            child = %child.key,
                            error = %e,
                            "Failed to prune finished child"
                        );
                    }
                }
            }
        }
    }
}

/// Result of trying to launch the child for a firing.
enum Launch {
    /// The child for the firing exists, newly created or from an earlier
    /// attempt.
    Running(ChildJob),
    /// Another object holds the child's name.
    Blocked(String),
}

/// Bring `status.active` in line with the owned children and collect
/// finish events for children that left it.
fn track_active(key: &ObjectKey, status: &mut ScheduleStatus, owned: &[&ChildJob]) -> Vec<Event> {
    let mut events = Vec::new();

    for child in owned {
        match child.outcome() {
            None => {
                if !status.is_active(&child.uid) {
                    tracing::info!(schedule = %key, child = %child.key, "Adopted running child");
                    status.active.push(ChildRef::from(*child));
                }
            }
            Some(outcome) => {
                if status.remove_active(&child.uid) {
                    if outcome == JobOutcome::Succeeded
                        && let Some(at) = child.completion_time
                    {
                        status.record_success(at);
                    }
                    tracing::info!(
                        schedule = %key,
                        child = %child.key,
                        outcome = outcome.as_str(),
                        "Child finished"
                    );
                    events.push(Event::child_finished(key.clone(), child.key.clone(), outcome));
                }
            }
        }
    }

    status.active.retain(|active| {
        let present = owned.iter().any(|c| c.uid == active.uid);
        if !present {
            tracing::info!(schedule = %key, child = %active.name, "Dropped reference to missing child");
        }
        present
    });

    events
}

fn decision_event(key: &ObjectKey, decision: &Decision, launched: Option<&ChildJob>) -> Option<Event> {
    match decision {
        Decision::Fire { scheduled_time } => launched.map(|child| {
            Event::firing_invoked(key.clone(), child.key.clone(), *scheduled_time, Vec::new())
        }),
        Decision::ReplaceAndFire {
            superseded,
            scheduled_time,
        } => launched.map(|child| {
            Event::firing_invoked(
                key.clone(),
                child.key.clone(),
                *scheduled_time,
                superseded.iter().map(|r| r.name.clone()).collect(),
            )
        }),
        Decision::SkipConcurrencyPolicy { scheduled_time }
        | Decision::SkipMissedDeadline { scheduled_time } => Some(Event::firing_skipped(
            key.clone(),
            decision.skip_reason()?,
            Some(*scheduled_time),
            None,
        )),
        Decision::SkipError { reason } => Some(Event::firing_skipped(
            key.clone(),
            decision.skip_reason()?,
            None,
            Some(reason.clone()),
        )),
    }
}
