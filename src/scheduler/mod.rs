//! Scheduler engine for schedule reconciliation.
//!
//! This module provides the reconciler for a single schedule object and the
//! periodic loop that runs it over every object in storage.

mod engine;
mod handle;
mod reconcile;
mod types;

pub use engine::{DEFAULT_TICK_INTERVAL, DEFAULT_WORKERS, Scheduler};
pub use handle::SchedulerHandle;
pub use reconcile::Reconciler;
pub use types::{SchedulerError, SchedulerState, SyncOutcome, SyncReport};
