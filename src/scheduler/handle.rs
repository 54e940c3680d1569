//! Control surface of a started [`Scheduler`](super::Scheduler).
//!
//! Every request travels over the command channel and is answered by the
//! loop between ticks, so a request never runs concurrently with a periodic
//! pass.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use super::types::{SchedulerCommand, SchedulerError, SchedulerState, SyncOutcome, SyncReport};
use crate::core::types::ObjectKey;

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Cloneable handle to a running reconciliation loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    /// Send a command and wait for the loop to answer it. Fails once the
    /// loop has stopped.
    async fn request<T>(
        &self,
        operation: &'static str,
        command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T, SchedulerError> {
        let stopped =
            || SchedulerError::ChannelError(format!("{} rejected: loop has stopped", operation));
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|_| stopped())?;
        response_rx.await.map_err(|_| stopped())
    }

    /// Reconcile every schedule now and return the pass report.
    ///
    /// Works while paused.
    pub async fn sync_now(&self) -> Result<SyncReport, SchedulerError> {
        self.request("sync", |response| SchedulerCommand::SyncNow { response })
            .await?
    }

    /// Reconcile a single schedule now, e.g. right after its spec changed.
    ///
    /// Works while paused.
    pub async fn sync_schedule(&self, key: ObjectKey) -> Result<SyncOutcome, SchedulerError> {
        self.request("sync schedule", |response| {
            SchedulerCommand::SyncSchedule { key, response }
        })
        .await?
    }

    /// Stop reconciling on ticks. Returns the state before the call.
    ///
    /// Firings that come due while paused are evaluated on the first pass
    /// after resuming, which launches at most the latest of them.
    pub async fn pause(&self) -> Result<SchedulerState, SchedulerError> {
        self.request("pause", |response| SchedulerCommand::SetState {
            state: SchedulerState::Paused,
            response,
        })
        .await
    }

    /// Reconcile on ticks again. Returns the state before the call.
    pub async fn resume(&self) -> Result<SchedulerState, SchedulerError> {
        self.request("resume", |response| SchedulerCommand::SetState {
            state: SchedulerState::Running,
            response,
        })
        .await
    }

    /// Stop the loop once the current pass, if any, has finished.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request("shutdown", |response| SchedulerCommand::Shutdown { response })
            .await
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == SchedulerState::Running
    }

    pub async fn is_paused(&self) -> bool {
        self.state().await == SchedulerState::Paused
    }
}
