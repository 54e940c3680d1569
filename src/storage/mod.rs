//! Storage abstraction for schedule objects and child jobs.
//!
//! The controller reads and writes everything through the [`Storage`] trait.
//! A real deployment backs it with the cluster API; [`InMemoryStorage`] is
//! the reference backend used by the CLI and the tests.

pub mod memory;

pub use memory::InMemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::object::{ChildJob, ScheduleObject, ScheduleStatus};
use crate::core::types::ObjectKey;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An item with the same key already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Storage trait for the objects the controller reconciles.
#[async_trait]
pub trait Storage: Send + Sync {
    // Schedule operations

    /// List all schedule objects, ordered by key.
    async fn list_schedules(&self) -> Result<Vec<ScheduleObject>, StorageError>;

    /// Get a schedule object by key.
    async fn get_schedule(&self, key: &ObjectKey) -> Result<ScheduleObject, StorageError>;

    /// Insert or replace a schedule object.
    async fn upsert_schedule(&self, schedule: ScheduleObject) -> Result<(), StorageError>;

    /// Replace the status of a schedule object.
    async fn update_status(
        &self,
        key: &ObjectKey,
        status: ScheduleStatus,
    ) -> Result<(), StorageError>;

    // Child operations

    /// List all child jobs, ordered by key.
    async fn list_children(&self) -> Result<Vec<ChildJob>, StorageError>;

    /// List child jobs in one namespace, ordered by key.
    async fn list_children_in(&self, namespace: &str) -> Result<Vec<ChildJob>, StorageError>;

    /// Get a child job by key.
    async fn get_child(&self, key: &ObjectKey) -> Result<ChildJob, StorageError>;

    /// Create the child for one firing of `parent` from its job template.
    ///
    /// Fails with [`StorageError::DuplicateKey`] when that firing already has
    /// a child.
    async fn create_child(
        &self,
        parent: &ScheduleObject,
        scheduled_time: DateTime<Utc>,
    ) -> Result<ChildJob, StorageError>;

    /// Delete a child job.
    async fn delete_child(&self, key: &ObjectKey) -> Result<(), StorageError>;
}
