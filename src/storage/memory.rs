//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Storage, StorageError};
use crate::core::object::{ChildJob, JobOutcome, ScheduleObject, ScheduleStatus};
use crate::core::types::ObjectKey;

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    schedules: RwLock<HashMap<ObjectKey, ScheduleObject>>,
    children: RwLock<HashMap<ObjectKey, ChildJob>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            schedules: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a child as-is, replacing any child with the same key.
    ///
    /// Stands in for objects created by something other than the controller.
    pub fn insert_child(&self, child: ChildJob) -> Result<(), StorageError> {
        let mut children = self
            .children
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        children.insert(child.key.clone(), child);
        Ok(())
    }

    /// Mark a child as started, as the executor would.
    pub fn start_child(&self, key: &ObjectKey, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.with_child(key, |child| child.mark_started(at))
    }

    /// Mark a child as finished, as the executor would.
    pub fn finish_child(
        &self,
        key: &ObjectKey,
        outcome: JobOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.with_child(key, |child| child.mark_finished(outcome, at))
    }

    fn with_child(
        &self,
        key: &ObjectKey,
        update: impl FnOnce(&mut ChildJob),
    ) -> Result<(), StorageError> {
        let mut children = self
            .children
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let child = children
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(format!("child: {}", key)))?;
        update(child);
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn list_schedules(&self) -> Result<Vec<ScheduleObject>, StorageError> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = schedules.values().cloned().collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }

    async fn get_schedule(&self, key: &ObjectKey) -> Result<ScheduleObject, StorageError> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        schedules
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("schedule: {}", key)))
    }

    async fn upsert_schedule(&self, schedule: ScheduleObject) -> Result<(), StorageError> {
        let mut schedules = self
            .schedules
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        schedules.insert(schedule.key.clone(), schedule);
        Ok(())
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: ScheduleStatus,
    ) -> Result<(), StorageError> {
        let mut schedules = self
            .schedules
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let schedule = schedules
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(format!("schedule: {}", key)))?;
        schedule.status = status;
        Ok(())
    }

    async fn list_children(&self) -> Result<Vec<ChildJob>, StorageError> {
        let children = self
            .children
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = children.values().cloned().collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }

    async fn list_children_in(&self, namespace: &str) -> Result<Vec<ChildJob>, StorageError> {
        let children = self
            .children
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = children
            .values()
            .filter(|c| c.key.namespace == namespace)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }

    async fn get_child(&self, key: &ObjectKey) -> Result<ChildJob, StorageError> {
        let children = self
            .children
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        children
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("child: {}", key)))
    }

    async fn create_child(
        &self,
        parent: &ScheduleObject,
        scheduled_time: DateTime<Utc>,
    ) -> Result<ChildJob, StorageError> {
        let child = ChildJob::from_template(parent, scheduled_time);
        let mut children = self
            .children
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if children.contains_key(&child.key) {
            return Err(StorageError::DuplicateKey(format!("child: {}", child.key)));
        }
        children.insert(child.key.clone(), child.clone());
        Ok(child)
    }

    async fn delete_child(&self, key: &ObjectKey) -> Result<(), StorageError> {
        let mut children = self
            .children
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        children
            .remove(key)
            .ok_or_else(|| StorageError::NotFound(format!("child: {}", key)))?;
        Ok(())
    }
}
