//! Task storage module with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database, the production backend
//!
//! Both backends give read-your-writes consistency for a single task:
//! a status update or appended attempt is visible to the next read.

mod memory;
mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::task::{Task, TaskId, TaskStatus, VerificationAttempt};

/// Shared handle to whichever store backend is configured.
pub type SharedTaskStore = Arc<dyn TaskStore>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("storage failure: {0}")]
    Database(String),
}

/// Durable CRUD for tasks and their verification attempts.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a freshly created task.
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetch one task. `Ok(None)` when the id is unknown.
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// All tasks, ordered by start time.
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Persist a status transition. `completed_at` is written only when the
    /// transition set it.
    ///
    /// # Errors
    /// `TaskNotFound` when the id does not exist.
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Delete a task and, with it, its attempts. Returns whether a task
    /// existed.
    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Append one verification attempt to its task's sequence.
    ///
    /// # Errors
    /// `TaskNotFound` when the attempt's task does not exist.
    async fn append_attempt(&self, attempt: &VerificationAttempt) -> Result<(), StoreError>;

    /// Attempts for one task, oldest first.
    async fn list_attempts(&self, task_id: TaskId) -> Result<Vec<VerificationAttempt>, StoreError>;
}
