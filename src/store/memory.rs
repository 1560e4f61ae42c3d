//! In-memory task store (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskStatus, VerificationAttempt};

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
    attempts: Arc<RwLock<HashMap<TaskId, Vec<VerificationAttempt>>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| (t.start_time(), t.created_at()));
        Ok(tasks)
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        *task = Task::restore(
            task.id(),
            task.name().to_string(),
            task.start_time(),
            task.duration_minutes(),
            task.alert_gap_minutes(),
            task.verification_instructions().to_string(),
            status,
            task.created_at(),
            completed_at.or(task.completed_at()),
        );
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let existed = self.tasks.write().await.remove(&id).is_some();
        self.attempts.write().await.remove(&id);
        Ok(existed)
    }

    async fn append_attempt(&self, attempt: &VerificationAttempt) -> Result<(), StoreError> {
        if !self.tasks.read().await.contains_key(&attempt.task_id) {
            return Err(StoreError::TaskNotFound(attempt.task_id));
        }
        self.attempts
            .write()
            .await
            .entry(attempt.task_id)
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, task_id: TaskId) -> Result<Vec<VerificationAttempt>, StoreError> {
        Ok(self
            .attempts
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{parse_start_time, AttemptSource};
    use uuid::Uuid;

    fn sample_task(start: &str) -> Task {
        Task::new(
            "Water the plants".to_string(),
            parse_start_time(start).unwrap(),
            15,
            3,
            "Photo of the watering can next to the plants".to_string(),
        )
        .unwrap()
    }

    fn sample_attempt(task_id: TaskId, success: bool) -> VerificationAttempt {
        VerificationAttempt {
            id: Uuid::new_v4(),
            task_id,
            image: vec![0xFF, 0xD8, 0xFF],
            success,
            reasoning: "test attempt".to_string(),
            confidence: 0.5,
            source: AttemptSource::Mock,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_read_back() {
        let store = InMemoryTaskStore::new();
        let task = sample_task("08:00");
        store.create_task(&task).await.unwrap();

        let fetched = store.get_task(task.id()).await.unwrap().unwrap();
        assert_eq!(fetched.id(), task.id());
        assert_eq!(fetched.name(), "Water the plants");
        assert_eq!(fetched.status(), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn list_orders_by_start_time() {
        let store = InMemoryTaskStore::new();
        let late = sample_task("22:00");
        let early = sample_task("06:00");
        store.create_task(&late).await.unwrap();
        store.create_task(&early).await.unwrap();

        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks[0].id(), early.id());
        assert_eq!(tasks[1].id(), late.id());
    }

    #[tokio::test]
    async fn status_update_is_read_your_writes() {
        let store = InMemoryTaskStore::new();
        let task = sample_task("08:00");
        store.create_task(&task).await.unwrap();

        store
            .update_status(task.id(), TaskStatus::Active, None)
            .await
            .unwrap();
        let fetched = store.get_task(task.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), TaskStatus::Active);

        let done_at = Utc::now();
        store
            .update_status(task.id(), TaskStatus::Completed, Some(done_at))
            .await
            .unwrap();
        let fetched = store.get_task(task.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), TaskStatus::Completed);
        assert_eq!(fetched.completed_at(), Some(done_at));
    }

    #[tokio::test]
    async fn update_unknown_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let err = store
            .update_status(TaskId::new(), TaskStatus::Active, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn attempts_append_in_order() {
        let store = InMemoryTaskStore::new();
        let task = sample_task("08:00");
        store.create_task(&task).await.unwrap();

        let first = sample_attempt(task.id(), false);
        let second = sample_attempt(task.id(), true);
        store.append_attempt(&first).await.unwrap();
        store.append_attempt(&second).await.unwrap();

        let attempts = store.list_attempts(task.id()).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].id, first.id);
        assert_eq!(attempts[1].id, second.id);
        assert!(attempts[0].timestamp <= attempts[1].timestamp);
    }

    #[tokio::test]
    async fn attempt_for_unknown_task_is_rejected() {
        let store = InMemoryTaskStore::new();
        let err = store
            .append_attempt(&sample_attempt(TaskId::new(), true))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_task_and_attempts() {
        let store = InMemoryTaskStore::new();
        let task = sample_task("08:00");
        store.create_task(&task).await.unwrap();
        store
            .append_attempt(&sample_attempt(task.id(), false))
            .await
            .unwrap();

        assert!(store.delete_task(task.id()).await.unwrap());
        assert!(store.get_task(task.id()).await.unwrap().is_none());
        assert!(store.list_attempts(task.id()).await.unwrap().is_empty());
        assert!(!store.delete_task(task.id()).await.unwrap());
    }
}
