//! SQLite-backed task store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, TaskStore};
use crate::task::{parse_start_time, AttemptSource, Task, TaskId, TaskStatus, VerificationAttempt};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    start_time TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    alert_gap_minutes INTEGER NOT NULL,
    verification_instructions TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_start_time ON tasks(start_time);

CREATE TABLE IF NOT EXISTS verification_attempts (
    id TEXT PRIMARY KEY NOT NULL,
    task_id TEXT NOT NULL,
    image BLOB NOT NULL,
    success INTEGER NOT NULL,
    reasoning TEXT NOT NULL,
    confidence REAL NOT NULL,
    source TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attempts_task ON verification_attempts(task_id, timestamp);
"#;

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) the database at `db_path` and run the schema.
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Database(format!("failed to create db dir: {}", e)))?;
            }
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| StoreError::Database(format!("failed to open database: {}", e)))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| StoreError::Database(format!("failed to run schema: {}", e)))?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Database(format!("task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
        let id: String = row.get("id")?;
        let name: String = row.get("name")?;
        let start_time: String = row.get("start_time")?;
        let duration_minutes: u32 = row.get("duration_minutes")?;
        let alert_gap_minutes: u32 = row.get("alert_gap_minutes")?;
        let verification_instructions: String = row.get("verification_instructions")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;

        let id = Uuid::parse_str(&id).map_err(|e| invalid_column("id", e))?;
        let start_time =
            parse_start_time(&start_time).map_err(|e| invalid_column("start_time", e))?;
        let status = TaskStatus::parse(&status)
            .ok_or_else(|| invalid_column("status", format!("unknown status {status:?}")))?;
        let created_at = parse_timestamp(&created_at).map_err(|e| invalid_column("created_at", e))?;
        let completed_at = completed_at
            .map(|raw| parse_timestamp(&raw).map_err(|e| invalid_column("completed_at", e)))
            .transpose()?;

        Ok(Task::restore(
            TaskId::from(id),
            name,
            start_time,
            duration_minutes,
            alert_gap_minutes,
            verification_instructions,
            status,
            created_at,
            completed_at,
        ))
    }

    fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<VerificationAttempt> {
        let id: String = row.get("id")?;
        let task_id: String = row.get("task_id")?;
        let image: Vec<u8> = row.get("image")?;
        let success: bool = row.get("success")?;
        let reasoning: String = row.get("reasoning")?;
        let confidence: f64 = row.get("confidence")?;
        let source: String = row.get("source")?;
        let timestamp: String = row.get("timestamp")?;

        Ok(VerificationAttempt {
            id: Uuid::parse_str(&id).map_err(|e| invalid_column("id", e))?,
            task_id: TaskId::from(
                Uuid::parse_str(&task_id).map_err(|e| invalid_column("task_id", e))?,
            ),
            image,
            success,
            reasoning,
            confidence,
            source: AttemptSource::parse(&source)
                .ok_or_else(|| invalid_column("source", format!("unknown source {source:?}")))?,
            timestamp: parse_timestamp(&timestamp).map_err(|e| invalid_column("timestamp", e))?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn invalid_column(column: &str, err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("column {column}: {err}"),
        )),
    )
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks
             (id, name, start_time, duration_minutes, alert_gap_minutes,
              verification_instructions, status, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id().as_uuid().to_string(),
                task.name(),
                task.start_time().format("%H:%M").to_string(),
                task.duration_minutes(),
                task.alert_gap_minutes(),
                task.verification_instructions(),
                task.status().as_str(),
                task.created_at().to_rfc3339(),
                task.completed_at().map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![id.as_uuid().to_string()],
            Self::task_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM tasks ORDER BY start_time, created_at")
            .map_err(db_err)?;
        let tasks = stmt
            .query_map([], Self::task_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(tasks)
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = match completed_at {
            Some(when) => conn
                .execute(
                    "UPDATE tasks SET status = ?1, completed_at = ?2 WHERE id = ?3",
                    params![status.as_str(), when.to_rfc3339(), id.as_uuid().to_string()],
                )
                .map_err(db_err)?,
            None => conn
                .execute(
                    "UPDATE tasks SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id.as_uuid().to_string()],
                )
                .map_err(db_err)?,
        };
        if rows == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "DELETE FROM tasks WHERE id = ?1",
                params![id.as_uuid().to_string()],
            )
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    async fn append_attempt(&self, attempt: &VerificationAttempt) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM tasks WHERE id = ?1",
                params![attempt.task_id.as_uuid().to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(StoreError::TaskNotFound(attempt.task_id));
        }

        conn.execute(
            "INSERT INTO verification_attempts
             (id, task_id, image, success, reasoning, confidence, source, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                attempt.id.to_string(),
                attempt.task_id.as_uuid().to_string(),
                attempt.image,
                attempt.success,
                attempt.reasoning,
                attempt.confidence,
                attempt.source.as_str(),
                attempt.timestamp.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_attempts(&self, task_id: TaskId) -> Result<Vec<VerificationAttempt>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM verification_attempts
                 WHERE task_id = ?1 ORDER BY timestamp, rowid",
            )
            .map_err(db_err)?;
        let attempts = stmt
            .query_map(params![task_id.as_uuid().to_string()], Self::attempt_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::parse_start_time;

    async fn temp_store() -> (tempfile::TempDir, SqliteTaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(dir.path().join("enforcer.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_task() -> Task {
        Task::new(
            "Take medication".to_string(),
            parse_start_time("21:00").unwrap(),
            10,
            2,
            "Photo of the open pill organizer".to_string(),
        )
        .unwrap()
    }

    fn sample_attempt(task_id: TaskId, success: bool) -> VerificationAttempt {
        VerificationAttempt {
            id: Uuid::new_v4(),
            task_id,
            image: vec![0xFF, 0xD8, 0xFF, 0x01, 0x02],
            success,
            reasoning: "test".to_string(),
            confidence: 0.8,
            source: AttemptSource::Model,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn task_round_trip() {
        let (_dir, store) = temp_store().await;
        let task = sample_task();
        store.create_task(&task).await.unwrap();

        let fetched = store.get_task(task.id()).await.unwrap().unwrap();
        assert_eq!(fetched.id(), task.id());
        assert_eq!(fetched.name(), task.name());
        assert_eq!(fetched.start_time(), task.start_time());
        assert_eq!(fetched.duration_minutes(), task.duration_minutes());
        assert_eq!(fetched.status(), TaskStatus::Pending);
        assert!(fetched.completed_at().is_none());
    }

    #[tokio::test]
    async fn unknown_task_is_none() {
        let (_dir, store) = temp_store().await;
        assert!(store.get_task(TaskId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_and_completed_at_persist() {
        let (_dir, store) = temp_store().await;
        let task = sample_task();
        store.create_task(&task).await.unwrap();

        store
            .update_status(task.id(), TaskStatus::Active, None)
            .await
            .unwrap();
        let done_at = Utc::now();
        store
            .update_status(task.id(), TaskStatus::Completed, Some(done_at))
            .await
            .unwrap();

        let fetched = store.get_task(task.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), TaskStatus::Completed);
        // RFC3339 round-trip keeps sub-second precision
        assert_eq!(fetched.completed_at(), Some(done_at));

        let err = store
            .update_status(TaskId::new(), TaskStatus::Active, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn attempts_are_append_only_and_ordered() {
        let (_dir, store) = temp_store().await;
        let task = sample_task();
        store.create_task(&task).await.unwrap();

        let first = sample_attempt(task.id(), false);
        let second = sample_attempt(task.id(), true);
        store.append_attempt(&first).await.unwrap();
        store.append_attempt(&second).await.unwrap();

        let attempts = store.list_attempts(task.id()).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].id, first.id);
        assert_eq!(attempts[1].id, second.id);
        assert_eq!(attempts[0].image, first.image);
        assert_eq!(attempts[1].source, AttemptSource::Model);
    }

    #[tokio::test]
    async fn attempt_for_missing_task_is_rejected() {
        let (_dir, store) = temp_store().await;
        let err = store
            .append_attempt(&sample_attempt(TaskId::new(), true))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn delete_cascades_to_attempts() {
        let (_dir, store) = temp_store().await;
        let task = sample_task();
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
