//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{AttemptSource, Task, TaskStatus, VerificationAttempt};

/// Request to schedule a new task.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    /// Display name, 1-100 characters
    pub name: String,

    /// Daily start time, `HH:MM` 24-hour
    pub start_time: String,

    /// Target window in minutes
    pub duration_minutes: u32,

    /// Minutes between alarm re-escalations
    pub alert_gap_minutes: u32,

    /// Free text handed verbatim to the vision model
    pub verification_instructions: String,
}

/// Canonical task view.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub name: String,
    pub start_time: String,
    pub duration_minutes: u32,
    pub alert_gap_minutes: u32,
    pub verification_instructions: String,
    pub status: TaskStatus,
    /// End of the target window (display only)
    pub window_end: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id().as_uuid(),
            name: task.name().to_string(),
            start_time: task.start_time().format("%H:%M").to_string(),
            duration_minutes: task.duration_minutes(),
            alert_gap_minutes: task.alert_gap_minutes(),
            verification_instructions: task.verification_instructions().to_string(),
            status: task.status(),
            window_end: task.window_end().format("%H:%M").to_string(),
            created_at: task.created_at(),
            completed_at: task.completed_at(),
        }
    }
}

/// One verification attempt, without the photo bytes.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResponse {
    pub id: Uuid,
    pub task_id: Uuid,
    pub success: bool,
    pub reasoning: String,
    pub confidence: f64,
    pub source: AttemptSource,
    pub image_bytes: usize,
    pub timestamp: DateTime<Utc>,
}

impl From<&VerificationAttempt> for AttemptResponse {
    fn from(attempt: &VerificationAttempt) -> Self {
        Self {
            id: attempt.id,
            task_id: attempt.task_id.as_uuid(),
            success: attempt.success,
            reasoning: attempt.reasoning.clone(),
            confidence: attempt.confidence,
            source: attempt.source,
            image_bytes: attempt.image.len(),
            timestamp: attempt.timestamp,
        }
    }
}

/// Outcome of a photo submission.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub attempt: AttemptResponse,
    /// Task status after the verdict was applied
    pub task_status: TaskStatus,
}

/// System statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Current local time-of-day, `HH:MM`
    pub current_time: String,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Workflows (and alarms) currently running
    pub running_workflows: usize,
    /// Whether verdicts come from the real vision backend
    pub vision_backend_configured: bool,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub vision_backend: String,
    pub timestamp: DateTime<Utc>,
}
