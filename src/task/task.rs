//! Core Task type with schedule fields and lifecycle state machine.
//!
//! # Invariants
//! - `status` only moves along `Pending -> Active -> {Completed | Failed}`
//! - `completed_at` is set exactly once, on the transition into `Completed`
//! - schedule fields are immutable once the task is created

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scheduled task.
///
/// # Properties
/// - Globally unique within a deployment
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Active -> Completed
///                  \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its start time to arrive
    Pending,
    /// Start time has arrived; alarm and verification loop are live
    Active,
    /// A verification attempt succeeded
    Completed,
    /// Abandoned after exhausting the configured attempt budget
    Failed,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    ///
    /// # Property
    /// `is_terminal() => no further transitions`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "active" => Some(TaskStatus::Active),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation limits for task fields.
///
/// Durations are minutes. A task may span at most a day; the alert gap is
/// capped at an hour so a failed verification cannot silence the alarm
/// indefinitely.
pub const NAME_MAX_LEN: usize = 100;
pub const DURATION_RANGE: std::ops::RangeInclusive<u32> = 1..=1440;
pub const ALERT_GAP_RANGE: std::ops::RangeInclusive<u32> = 1..=60;
pub const INSTRUCTIONS_MIN_LEN: usize = 10;
pub const INSTRUCTIONS_MAX_LEN: usize = 500;

/// Rejected task fields. These never enter the state machine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("task name must be 1-100 characters")]
    NameLength,

    #[error("invalid start time {0:?}: expected HH:MM (24-hour)")]
    InvalidStartTime(String),

    #[error("duration must be 1-1440 minutes, got {0}")]
    DurationOutOfRange(u32),

    #[error("alert gap must be 1-60 minutes, got {0}")]
    AlertGapOutOfRange(u32),

    #[error("verification instructions must be 10-500 characters")]
    InstructionsLength,
}

/// Attempted status change that the state machine forbids.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Parse a strict `HH:MM` 24-hour time-of-day.
///
/// chrono accepts unpadded digits, so the shape is checked first.
pub fn parse_start_time(value: &str) -> Result<NaiveTime, ValidationError> {
    let invalid = || ValidationError::InvalidStartTime(value.to_string());
    if value.len() != 5 || value.as_bytes()[2] != b':' {
        return Err(invalid());
    }
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| invalid())
}

/// A scheduled task requiring photographic proof of completion.
///
/// Fields are immutable after construction except `status`/`completed_at`,
/// which change only through the explicit transition methods below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,

    /// Display name
    name: String,

    /// Daily time-of-day at which enforcement begins (minute resolution)
    #[serde(with = "hhmm")]
    start_time: NaiveTime,

    /// Target window length in minutes (informational; never auto-fails)
    duration_minutes: u32,

    /// Minutes between alarm re-escalations after a failed verification
    alert_gap_minutes: u32,

    /// Free text handed verbatim to the vision model
    verification_instructions: String,

    status: TaskStatus,

    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task in `Pending` state.
    ///
    /// # Errors
    /// Returns `ValidationError` if any field is out of range.
    pub fn new(
        name: String,
        start_time: NaiveTime,
        duration_minutes: u32,
        alert_gap_minutes: u32,
        verification_instructions: String,
    ) -> Result<Self, ValidationError> {
        if name.is_empty() || name.chars().count() > NAME_MAX_LEN {
            return Err(ValidationError::NameLength);
        }
        if !DURATION_RANGE.contains(&duration_minutes) {
            return Err(ValidationError::DurationOutOfRange(duration_minutes));
        }
        if !ALERT_GAP_RANGE.contains(&alert_gap_minutes) {
            return Err(ValidationError::AlertGapOutOfRange(alert_gap_minutes));
        }
        let instruction_chars = verification_instructions.chars().count();
        if !(INSTRUCTIONS_MIN_LEN..=INSTRUCTIONS_MAX_LEN).contains(&instruction_chars) {
            return Err(ValidationError::InstructionsLength);
        }

        Ok(Self {
            id: TaskId::new(),
            name,
            start_time,
            duration_minutes,
            alert_gap_minutes,
            verification_instructions,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    /// Rehydrate a task from a storage row. Storage is trusted to hold only
    /// states the transition methods produced.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: TaskId,
        name: String,
        start_time: NaiveTime,
        duration_minutes: u32,
        alert_gap_minutes: u32,
        verification_instructions: String,
        status: TaskStatus,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            name,
            start_time,
            duration_minutes,
            alert_gap_minutes,
            verification_instructions,
            status,
            created_at,
            completed_at,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start_time
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn alert_gap_minutes(&self) -> u32 {
        self.alert_gap_minutes
    }

    pub fn verification_instructions(&self) -> &str {
        &self.verification_instructions
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// End of the target window (display only; wraps past midnight).
    pub fn window_end(&self) -> NaiveTime {
        self.start_time + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Whether a photo may be submitted against this task.
    pub fn accepts_verification(&self) -> bool {
        self.status == TaskStatus::Active
    }

    // State transitions - explicit and validated

    /// Transition `Pending -> Active`.
    ///
    /// # Errors
    /// Returns `TransitionError` from any other state.
    pub fn activate(&mut self) -> Result<(), TransitionError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Active;
                Ok(())
            }
            from => Err(TransitionError {
                from,
                to: TaskStatus::Active,
            }),
        }
    }

    /// Transition `Active -> Completed`, stamping `completed_at`.
    ///
    /// # Errors
    /// Returns `TransitionError` from any other state; a task can never skip
    /// straight from `Pending` to `Completed`.
    pub fn complete(&mut self) -> Result<DateTime<Utc>, TransitionError> {
        match self.status {
            TaskStatus::Active => {
                let when = Utc::now();
                self.status = TaskStatus::Completed;
                self.completed_at = Some(when);
                Ok(when)
            }
            from => Err(TransitionError {
                from,
                to: TaskStatus::Completed,
            }),
        }
    }

    /// Transition `Active -> Failed`.
    ///
    /// # Errors
    /// Returns `TransitionError` from any other state.
    pub fn fail(&mut self) -> Result<(), TransitionError> {
        match self.status {
            TaskStatus::Active => {
                self.status = TaskStatus::Failed;
                Ok(())
            }
            from => Err(TransitionError {
                from,
                to: TaskStatus::Failed,
            }),
        }
    }
}

/// Serde adapter for `HH:MM` time-of-day strings.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&value, "%H:%M").map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::new(
            "Morning run".to_string(),
            parse_start_time("07:30").unwrap(),
            30,
            5,
            "Photo of running shoes on feet, outdoors".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn new_task_is_pending() {
        let task = sample_task();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.completed_at().is_none());
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut task = sample_task();
        task.activate().unwrap();
        assert_eq!(task.status(), TaskStatus::Active);

        let when = task.complete().unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.completed_at(), Some(when));
        assert!(when >= task.created_at());
    }

    #[test]
    fn cannot_skip_pending_to_completed() {
        let mut task = sample_task();
        let err = task.complete().unwrap_err();
        assert_eq!(err.from, TaskStatus::Pending);
        assert_eq!(err.to, TaskStatus::Completed);
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut task = sample_task();
        task.activate().unwrap();
        task.complete().unwrap();

        assert!(task.status().is_terminal());
        assert!(task.activate().is_err());
        assert!(task.fail().is_err());

        let mut failed = sample_task();
        failed.activate().unwrap();
        failed.fail().unwrap();
        assert!(failed.status().is_terminal());
        assert!(failed.complete().is_err());
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let start = parse_start_time("09:00").unwrap();
        let instructions = "Show the made bed".to_string();

        assert!(matches!(
            Task::new("".into(), start, 10, 5, instructions.clone()),
            Err(ValidationError::NameLength)
        ));
        assert!(matches!(
            Task::new("x".repeat(101), start, 10, 5, instructions.clone()),
            Err(ValidationError::NameLength)
        ));
        assert!(matches!(
            Task::new("Bed".into(), start, 0, 5, instructions.clone()),
            Err(ValidationError::DurationOutOfRange(0))
        ));
        assert!(matches!(
            Task::new("Bed".into(), start, 10, 61, instructions.clone()),
            Err(ValidationError::AlertGapOutOfRange(61))
        ));
        assert!(matches!(
            Task::new("Bed".into(), start, 10, 5, "short".into()),
            Err(ValidationError::InstructionsLength)
        ));
    }

    #[test]
    fn start_time_parsing_is_strict() {
        assert!(parse_start_time("07:30").is_ok());
        assert!(parse_start_time("23:59").is_ok());
        assert!(parse_start_time("24:00").is_err());
        assert!(parse_start_time("7:3").is_err());
        assert!(parse_start_time("07:30:00").is_err());
        assert!(parse_start_time("noon").is_err());
    }

    #[test]
    fn window_end_wraps_midnight() {
        let task = Task::new(
            "Late task".to_string(),
            parse_start_time("23:50").unwrap(),
            30,
            5,
            "Photo of a closed laptop".to_string(),
        )
        .unwrap();
        assert_eq!(task.window_end(), parse_start_time("00:20").unwrap());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("running"), None);
    }
}
