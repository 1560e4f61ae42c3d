//! Task domain model: the lifecycle state machine and its attempt records.

mod attempt;
pub mod task;

pub use attempt::{AttemptSource, VerificationAttempt};
pub use task::{
    parse_start_time, Task, TaskId, TaskStatus, TransitionError, ValidationError, ALERT_GAP_RANGE,
    DURATION_RANGE, INSTRUCTIONS_MAX_LEN, INSTRUCTIONS_MIN_LEN, NAME_MAX_LEN,
};
