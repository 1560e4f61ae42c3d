//! HTTP API for the schedule enforcer.
//!
//! ## Endpoints
//!
//! - `POST /api/tasks` - Schedule a new task
//! - `GET /api/tasks` - List all tasks
//! - `GET /api/tasks/{id}` - Get one task
//! - `DELETE /api/tasks/{id}` - Delete a task (cancels its workflow)
//! - `GET /api/tasks/{id}/attempts` - List a task's verification attempts
//! - `POST /api/tasks/{id}/verify` - Submit a photo (multipart `image` field)
//! - `GET /api/status` - Aggregate system statistics
//! - `GET /api/health` - Health check

mod routes;
pub mod types;

pub use routes::{serve, AppState};
pub use types::*;
