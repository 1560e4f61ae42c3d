//! Schedule engine: the periodic poller that drives task activation.
//!
//! One engine instance polls wall-clock time against the store on a fixed
//! interval. Each task crossing its start time transitions to `active` and
//! gets its own workflow (alarm loop + photo wait), which then runs
//! concurrently with the poller and with other tasks' workflows.

pub mod workflow;

pub use workflow::{PhotoSubmission, SubmissionResult, SubmitError, WorkflowRegistry};

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, Timelike};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::alarm::AlarmSink;
use crate::config::Config;
use crate::store::SharedTaskStore;
use crate::task::TaskStatus;
use crate::vision::VerificationClient;

/// Tunables the engine and its workflows share.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay between schedule polls
    pub poll_interval: Duration,
    /// Delay between alarm pulses
    pub alarm_period: Duration,
    /// Failed attempts before auto-fail (`None` = never)
    pub max_verify_attempts: Option<u32>,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            alarm_period: config.alarm_period,
            max_verify_attempts: config.max_verify_attempts,
        }
    }
}

/// Whether a task's daily start time has arrived, at minute resolution.
///
/// A start time earlier than `now` counts as arrived: a task whose window
/// opened while the process was down (or before the task reached the
/// store) becomes due on the next tick instead of being skipped.
pub(crate) fn start_has_arrived(start: NaiveTime, now: NaiveTime) -> bool {
    let now = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    now >= start
}

/// Periodic scheduler over the task store.
pub struct ScheduleEngine {
    store: SharedTaskStore,
    verifier: Arc<dyn VerificationClient>,
    sink: Arc<dyn AlarmSink>,
    settings: EngineSettings,
    registry: Arc<WorkflowRegistry>,
    shutdown: CancellationToken,
}

impl ScheduleEngine {
    pub fn new(
        store: SharedTaskStore,
        verifier: Arc<dyn VerificationClient>,
        sink: Arc<dyn AlarmSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            sink,
            settings,
            registry: Arc::new(WorkflowRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle for photo submission and workflow cancellation.
    pub fn registry(&self) -> Arc<WorkflowRegistry> {
        Arc::clone(&self.registry)
    }

    /// Token that stops the poll loop and all workflows when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Poll until shutdown. Runs as a background task for the lifetime of
    /// the process.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "schedule engine started"
        );
        loop {
            self.tick().await;
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        info!("schedule engine stopping; cancelling workflows");
        self.registry.cancel_all().await;
    }

    /// One poll against the current local time.
    pub async fn tick(&self) {
        self.tick_at(Local::now().time()).await;
    }

    /// One poll against an explicit time-of-day.
    pub(crate) async fn tick_at(&self, now: NaiveTime) {
        let tasks = match self.store.list_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("schedule tick could not list tasks: {}", e);
                return;
            }
        };

        for task in tasks {
            if self.registry.contains(task.id()).await {
                continue;
            }
            match task.status() {
                TaskStatus::Pending if start_has_arrived(task.start_time(), now) => {
                    self.activate(task).await;
                }
                // A task left active without a workflow (process restart)
                // gets its enforcement loop back instead of being stranded.
                TaskStatus::Active => {
                    info!(task_id = %task.id(), "re-attaching workflow to active task");
                    self.spawn(task).await;
                }
                _ => {}
            }
        }
    }

    async fn activate(&self, mut task: crate::task::Task) {
        let task_id = task.id();
        if let Err(e) = task.activate() {
            error!(%task_id, "activation rejected by state machine: {}", e);
            return;
        }
        if let Err(e) = self
            .store
            .update_status(task_id, TaskStatus::Active, None)
            .await
        {
            // Task may have been deleted between the list and the write.
            error!(%task_id, "failed to persist activation: {}", e);
            return;
        }
        info!(%task_id, task = task.name(), "task activated");
        self.spawn(task).await;
    }

    async fn spawn(&self, task: crate::task::Task) {
        debug!(task_id = %task.id(), "spawning verification workflow");
        workflow::spawn_workflow(
            task,
            Arc::clone(&self.store),
            Arc::clone(&self.verifier),
            Arc::clone(&self.sink),
            &self.settings,
            Arc::clone(&self.registry),
        )
        .await;
    }
}
