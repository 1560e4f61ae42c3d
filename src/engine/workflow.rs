//! Per-task verification workflow.
//!
//! Each task that turns active gets one workflow: a background actor that
//! owns the task's alarm, consumes photo submissions from a channel, calls
//! the verification client, and records attempts. The channel gives the
//! ordering guarantees for free: submissions are verified one at a time, in
//! arrival order, with no cross-task interference.
//!
//! While a workflow is alive it is the only writer of its task's status;
//! the schedule engine hands ownership over at activation and the delete
//! path goes through cancellation before touching the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alarm::{AlarmController, AlarmSink};
use crate::store::{SharedTaskStore, StoreError};
use crate::task::{Task, TaskId, TaskStatus, VerificationAttempt};
use crate::vision::VerificationClient;

use super::EngineSettings;

/// Submissions waiting in a task's queue before backpressure kicks in.
const PHOTO_QUEUE_DEPTH: usize = 16;

/// One photo heading into a task's workflow, with a reply slot for the
/// verification outcome.
pub struct PhotoSubmission {
    pub image: Vec<u8>,
    pub respond: oneshot::Sender<Result<SubmissionResult, StoreError>>,
}

/// What became of one submitted photo.
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub attempt: VerificationAttempt,
    /// Task status after branching on the verdict
    pub task_status: TaskStatus,
}

/// Why a photo could not be handed to a workflow.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error("task has no running verification workflow")]
    NotRunning,

    #[error("workflow stopped before the photo could be processed")]
    Stopped,
}

struct WorkflowHandle {
    photo_tx: mpsc::Sender<PhotoSubmission>,
    cancel: CancellationToken,
}

/// Live workflows, keyed by task.
#[derive(Default)]
pub struct WorkflowRegistry {
    inner: RwLock<HashMap<TaskId, WorkflowHandle>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, task_id: TaskId) -> bool {
        self.inner.read().await.contains_key(&task_id)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Queue a photo for the task's workflow and return the reply slot.
    ///
    /// Submissions from concurrent callers are serialized by the workflow's
    /// channel and processed in arrival order.
    pub async fn submit_photo(
        &self,
        task_id: TaskId,
        image: Vec<u8>,
    ) -> Result<oneshot::Receiver<Result<SubmissionResult, StoreError>>, SubmitError> {
        let photo_tx = {
            let inner = self.inner.read().await;
            let handle = inner.get(&task_id).ok_or(SubmitError::NotRunning)?;
            handle.photo_tx.clone()
        };

        let (respond, outcome) = oneshot::channel();
        photo_tx
            .send(PhotoSubmission { image, respond })
            .await
            .map_err(|_| SubmitError::Stopped)?;
        Ok(outcome)
    }

    /// Cancel a task's workflow. Returns whether one was running.
    ///
    /// The workflow observes the token at its next suspension point, stops
    /// the alarm, and deregisters itself; no attempt is recorded after this.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let inner = self.inner.read().await;
        match inner.get(&task_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running workflow (shutdown path).
    pub async fn cancel_all(&self) {
        for handle in self.inner.read().await.values() {
            handle.cancel.cancel();
        }
    }

    async fn insert(&self, task_id: TaskId, handle: WorkflowHandle) {
        self.inner.write().await.insert(task_id, handle);
    }

    async fn remove(&self, task_id: TaskId) {
        self.inner.write().await.remove(&task_id);
    }
}

/// Register and spawn the workflow for a newly activated task.
///
/// The registry entry is inserted before the actor starts, so a submission
/// arriving immediately after activation already finds the queue.
pub(crate) async fn spawn_workflow(
    task: Task,
    store: SharedTaskStore,
    verifier: Arc<dyn VerificationClient>,
    sink: Arc<dyn AlarmSink>,
    settings: &EngineSettings,
    registry: Arc<WorkflowRegistry>,
) {
    let (photo_tx, photo_rx) = mpsc::channel(PHOTO_QUEUE_DEPTH);
    let cancel = CancellationToken::new();

    registry
        .insert(
            task.id(),
            WorkflowHandle {
                photo_tx,
                cancel: cancel.clone(),
            },
        )
        .await;

    let workflow = VerificationWorkflow {
        task,
        store,
        verifier,
        alarm: AlarmController::new(sink, settings.alarm_period),
        photo_rx,
        cancel,
        registry,
        max_attempts: settings.max_verify_attempts,
    };

    tokio::spawn(workflow.run());
}

enum Wake {
    Photo(PhotoSubmission),
    Rearm,
    Cancelled,
    Closed,
}

struct VerificationWorkflow {
    task: Task,
    store: SharedTaskStore,
    verifier: Arc<dyn VerificationClient>,
    alarm: AlarmController,
    photo_rx: mpsc::Receiver<PhotoSubmission>,
    cancel: CancellationToken,
    registry: Arc<WorkflowRegistry>,
    max_attempts: Option<u32>,
}

impl VerificationWorkflow {
    async fn run(mut self) {
        let task_id = self.task.id();
        info!(%task_id, task = self.task.name(), "verification workflow started");

        self.alarm.start(task_id, self.task.name()).await;

        let mut failed_attempts: u32 = 0;
        // While set, the alarm is silenced and re-arms at this instant
        // unless a successful verification lands first.
        let mut rearm_at: Option<tokio::time::Instant> = None;

        loop {
            let wake = if let Some(at) = rearm_at {
                tokio::select! {
                    _ = self.cancel.cancelled() => Wake::Cancelled,
                    _ = tokio::time::sleep_until(at) => Wake::Rearm,
                    received = self.photo_rx.recv() => match received {
                        Some(submission) => Wake::Photo(submission),
                        None => Wake::Closed,
                    },
                }
            } else {
                tokio::select! {
                    _ = self.cancel.cancelled() => Wake::Cancelled,
                    received = self.photo_rx.recv() => match received {
                        Some(submission) => Wake::Photo(submission),
                        None => Wake::Closed,
                    },
                }
            };

            let submission = match wake {
                Wake::Cancelled => {
                    debug!(%task_id, "workflow cancelled");
                    break;
                }
                Wake::Closed => {
                    debug!(%task_id, "photo channel closed");
                    break;
                }
                Wake::Rearm => {
                    rearm_at = None;
                    self.alarm.start(task_id, self.task.name()).await;
                    continue;
                }
                Wake::Photo(submission) => submission,
            };

            // Cancellation during the backend call abandons the photo
            // without recording an attempt.
            let judgment = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(%task_id, "cancelled mid-verification; dropping photo");
                    break;
                }
                result = self
                    .verifier
                    .verify(&submission.image, self.task.verification_instructions()) => result,
            };

            let attempt = match judgment {
                Ok(judgment) => {
                    VerificationAttempt::from_judgment(task_id, submission.image, &judgment)
                }
                Err(e) => {
                    warn!(%task_id, "verification unavailable: {}", e);
                    VerificationAttempt::infrastructure_failure(
                        task_id,
                        submission.image,
                        format!("verification unavailable: {}", e),
                    )
                }
            };

            // The attempt is recorded before any branching on the verdict.
            if let Err(e) = self.store.append_attempt(&attempt).await {
                error!(%task_id, "failed to record verification attempt: {}", e);
                let _ = submission.respond.send(Err(e));
                continue;
            }

            if attempt.success {
                match self.complete_task().await {
                    Ok(()) => {
                        self.alarm.stop().await;
                        let _ = submission.respond.send(Ok(SubmissionResult {
                            attempt,
                            task_status: TaskStatus::Completed,
                        }));
                        info!(%task_id, "task verified and completed");
                        break;
                    }
                    Err(e) => {
                        // Status write failed; the task stays active and the
                        // next photo gets another chance.
                        error!(%task_id, "failed to persist completion: {}", e);
                        let _ = submission.respond.send(Err(e));
                        continue;
                    }
                }
            }

            failed_attempts += 1;
            info!(
                %task_id,
                failed_attempts,
                source = attempt.source.as_str(),
                "verification attempt failed"
            );

            if let Some(max) = self.max_attempts {
                if failed_attempts >= max {
                    self.fail_task().await;
                    self.alarm.stop().await;
                    let _ = submission.respond.send(Ok(SubmissionResult {
                        attempt,
                        task_status: TaskStatus::Failed,
                    }));
                    warn!(%task_id, max, "attempt budget exhausted; task failed");
                    break;
                }
            }

            let _ = submission.respond.send(Ok(SubmissionResult {
                attempt,
                task_status: TaskStatus::Active,
            }));

            // Quiet period, then escalate again.
            self.alarm.stop().await;
            let gap = std::time::Duration::from_secs(
                u64::from(self.task.alert_gap_minutes()) * 60,
            );
            rearm_at = Some(tokio::time::Instant::now() + gap);
        }

        self.alarm.stop().await;
        self.registry.remove(task_id).await;
        debug!(%task_id, "verification workflow finished");
    }

    async fn complete_task(&mut self) -> Result<(), StoreError> {
        let mut updated = self.task.clone();
        let when = updated.complete().map_err(|e| {
            StoreError::Database(format!("completion rejected by state machine: {}", e))
        })?;
        self.store
            .update_status(self.task.id(), TaskStatus::Completed, Some(when))
            .await?;
        self.task = updated;
        Ok(())
    }

    async fn fail_task(&mut self) {
        let mut updated = self.task.clone();
        if let Err(e) = updated.fail() {
            error!(task_id = %self.task.id(), "fail rejected by state machine: {}", e);
            return;
        }
        match self
            .store
            .update_status(self.task.id(), TaskStatus::Failed, None)
            .await
        {
            Ok(()) => self.task = updated,
            Err(e) => error!(task_id = %self.task.id(), "failed to persist failure: {}", e),
        }
    }
}
