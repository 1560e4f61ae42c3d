//! Escalating alarm tied to one task.
//!
//! An `AlarmController` owns at most one background pulse loop. The loop
//! emits abstract pulse/silence signals through an [`AlarmSink`]; whatever
//! actually makes noise (speaker, websocket push, desktop notification)
//! lives behind that trait. Sink failures are logged and never block the
//! verification path: the alarm is a convenience signal, not a gate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::task::TaskId;

/// Notification subsystem failure. Logged, never propagated into the
/// state machine.
#[derive(Debug, Clone, thiserror::Error)]
#[error("notification subsystem failure: {0}")]
pub struct AlarmError(pub String);

/// Receiver of alarm signals for a task.
#[async_trait]
pub trait AlarmSink: Send + Sync {
    /// One escalation pulse. `pulse_count` starts at 1 and increases for the
    /// lifetime of the current alarm.
    async fn pulse(&self, task_id: TaskId, task_name: &str, pulse_count: u64)
        -> Result<(), AlarmError>;

    /// The alarm for this task went quiet.
    async fn silence(&self, task_id: TaskId) -> Result<(), AlarmError>;
}

/// Default sink: structured log lines only.
#[derive(Debug, Default)]
pub struct LogAlarmSink;

#[async_trait]
impl AlarmSink for LogAlarmSink {
    async fn pulse(
        &self,
        task_id: TaskId,
        task_name: &str,
        pulse_count: u64,
    ) -> Result<(), AlarmError> {
        warn!(%task_id, task_name, pulse_count, "ALARM: task awaiting verification");
        Ok(())
    }

    async fn silence(&self, task_id: TaskId) -> Result<(), AlarmError> {
        info!(%task_id, "alarm silenced");
        Ok(())
    }
}

struct ActiveAlarm {
    task_id: TaskId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cancellable, re-entrant alarm for a single task.
///
/// States: idle (no loop) and sounding (one loop). `start` on an already
/// sounding controller for the same task is a no-op; `stop` is idempotent.
pub struct AlarmController {
    sink: Arc<dyn AlarmSink>,
    period: std::time::Duration,
    active: Mutex<Option<ActiveAlarm>>,
}

impl AlarmController {
    pub fn new(sink: Arc<dyn AlarmSink>, period: std::time::Duration) -> Self {
        Self {
            sink,
            period,
            active: Mutex::new(None),
        }
    }

    /// Begin the repeating pulse loop for `task_id`.
    ///
    /// Holding the `active` lock across spawn guarantees at most one loop
    /// per controller even under concurrent callers.
    pub async fn start(&self, task_id: TaskId, task_name: &str) {
        let mut active = self.active.lock().await;

        if let Some(alarm) = active.as_ref() {
            if alarm.task_id == task_id && !alarm.handle.is_finished() {
                debug!(%task_id, "alarm already sounding; start is a no-op");
                return;
            }
            // A different task somehow owns the loop: tear it down first.
            alarm.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let sink = Arc::clone(&self.sink);
        let period = self.period;
        let name = task_name.to_string();

        let handle = tokio::spawn(async move {
            let mut pulse_count: u64 = 0;
            loop {
                pulse_count += 1;
                if let Err(e) = sink.pulse(task_id, &name, pulse_count).await {
                    warn!(%task_id, "alarm pulse failed: {}", e);
                }
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            if let Err(e) = sink.silence(task_id).await {
                warn!(%task_id, "alarm silence signal failed: {}", e);
            }
        });

        info!(%task_id, task_name, "alarm started");
        *active = Some(ActiveAlarm {
            task_id,
            cancel,
            handle,
        });
    }

    /// Halt the pulse loop. Safe to call when already idle, and calling it
    /// twice leaves the same state as calling it once.
    pub async fn stop(&self) {
        let alarm = self.active.lock().await.take();
        if let Some(alarm) = alarm {
            alarm.cancel.cancel();
            // Wait for the loop to wind down so no pulse outlives stop().
            if let Err(e) = alarm.handle.await {
                if !e.is_cancelled() {
                    warn!(task_id = %alarm.task_id, "alarm loop join failed: {}", e);
                }
            }
        }
    }

    /// Whether a pulse loop is currently running.
    pub async fn is_sounding(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|alarm| !alarm.handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink {
        pulses: AtomicU64,
        silences: AtomicU64,
    }

    #[async_trait]
    impl AlarmSink for CountingSink {
        async fn pulse(&self, _: TaskId, _: &str, _: u64) -> Result<(), AlarmError> {
            self.pulses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn silence(&self, _: TaskId) -> Result<(), AlarmError> {
            self.silences.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sink whose pulses always fail; the loop must keep going regardless.
    struct FailingSink {
        pulses: AtomicU64,
    }

    #[async_trait]
    impl AlarmSink for FailingSink {
        async fn pulse(&self, _: TaskId, _: &str, _: u64) -> Result<(), AlarmError> {
            self.pulses.fetch_add(1, Ordering::SeqCst);
            Err(AlarmError("speaker on fire".into()))
        }

        async fn silence(&self, _: TaskId) -> Result<(), AlarmError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pulses_until_stopped() {
        let sink = Arc::new(CountingSink::default());
        let controller = AlarmController::new(sink.clone(), Duration::from_secs(1));

        controller.start(TaskId::new(), "Morning run").await;
        assert!(controller.is_sounding().await);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let sounded = sink.pulses.load(Ordering::SeqCst);
        assert!(sounded >= 3, "expected >=3 pulses, got {sounded}");

        controller.stop().await;
        assert!(!controller.is_sounding().await);
        assert_eq!(sink.silences.load(Ordering::SeqCst), 1);

        let after_stop = sink.pulses.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.pulses.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_keeps_a_single_loop() {
        let sink = Arc::new(CountingSink::default());
        let controller = AlarmController::new(sink.clone(), Duration::from_secs(1));
        let task_id = TaskId::new();

        controller.start(task_id, "Morning run").await;
        controller.start(task_id, "Morning run").await;
        controller.start(task_id, "Morning run").await;

        // With one loop at 1s period, ~4s yields ~5 pulses; duplicated loops
        // would show multiples of that.
        tokio::time::sleep(Duration::from_millis(4200)).await;
        let sounded = sink.pulses.load(Ordering::SeqCst);
        assert!((4..=6).contains(&sounded), "pulse count {sounded}");

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let sink = Arc::new(CountingSink::default());
        let controller = AlarmController::new(sink.clone(), Duration::from_secs(1));

        controller.start(TaskId::new(), "Dishes").await;
        controller.stop().await;
        controller.stop().await;

        assert!(!controller.is_sounding().await);
        // Only the stop that actually tore the loop down emitted a silence.
        assert_eq!(sink.silences.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_start_is_a_no_op() {
        let controller = AlarmController::new(
            Arc::new(CountingSink::default()),
            Duration::from_secs(1),
        );
        controller.stop().await;
        assert!(!controller.is_sounding().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_do_not_kill_the_loop() {
        let sink = Arc::new(FailingSink {
            pulses: AtomicU64::new(0),
        });
        let controller = AlarmController::new(sink.clone(), Duration::from_secs(1));

        controller.start(TaskId::new(), "Morning run").await;
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert!(controller.is_sounding().await);
        assert!(sink.pulses.load(Ordering::SeqCst) >= 3);

        controller.stop().await;
    }
}
