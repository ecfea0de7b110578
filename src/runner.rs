//! Per-task execution: the attempt loop with retry-with-delay.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::descriptor::TaskDescriptor;
use crate::events::{EventBus, SequenceEvent};
use crate::sequence::{TaskMetrics, TaskOutcome, TaskStatus};

/// Runs one task's attempt loop and returns its outcome plus the artifact on
/// success.
///
/// The whole loop executes inside a tracing span named after the task id, so
/// every attempt's events land under it on all exit paths. Metrics are
/// written exactly once, at the terminal status; the duration covers retry
/// delays and failed attempts.
pub(crate) async fn run_task(
    descriptor: TaskDescriptor,
    inputs: Vec<Value>,
    bus: Arc<EventBus>,
) -> (TaskOutcome, Option<Value>) {
    let span = info_span!("task", id = %descriptor.id);
    let id = descriptor.id.clone();

    async move {
        bus.emit(SequenceEvent::SpanOpened { name: id.clone() });
        let start_ms = bus.elapsed_ms();
        let max_attempts = descriptor.retry_count + 1;
        let mut retry_messages = Vec::new();

        bus.emit(SequenceEvent::TaskStarted {
            id: id.clone(),
            attempt: 1,
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "invoking action");

            match descriptor.action.run(inputs.clone()).await {
                Ok(artifact) => {
                    let end_ms = bus.elapsed_ms();
                    let metrics = TaskMetrics {
                        start_ms,
                        end_ms,
                        duration_ms: end_ms - start_ms,
                    };
                    info!(attempt, duration_ms = metrics.duration_ms, "task succeeded");
                    bus.emit(SequenceEvent::TaskSucceeded {
                        id: id.clone(),
                        duration_ms: metrics.duration_ms,
                    });
                    bus.emit(SequenceEvent::SpanClosed {
                        name: id.clone(),
                        ok: true,
                    });
                    let outcome = TaskOutcome {
                        id,
                        status: TaskStatus::Succeeded,
                        attempts: attempt,
                        retry_messages,
                        error: None,
                        metrics: Some(metrics),
                    };
                    return (outcome, Some(artifact));
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(attempt, max_attempts, error = %message, "attempt failed");
                    bus.emit(SequenceEvent::TaskAttemptFailed {
                        id: id.clone(),
                        attempt,
                        message: message.clone(),
                    });
                    retry_messages.push(format!("attempt {attempt} failed: {message}"));

                    if attempt < max_attempts {
                        if !descriptor.retry_delay.is_zero() {
                            debug!(delay_ms = descriptor.retry_delay.as_millis() as u64, "waiting before retry");
                            sleep(descriptor.retry_delay).await;
                        }
                        continue;
                    }

                    let end_ms = bus.elapsed_ms();
                    let metrics = TaskMetrics {
                        start_ms,
                        end_ms,
                        duration_ms: end_ms - start_ms,
                    };
                    error!(attempts = attempt, error = %message, "task failed");
                    bus.emit(SequenceEvent::TaskFailed {
                        id: id.clone(),
                        attempts: attempt,
                        message: message.clone(),
                    });
                    bus.emit(SequenceEvent::SpanClosed {
                        name: id.clone(),
                        ok: false,
                    });
                    let outcome = TaskOutcome {
                        id,
                        status: TaskStatus::Failed,
                        attempts: attempt,
                        retry_messages,
                        error: Some(message),
                        metrics: Some(metrics),
                    };
                    return (outcome, None);
                }
            }
        }
    }
    .instrument(span)
    .await
}
