//! Level-parallel execution driver.
//!
//! Within one level all tasks are mutually independent, so the driver
//! launches them together and lets the gate supply the concurrency bound; a
//! barrier between levels preserves the dependency contract. The driver
//! acquires each permit in plan order before spawning, so launch order equals
//! plan order and the priority tie-break is observable under contention.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::descriptor::{ErrorPolicy, TaskDescriptor};
use crate::events::{EventBus, SequenceEvent};
use crate::gate::Gate;
use crate::graph::TaskGraph;
use crate::plan::Plan;
use crate::runner::run_task;
use crate::sequence::{TaskOutcome, TaskStatus};

pub(crate) struct DriverOutput {
    /// One outcome per task, in plan order.
    pub outcomes: Vec<TaskOutcome>,
    /// Id of the task whose failure aborted the run, if any.
    pub aborted: Option<String>,
}

pub(crate) async fn execute(
    graph: &TaskGraph,
    plan: &Plan,
    max_concurrency: usize,
    artifacts: Arc<DashMap<String, Value>>,
    bus: Arc<EventBus>,
) -> DriverOutput {
    let gate = Gate::new(max_concurrency);
    let abort_flag = Arc::new(AtomicBool::new(false));
    let aborted_at: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let mut outcomes: Vec<Option<TaskOutcome>> = (0..graph.len()).map(|_| None).collect();

    'levels: for level in 0..=plan.max_level {
        let mut launches: Vec<(usize, JoinHandle<TaskOutcome>)> = Vec::new();

        for &slot in plan.order.iter().filter(|&&slot| plan.level[slot] == level) {
            if abort_flag.load(Ordering::SeqCst) {
                outcomes[slot] = Some(mark_skipped(&graph.descriptors[slot], &bus));
                continue;
            }

            // Serial acquisition keeps launch order equal to plan order.
            let permit = gate.acquire().await;
            if abort_flag.load(Ordering::SeqCst) {
                // The abort was decided while we waited; the action must not run.
                drop(permit);
                outcomes[slot] = Some(mark_skipped(&graph.descriptors[slot], &bus));
                continue;
            }

            let descriptor = graph.descriptors[slot].clone();
            let inputs = gather_inputs(&descriptor, &artifacts);
            debug!(id = %descriptor.id, level, "launching task");

            let bus = Arc::clone(&bus);
            let artifacts = Arc::clone(&artifacts);
            let abort_flag = Arc::clone(&abort_flag);
            let aborted_at = Arc::clone(&aborted_at);
            launches.push((
                slot,
                tokio::spawn(async move {
                    let _permit = permit;
                    let id = descriptor.id.clone();
                    let on_error = descriptor.on_error;
                    let (outcome, artifact) = run_task(descriptor, inputs, bus).await;

                    if let Some(value) = artifact {
                        artifacts.insert(id, value);
                    } else if outcome.status == TaskStatus::Failed
                        && on_error == ErrorPolicy::Abort
                    {
                        abort_flag.store(true, Ordering::SeqCst);
                        let mut at = aborted_at.lock();
                        if at.is_none() {
                            *at = Some(id);
                        }
                    }
                    outcome
                }),
            ));
        }

        // Barrier: every launch at this level finishes before the next level.
        for (slot, handle) in launches {
            match handle.await {
                Ok(outcome) => outcomes[slot] = Some(outcome),
                Err(join_err) => {
                    let descriptor = &graph.descriptors[slot];
                    let message = format!("task panicked: {join_err}");
                    error!(id = %descriptor.id, "{message}");
                    bus.emit(SequenceEvent::TaskFailed {
                        id: descriptor.id.clone(),
                        attempts: 1,
                        message: message.clone(),
                    });
                    if descriptor.on_error == ErrorPolicy::Abort {
                        abort_flag.store(true, Ordering::SeqCst);
                        let mut at = aborted_at.lock();
                        if at.is_none() {
                            *at = Some(descriptor.id.clone());
                        }
                    }
                    outcomes[slot] = Some(TaskOutcome {
                        id: descriptor.id.clone(),
                        status: TaskStatus::Failed,
                        attempts: 1,
                        retry_messages: Vec::new(),
                        error: Some(message),
                        metrics: None,
                    });
                }
            }
        }

        if abort_flag.load(Ordering::SeqCst) {
            info!(level, "abort decided; skipping remaining levels");
            for &slot in &plan.order {
                if outcomes[slot].is_none() {
                    outcomes[slot] = Some(mark_skipped(&graph.descriptors[slot], &bus));
                }
            }
            break 'levels;
        }
    }

    let aborted = aborted_at.lock().take();
    DriverOutput {
        outcomes: plan
            .order
            .iter()
            .map(|&slot| {
                outcomes[slot]
                    .take()
                    .expect("every planned task has an outcome")
            })
            .collect(),
        aborted,
    }
}

/// Parent artifacts in parent-declaration order. A parent that did not
/// succeed contributes `Value::Null` in its slot; children still run under
/// the `Continue` policy.
fn gather_inputs(descriptor: &TaskDescriptor, artifacts: &DashMap<String, Value>) -> Vec<Value> {
    descriptor
        .parents
        .iter()
        .map(|parent_id| {
            artifacts
                .get(parent_id)
                .map(|entry| entry.value().clone())
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn mark_skipped(descriptor: &TaskDescriptor, bus: &EventBus) -> TaskOutcome {
    bus.emit(SequenceEvent::TaskSkipped {
        id: descriptor.id.clone(),
    });
    TaskOutcome {
        id: descriptor.id.clone(),
        status: TaskStatus::Skipped,
        attempts: 0,
        retry_messages: Vec::new(),
        error: None,
        metrics: None,
    }
}
