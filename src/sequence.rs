//! The public sequencing API: configuration, the [`Sequence`] builder, and
//! the run report types.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span, Instrument};

use crate::descriptor::TaskDescriptor;
use crate::driver;
use crate::error::SequenceError;
use crate::events::{EventBus, EventSink, SequenceEvent};
use crate::graph::TaskGraph;
use crate::plan::{self, ExecutionPlan};
use crate::progress::ProgressSink;

/// Name used for the span pair covering the whole run.
const SEQUENCE_SPAN: &str = "sequence";

/// Execution configuration for a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Maximum number of task actions in flight at once. Must be at least 1;
    /// 1 degenerates to strict serial execution within a level.
    pub max_concurrency: usize,
    /// Emit human-readable progress lines to stdout.
    pub verbose: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            verbose: false,
        }
    }
}

impl SequenceConfig {
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.max_concurrency == 0 {
            return Err(SequenceError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Timing for one task, as offsets from the start of the run. Recorded once,
/// at terminal status; the duration includes retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
}

/// The outcome for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub id: String,
    pub status: TaskStatus,
    /// Attempts performed; at most `retry_count + 1`, zero for skipped tasks.
    pub attempts: u32,
    /// One entry per failed attempt.
    pub retry_messages: Vec<String>,
    /// The final error message when the task failed.
    pub error: Option<String>,
    pub metrics: Option<TaskMetrics>,
}

/// Report for a completed run, with one outcome per task in plan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    pub run_id: String,
    /// False if the run aborted; task failures under the `Continue` policy
    /// leave this true and are counted in `failed`.
    pub ok: bool,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub outcomes: Vec<TaskOutcome>,
}

/// A declared set of tasks forming a DAG, executed with bounded concurrency.
///
/// Descriptors are accepted in any order; validation happens when
/// [`run`](Sequence::run) (or [`plan`](Sequence::plan)) builds the graph.
pub struct Sequence {
    config: SequenceConfig,
    descriptors: Vec<TaskDescriptor>,
    sinks: Vec<Arc<dyn EventSink>>,
    artifacts: Arc<DashMap<String, Value>>,
}

impl Sequence {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            descriptors: Vec::new(),
            sinks: Vec::new(),
            artifacts: Arc::new(DashMap::new()),
        }
    }

    /// Appends a task declaration. Id uniqueness is checked at build time.
    pub fn add_task(&mut self, descriptor: TaskDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Attaches an event sink that receives every record of the run.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) -> &mut Self {
        self.sinks.push(sink);
        self
    }

    /// Builds and plans without executing. Planning is pure: the same
    /// descriptors always produce the same order and levels.
    pub fn plan(&self) -> Result<ExecutionPlan, SequenceError> {
        let graph = TaskGraph::build(self.descriptors.clone())?;
        let plan = plan::plan(&graph)?;
        Ok(plan.project(&graph))
    }

    /// Executes the whole graph: build, plan, then level-parallel dispatch
    /// under the concurrency gate.
    ///
    /// Build-time errors reject before any action is invoked. Task failures
    /// under the `Continue` policy leave the run resolving normally; a
    /// failure under `Abort` rejects with [`SequenceError::Aborted`] after
    /// in-flight peers finish.
    pub async fn run(&mut self) -> Result<SequenceReport, SequenceError> {
        self.config.validate()?;
        let graph = TaskGraph::build(self.descriptors.clone())?;
        let plan = plan::plan(&graph)?;
        self.artifacts.clear();

        let run_id = cuid2::create_id();
        let mut sinks = self.sinks.clone();
        if self.config.verbose {
            sinks.push(Arc::new(ProgressSink::new()));
        }
        let bus = Arc::new(EventBus::new(run_id.clone(), sinks));

        let span = info_span!("sequence", run_id = %run_id);
        let (output, failed, ok) = async {
            info!(
                tasks = graph.len(),
                max_concurrency = self.config.max_concurrency,
                "sequence started"
            );
            bus.emit(SequenceEvent::SequenceStarted {
                task_count: graph.len(),
            });
            bus.emit(SequenceEvent::SpanOpened {
                name: SEQUENCE_SPAN.to_string(),
            });

            let output = driver::execute(
                &graph,
                &plan,
                self.config.max_concurrency,
                Arc::clone(&self.artifacts),
                Arc::clone(&bus),
            )
            .await;

            let failed = output
                .outcomes
                .iter()
                .filter(|outcome| outcome.status == TaskStatus::Failed)
                .count();
            let ok = output.aborted.is_none();
            info!(failed, ok, "sequence finished");
            bus.emit(SequenceEvent::SpanClosed {
                name: SEQUENCE_SPAN.to_string(),
                ok,
            });
            bus.emit(SequenceEvent::SequenceFinished {
                ok,
                failed,
                duration_ms: bus.elapsed_ms(),
            });
            (output, failed, ok)
        }
        .instrument(span)
        .await;

        if let Some(at) = output.aborted {
            return Err(SequenceError::Aborted { at });
        }

        let skipped = output
            .outcomes
            .iter()
            .filter(|outcome| outcome.status == TaskStatus::Skipped)
            .count();
        Ok(SequenceReport {
            run_id,
            ok,
            failed,
            skipped,
            duration_ms: bus.elapsed_ms(),
            outcomes: output.outcomes,
        })
    }

    /// The artifact of a succeeded task, or `None` if the task failed, was
    /// skipped, or has not run.
    pub fn artifact_of(&self, id: &str) -> Option<Value> {
        self.artifacts.get(id).map(|entry| entry.value().clone())
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(SequenceConfig::default())
    }
}
