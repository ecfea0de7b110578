//! Stagger - a library for executing directed acyclic graphs (DAGs) of
//! asynchronous tasks.
//!
//! Callers declare tasks with [`TaskDescriptor`] (an async action, parent
//! ids, retry policy, error policy, priority) and hand them to a
//! [`Sequence`], which validates the graph, computes a priority-respecting
//! topological plan with level assignments, and executes it with bounded
//! concurrency. Each task receives the artifacts of its parents in
//! declaration order and produces an artifact consumed by its children.
//! Lifecycle events stream to subscribed [`EventSink`]s for renderers and
//! test harnesses.
//!
//! ```no_run
//! use serde_json::json;
//! use stagger::{Sequence, SequenceConfig, TaskDescriptor};
//!
//! async fn demo() -> Result<(), stagger::SequenceError> {
//!     let mut sequence = Sequence::new(SequenceConfig::default());
//!     sequence
//!         .add_task(TaskDescriptor::from_fn("fetch", |_| async {
//!             anyhow::Ok(json!(41))
//!         }))
//!         .add_task(
//!             TaskDescriptor::from_fn("bump", |inputs| async move {
//!                 anyhow::Ok(json!(inputs[0].as_i64().unwrap_or(0) + 1))
//!             })
//!             .with_parent("fetch"),
//!         );
//!     let report = sequence.run().await?;
//!     assert!(report.ok);
//!     assert_eq!(sequence.artifact_of("bump"), Some(json!(42)));
//!     Ok(())
//! }
//! ```

pub mod descriptor;
pub mod error;
pub mod events;
pub mod progress;
pub mod sequence;

mod driver;
mod gate;
mod graph;
mod plan;
mod runner;

pub use descriptor::{ErrorPolicy, FnAction, TaskAction, TaskDescriptor};
pub use error::SequenceError;
pub use events::{BufferingEventSink, EventEnvelope, EventSink, LoggingEventSink, SequenceEvent};
pub use plan::ExecutionPlan;
pub use progress::ProgressSink;
pub use sequence::{Sequence, SequenceConfig, SequenceReport, TaskMetrics, TaskOutcome, TaskStatus};
