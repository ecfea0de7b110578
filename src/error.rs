use thiserror::Error;

/// Errors surfaced by [`Sequence::run`](crate::Sequence::run) and
/// [`Sequence::plan`](crate::Sequence::plan).
///
/// Build-time errors (`DuplicateTaskId`, `UnknownDependency`, `CycleDetected`,
/// `InvalidConfig`) are reported before any task action is invoked. A task
/// that merely exhausts its retries under the `Continue` policy is not a run
/// error; it is reported through the event stream and the run report.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("duplicate task id '{0}'")]
    DuplicateTaskId(String),

    #[error("task '{child}' depends on unknown task '{parent}'")]
    UnknownDependency { parent: String, child: String },

    #[error("task graph contains a cycle")]
    CycleDetected,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sequence aborted at task '{at}'")]
    Aborted { at: String },
}
