//! Task declarations: the action trait and the immutable descriptor a caller
//! hands to a [`Sequence`](crate::Sequence).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the driver does once a task has exhausted its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure and keep executing; children of the failed task
    /// receive `Value::Null` in its argument slot.
    #[default]
    Continue,
    /// Halt the run: in-flight peers finish naturally, everything not yet
    /// dispatched is skipped, and the run rejects with
    /// [`SequenceError::Aborted`](crate::SequenceError::Aborted).
    Abort,
}

/// A unit of work executed by the sequence.
///
/// `inputs` carries the artifacts of the task's parents in the order the
/// parents were declared. Actions must tolerate re-invocation: the runner
/// calls `run` once per attempt when retries are configured.
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn run(&self, inputs: Vec<Value>) -> Result<Value>;
}

type BoxedActionFn = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Adapter so plain async closures can be used as actions without a trait
/// impl per task.
pub struct FnAction {
    func: BoxedActionFn,
}

impl FnAction {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            func: Box::new(move |inputs| -> BoxFuture<'static, Result<Value>> {
                Box::pin(func(inputs))
            }),
        }
    }
}

#[async_trait]
impl TaskAction for FnAction {
    async fn run(&self, inputs: Vec<Value>) -> Result<Value> {
        (self.func)(inputs).await
    }
}

/// Immutable declaration of one task: identity, action, dependencies, retry
/// policy, error policy, priority.
#[derive(Clone)]
pub struct TaskDescriptor {
    /// Unique id within a sequence; uniqueness is checked at build time.
    pub id: String,
    /// Ids of the tasks this one depends on. The order is significant: it is
    /// the argument order for the action.
    pub parents: Vec<String>,
    /// Number of retries after the first attempt. Zero means one attempt.
    pub retry_count: u32,
    /// Delay slept between attempts.
    pub retry_delay: Duration,
    /// Driver reaction once retries are exhausted.
    pub on_error: ErrorPolicy,
    /// Higher runs earlier among ready peers; ties break by insertion order.
    pub priority: i64,
    pub(crate) action: Arc<dyn TaskAction>,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<String>, action: Arc<dyn TaskAction>) -> Self {
        Self {
            id: id.into(),
            parents: Vec::new(),
            retry_count: 0,
            retry_delay: Duration::ZERO,
            on_error: ErrorPolicy::Continue,
            priority: 0,
            action,
        }
    }

    /// Declare a task from an async closure.
    pub fn from_fn<F, Fut>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::new(id, Arc::new(FnAction::new(func)))
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn with_retries(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("id", &self.id)
            .field("parents", &self.parents)
            .field("retry_count", &self.retry_count)
            .field("retry_delay", &self.retry_delay)
            .field("on_error", &self.on_error)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
