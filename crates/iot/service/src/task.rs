//! Supervised background tasks.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A unit of work run outside the request that started it.
pub type Task = Pin<Box<dyn Future<Output = color_eyre::eyre::Result<()>> + Send + 'static>>;

/// How a supervised task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    TimedOut,
    Panicked,
}

/// Runs lifecycle tasks.
#[async_trait::async_trait]
pub trait TaskRunner: Send + Sync {
    /// Hand a task over. Failures are logged, never returned to the caller.
    async fn submit(&self, name: &'static str, task: Task);
}

/// Spawns each task and returns immediately.
#[derive(Debug, Clone)]
pub struct DetachedRunner {
    timeout: Duration,
}

impl DetachedRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl TaskRunner for DetachedRunner {
    async fn submit(&self, name: &'static str, task: Task) {
        tokio::spawn(supervise(name, self.timeout, task));
    }
}

/// Runs each task to completion before returning. Used by maintenance
/// commands and tests that need to observe the effects.
#[derive(Debug, Clone)]
pub struct InlineRunner {
    timeout: Duration,
}

impl InlineRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl TaskRunner for InlineRunner {
    async fn submit(&self, name: &'static str, task: Task) {
        supervise(name, self.timeout, task).await;
    }
}

/// Run a task on its own tokio task with a deadline. Errors, timeouts and
/// panics are logged and reported as the outcome.
pub async fn supervise(name: &'static str, timeout: Duration, task: Task) -> TaskOutcome {
    let handle = tokio::spawn(tokio::time::timeout(timeout, task));

    match handle.await {
        Ok(Ok(Ok(()))) => TaskOutcome::Completed,
        Ok(Ok(Err(err))) => {
            tracing::error!(task = name, error = %format!("{err:#}"), "background task failed");
            TaskOutcome::Failed
        }
        Ok(Err(_)) => {
            tracing::error!(
                task = name,
                timeout_ms = timeout.as_millis() as u64,
                "background task timed out"
            );
            TaskOutcome::TimedOut
        }
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            tracing::error!(
                task = name,
                panic = %panic_message(payload.as_ref()),
                "background task panicked"
            );
            TaskOutcome::Panicked
        }
        Err(err) => {
            tracing::error!(task = name, error = %err, "background task cancelled");
            TaskOutcome::Failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
