//! Runs load, translate and download work off the caller's control flow.
//!
//! Every task runs on its own Tokio task and reports through a channel: zero
//! or more [`TaskEvent::Progress`] messages followed by exactly one terminal
//! [`TaskEvent::Result`] or [`TaskEvent::Error`]. Work that has started cannot
//! be cancelled; [`TaskHandle::dismiss`] only stops listening.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SeedxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskKind {
    Load,
    Translate,
    Download,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Load => write!(f, "load"),
            TaskKind::Translate => write!(f, "translate"),
            TaskKind::Download => write!(f, "download"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent<T> {
    Progress(String),
    Result(T),
    Error(String),
}

/// Cloneable progress sink handed to task work.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(String) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self { sink: Arc::new(sink) }
    }

    /// A reporter that drops every message.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("Progress: {}", message);
        (self.sink)(message);
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// Caller-side view of a running task.
pub struct TaskHandle<T> {
    id: Uuid,
    kind: TaskKind,
    state: watch::Receiver<TaskState>,
    events: mpsc::UnboundedReceiver<TaskEvent<T>>,
    worker: JoinHandle<()>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Next event, or `None` once the task is done and all events are drained.
    pub async fn next_event(&mut self) -> Option<TaskEvent<T>> {
        self.events.recv().await
    }

    /// Wait for the terminal event, forwarding progress messages.
    pub async fn wait_with<F>(mut self, mut on_progress: F) -> Result<T>
    where
        F: FnMut(&str),
    {
        while let Some(event) = self.events.recv().await {
            match event {
                TaskEvent::Progress(message) => on_progress(&message),
                TaskEvent::Result(value) => return Ok(value),
                TaskEvent::Error(message) => {
                    return Err(SeedxError::TaskFailed {
                        kind: self.kind.to_string(),
                        message,
                    })
                }
            }
        }
        Err(SeedxError::TaskAborted)
    }

    /// Wait for the terminal event, discarding progress.
    pub async fn wait(self) -> Result<T> {
        self.wait_with(|_| {}).await
    }

    /// Stop listening. The underlying work still runs to completion.
    pub fn dismiss(self) {
        debug!("Dismissed {} task {}; work continues in background", self.kind, self.id);
        drop(self.events);
        drop(self.worker);
    }
}

/// Spawns task units. Must be used from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskExecutor;

impl TaskExecutor {
    pub fn spawn<T, F, Fut>(kind: TaskKind, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);

        let worker = tokio::spawn(async move {
            state_tx.send_replace(TaskState::Running);
            info!("Started {} task {}", kind, id);

            let progress_tx = event_tx.clone();
            let reporter = ProgressReporter::new(move |message| {
                let _ = progress_tx.send(TaskEvent::Progress(message));
            });

            match work(reporter).await {
                Ok(value) => {
                    state_tx.send_replace(TaskState::Completed);
                    info!("Completed {} task {}", kind, id);
                    let _ = event_tx.send(TaskEvent::Result(value));
                }
                Err(e) => {
                    state_tx.send_replace(TaskState::Failed);
                    warn!("{} task {} failed: {}", kind, id, e);
                    let _ = event_tx.send(TaskEvent::Error(e.to_string()));
                }
            }
        });

        TaskHandle {
            id,
            kind,
            state: state_rx,
            events: event_rx,
            worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_progress_then_result() {
        let mut handle = TaskExecutor::spawn(TaskKind::Load, |progress| async move {
            progress.report("step 1");
            progress.report("step 2");
            Ok(42)
        });

        assert_eq!(handle.kind(), TaskKind::Load);
        assert_eq!(handle.next_event().await, Some(TaskEvent::Progress("step 1".into())));
        assert_eq!(handle.next_event().await, Some(TaskEvent::Progress("step 2".into())));
        assert_eq!(handle.next_event().await, Some(TaskEvent::Result(42)));
        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let handle = TaskExecutor::spawn(TaskKind::Download, |_| async move {
            Err::<(), _>(SeedxError::DownloadFailure("no route to host".into()))
        });

        let mut seen = Vec::new();
        let err = handle.wait_with(|m| seen.push(m.to_string())).await.unwrap_err();
        assert!(seen.is_empty());
        assert!(err.to_string().contains("no route to host"));
        assert!(matches!(err, SeedxError::TaskFailed { .. }));
    }

    #[tokio::test]
    async fn test_caller_is_not_blocked() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = TaskExecutor::spawn(TaskKind::Translate, |_| async move {
            let _ = release_rx.await;
            Ok("done".to_string())
        });

        // The spawn returned while the work is still parked
        assert!(!handle.state().is_terminal());
        release_tx.send(()).unwrap();
        assert_eq!(handle.wait().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_dismissed_work_still_runs() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let handle = TaskExecutor::spawn(TaskKind::Translate, |_| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = done_tx.send(());
            Ok(())
        });

        handle.dismiss();
        tokio::time::timeout(Duration::from_secs(2), done_rx)
            .await
            .unwrap()
            .unwrap();
    }
}
