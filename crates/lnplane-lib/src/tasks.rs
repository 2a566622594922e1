use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

/// The tracker every long-lived task of the process is spawned on, paired with the token
/// that tells those tasks to stop.
#[derive(Debug, Clone, Default)]
pub struct ProcessTasks {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl ProcessTasks {
    /// Cancels the token and waits until every tracked task has returned.
    pub async fn shutdown(&self) {
        debug!(pending = self.tracker.len(), "cancelling process tasks");
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

static PROCESS_TASKS: once_cell::sync::Lazy<ProcessTasks> =
    once_cell::sync::Lazy::new(ProcessTasks::default);

/// The process-wide exit token. Node and rebalance tokens are children of it.
pub fn new_tokio_cancellation_token() -> CancellationToken {
    PROCESS_TASKS.token.clone()
}

/// The process-wide tracker awaited on shutdown.
pub fn new_tokio_task_tracker() -> TaskTracker {
    PROCESS_TASKS.tracker.clone()
}

/// Shutdown all tasks, and wait for their completion.
pub async fn cancel_tasks_and_wait_for_completion() {
    PROCESS_TASKS.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_waits_for_tracked_tasks() {
        let tasks = ProcessTasks::default();
        let token = tasks.token.child_token();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tasks.tracker.spawn(async move {
            token.cancelled().await;
            let _ = tx.send("stopped");
        });

        tasks.shutdown().await;
        assert!(tasks.tracker.is_empty());
        assert_eq!(rx.await.unwrap(), "stopped");
    }
}
