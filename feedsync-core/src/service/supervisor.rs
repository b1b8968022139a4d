// service/supervisor.rs
// Lifecycle coordination: one cancellation token, one tracker for every task.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Tracks every spawned subscriber and sync loop and broadcasts shutdown.
///
/// Cloning is cheap; clones share the same token and tracker.
#[derive(Clone, Default)]
pub struct Supervisor {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared shutdown signal
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the supervisor but also cancellable on its own,
    /// e.g. to drop one subscription when its pipeline fails to start.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Number of tasks still running
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Broadcast cancellation to every task.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested, cancelling {} tasks", self.tracker.len());
        }
        self.token.cancel();
    }

    /// Wait until every tracked task has exited. Tasks may still be spawned
    /// while waiting; the wait covers them too.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!("all supervised tasks finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_joins_all_cancelled_tasks() {
        let supervisor = Supervisor::new();
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let token = supervisor.token();
            let finished = Arc::clone(&finished);
            supervisor.spawn(async move {
                token.cancelled().await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(supervisor.active_tasks(), 3);

        supervisor.shutdown();
        tokio::time::timeout(Duration::from_secs(1), supervisor.wait())
            .await
            .unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.active_tasks(), 0);
        assert!(supervisor.is_shutting_down());
    }

    #[tokio::test]
    async fn test_child_token_cancels_alone() {
        let supervisor = Supervisor::new();
        let child = supervisor.child_token();

        child.cancel();
        assert!(!supervisor.is_shutting_down());

        let other = supervisor.child_token();
        supervisor.shutdown();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_returns_when_tasks_end_on_their_own() {
        let supervisor = Supervisor::new();
        let handle = supervisor.spawn(async { 7 });
        supervisor.wait().await;
        assert_eq!(handle.await.unwrap(), 7);
        assert!(!supervisor.is_shutting_down());
    }
}
