//! Tracking of background work spawned by handlers.
//!
//! # Responsibilities
//! - Count outstanding tasks (e.g. welcome mail dispatch)
//! - Decrement exactly once per task, even if the task panics
//! - Let shutdown wait until the count reaches zero

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Counter of in-flight background tasks.
///
/// The count lives in a watch channel so waiters are woken on every change
/// instead of polling.
#[derive(Debug, Clone)]
pub struct BackgroundTasks {
    count: Arc<watch::Sender<usize>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }

    /// Record a new outstanding task. The returned guard decrements on drop.
    pub fn track(&self, name: &'static str) -> TaskGuard {
        self.count.send_modify(|n| *n += 1);
        tracing::trace!(task = name, in_flight = self.in_flight(), "Background task started");
        TaskGuard {
            count: Arc::clone(&self.count),
            name,
        }
    }

    /// Spawn `task` on the runtime and track it until it finishes.
    ///
    /// The count is incremented before the task is spawned, so a shutdown
    /// that starts right after this call still waits for it.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.track(name);
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        })
    }

    /// Current number of outstanding tasks.
    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once no tasks are outstanding.
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks one background task's lifetime.
/// Decrements the outstanding count when dropped.
#[derive(Debug)]
pub struct TaskGuard {
    count: Arc<watch::Sender<usize>>,
    name: &'static str,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(task = self.name, "Background task finished");
    }
}
