//! Shutdown coordination for the service.
//!
//! `Running → ShuttingDown → Stopped`. The transition out of `Running` is
//! triggered externally (signal listener, tests); the coordinator then gives
//! the listener a grace period to finish in-flight requests and waits for
//! the background task set to drain before reporting `Stopped`.

use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::lifecycle::background::BackgroundTasks;

/// Process lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accepting connections normally.
    Running,
    /// Listener closing, in-flight and background work draining.
    ShuttingDown,
    /// Listener closed and no background work outstanding.
    Stopped,
}

/// Errors surfaced as the final shutdown outcome.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The listener failed while serving or closing.
    #[error("listener error: {0}")]
    Listener(#[from] io::Error),

    /// In-flight requests were still running when the grace period ended.
    #[error("in-flight requests still running after {0:?} grace period")]
    GraceElapsed(Duration),

    /// The background drain deadline passed with tasks outstanding.
    #[error("{remaining} background task(s) abandoned after {deadline:?}")]
    BackgroundTasksAbandoned { remaining: usize, deadline: Duration },
}

/// Coordinator for graceful shutdown.
///
/// Long-running tasks subscribe to the state channel and stop once it
/// leaves `Running`.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: watch::Sender<ShutdownState>,
    tasks: BackgroundTasks,
    grace_period: Duration,
    background_deadline: Option<Duration>,
}

impl ShutdownCoordinator {
    /// Create a new coordinator in the `Running` state.
    pub fn new(tasks: BackgroundTasks, grace_period: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            state,
            tasks,
            grace_period,
            background_deadline: None,
        }
    }

    /// Bound the wait for background tasks. Without this it is unbounded.
    pub fn with_background_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.background_deadline = deadline;
        self
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// The background task set this coordinator drains.
    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Move from `Running` to `ShuttingDown`. Later calls are no-ops.
    pub fn trigger(&self, reason: &str) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::ShuttingDown;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(reason, "Shutting down server");
        }
    }

    /// Resolve once shutdown has been triggered.
    pub async fn triggered(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s != ShutdownState::Running).await;
    }

    /// Supervise a serving future through shutdown.
    ///
    /// `server` must stop accepting connections once [`triggered`] resolves
    /// and complete when its in-flight requests are done. If it is still
    /// running `grace_period` after the trigger, it is dropped and the grace
    /// expiry is reported; requests already spawned are not aborted.
    /// Background tasks are drained in every case before `Stopped`.
    ///
    /// [`triggered`]: ShutdownCoordinator::triggered
    pub async fn supervise<F>(&self, server: F) -> Result<(), ShutdownError>
    where
        F: Future<Output = io::Result<()>>,
    {
        tokio::pin!(server);

        let listener_outcome = tokio::select! {
            res = &mut server => res.map_err(ShutdownError::Listener),
            _ = self.grace_expired() => Err(ShutdownError::GraceElapsed(self.grace_period)),
        };

        // The server may also have exited on its own with an error.
        self.trigger("listener closed");

        if let Err(e) = &listener_outcome {
            tracing::error!(error = %e, "Listener did not close cleanly");
        }

        tracing::info!(
            in_flight = self.tasks.in_flight(),
            "Completing background tasks"
        );
        let drain_outcome = self.drain_background().await;

        self.state.send_replace(ShutdownState::Stopped);
        tracing::info!("Stopped server");

        listener_outcome.and(drain_outcome)
    }

    async fn grace_expired(&self) {
        self.triggered().await;
        tokio::time::sleep(self.grace_period).await;
        tracing::warn!(grace_period = ?self.grace_period, "Grace period elapsed");
    }

    async fn drain_background(&self) -> Result<(), ShutdownError> {
        match self.background_deadline {
            None => {
                self.tasks.wait_idle().await;
                Ok(())
            }
            Some(deadline) => match tokio::time::timeout(deadline, self.tasks.wait_idle()).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    let remaining = self.tasks.in_flight();
                    tracing::error!(remaining, ?deadline, "Abandoning background tasks");
                    Err(ShutdownError::BackgroundTasksAbandoned { remaining, deadline })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn coordinator(grace: Duration) -> Arc<ShutdownCoordinator> {
        Arc::new(ShutdownCoordinator::new(BackgroundTasks::new(), grace))
    }

    /// A stand-in listener that closes as soon as shutdown is triggered.
    async fn closing_listener(coord: Arc<ShutdownCoordinator>) -> io::Result<()> {
        coord.triggered().await;
        Ok(())
    }

    #[test]
    fn trigger_is_idempotent() {
        let coord = coordinator(Duration::from_secs(30));
        assert_eq!(coord.state(), ShutdownState::Running);
        coord.trigger("SIGTERM");
        coord.trigger("SIGINT");
        assert_eq!(coord.state(), ShutdownState::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_shutdown_reaches_stopped() {
        let coord = coordinator(Duration::from_secs(30));
        let supervisor = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.supervise(closing_listener(coord.clone())).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(coord.state(), ShutdownState::Running);

        coord.trigger("SIGTERM");
        supervisor.await.unwrap().unwrap();
        assert_eq!(coord.state(), ShutdownState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_background_task_even_after_grace_period() {
        let coord = coordinator(Duration::from_secs(30));
        let (release, gate) = oneshot::channel::<()>();
        coord.tasks().spawn("mail", async move {
            let _ = gate.await;
        });

        let supervisor = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.supervise(closing_listener(coord.clone())).await })
        };
        coord.trigger("SIGINT");

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(!supervisor.is_finished());
        assert_eq!(coord.state(), ShutdownState::ShuttingDown);

        release.send(()).unwrap();
        supervisor.await.unwrap().unwrap();
        assert_eq!(coord.state(), ShutdownState::Stopped);
        assert_eq!(coord.tasks().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_listener_reports_grace_elapsed_then_drains() {
        let coord = coordinator(Duration::from_secs(30));
        let (release, gate) = oneshot::channel::<()>();
        coord.tasks().spawn("mail", async move {
            let _ = gate.await;
        });

        let supervisor = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.supervise(std::future::pending()).await })
        };
        coord.trigger("SIGTERM");

        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(coord.state(), ShutdownState::ShuttingDown);

        release.send(()).unwrap();
        let err = supervisor.await.unwrap().unwrap_err();
        assert!(matches!(err, ShutdownError::GraceElapsed(d) if d == Duration::from_secs(30)));
        assert_eq!(coord.state(), ShutdownState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_error_is_the_final_outcome() {
        let coord = coordinator(Duration::from_secs(30));
        let outcome = coord
            .supervise(async { Err(io::Error::new(io::ErrorKind::Other, "accept failed")) })
            .await;

        assert!(matches!(outcome, Err(ShutdownError::Listener(_))));
        assert_eq!(coord.state(), ShutdownState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn background_deadline_abandons_stuck_tasks() {
        let coord = Arc::new(
            ShutdownCoordinator::new(BackgroundTasks::new(), Duration::from_secs(30))
                .with_background_deadline(Some(Duration::from_secs(5))),
        );
        coord.tasks().spawn("stuck", std::future::pending());

        let supervisor = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.supervise(closing_listener(coord.clone())).await })
        };
        coord.trigger("SIGTERM");

        let err = supervisor.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ShutdownError::BackgroundTasksAbandoned { remaining: 1, .. }
        ));
        assert_eq!(coord.state(), ShutdownState::Stopped);
    }
}
