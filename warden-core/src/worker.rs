//! Background projection workers.
//!
//! A [`ProjectionWorker`] keeps one projection current:
//! 1. Catch up from the checkpoint with a plain log read.
//! 2. Subscribe from the checkpoint and apply live events one at a time,
//!    dropping any position already seen.
//! 3. On failure, log it, back off, and start over at step 1. The failed
//!    event is retried, never skipped.
//!
//! ```ignore
//! let handle = ProjectionWorker::new(projector, ProjectionConfig::default()).spawn();
//! // ...
//! handle.stop().await?;
//! ```

use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_stream::StreamExt as _;

use crate::{
    config::ProjectionConfig,
    log::SubscribableLog,
    projection::{Projection, ProjectionError, Projector, StatementExecutor},
};

/// Errors from stopping a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("projection worker task panicked")]
    TaskPanicked,
}

/// Handle to a running worker.
///
/// Dropping the handle does **not** stop the worker. Call [`stop()`] for
/// graceful shutdown.
///
/// [`stop()`]: WorkerHandle::stop
pub struct WorkerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop the worker and wait for it to finish the event in flight.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::TaskPanicked`] if the task did not exit cleanly.
    pub async fn stop(mut self) -> Result<(), WorkerError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.task.await.map_err(|_| WorkerError::TaskPanicked)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

enum Exit {
    Stopped,
    StreamEnded,
}

/// Runs a [`Projector`] as a background task.
pub struct ProjectionWorker<P, L, X> {
    projector: Projector<P, L, X>,
    config: ProjectionConfig,
}

impl<P, L, X> ProjectionWorker<P, L, X>
where
    P: Projection + 'static,
    L: SubscribableLog + 'static,
    X: StatementExecutor + 'static,
{
    pub const fn new(projector: Projector<P, L, X>, config: ProjectionConfig) -> Self {
        Self { projector, config }
    }

    /// Spawn the worker on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> WorkerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        WorkerHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    async fn run(self, mut stop: oneshot::Receiver<()>) {
        tracing::debug!(projection = P::NAME, "projection worker started");
        loop {
            let delay = match self.follow(&mut stop).await {
                Ok(Exit::Stopped) => break,
                Ok(Exit::StreamEnded) => {
                    tracing::debug!(projection = P::NAME, "subscription ended, resubscribing");
                    self.config.poll_interval
                }
                Err(err) => {
                    tracing::error!(
                        projection = P::NAME,
                        error = %err,
                        "projection failed, retrying from checkpoint"
                    );
                    self.config.retry_backoff
                }
            };
            tokio::select! {
                biased;
                _ = &mut stop => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!(projection = P::NAME, "projection worker stopped");
    }

    async fn follow(
        &self,
        stop: &mut oneshot::Receiver<()>,
    ) -> Result<Exit, ProjectionError<L::Error, X::Error>> {
        self.projector.catch_up().await?;

        let from = self
            .projector
            .checkpoint()
            .await?
            .map(|checkpoint| checkpoint.position);
        let mut last_position = from.unwrap_or(0);
        let mut stream = self
            .projector
            .log()
            .subscribe(self.projector.filters().to_vec(), from);

        loop {
            tokio::select! {
                biased;
                _ = &mut *stop => return Ok(Exit::Stopped),
                next = stream.next() => {
                    let Some(result) = next else {
                        return Ok(Exit::StreamEnded);
                    };
                    let event = result.map_err(ProjectionError::Log)?;
                    if event.position <= last_position {
                        tracing::trace!(position = event.position, "duplicate delivery dropped");
                        continue;
                    }
                    self.projector.handle(&event).await?;
                    last_position = event.position;
                }
            }
        }
    }
}
