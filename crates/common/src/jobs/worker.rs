use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::vfs::{Vfs, VfsError};

use super::dispatcher::{JobDispatcher, JobReceiver, Outcome};
use super::handlers;

/// Drain the job queue until shutdown, running at most `concurrency` jobs
/// at once. Jobs already running when shutdown arrives are allowed to
/// finish. Jobs still queued are cancelled and the queue is closed, so later
/// enqueues fail with [`super::JobError::QueueClosed`].
pub async fn run_worker(
    vfs: Vfs,
    dispatcher: JobDispatcher,
    receiver: JobReceiver,
    concurrency: usize,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let (mut queue, backlog) = receiver.into_parts();
    let mut running = JoinSet::new();

    tracing::info!("job worker started with {} slots", concurrency.max(1));

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                tracing::info!("job worker shutting down");
                break;
            }
            Some(finished) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = finished {
                    tracing::error!("job task ended abnormally: {}", e);
                }
            }
            envelope = queue.next() => {
                let Some(envelope) = envelope else {
                    tracing::info!("job queue closed, worker exiting");
                    break;
                };

                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };

                let Some(cancel) = dispatcher.begin(&envelope.id) else {
                    tracing::debug!("skipping {}: no longer queued", envelope.id);
                    continue;
                };

                let vfs = vfs.clone();
                let dispatcher = dispatcher.clone();
                running.spawn(async move {
                    let id = envelope.id;
                    tracing::debug!("running {}", id);

                    let run = handlers::run(vfs, envelope.job, cancel.clone());
                    let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                        Ok(Ok(output)) => Outcome::Done(output),
                        Ok(Err(VfsError::Cancelled)) => Outcome::Cancelled,
                        Ok(Err(e)) => Outcome::Failed(e.to_string()),
                        Err(_) => Outcome::Failed("job panicked".to_string()),
                    };

                    // a cancelled job reports as cancelled even if it tripped
                    // over something else on the way out
                    let outcome = match outcome {
                        Outcome::Failed(_) if cancel.load(Ordering::Acquire) => Outcome::Cancelled,
                        outcome => outcome,
                    };

                    dispatcher.finish(&id, outcome);
                    drop(permit);
                });
            }
        }
    }

    drop(queue);
    let cancelled = dispatcher.cancel_backlog(backlog);
    if cancelled > 0 {
        tracing::info!("cancelled {} queued jobs at shutdown", cancelled);
    }

    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            tracing::error!("job task ended abnormally: {}", e);
        }
    }
}
