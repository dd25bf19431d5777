use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use common::jobs::{Job, JobDispatcher, JobError};

/// How long finished job records stay queryable, in seconds.
const JOB_RETENTION_SECS: i64 = 3600;

/// Queue a grant sweep every `interval` and drop stale job records, until
/// shutdown is signalled.
pub async fn run_sweeper(
    jobs: JobDispatcher,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match jobs.enqueue(Job::GrantSweep) {
                    Ok(pending) => tracing::debug!(job = %pending.id, "scheduled grant sweep"),
                    Err(JobError::QueueClosed) => {
                        tracing::warn!("job queue closed, stopping sweeper");
                        break;
                    }
                    Err(e) => tracing::warn!("failed to schedule grant sweep: {}", e),
                }

                let pruned = jobs.prune(Utc::now() - chrono::Duration::seconds(JOB_RETENTION_SECS));
                if pruned > 0 {
                    tracing::debug!(pruned, "pruned finished jobs");
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("sweeper shutting down");
                break;
            }
        }
    }
}
