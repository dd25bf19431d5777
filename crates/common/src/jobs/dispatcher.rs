use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Job, JobError, JobId, JobKind, JobOutput, JobStatus, PendingJob};

type Callback = Box<dyn FnOnce(&PendingJob) + Send>;

/// A job on its way to the worker.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub id: JobId,
    pub job: Job,
}

/// How a job run ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Done(JobOutput),
    Failed(String),
    Cancelled,
}

struct JobEntry {
    record: PendingJob,
    cancel: Arc<AtomicBool>,
    on_complete: Vec<Callback>,
    on_fail: Vec<Callback>,
    status: watch::Sender<JobStatus>,
}

type Registry = Arc<Mutex<HashMap<JobId, JobEntry>>>;

/// Job dispatcher that can be cloned and shared across tasks.
///
/// Enqueueing only registers the job and hands it to the channel; the
/// caller gets the queued record back straight away.
#[derive(Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Envelope>,
    registry: Registry,
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("queued", &self.tx.len())
            .field("tracked", &self.registry.lock().len())
            .finish()
    }
}

impl JobDispatcher {
    /// Create a dispatcher and the receiver the worker drains. `capacity`
    /// bounds the queue; `None` leaves it unbounded.
    pub fn new(capacity: Option<usize>) -> (Self, JobReceiver) {
        let (tx, rx) = match capacity {
            Some(capacity) => flume::bounded(capacity),
            None => flume::unbounded(),
        };
        let dispatcher = Self {
            tx,
            registry: Arc::new(Mutex::new(HashMap::new())),
        };
        (dispatcher, JobReceiver { rx })
    }

    /// Queue a job. A second archive of a folder that still has one pending
    /// is refused.
    pub fn enqueue(&self, job: Job) -> Result<PendingJob, JobError> {
        let mut registry = self.registry.lock();

        if let Job::ArchiveBuild { folder, .. } = &job {
            let duplicate = registry.values().find(|entry| {
                entry.record.kind == JobKind::ArchiveBuild
                    && !entry.record.status.is_terminal()
                    && entry.record.targets.first() == Some(folder)
            });
            if let Some(entry) = duplicate {
                return Err(JobError::AlreadyQueued(entry.record.id));
            }
        }

        let id = JobId::new();
        let record = PendingJob::new(id, &job);

        // the registry lock is held so the worker cannot pick the job up
        // before it is registered
        self.tx
            .try_send(Envelope { id, job })
            .map_err(|e| match e {
                flume::TrySendError::Full(_) => JobError::QueueFull,
                flume::TrySendError::Disconnected(_) => JobError::QueueClosed,
            })?;

        let (status, _) = watch::channel(JobStatus::Queued);
        registry.insert(
            id,
            JobEntry {
                record: record.clone(),
                cancel: Arc::new(AtomicBool::new(false)),
                on_complete: Vec::new(),
                on_fail: Vec::new(),
                status,
            },
        );

        tracing::info!("JOB_DISPATCHER: queued {} ({})", id, record.kind);
        Ok(record)
    }

    pub fn status(&self, id: &JobId) -> Result<PendingJob, JobError> {
        self.registry
            .lock()
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or(JobError::UnknownJob(*id))
    }

    /// Cancel a job. Queued jobs end immediately; running jobs stop at their
    /// next checkpoint. Finished jobs are left alone.
    pub fn cancel(&self, id: &JobId) -> Result<PendingJob, JobError> {
        let status = {
            let registry = self.registry.lock();
            let entry = registry.get(id).ok_or(JobError::UnknownJob(*id))?;
            if entry.record.status == JobStatus::Running {
                entry.cancel.store(true, Ordering::Release);
            }
            entry.record.status
        };

        if status == JobStatus::Queued {
            self.finish(id, Outcome::Cancelled);
        }
        tracing::info!("JOB_DISPATCHER: cancel requested for {}", id);
        self.status(id)
    }

    /// Run `handler` once the job completes successfully. Fires right away
    /// if it already has.
    pub fn on_complete<F>(&self, id: &JobId, handler: F) -> Result<(), JobError>
    where
        F: FnOnce(&PendingJob) + Send + 'static,
    {
        self.register(id, Box::new(handler), true)
    }

    /// Run `handler` once the job fails or is cancelled. Fires right away if
    /// it already has.
    pub fn on_fail<F>(&self, id: &JobId, handler: F) -> Result<(), JobError>
    where
        F: FnOnce(&PendingJob) + Send + 'static,
    {
        self.register(id, Box::new(handler), false)
    }

    fn register(&self, id: &JobId, handler: Callback, on_success: bool) -> Result<(), JobError> {
        let record = {
            let mut registry = self.registry.lock();
            let entry = registry.get_mut(id).ok_or(JobError::UnknownJob(*id))?;
            if !entry.record.status.is_terminal() {
                if on_success {
                    entry.on_complete.push(handler);
                } else {
                    entry.on_fail.push(handler);
                }
                return Ok(());
            }
            entry.record.clone()
        };

        let succeeded = record.status == JobStatus::Done;
        if succeeded == on_success {
            handler(&record);
        }
        Ok(())
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, id: &JobId) -> Result<PendingJob, JobError> {
        let mut status = {
            let registry = self.registry.lock();
            let entry = registry.get(id).ok_or(JobError::UnknownJob(*id))?;
            entry.status.subscribe()
        };
        status
            .wait_for(JobStatus::is_terminal)
            .await
            .map_err(|_| JobError::UnknownJob(*id))?;
        self.status(id)
    }

    /// Forget finished jobs that ended before `before`.
    pub fn prune(&self, before: DateTime<Utc>) -> usize {
        let mut registry = self.registry.lock();
        let tracked = registry.len();
        registry.retain(|_, entry| {
            !entry.record.status.is_terminal()
                || entry
                    .record
                    .finished_at
                    .map_or(true, |finished| finished >= before)
        });
        tracked - registry.len()
    }

    /// Mark a queued job as running and hand back its cancel flag. Returns
    /// `None` for anything no longer queued, so a redelivered job is skipped.
    pub(crate) fn begin(&self, id: &JobId) -> Option<Arc<AtomicBool>> {
        let mut registry = self.registry.lock();
        let entry = registry.get_mut(id)?;
        if entry.record.status != JobStatus::Queued {
            return None;
        }
        entry.record.status = JobStatus::Running;
        entry.status.send_replace(JobStatus::Running);
        Some(entry.cancel.clone())
    }

    /// Record how a job ended and fire its callbacks. Only the first
    /// terminal transition counts.
    /// Close the queue and cancel every job still waiting in it. `backlog`
    /// must be the last receiver left. Enqueue sends under the registry lock,
    /// so holding it here means nothing slips in after the drain.
    pub(crate) fn cancel_backlog(&self, backlog: flume::Receiver<Envelope>) -> usize {
        let ids: Vec<JobId> = {
            let _registry = self.registry.lock();
            let ids = backlog.drain().map(|envelope| envelope.id).collect();
            drop(backlog);
            ids
        };
        for id in &ids {
            self.finish(id, Outcome::Cancelled);
        }
        ids.len()
    }

    pub(crate) fn finish(&self, id: &JobId, outcome: Outcome) {
        let (record, callbacks) = {
            let mut registry = self.registry.lock();
            let Some(entry) = registry.get_mut(id) else {
                return;
            };
            if entry.record.status.is_terminal() {
                return;
            }

            match outcome {
                Outcome::Done(output) => {
                    entry.record.status = JobStatus::Done;
                    entry.record.output = Some(output);
                }
                Outcome::Failed(summary) => {
                    entry.record.status = JobStatus::Failed;
                    entry.record.error = Some(summary);
                }
                Outcome::Cancelled => {
                    entry.record.status = JobStatus::Cancelled;
                }
            }
            entry.record.finished_at = Some(Utc::now());
            entry.status.send_replace(entry.record.status);

            let on_complete = std::mem::take(&mut entry.on_complete);
            let on_fail = std::mem::take(&mut entry.on_fail);
            let callbacks = match entry.record.status {
                JobStatus::Done => on_complete,
                _ => on_fail,
            };
            (entry.record.clone(), callbacks)
        };

        match record.status {
            JobStatus::Failed => tracing::error!(
                "JOB_DISPATCHER: {} failed: {}",
                id,
                record.error.as_deref().unwrap_or_default()
            ),
            status => tracing::info!("JOB_DISPATCHER: {} finished as {:?}", id, status),
        }

        for callback in callbacks {
            callback(&record);
        }
    }
}

/// Job receiver for the background worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Envelope>,
}

impl JobReceiver {
    /// Jobs waiting to be picked up.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// An async stream for the worker loop, plus a second handle on the same
    /// queue for collecting leftovers at shutdown.
    pub(crate) fn into_parts(
        self,
    ) -> (
        flume::r#async::RecvStream<'static, Envelope>,
        flume::Receiver<Envelope>,
    ) {
        let backlog = self.rx.clone();
        (self.rx.into_stream(), backlog)
    }
}
