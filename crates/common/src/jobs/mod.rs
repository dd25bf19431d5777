//! Background job queue for slow filesystem work.
//!
//! Jobs go through a flume channel to an in-process worker. The dispatcher
//! keeps a registry of every job so callers can poll, wait, cancel or hook
//! completion callbacks.

mod archive;
mod dispatcher;
mod handlers;
mod worker;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::acl::PrincipalId;
use crate::vfs::NodeId;

pub use archive::archive_name;
pub use dispatcher::{JobDispatcher, JobReceiver};
pub use worker::run_worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    BulkMove,
    BulkCopy,
    ArchiveBuild,
    GrantSweep,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::BulkMove => "bulk-move",
            JobKind::BulkCopy => "bulk-copy",
            JobKind::ArchiveBuild => "archive-build",
            JobKind::GrantSweep => "grant-sweep",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work that can be handed to the background worker.
#[derive(Debug, Clone)]
pub enum Job {
    /// Move every source under `destination` in one transaction.
    BulkMove {
        actor: PrincipalId,
        sources: Vec<NodeId>,
        destination: NodeId,
    },
    /// Deep copy every source under `destination`.
    BulkCopy {
        actor: PrincipalId,
        sources: Vec<NodeId>,
        destination: NodeId,
    },
    /// Zip a folder and store the archive next to it.
    ArchiveBuild { actor: PrincipalId, folder: NodeId },
    /// Drop expired grants from the active index.
    GrantSweep,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::BulkMove { .. } => JobKind::BulkMove,
            Job::BulkCopy { .. } => JobKind::BulkCopy,
            Job::ArchiveBuild { .. } => JobKind::ArchiveBuild,
            Job::GrantSweep => JobKind::GrantSweep,
        }
    }

    pub fn targets(&self) -> Vec<NodeId> {
        match self {
            Job::BulkMove {
                sources,
                destination,
                ..
            }
            | Job::BulkCopy {
                sources,
                destination,
                ..
            } => {
                let mut targets = sources.clone();
                targets.push(*destination);
                targets
            }
            Job::ArchiveBuild { folder, .. } => vec![*folder],
            Job::GrantSweep => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutput {
    Moved(Vec<NodeId>),
    Copied(Vec<NodeId>),
    Archive {
        node: NodeId,
        entries: usize,
        size: u64,
    },
    Swept(usize),
}

/// The registry's view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingJob {
    pub id: JobId,
    pub kind: JobKind,
    pub targets: Vec<NodeId>,
    pub status: JobStatus,
    pub output: Option<JobOutput>,
    /// Opaque failure summary, set when the job failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PendingJob {
    fn new(id: JobId, job: &Job) -> Self {
        Self {
            id,
            kind: job.kind(),
            targets: job.targets(),
            status: JobStatus::Queued,
            output: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("an equivalent job is already pending: {0}")]
    AlreadyQueued(JobId),
    #[error("job queue is full")]
    QueueFull,
    #[error("job queue is closed")]
    QueueClosed,
    #[error("unknown job: {0}")]
    UnknownJob(JobId),
    #[error("{id} failed: {summary}")]
    Failed { id: JobId, summary: String },
}
