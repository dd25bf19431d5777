use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::vfs::{Vfs, VfsError};

use super::archive;
use super::{Job, JobOutput};

/// Execute a single job. Errors become the job's failure summary.
pub(crate) async fn run(
    vfs: Vfs,
    job: Job,
    cancel: Arc<AtomicBool>,
) -> Result<JobOutput, VfsError> {
    match job {
        Job::BulkMove {
            actor,
            sources,
            destination,
        } => vfs
            .move_many(&actor, &sources, &destination, &cancel)
            .await
            .map(JobOutput::Moved),
        Job::BulkCopy {
            actor,
            sources,
            destination,
        } => vfs
            .copy_many(&actor, &sources, &destination, &cancel)
            .await
            .map(JobOutput::Copied),
        Job::ArchiveBuild { actor, folder } => {
            archive::build(&vfs, &actor, &folder, &cancel).await
        }
        Job::GrantSweep => vfs.shares().sweep_expired().await.map(JobOutput::Swept),
    }
}
