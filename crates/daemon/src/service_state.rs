use std::sync::Arc;

use common::jobs::{JobDispatcher, JobReceiver};
use common::vfs::{ContentStore, Vfs, VfsError};

use crate::content::ObjectContentStore;
use crate::database::{Database, DatabaseSetupError};
use crate::ServiceConfig;

/// Everything the running service shares between its tasks.
#[derive(Clone)]
pub struct State {
    vfs: Vfs,
    jobs: JobDispatcher,
    database: Database,
}

impl State {
    /// Open the database and content store, load the tree and set up the
    /// job queue. The receiving half of the queue goes to the worker.
    pub async fn from_config(config: &ServiceConfig) -> Result<(Self, JobReceiver), StateSetupError> {
        let database = match &config.sqlite_path {
            Some(path) => {
                let url = url::Url::parse(&format!("sqlite://{}", path.display()))
                    .map_err(|e| StateSetupError::InvalidDatabaseUrl(e.to_string()))?;
                Database::connect(&url).await?
            }
            None => Database::in_memory().await?,
        };

        let content: Arc<dyn ContentStore> = match &config.blobs_path {
            Some(path) => Arc::new(
                ObjectContentStore::local(path).map_err(StateSetupError::ContentStore)?,
            ),
            None => Arc::new(ObjectContentStore::memory()),
        };

        let vfs = Vfs::open(config.vfs.clone(), Arc::new(database.clone()), content).await?;
        let (jobs, receiver) = JobDispatcher::new(Some(config.max_queue_size));

        Ok((
            Self {
                vfs,
                jobs,
                database,
            },
            receiver,
        ))
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn jobs(&self) -> &JobDispatcher {
        &self.jobs
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("invalid database url: {0}")]
    InvalidDatabaseUrl(String),
    #[error("database setup error: {0}")]
    Database(#[from] DatabaseSetupError),
    #[error("content store setup error: {0}")]
    ContentStore(anyhow::Error),
    #[error("failed to load tree: {0}")]
    Vfs(#[from] VfsError),
}
