use std::path::PathBuf;
use std::time::Duration;

use common::vfs::VfsConfig;

#[derive(Debug, Clone)]
pub struct Config {
    // data store configuration
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,
    /// directory holding file contents, if not set then
    ///  contents are kept in memory
    pub blobs_path: Option<PathBuf>,

    // engine configuration
    pub vfs: VfsConfig,

    // job configuration
    /// how many jobs run at once
    pub worker_count: usize,
    /// bound on the job queue
    pub max_queue_size: usize,
    /// how often expired grants are swept
    pub sweep_interval: Duration,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            blobs_path: None,
            vfs: VfsConfig::default(),
            worker_count: 4,
            max_queue_size: 1000,
            sweep_interval: Duration::from_secs(300),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }
}
