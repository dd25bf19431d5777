use std::time::Duration;

use clap::Args;

use skylock_daemon::state::AppState;
use skylock_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override the number of concurrent jobs (default from config)
    #[arg(long)]
    pub worker_count: Option<usize>,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] skylock_daemon::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        // Load state from config path (or default ~/.skylock)
        let state = AppState::load(ctx.config_path.clone())?;
        let log_level = state.config.log_level()?;

        let config = ServiceConfig {
            sqlite_path: Some(state.db_path.clone()),
            blobs_path: Some(state.blobs_path.clone()),
            vfs: state.config.vfs_config(),
            worker_count: self.worker_count.unwrap_or(state.config.worker_count),
            max_queue_size: state.config.max_queue_size,
            sweep_interval: Duration::from_secs(state.config.sweep_interval_secs),
            log_level,
            log_dir: self.log_dir.clone(),
        };

        spawn_service(&config).await;
        Ok("daemon ended".to_string())
    }
}
