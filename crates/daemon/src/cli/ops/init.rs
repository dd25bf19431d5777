use clap::Args;

use skylock_daemon::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Jobs the background worker runs at once
    #[arg(long)]
    pub worker_count: Option<usize>,

    /// Seconds between expired grant sweeps
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Only owners may share their files
    #[arg(long)]
    pub no_reshare: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let defaults = AppConfig::default();
        let config = AppConfig {
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            sweep_interval_secs: self
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
            allow_reshare: !self.no_reshare,
            ..defaults
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        Ok(format!(
            "Initialized skylock directory at {}",
            state.skylock_dir.display()
        ))
    }
}
