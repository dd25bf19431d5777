use std::{fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use common::vfs::VfsConfig;

pub const APP_NAME: &str = "skylock";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const BLOBS_DIR_NAME: &str = "blobs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Jobs the background worker runs at once
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Pending jobs accepted before enqueue fails
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Seconds between expired grant sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    /// Whether non-owners may pass on access they were granted
    #[serde(default = "default_allow_reshare")]
    pub allow_reshare: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_worker_count() -> usize {
    4
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_transaction_timeout_ms() -> u64 {
    5000
}

fn default_allow_reshare() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_queue_size: default_max_queue_size(),
            sweep_interval_secs: default_sweep_interval_secs(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            allow_reshare: default_allow_reshare(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn vfs_config(&self) -> VfsConfig {
        VfsConfig {
            transaction_timeout: Duration::from_millis(self.transaction_timeout_ms),
            allow_reshare: self.allow_reshare,
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, StateError> {
        self.log_level
            .parse()
            .map_err(|_| StateError::InvalidLogLevel(self.log_level.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the skylock directory (~/.skylock)
    pub skylock_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the blobs directory
    pub blobs_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the skylock directory path (custom or default ~/.skylock)
    pub fn skylock_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new skylock state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let skylock_dir = Self::skylock_dir(custom_path)?;

        if skylock_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&skylock_dir)?;

        let blobs_path = skylock_dir.join(BLOBS_DIR_NAME);
        fs::create_dir_all(&blobs_path)?;

        let config = config.unwrap_or_default();
        let config_path = skylock_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // the service creates the schema on first start
        let db_path = skylock_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        Ok(Self {
            skylock_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the skylock directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let skylock_dir = Self::skylock_dir(custom_path)?;

        if !skylock_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = skylock_dir.join(DB_FILE_NAME);
        let blobs_path = skylock_dir.join(BLOBS_DIR_NAME);
        let config_path = skylock_dir.join(CONFIG_FILE_NAME);

        if !db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !blobs_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", BLOBS_DIR_NAME)));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            skylock_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("skylock directory not initialized. Run 'skylock init' first")]
    NotInitialized,

    #[error("skylock directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
