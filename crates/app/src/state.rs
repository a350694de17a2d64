use std::{fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use common::prelude::DEFAULT_PACK_LIMIT;
use upload::prelude::{GatewayKey, KeyError, SessionConfig, DEFAULT_QUEUE_CAPACITY};

pub const APP_NAME: &str = "cask";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "gateway.key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gateway API base, e.g. https://gateway.example.org/api/v1
    pub gateway_url: Url,
    /// Key file, relative paths resolve against the cask directory
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    /// Pack size ceiling in bytes
    #[serde(default = "default_max_pack_size")]
    pub max_pack_size: u64,
    /// Packs that may wait for upload before producers block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-request timeout in seconds, 0 disables it
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_key_path() -> PathBuf {
    PathBuf::from(KEY_FILE_NAME)
}

fn default_max_pack_size() -> u64 {
    DEFAULT_PACK_LIMIT
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_request_timeout() -> u64 {
    300
}

impl AppConfig {
    pub fn new(gateway_url: Url) -> Self {
        Self {
            gateway_url,
            key_path: default_key_path(),
            max_pack_size: default_max_pack_size(),
            queue_capacity: default_queue_capacity(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn session_config(&self, drop_lease: bool) -> SessionConfig {
        SessionConfig {
            max_pack_size: self.max_pack_size,
            drop_lease,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the cask directory (~/.cask)
    pub cask_dir: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the cask directory path (custom or default ~/.cask)
    pub fn cask_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new cask state directory
    pub fn init(custom_path: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        let cask_dir = Self::cask_dir(custom_path)?;
        let config_path = cask_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&cask_dir)?;
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            cask_dir,
            config_path,
            config,
        })
    }

    /// Load existing state from the cask directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let cask_dir = Self::cask_dir(custom_path)?;
        let config_path = cask_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        Ok(Self {
            cask_dir,
            config_path,
            config,
        })
    }

    pub fn key_path(&self) -> PathBuf {
        self.cask_dir.join(&self.config.key_path)
    }

    /// Load the gateway key named in the config
    pub fn load_key(&self) -> Result<GatewayKey, StateError> {
        let key_path = self.key_path();
        if !key_path.exists() {
            return Err(StateError::MissingFile(key_path.display().to_string()));
        }
        Ok(GatewayKey::from_file(&key_path)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cask directory not initialized. Run 'cask init' first")]
    NotInitialized,

    #[error("cask directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
