use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::core::{Result, UploadError};
use crate::utils::retry::RetryPolicy;

pub const CONFIG_ENV: &str = "UPLINK_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Endpoint prefix selecting the in-process remote
pub const MEMORY_ENDPOINT: &str = "memory://";

const MIB: u64 = 1024 * 1024;

/// Per-transfer knobs, read once when a file transfer starts.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    /// Part size threshold in bytes
    pub split_file_size: u64,
    /// Max simultaneous part uploads for one file
    pub concurrency: usize,
    pub encrypt_files: bool,
    pub random_chunking: bool,
    pub channel_id: Option<i64>,
    pub encryption_secret: Option<String>,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            split_file_size: 500 * MIB,
            concurrency: 4,
            encrypt_files: false,
            random_chunking: false,
            channel_id: None,
            encryption_secret: None,
        }
    }
}

impl UploadSettings {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(UploadError::Config("concurrency must be at least 1".to_string()));
        }
        if self.split_file_size == 0 {
            return Err(UploadError::Config("split_file_size must be positive".to_string()));
        }
        if self.encrypt_files && self.encryption_secret.as_deref().is_none_or(str::is_empty) {
            return Err(UploadError::Config(
                "encrypt_files requires encryption_secret".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<String>,
    pub owner_id: i64,
    /// Remote directory new uploads land in
    pub base_path: String,
    pub upload: UploadSettings,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: MEMORY_ENDPOINT.to_string(),
            token: None,
            owner_id: 0,
            base_path: "/".to_string(),
            upload: UploadSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.upload.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load from `$UPLINK_CONFIG`, else `config.toml`. A missing default file
    /// yields the defaults.
    pub fn load_default() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn is_memory(&self) -> bool {
        self.endpoint.starts_with(MEMORY_ENDPOINT)
    }
}
