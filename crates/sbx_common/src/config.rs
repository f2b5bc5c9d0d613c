//! sbx Configuration
//!
//! Installer settings: directory layout, forge endpoints, download tuning and
//! service handling.
//! Config file: --config <path>, else /etc/sbx/config.toml, else defaults.

use crate::download::DownloadOptions;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/sbx/config.toml";

/// Where things live on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the installer tree (bin, tmp, log, backup, per-binary dirs)
    pub work_dir: PathBuf,
    /// Directory receiving the rendered unit files
    pub unit_dir: PathBuf,
    /// State directory handed to sing-box via -D
    pub sing_box_state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/etc/sbx"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            sing_box_state_dir: PathBuf::from("/var/lib/sing-box"),
        }
    }
}

/// Release index and download endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Base of the release-listing API
    pub api_base: String,
    /// Base of the release download URLs
    pub download_base: String,
    /// Timeout for the release index call
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            download_base: "https://github.com".to_string(),
            timeout_secs: 10,
            user_agent: format!("sbx/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Chunked downloader tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    pub chunk_size: u64,
    pub concurrent_chunks: usize,
    /// Total attempts per chunk, first try included
    pub retry_count: u32,
    pub retry_delay_secs: u64,
    /// Per-HTTP-request timeout
    pub request_timeout_secs: u64,
    /// Budget for one whole download
    pub total_timeout_secs: u64,
    /// Draw a progress bar on stderr
    pub progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5 * 1024 * 1024,
            concurrent_chunks: 10,
            retry_count: 5,
            retry_delay_secs: 5,
            request_timeout_secs: 30,
            total_timeout_secs: 60 * 60,
            progress: true,
        }
    }
}

impl DownloadConfig {
    pub fn options(&self) -> DownloadOptions {
        DownloadOptions {
            chunk_size: self.chunk_size,
            concurrent_chunks: self.concurrent_chunks,
            retry_count: self.retry_count,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            show_progress: self.progress,
        }
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

/// What to do with systemd once units are written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub daemon_reload: bool,
    pub enable: bool,
    pub start: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            daemon_reload: true,
            enable: false,
            start: false,
        }
    }
}

/// Main sbx configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SbxConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub forge: ForgeConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

impl SbxConfig {
    pub fn system_config_path() -> PathBuf {
        PathBuf::from(SYSTEM_CONFIG_PATH)
    }

    /// Load configuration
    ///
    /// Priority:
    /// 1. Explicit path (must exist)
    /// 2. System config (/etc/sbx/config.toml)
    /// 3. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let system_path = Self::system_config_path();
        if system_path.exists() {
            return Self::from_file(&system_path);
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SbxConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download.chunk_size == 0 {
            return Err(ConfigError::Invalid("download.chunk_size must be positive".into()));
        }
        if self.download.concurrent_chunks == 0 {
            return Err(ConfigError::Invalid(
                "download.concurrent_chunks must be positive".into(),
            ));
        }
        if self.download.retry_count == 0 {
            return Err(ConfigError::Invalid("download.retry_count must be at least 1".into()));
        }
        if self.paths.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.work_dir must not be empty".into()));
        }
        Ok(())
    }

    pub fn forge_timeout(&self) -> Duration {
        Duration::from_secs(self.forge.timeout_secs)
    }
}
