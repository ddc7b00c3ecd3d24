//! Configuration system for gridlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GRIDLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gridlink/config.toml
//!   3. ~/.config/gridlink/config.toml
//!
//! Unknown keys in the file are tolerated and ignored.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration. Every recognized key has a default, so an
/// absent file or a partial file is always valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Control-plane endpoint, e.g. "http://grid.internal:5001".
    pub endpoint: String,
    /// Concurrency cap on pooled RPC channels.
    pub max_parallel_channels: u32,
    /// Tasks per submission chunk. Each chunk is one logical transaction.
    pub chunk_submit_size: usize,
    /// Results requested per buffered fetch.
    pub buffer_request_size: usize,
    /// Buffered fetches in flight at once.
    pub max_concurrent_buffers: usize,
    /// Backing store for the file adapters. The adapters themselves live
    /// outside this crate; the keys are recognized here so one file
    /// configures the whole deployment.
    pub file_storage_type: FileStorageType,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
    pub s3_service_url: String,
    pub s3_bucket_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FileStorageType {
    #[default]
    #[serde(rename = "FS")]
    Fs,
    S3,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5001".into(),
            max_parallel_channels: 4,
            chunk_submit_size: 500,
            buffer_request_size: 50,
            max_concurrent_buffers: 2,
            file_storage_type: FileStorageType::default(),
            s3_access_key_id: String::new(),
            s3_secret_access_key: String::new(),
            s3_service_url: String::new(),
            s3_bucket_name: String::new(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("gridlink")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GridConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::parse(&text, &path)?
        } else {
            GridConfig::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a TOML document. Unknown keys are ignored.
    pub fn parse(text: &str, path: &std::path::Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GRIDLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply GRIDLINK_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("GRIDLINK_ENDPOINT") {
            self.endpoint = v;
        }
        if let Ok(v) = std::env::var("GRIDLINK_MAX_PARALLEL_CHANNELS") {
            self.max_parallel_channels = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "max_parallel_channels",
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("GRIDLINK_CHUNK_SUBMIT_SIZE") {
            self.chunk_submit_size = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "chunk_submit_size",
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("GRIDLINK_FILE_STORAGE_TYPE") {
            self.file_storage_type = match v.as_str() {
                "FS" | "fs" => FileStorageType::Fs,
                "S3" | "s3" => FileStorageType::S3,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "file_storage_type",
                        value: v,
                    });
                }
            };
        }
        Ok(())
    }
}
