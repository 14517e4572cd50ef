//! Error types for the fallible edges of the crate: configuration loading,
//! worker startup, and controller construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid bitrate config: {0}")]
    InvalidBitrate(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0:?} already started")]
    AlreadyStarted(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("start bitrate must be positive, got {0} bps")]
    InvalidBitrate(i32),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
