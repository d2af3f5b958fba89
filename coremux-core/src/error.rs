//! Error types for core management

use thiserror::Error;

use crate::types::CoreKind;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing proxy cores
#[derive(Debug, Error)]
pub enum Error {
    /// Start called while the core is already running
    #[error("{0} is already running")]
    AlreadyRunning(CoreKind),

    /// The engine process could not be spawned
    #[error("failed to launch {kind}: {msg}")]
    Launch { kind: CoreKind, msg: String },

    /// Statistics channel has not been established yet
    #[error("stats channel not connected")]
    StatsNotConnected,

    /// Statistics query failed
    #[error("stats query failed: {0}")]
    Stats(String),

    /// Configuration error (template or generated document)
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine rejected the configuration during validation
    #[error("config validation failed: {0}")]
    Validate(String),

    /// Timeout error
    #[error("timeout: {0}")]
    Timeout(String),

    /// Manager lookup miss for a core adapter
    #[error("core not registered: {0}")]
    CoreNotRegistered(CoreKind),

    /// Manager lookup miss for a config builder
    #[error("config builder not registered: {0}")]
    BuilderNotRegistered(CoreKind),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error means the statistics channel is unusable
    pub fn is_stats_error(&self) -> bool {
        matches!(self, Error::StatsNotConnected | Error::Stats(_))
    }
}
