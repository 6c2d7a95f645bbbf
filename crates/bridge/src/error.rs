//! Error types for the bridge runtime and its configuration.

use mcpbridge_core::CorrelationError;
use mcpbridge_transport::TransportError;
use std::path::PathBuf;

/// Startup configuration is unusable. Reported before any transport work.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no remote server configured (use --server or MCPBRIDGE_SERVER)")]
    MissingRemote,

    #[error("invalid remote server: {0}")]
    InvalidRemote(#[source] TransportError),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Reasons a bridge run ends abnormally.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("correlation failed: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("local endpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
