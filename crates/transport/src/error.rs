//! Error types for the transport layer.

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures raised by a transport session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session could not be established. While streaming is being tried this
    /// triggers the HTTP POST fallback; anywhere else it ends the run.
    #[error("connect failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("write after close")]
    WriteAfterClose,

    #[error("remote returned HTTP {status}")]
    RemoteNon2xx { status: u16, body: String },

    #[error("child process exited with {}", exit_code_label(*code))]
    ProcessExitNonZero { code: Option<i32> },

    /// An established session dropped without being closed locally.
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn exit_code_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl TransportError {
    pub(crate) fn connect_failed(reason: impl ToString) -> Self {
        Self::ConnectFailed {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn connection_lost(reason: impl ToString) -> Self {
        Self::ConnectionLost {
            reason: reason.to_string(),
        }
    }
}
