//! Error types shared by the bridge crates.

use crate::jsonrpc::Id;

/// A framed message could not be turned into an [`Envelope`](crate::Envelope).
///
/// Always recoverable: the offending message is dropped and logged.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed JSON-RPC message: {reason}")]
    Malformed { reason: String },

    #[error("missing jsonrpc version field")]
    MissingVersion,

    #[error("unsupported JSON-RPC version: {version}")]
    UnsupportedVersion { version: String },

    #[error("batch messages are not supported")]
    UnsupportedBatch,

    #[error("invalid id field")]
    InvalidId,

    #[error("response is missing a correlation id")]
    MissingId,

    #[error("message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge { max_bytes: usize },
}

impl ParseError {
    /// Short label for structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            ParseError::Malformed { .. } => "malformed",
            ParseError::MissingVersion => "missing_version",
            ParseError::UnsupportedVersion { .. } => "unsupported_version",
            ParseError::UnsupportedBatch => "unsupported_batch",
            ParseError::InvalidId => "invalid_id",
            ParseError::MissingId => "missing_id",
            ParseError::MessageTooLarge { .. } => "message_too_large",
        }
    }
}

/// Failures of the pending-request table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("request id is null or empty")]
    NilId,

    #[error("duplicate request id: {0}")]
    Duplicate(Id),

    #[error("no pending request for id: {0}")]
    UnknownId(Id),

    #[error("waiter for id {0} is gone")]
    WaiterGone(Id),

    #[error("timed out waiting for response to id: {0}")]
    Timeout(Id),

    #[error("pending-request table is closed")]
    Closed,
}

impl CorrelationError {
    /// Only `Closed` ends normal operation; it means shutdown is under way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CorrelationError::Closed)
    }
}
