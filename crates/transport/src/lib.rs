//! Transports that carry JSON-RPC frames between the bridge and its remote.
//!
//! Three sessions implement [`Transport`]:
//!
//! - [`StreamingTransport`]: a persistent WebSocket at `<remote>/stream`
//! - [`HttpPostTransport`]: one HTTP POST per outbound frame
//! - [`SubprocessTransport`]: a locally spawned child speaking NDJSON on its pipes
//!
//! [`TransportSelector`] picks one at startup, trying streaming first
//! and falling back to HTTP POST when that attempt fails.

pub mod config;
pub mod error;
pub mod framing;
pub mod http_post;
pub mod selector;
pub mod sse;
pub mod streaming;
pub mod subprocess;

pub use config::{ClientConfig, Endpoint};
pub use error::{TransportError, TransportResult};
pub use framing::LineReader;
pub use http_post::HttpPostTransport;
pub use selector::{SelectorState, TransportSelector};
pub use streaming::StreamingTransport;
pub use subprocess::SubprocessTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Which transport variant a session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Streaming,
    HttpPost,
    Subprocess,
}

impl TransportKind {
    /// Short name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Streaming => "streaming",
            TransportKind::HttpPost => "http_post",
            TransportKind::Subprocess => "subprocess",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bidirectional, frame-oriented session with a remote endpoint.
///
/// `connect` runs once before the session is shared. After that, one flow of
/// control reads while others write, so `read`, `write` and `close` take
/// `&self` and implementations synchronise internally.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the session.
    async fn connect(&mut self) -> TransportResult<()>;

    /// Next inbound frame, or `None` once the remote side has ended.
    async fn read(&self) -> TransportResult<Option<Bytes>>;

    /// Send one outbound frame.
    async fn write(&self, frame: &[u8]) -> TransportResult<()>;

    /// Release the underlying connection or process. Idempotent.
    async fn close(&self) -> TransportResult<()>;
}
