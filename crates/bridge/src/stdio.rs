//! The local endpoint's output side.

use crate::error::BridgeError;
use crate::logging::CLIENT_TARGET;
use mcpbridge_core::frame::single_line;
use mcpbridge_core::Frame;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Shared NDJSON writer for the local client.
///
/// Responders and the inbound pump write concurrently; the lock keeps each
/// message on its own line.
#[derive(Clone)]
pub struct LocalWriter {
    inner: Arc<Mutex<Pin<Box<dyn AsyncWrite + Send>>>>,
}

impl LocalWriter {
    /// Create a new writer over `writer`.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::pin(writer))),
        }
    }

    /// Write one frame as a line and flush it. Unmodified frames go out as
    /// the bytes they arrived as.
    pub async fn send(&self, frame: &Frame) -> Result<(), BridgeError> {
        let line = frame.to_line()?;
        self.write_line(&line).await?;
        debug!(
            target: CLIENT_TARGET,
            kind = frame.kind().as_str(),
            "← {}",
            String::from_utf8_lossy(&line).trim_end()
        );
        Ok(())
    }

    /// Pass through JSON the envelope model could not classify.
    pub async fn send_unclassified(&self, json: &[u8]) -> Result<(), BridgeError> {
        let mut line = single_line(json);
        line.push(b'\n');
        self.write_line(&line).await?;
        debug!(
            target: CLIENT_TARGET,
            "← {}",
            String::from_utf8_lossy(&line).trim_end()
        );
        Ok(())
    }

    async fn write_line(&self, line: &[u8]) -> std::io::Result<()> {
        let mut out = self.inner.lock().await;
        out.write_all(line).await?;
        out.flush().await
    }
}
