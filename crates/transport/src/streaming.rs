//! Streaming transport: a persistent WebSocket channel to `<remote>/stream`.

use crate::config::ClientConfig;
use crate::error::{TransportError, TransportResult};
use crate::{Transport, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

const OUTGOING_CAPACITY: usize = 32;
const INCOMING_CAPACITY: usize = 128;

/// WebSocket session with the remote server.
pub struct StreamingTransport {
    url: Url,
    bearer: Option<String>,
    close_grace: Duration,
    outgoing: Mutex<Option<mpsc::Sender<Message>>>,
    incoming: tokio::sync::Mutex<Option<mpsc::Receiver<TransportResult<Bytes>>>>,
    closing: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamingTransport {
    /// Prepare a session for the remote at `base`. Nothing is dialled until
    /// [`Transport::connect`].
    pub fn new(base: &Url, config: &ClientConfig) -> TransportResult<Self> {
        Ok(Self {
            url: stream_url(base)?,
            bearer: config.bearer(),
            close_grace: config.close_grace,
            outgoing: Mutex::new(None),
            incoming: tokio::sync::Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The WebSocket URL this session dials.
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn outgoing(&self) -> MutexGuard<'_, Option<mpsc::Sender<Message>>> {
        self.outgoing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Map the remote base URL onto its streaming endpoint: `http` becomes `ws`,
/// `https` becomes `wss`, and `/stream` is appended to the path.
pub fn stream_url(base: &Url) -> TransportResult<Url> {
    let mut url = base.clone();

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Config(format!(
                "unsupported scheme for streaming: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Config("Failed to set WebSocket scheme".to_string()))?;

    let path = format!("{}/stream", url.path().trim_end_matches('/'));
    url.set_path(&path);

    Ok(url)
}

#[async_trait]
impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.outgoing().is_some() {
            return Ok(());
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        if let Some(ref bearer) = self.bearer {
            request.headers_mut().insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(bearer)
                    .map_err(|_| TransportError::Config("Invalid API key format".to_string()))?,
            );
        }

        debug!(url = %self.url, "Connecting to streaming endpoint");
        let (ws_stream, _) = connect_async(request).await.map_err(|e| match e {
            tungstenite::Error::Http(response) => TransportError::connect_failed(format!(
                "handshake rejected with HTTP {}",
                response.status()
            )),
            e => TransportError::connect_failed(e),
        })?;

        let (mut write, mut read) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(OUTGOING_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<TransportResult<Bytes>>(INCOMING_CAPACITY);

        // Outgoing frames; a dropped sender means a local close.
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = write.send(message).await {
                    error!(error = %e, "Failed to send WebSocket message");
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
            let _ = write.close().await;
        });

        // Incoming frames.
        let closing = self.closing.clone();
        let reader = tokio::spawn(async move {
            let lost = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if incoming_tx.send(Ok(Bytes::from(text))).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if incoming_tx.send(Ok(Bytes::from(data))).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(frame = ?frame, "WebSocket close frame received");
                        break "remote closed the stream".to_string();
                    }
                    // Pongs are queued by the library itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };

            if closing.load(Ordering::SeqCst) {
                debug!("WebSocket connection closed");
            } else {
                warn!(reason = %lost, "WebSocket connection lost");
                let _ = incoming_tx
                    .send(Err(TransportError::connection_lost(lost)))
                    .await;
            }
        });

        *self.outgoing() = Some(outgoing_tx);
        *self.incoming.get_mut() = Some(incoming_rx);
        self.tasks().extend([writer, reader]);

        info!(url = %self.url, "WebSocket connected");
        Ok(())
    }

    async fn read(&self) -> TransportResult<Option<Bytes>> {
        let mut incoming = self.incoming.lock().await;
        let receiver = incoming.as_mut().ok_or(TransportError::NotConnected)?;
        match receiver.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn write(&self, frame: &[u8]) -> TransportResult<()> {
        let sender = match self.outgoing().clone() {
            Some(sender) => sender,
            None if self.closing.load(Ordering::SeqCst) => {
                return Err(TransportError::WriteAfterClose)
            }
            None => return Err(TransportError::NotConnected),
        };

        let message = match std::str::from_utf8(frame) {
            Ok(text) => Message::Text(text.to_string()),
            Err(_) => Message::Binary(frame.to_vec()),
        };

        sender
            .send(message)
            .await
            .map_err(|_| TransportError::connection_lost("WebSocket writer has stopped"))
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Dropping the sender lets the writer flush and send a close frame.
        self.outgoing().take();

        let tasks: Vec<JoinHandle<()>> = self.tasks().drain(..).collect();
        let mut tasks = tasks.into_iter();
        if let Some(writer) = tasks.next() {
            if tokio::time::timeout(self.close_grace, writer).await.is_err() {
                warn!("WebSocket writer did not finish in time");
            }
        }
        for task in tasks {
            task.abort();
        }

        debug!(url = %self.url, "Streaming transport closed");
        Ok(())
    }
}

impl Drop for StreamingTransport {
    fn drop(&mut self) {
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}
