//! HTTP POST transport: one request per outbound frame.
//!
//! `write` performs the whole round trip and queues whatever should reach the
//! local side (the reply body, or a synthesized error) for `read` to return.
//! Single-message failures never fail the session.

use crate::config::ClientConfig;
use crate::error::{TransportError, TransportResult};
use crate::sse;
use crate::{Transport, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use mcpbridge_core::{Envelope, Id};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

const ACCEPT: &str = "application/json, text/event-stream";

/// Fallback session speaking plain HTTP POST.
pub struct HttpPostTransport {
    endpoint: Url,
    config: ClientConfig,
    client: Option<Client>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

/// What the local side is owed if a POST fails.
enum Expectation {
    /// A request: answer with an error carrying its ID.
    Reply(Id),
    /// A notification or a reply of our own: log only.
    Nothing,
}

impl HttpPostTransport {
    pub fn new(endpoint: Url, config: &ClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            config: config.clone(),
            client: None,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn inbound_tx(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Bytes>>> {
        self.inbound_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_client(&self) -> TransportResult<Client> {
        let mut headers = header::HeaderMap::new();

        if let Some(bearer) = self.config.bearer() {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&bearer)
                    .map_err(|_| TransportError::Config("Invalid API key format".to_string()))?,
            );
        }
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT));

        Ok(Client::builder()
            .timeout(self.config.timeout)
            .default_headers(headers)
            .build()?)
    }

    /// POST one frame and return the frames it produced.
    async fn exchange(&self, client: &Client, frame: &[u8]) -> TransportResult<Vec<Bytes>> {
        let response = client
            .post(self.endpoint.clone())
            .body(frame.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::RemoteNon2xx {
                status: status.as_u16(),
                body,
            });
        }

        let event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(sse::is_event_stream)
            .unwrap_or(false);
        let body = response.bytes().await?;

        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if body.trim_ascii().is_empty() {
            return Ok(Vec::new());
        }
        if event_stream {
            let text = String::from_utf8_lossy(&body);
            return Ok(sse::decode_events(&text)
                .into_iter()
                .filter(|event| !event.trim().is_empty())
                .map(Bytes::from)
                .collect());
        }
        Ok(vec![body])
    }

    fn enqueue(&self, frame: Bytes) -> TransportResult<()> {
        let guard = self.inbound_tx();
        let tx = guard.as_ref().ok_or(TransportError::WriteAfterClose)?;
        tx.send(frame).map_err(|_| TransportError::WriteAfterClose)
    }

    /// Queue the `-32603` error the local side receives in place of a reply.
    fn enqueue_internal_error(&self, id: Id, message: String) -> TransportResult<()> {
        let reply = Envelope::internal_error(id, message)
            .to_vec()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        self.enqueue(Bytes::from(reply))
    }
}

/// Whether `frame` is a reply carrying `id`.
fn answers(frame: &[u8], id: &Id) -> bool {
    Envelope::parse(frame).is_ok_and(|envelope| envelope.is_reply() && envelope.id() == Some(id))
}

fn expectation(value: &Value) -> Expectation {
    let is_request = value
        .get("method")
        .and_then(Value::as_str)
        .is_some_and(|m| !m.is_empty());
    match value.get("id").map(Id::from_value) {
        Some(Ok(id)) if is_request => Expectation::Reply(id),
        _ => Expectation::Nothing,
    }
}

#[async_trait]
impl Transport for HttpPostTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::HttpPost
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.client.is_none() {
            self.client = Some(self.build_client()?);
            debug!(url = %self.endpoint, "HTTP POST transport ready");
        }
        Ok(())
    }

    async fn read(&self) -> TransportResult<Option<Bytes>> {
        Ok(self.inbound_rx.lock().await.recv().await)
    }

    async fn write(&self, frame: &[u8]) -> TransportResult<()> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        if self.inbound_tx().is_none() {
            return Err(TransportError::WriteAfterClose);
        }

        let value: Value = match serde_json::from_slice(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping invalid JSON instead of posting it");
                return Ok(());
            }
        };
        let expectation = expectation(&value);

        debug!(url = %self.endpoint, bytes = frame.len(), "POST request");
        match self.exchange(client, frame).await {
            Ok(frames) => {
                let unanswered = match &expectation {
                    Expectation::Reply(id) if !id.is_nil() => {
                        !frames.iter().any(|frame| answers(frame, id))
                    }
                    _ => false,
                };
                for frame in frames {
                    self.enqueue(frame)?;
                }
                if let (true, Expectation::Reply(id)) = (unanswered, expectation) {
                    warn!(id = %id, url = %self.endpoint, "Remote response carried no reply");
                    self.enqueue_internal_error(
                        id,
                        "remote response did not answer the request".to_string(),
                    )?;
                }
            }
            Err(e) => {
                warn!(error = %e, url = %self.endpoint, "POST failed");
                if let Expectation::Reply(id) = expectation {
                    self.enqueue_internal_error(id, e.to_string())?;
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if self.inbound_tx().take().is_some() {
            debug!(url = %self.endpoint, "HTTP POST transport closed");
        }
        Ok(())
    }
}
