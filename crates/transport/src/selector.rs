//! Transport negotiation: try streaming, degrade to HTTP POST.

use crate::config::{ClientConfig, Endpoint};
use crate::error::{TransportError, TransportResult};
use crate::http_post::HttpPostTransport;
use crate::streaming::StreamingTransport;
use crate::subprocess::SubprocessTransport;
use crate::Transport;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Where the selector is in its lifecycle.
///
/// `Unselected → ProbingStreaming → {StreamingActive | FallbackActive} → Closed`,
/// or `Unselected → SubprocessActive → Closed` for command endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Unselected,
    ProbingStreaming,
    StreamingActive,
    FallbackActive,
    SubprocessActive,
    Closed,
}

impl fmt::Display for SelectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectorState::Unselected => "unselected",
            SelectorState::ProbingStreaming => "probing_streaming",
            SelectorState::StreamingActive => "streaming_active",
            SelectorState::FallbackActive => "fallback_active",
            SelectorState::SubprocessActive => "subprocess_active",
            SelectorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Chooses and owns the session for one bridge run.
pub struct TransportSelector {
    config: ClientConfig,
    state: SelectorState,
    active: Option<Arc<dyn Transport>>,
}

impl TransportSelector {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: SelectorState::Unselected,
            active: None,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    fn transition(&mut self, next: SelectorState) {
        debug!(from = %self.state, to = %next, "Transport state transition");
        self.state = next;
    }

    /// Open a session for `endpoint`.
    ///
    /// HTTP endpoints try streaming within `detect_timeout`; any
    /// failure there falls back to HTTP POST against the same URL. Command
    /// endpoints are spawned directly and a spawn failure is returned.
    pub async fn select(&mut self, endpoint: &Endpoint) -> TransportResult<Arc<dyn Transport>> {
        if self.state != SelectorState::Unselected {
            return Err(TransportError::Config(format!(
                "transport already selected (state: {})",
                self.state
            )));
        }

        let transport: Arc<dyn Transport> = match endpoint {
            Endpoint::Http(url) => self.negotiate(url).await?,
            Endpoint::Process { program, args } => {
                let mut transport = SubprocessTransport::new(program, args.clone(), &self.config);
                transport.connect().await?;
                info!(program = %program, "Using subprocess transport");
                self.transition(SelectorState::SubprocessActive);
                Arc::new(transport)
            }
        };

        self.active = Some(transport.clone());
        Ok(transport)
    }

    async fn negotiate(&mut self, url: &Url) -> TransportResult<Arc<dyn Transport>> {
        self.transition(SelectorState::ProbingStreaming);

        let mut streaming = StreamingTransport::new(url, &self.config)?;
        let attempt = tokio::time::timeout(self.config.detect_timeout, streaming.connect()).await;
        let reason = match attempt {
            Ok(Ok(())) => {
                info!(url = %streaming.url(), "Using streaming transport");
                self.transition(SelectorState::StreamingActive);
                return Ok(Arc::new(streaming));
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "streaming connect timed out after {}ms",
                self.config.detect_timeout.as_millis()
            ),
        };

        warn!(reason = %reason, "streaming unavailable, falling back to HTTP POST");
        let mut fallback = HttpPostTransport::new(url.clone(), &self.config);
        fallback.connect().await?;
        self.transition(SelectorState::FallbackActive);
        Ok(Arc::new(fallback))
    }

    /// Close the active session, if any. Idempotent.
    pub async fn close(&mut self) -> TransportResult<()> {
        if self.state == SelectorState::Closed {
            return Ok(());
        }
        let result = match self.active.take() {
            Some(transport) => transport.close().await,
            None => Ok(()),
        };
        self.transition(SelectorState::Closed);
        result
    }
}
