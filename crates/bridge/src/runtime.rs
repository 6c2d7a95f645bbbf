//! The bridge runtime: reads the local client, forwards to the remote and
//! routes replies back by correlation ID.

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::logging::{CLIENT_TARGET, SERVER_TARGET};
use crate::stdio::LocalWriter;
use bytes::Bytes;
use mcpbridge_core::{
    CorrelationError, Envelope, EnvelopeHooks, ErrorObject, Frame, NoopHooks, PendingTable,
    Waiter, MAX_MESSAGE_BYTES,
};
use mcpbridge_transport::{LineReader, Transport, TransportSelector};
use serde_json::value::RawValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::codec::AnyDelimiterCodecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One bridge run. Built from a frozen [`BridgeConfig`].
pub struct Bridge {
    config: BridgeConfig,
    hooks: Arc<dyn EnvelopeHooks>,
}

/// Shared pieces every flow of control needs.
#[derive(Clone)]
struct Session {
    transport: Arc<dyn Transport>,
    table: PendingTable,
    writer: LocalWriter,
    hooks: Arc<dyn EnvelopeHooks>,
}

/// Why the local read loop stopped.
enum Stop {
    LocalEof,
    RemoteEnded,
    Cancelled,
}

impl Bridge {
    /// Create a new bridge with pass-through hooks.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Install hooks that see every envelope crossing the bridge.
    pub fn with_hooks(mut self, hooks: Arc<dyn EnvelopeHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Serve the process's own stdin/stdout until EOF, a fatal transport
    /// error, or `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout(), shutdown)
            .await
    }

    /// Serve an arbitrary local endpoint.
    pub async fn run_with<R, W>(
        self,
        input: R,
        output: W,
        shutdown: CancellationToken,
    ) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Send + 'static,
    {
        info!(endpoint = %self.config.endpoint, "Starting MCP bridge");

        let mut selector = TransportSelector::new(self.config.client_config());
        let transport = selector.select(&self.config.endpoint).await?;

        let session = Session {
            transport,
            table: PendingTable::new(),
            writer: LocalWriter::new(output),
            hooks: self.hooks.clone(),
        };

        let mut responders = JoinSet::new();
        let mut inbound = tokio::spawn(pump_inbound(session.clone()));
        let mut lines = LineReader::new(input, MAX_MESSAGE_BYTES);

        let outcome: Result<Stop, BridgeError> = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break Ok(Stop::Cancelled),

                result = &mut inbound => {
                    break match result {
                        Ok(Ok(())) => Ok(Stop::RemoteEnded),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(BridgeError::Io(std::io::Error::other(e))),
                    };
                }

                line = lines.next_line() => match line {
                    Ok(None) => break Ok(Stop::LocalEof),
                    Ok(Some(line)) => {
                        let dispatched = self
                            .dispatch(&session, &mut responders, line, &shutdown)
                            .await;
                        if let Err(e) = dispatched {
                            break Err(e);
                        }
                    }
                    Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                        warn!(
                            target: CLIENT_TARGET,
                            max_bytes = MAX_MESSAGE_BYTES,
                            "Dropping oversized line from client"
                        );
                    }
                    Err(AnyDelimiterCodecError::Io(e)) => break Err(e.into()),
                },
            }

            // Reap finished responders so the set does not grow unbounded.
            while responders.try_join_next().is_some() {}
        };

        match &outcome {
            Ok(Stop::LocalEof) => {
                info!(
                    in_flight = session.table.pending_count(),
                    "Local input closed, draining"
                );
                let drain = async { while responders.join_next().await.is_some() {} };
                if tokio::time::timeout(self.config.shutdown_grace, drain)
                    .await
                    .is_err()
                {
                    warn!(
                        in_flight = session.table.pending_count(),
                        "Shutdown grace elapsed with requests still pending"
                    );
                }
            }
            Ok(Stop::RemoteEnded) => info!("Remote ended the session"),
            Ok(Stop::Cancelled) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Bridge stopping on fatal error"),
        }

        // Transport first, then the table, so waiters fail with Closed.
        if let Err(e) = selector.close().await {
            warn!(error = %e, "Error closing transport");
        }
        session.table.close();
        while responders.join_next().await.is_some() {}
        inbound.abort();

        info!("MCP bridge stopped");
        outcome.map(|_| ())
    }

    /// Handle one line from the local client.
    ///
    /// Forwarding gives way to `shutdown`; a request interrupted that way is
    /// still answered once the table closes.
    async fn dispatch(
        &self,
        session: &Session,
        responders: &mut JoinSet<()>,
        line: Bytes,
        shutdown: &CancellationToken,
    ) -> Result<(), BridgeError> {
        if line.trim_ascii().is_empty() {
            return Ok(());
        }

        let mut frame = match Frame::parse(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    target: CLIENT_TARGET,
                    error = %e,
                    reason = e.label(),
                    "Dropping invalid message from client"
                );
                return Ok(());
            }
        };
        debug!(
            target: CLIENT_TARGET,
            kind = frame.kind().as_str(),
            "→ {}",
            String::from_utf8_lossy(&line).trim_end()
        );

        session.hooks.on_outbound(&mut frame);

        let waiter = match frame.envelope() {
            Envelope::Request(request) if !request.id.is_nil() => {
                match session.table.register(&request.id) {
                    Ok(waiter) => Some(waiter),
                    Err(CorrelationError::Duplicate(id)) => {
                        warn!(target: CLIENT_TARGET, id = %id, "Duplicate in-flight request id");
                        let reply = Envelope::error(
                            id,
                            ErrorObject::invalid_request("duplicate in-flight request id"),
                        );
                        session.writer.send(&Frame::from(reply)).await?;
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ => None,
        };

        let bytes = frame.to_vec()?;
        debug!(target: SERVER_TARGET, "→ {}", String::from_utf8_lossy(&bytes));
        tokio::select! {
            result = session.transport.write(&bytes) => result?,
            _ = shutdown.cancelled() => {
                debug!(target: SERVER_TARGET, "Forwarding interrupted by shutdown");
            }
        }

        if let Some(waiter) = waiter {
            responders.spawn(respond(
                waiter,
                self.config.request_timeout,
                session.writer.clone(),
            ));
        }
        Ok(())
    }
}

/// Await one reply and hand it to the local client, synthesizing an error
/// when none arrives.
async fn respond(waiter: Waiter, timeout: Duration, writer: LocalWriter) {
    let id = waiter.id().clone();
    let reply = match waiter.wait(timeout).await {
        Ok(reply) => reply,
        Err(CorrelationError::Timeout(id)) => {
            warn!(id = %id, timeout_secs = timeout.as_secs(), "Request timed out");
            let message = "request timed out waiting for the remote server";
            Envelope::internal_error(id, message).into()
        }
        Err(e) => {
            debug!(id = %id, error = %e, "Request abandoned");
            Envelope::internal_error(id, format!("request aborted: {e}")).into()
        }
    };

    if let Err(e) = writer.send(&reply).await {
        warn!(error = %e, "Failed to write reply to client");
    }
}

/// Read frames from the remote until it ends, delivering replies to their
/// waiters and passing everything else straight to the client.
///
/// Frames that are valid JSON but not a classifiable envelope are passed
/// through unmodified; anything that is not JSON is dropped.
async fn pump_inbound(session: Session) -> Result<(), BridgeError> {
    while let Some(bytes) = session.transport.read().await? {
        if bytes.trim_ascii().is_empty() {
            continue;
        }

        let mut frame = match Frame::parse(&bytes) {
            Ok(frame) => frame,
            Err(e) if serde_json::from_slice::<&RawValue>(&bytes).is_ok() => {
                warn!(
                    target: SERVER_TARGET,
                    error = %e,
                    reason = e.label(),
                    "Passing through message the bridge cannot classify"
                );
                session.writer.send_unclassified(&bytes).await?;
                continue;
            }
            Err(e) => {
                warn!(
                    target: SERVER_TARGET,
                    error = %e,
                    reason = e.label(),
                    "Dropping invalid message from remote"
                );
                continue;
            }
        };
        debug!(
            target: SERVER_TARGET,
            kind = frame.kind().as_str(),
            "← {}",
            String::from_utf8_lossy(&bytes).trim_end()
        );

        session.hooks.on_inbound(&mut frame);

        let envelope = frame.envelope();
        let correlated = envelope.is_reply() && envelope.id().is_some_and(|id| !id.is_nil());
        if !correlated {
            session.writer.send(&frame).await?;
            continue;
        }

        match session.table.deliver(frame) {
            Ok(()) => {}
            Err(CorrelationError::Closed) => return Ok(()),
            Err(e) => warn!(target: SERVER_TARGET, error = %e, "Reply could not be delivered"),
        }
    }
    Ok(())
}
