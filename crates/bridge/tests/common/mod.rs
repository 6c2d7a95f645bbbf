#![allow(dead_code)]

use mcpbridge::{Bridge, BridgeConfig, BridgeError};
use mcpbridge_core::EnvelopeHooks;
use mcpbridge_transport::Endpoint;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A bridge wired to in-memory pipes standing in for stdin/stdout.
pub struct Harness {
    input: Option<DuplexStream>,
    output: Lines<BufReader<DuplexStream>>,
    pub shutdown: CancellationToken,
    handle: JoinHandle<Result<(), BridgeError>>,
}

pub fn config(server: &str, args: &[&str]) -> BridgeConfig {
    let endpoint =
        Endpoint::parse(server, args.iter().map(|s| s.to_string()).collect()).unwrap();
    let mut config = BridgeConfig::new(endpoint);
    config.detect_timeout = Duration::from_secs(2);
    config.request_timeout = Duration::from_secs(5);
    config.shutdown_grace = Duration::from_secs(1);
    config
}

impl Harness {
    pub fn start(config: BridgeConfig) -> Self {
        Self::start_bridge(Bridge::new(config))
    }

    pub fn start_with_hooks(config: BridgeConfig, hooks: Arc<dyn EnvelopeHooks>) -> Self {
        Self::start_bridge(Bridge::new(config).with_hooks(hooks))
    }

    fn start_bridge(bridge: Bridge) -> Self {
        let (client_in, bridge_in) = tokio::io::duplex(64 * 1024);
        let (bridge_out, client_out) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(bridge.run_with(bridge_in, bridge_out, shutdown.clone()));

        Self {
            input: Some(client_in),
            output: BufReader::new(client_out).lines(),
            shutdown,
            handle,
        }
    }

    pub async fn send(&mut self, line: &str) {
        let input = self.input.as_mut().expect("input already closed");
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"\n").await.unwrap();
        input.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.output.next_line())
            .await
            .expect("timed out waiting for bridge output")
            .unwrap()
            .expect("bridge output closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Collect `n` lines in arrival order.
    pub async fn recv_n(&mut self, n: usize) -> Vec<Value> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.recv().await);
        }
        out
    }

    /// Close stdin and wait for the run to end.
    pub async fn finish(mut self) -> Result<(), BridgeError> {
        self.input.take();
        self.join().await
    }

    pub async fn join(self) -> Result<(), BridgeError> {
        tokio::time::timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("bridge did not stop")
            .unwrap()
    }
}

/// Find the message with the given `id` among `messages`.
pub fn by_id<'a>(messages: &'a [Value], id: &Value) -> &'a Value {
    messages
        .iter()
        .find(|m| &m["id"] == id)
        .unwrap_or_else(|| panic!("no message with id {id} in {messages:?}"))
}
