//! Configuration types for transport sessions.

use crate::error::{TransportError, TransportResult};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Settings shared by every transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bearer credential attached to remote calls.
    pub api_key: Option<String>,
    /// Per-call timeout for HTTP POST.
    pub timeout: Duration,
    /// Upper bound on the streaming connection attempt.
    pub detect_timeout: Duration,
    /// How long `close` waits for a graceful teardown before forcing it.
    pub close_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            timeout: Duration::from_secs(60),
            detect_timeout: Duration::from_secs(5),
            close_grace: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// `Authorization` header value, if a credential is configured.
    pub(crate) fn bearer(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| format!("Bearer {key}"))
    }
}

/// Where the bridge sends its traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A remote server reachable over HTTP(S).
    Http(Url),
    /// A local command spawned as a child process.
    Process { program: String, args: Vec<String> },
}

impl Endpoint {
    /// Interpret a `--server` value. `http`/`https` URLs are remote servers;
    /// anything else is a command to spawn with `args`.
    pub fn parse(server: &str, args: Vec<String>) -> TransportResult<Self> {
        let server = server.trim();
        if server.is_empty() {
            return Err(TransportError::Config("server endpoint is empty".to_string()));
        }

        match Url::parse(server) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if !args.is_empty() {
                    return Err(TransportError::Config(
                        "command arguments require a command endpoint, not a URL".to_string(),
                    ));
                }
                Ok(Endpoint::Http(url))
            }
            _ => Ok(Endpoint::Process {
                program: server.to_string(),
                args,
            }),
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Endpoint::Http(_))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Http(url) => write!(f, "{url}"),
            Endpoint::Process { program, args } if args.is_empty() => write!(f, "{program}"),
            Endpoint::Process { program, args } => write!(f, "{program} {}", args.join(" ")),
        }
    }
}
