//! Tracing setup. Logs go to stderr; stdout carries the protocol.

use crate::config::{DebugFlags, LogFormat};
use tracing_subscriber::EnvFilter;

/// Target for traffic on the local (stdio) side.
pub const CLIENT_TARGET: &str = "mcpbridge::client";
/// Target for traffic on the remote side and child stderr.
pub const SERVER_TARGET: &str = "mcpbridge::server";

const DEFAULT_FILTER: &str = "mcpbridge=info";

/// Filter directives for the given debug flags.
pub fn filter_directives(debug: &DebugFlags) -> String {
    let mut directives = vec![if debug.all {
        "mcpbridge=debug"
    } else {
        DEFAULT_FILTER
    }];
    if debug.client {
        directives.push("mcpbridge::client=debug");
    }
    if debug.server {
        directives.push("mcpbridge::server=debug");
    }
    directives.join(",")
}

/// `RUST_LOG` applies only when no debug flag is set.
pub fn env_filter(debug: &DebugFlags) -> EnvFilter {
    if debug.any() {
        return EnvFilter::new(filter_directives(debug));
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
pub fn init(debug: &DebugFlags, format: LogFormat) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}
