//! Bridge a stdio MCP client to a remote MCP server.
//!
//! The runtime reads newline-delimited JSON-RPC from the local client, sends
//! it over whichever transport the selector negotiated, and routes replies
//! back through the pending-request table.

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod stdio;

pub use config::{BridgeConfig, Cli, DebugFlags, LogFormat};
pub use error::{BridgeError, ConfigError};
pub use runtime::Bridge;
