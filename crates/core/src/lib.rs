//! Core message model for the MCP bridge: JSON-RPC envelopes, the
//! pending-request table and the error types shared across crates.

pub mod error;
pub mod frame;
pub mod hooks;
pub mod jsonrpc;
pub mod pending;

pub use error::{CorrelationError, ParseError};
pub use frame::Frame;
pub use hooks::{EnvelopeHooks, NoopHooks};
pub use jsonrpc::{
    codes, Envelope, EnvelopeKind, ErrorObject, ErrorResponse, Id, Notification, Request,
    Response, JSONRPC_VERSION, MAX_MESSAGE_BYTES,
};
pub use pending::{PendingTable, Waiter};
