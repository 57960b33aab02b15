//! # `Ferrobus` Core
//!
//! The client-side dispatch core for a message-bus binding: signal
//! subscription and method-call completion over a pluggable transport.
//!
//! This crate provides:
//! - **Subscription**: Match rules with wildcard and argument filters,
//!   indexed for dispatch, with panic-isolated handler invocation
//! - **Connection**: The dispatch surface tying subscriptions to a
//!   transport's inbound filter chain
//! - **Call**: Async (continuation-based) and blocking method calls
//!   with a strict reply-unwrapping contract
//! - **Message**: Typed messages with representation-controlled
//!   argument extraction
//!
//! ## Design Principles
//!
//! 1. **Handlers never run under locks** - dispatch clones leaf
//!    snapshots, then invokes
//! 2. **No handler can poison dispatch** - panics are caught and
//!    reported through an injected sink
//! 3. **Fail before the wire** - reserved targets, bad names, and
//!    signature mismatches are rejected before anything is sent
//! 4. **The transport is a trait** - no event loop, no serialization,
//!    no socket code in this crate
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferrobus_core::{handler_fn, Connection, MatchSpec, SubscribeOptions};
//!
//! let conn = Connection::new(transport);
//! let spec = MatchSpec::new()
//!     .with_interface("org.freedesktop.DBus.Properties")
//!     .with_member("PropertiesChanged");
//! let m = conn.subscribe(
//!     spec,
//!     handler_fn(|args, _ctx| println!("{args:?}")),
//!     SubscribeOptions::default(),
//! )?;
//!
//! // Later, from anywhere holding the match:
//! m.remove();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod call;
pub mod connection;
pub mod message;
pub mod names;
pub mod subscription;
pub mod transport;

// Re-export key types
pub use call::{CallError, CallOptions, ReplyValue, LOCAL_IFACE, LOCAL_PATH};
pub use connection::{Connection, ConnectionError, RemovalTarget};
pub use message::{Arg, ArgRepr, Message, MessageKind, Value};
pub use subscription::{
    handler_fn, ContextRequest, MatchSpec, SignalContext, SignalHandler, SignalMatch,
    SubscribeOptions,
};
pub use transport::{HandlerResult, PendingCall, Transport};

/// Result type for ferrobus-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ferrobus-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Name grammar violations
    #[error("Name error: {0}")]
    Name(#[from] names::InvalidNameError),

    /// Argument/signature mismatches
    #[error("Encoding error: {0}")]
    Encoding(#[from] message::EncodingError),

    /// Match-rule construction errors
    #[error("Match rule error: {0}")]
    MatchRule(#[from] subscription::MatchRuleError),

    /// Connection-level errors
    #[error("Connection error: {0}")]
    Connection(#[from] connection::ConnectionError),

    /// Method-call errors
    #[error("Call error: {0}")]
    Call(#[from] call::CallError),

    /// Transport failures
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),
}
