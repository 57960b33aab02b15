//! Call completion — async continuation and synchronous blocking, over
//! the same request machinery.
//!
//! Both protocols build the same method-call message (validated names,
//! signature-checked arguments) and differ only in how the reply comes
//! back: [`Connection::call_async`] wraps the caller's callbacks into
//! one continuation registered with the transport's reply correlation,
//! while [`Connection::call_blocking`] parks the calling thread on the
//! transport until a reply, error, or timeout.
//!
//! Anything detectable before touching the transport — reserved
//! targets, malformed names, arguments that do not fit the signature —
//! fails fast and synchronously; nothing is ever sent for a
//! partially-built request.

use std::time::Duration;

use crate::connection::Connection;
use crate::message::{Arg, ArgRepr, EncodingError, Message, MessageKind, Value};
use crate::names::InvalidNameError;
use crate::transport::{PendingCall, ReplyContinuation, TransportError};

/// The loop-back introspection path; method calls may not target it.
pub const LOCAL_PATH: &str = "/org/freedesktop/DBus/Local";

/// The loop-back interface; method calls may not target it.
pub const LOCAL_IFACE: &str = "org.freedesktop.DBus.Local";

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

/// Errors from method-call construction, transport, and completion.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The call targeted the reserved loop-back path.
    #[error("methods may not be called on the reserved path {0:?}")]
    ReservedPath(String),
    /// The call targeted the reserved loop-back interface.
    #[error("methods may not be called on the reserved interface {0:?}")]
    ReservedInterface(String),
    /// A routing field failed its naming grammar.
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
    /// The arguments did not fit the declared signature.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The remote party replied with an error.
    #[error("remote error {}: {message}", .name.as_deref().unwrap_or("(unnamed)"))]
    Remote {
        /// The remote error's name, when the reply carried one.
        name: Option<String>,
        /// The remote error's first argument, when it was a string.
        message: String,
    },
    /// The reply had a shape neither the success nor the error path
    /// understands.
    #[error("unexpected reply kind: {0}")]
    UnexpectedReply(String),
    /// The blocking call's timeout elapsed.
    #[error("call timed out before a reply arrived")]
    Timeout,
    /// The transport is gone.
    #[error("transport disconnected")]
    Disconnected,
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => CallError::Timeout,
            TransportError::Disconnected => CallError::Disconnected,
        }
    }
}

// ---------------------------------------------------------------------------
// ReplyValue / callbacks / options
// ---------------------------------------------------------------------------

/// A blocking call's unwrapped result. The three-way arity rule is a
/// strict contract: zero reply arguments yield [`ReplyValue::None`],
/// exactly one yields it unwrapped, two or more yield the ordered tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue {
    /// The reply carried no arguments.
    None,
    /// The reply carried exactly one argument.
    Single(Value),
    /// The reply carried two or more arguments, in reply order.
    Tuple(Vec<Value>),
}

/// Callback receiving a successful reply's extracted arguments.
pub type ReplyCallback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

/// Callback receiving a call's failure.
pub type ErrorCallback = Box<dyn FnOnce(CallError) + Send + 'static>;

/// Options shared by both call protocols.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Reply timeout, forwarded to the transport unchanged (`None` =
    /// transport default).
    pub timeout: Option<Duration>,
    /// Representation for extracted reply arguments.
    pub repr: ArgRepr,
}

// ---------------------------------------------------------------------------
// Request construction (shared)
// ---------------------------------------------------------------------------

fn build_call(
    destination: Option<&str>,
    path: &str,
    interface: Option<&str>,
    method: &str,
    signature: &str,
    args: Vec<Arg>,
) -> Result<Message, CallError> {
    if path == LOCAL_PATH {
        return Err(CallError::ReservedPath(path.to_string()));
    }
    if interface == Some(LOCAL_IFACE) {
        return Err(CallError::ReservedInterface(LOCAL_IFACE.to_string()));
    }
    let mut message = Message::method_call(destination, path, interface, method)?;
    if let Err(err) = message.append_args(signature, args) {
        tracing::error!(
            method,
            signature,
            detail = %err.detail,
            "unable to encode call arguments"
        );
        return Err(err.into());
    }
    Ok(message)
}

fn remote_error(reply: &Message) -> CallError {
    // Error messages carry their description as a plain string first
    // argument, when they carry anything at all.
    let message = reply
        .args_as(ArgRepr::default())
        .into_iter()
        .next()
        .and_then(|v| v.as_text().map(str::to_string))
        .unwrap_or_default();
    CallError::Remote {
        name: reply.error_name().map(str::to_string),
        message,
    }
}

// ---------------------------------------------------------------------------
// Connection call surface
// ---------------------------------------------------------------------------

impl Connection {
    /// Calls the given method asynchronously.
    ///
    /// Completion policy, selected by which callbacks are supplied:
    ///
    /// - both `None`: the request is fired in no-reply mode and there is
    ///   nothing to correlate — returns `Ok(None)`;
    /// - one `None`: a no-op stands in for the missing callback so the
    ///   other still fires;
    /// - otherwise both are wrapped into one continuation registered
    ///   with the transport's reply correlation; it runs later on a
    ///   transport thread, not the caller's.
    ///
    /// # Errors
    ///
    /// Fails before any send on reserved targets, malformed names, or
    /// arguments that do not fit the signature; transport send failures
    /// pass through.
    #[allow(clippy::too_many_arguments)]
    pub fn call_async(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: Option<&str>,
        method: &str,
        signature: &str,
        args: Vec<Arg>,
        on_reply: Option<ReplyCallback>,
        on_error: Option<ErrorCallback>,
        options: CallOptions,
    ) -> Result<Option<PendingCall>, CallError> {
        let mut message = build_call(destination, path, interface, method, signature, args)?;

        if on_reply.is_none() && on_error.is_none() {
            // Nobody cares what happens; just fire it.
            message.set_no_reply(true);
            self.inner.transport.send(message)?;
            return Ok(None);
        }

        let on_reply = on_reply.unwrap_or_else(|| Box::new(|_| {}));
        let on_error = on_error.unwrap_or_else(|| Box::new(|_| {}));
        let repr = options.repr;
        let continuation: ReplyContinuation = Box::new(move |reply| match reply.kind() {
            MessageKind::MethodReturn => on_reply(reply.args_as(repr)),
            MessageKind::Error => on_error(remote_error(&reply)),
            other => on_error(CallError::UnexpectedReply(format!("{other:?}"))),
        });

        let pending = self
            .inner
            .transport
            .send_with_reply(message, continuation, options.timeout)?;
        Ok(Some(pending))
    }

    /// Calls the given method and blocks until its reply, error reply,
    /// or timeout.
    ///
    /// # Errors
    ///
    /// Fails before any send on reserved targets, malformed names, or
    /// arguments that do not fit the signature. After the send:
    /// [`CallError::Remote`] for an error reply, [`CallError::Timeout`]
    /// on expiry (distinct from any remote error), and
    /// [`CallError::UnexpectedReply`] for anything else that is not a
    /// method return.
    #[allow(clippy::too_many_arguments)]
    pub fn call_blocking(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: Option<&str>,
        method: &str,
        signature: &str,
        args: Vec<Arg>,
        options: CallOptions,
    ) -> Result<ReplyValue, CallError> {
        let message = build_call(destination, path, interface, method, signature, args)?;
        let reply = self
            .inner
            .transport
            .send_with_reply_blocking(message, options.timeout)?;
        match reply.kind() {
            MessageKind::Error => Err(remote_error(&reply)),
            MessageKind::MethodReturn => {
                let mut values = reply.args_as(options.repr);
                Ok(match values.len() {
                    0 => ReplyValue::None,
                    1 => ReplyValue::Single(values.remove(0)),
                    _ => ReplyValue::Tuple(values),
                })
            }
            other => Err(CallError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
