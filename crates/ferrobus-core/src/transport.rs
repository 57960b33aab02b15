//! Transport collaborator interface.
//!
//! The dispatch core does not serialize bytes or run an event loop; it
//! consumes a narrow [`Transport`] trait offering exactly three send
//! modes (fire-and-forget, reply-callback, reply-blocking), a filter
//! hook through which every inbound message is delivered, and a flag
//! saying whether a message pump is configured at all.
//!
//! The reply-callback continuation runs later on whatever thread the
//! transport delivers replies from; nothing here may assume it is the
//! caller's thread.

use std::time::Duration;

use crate::message::Message;

// ---------------------------------------------------------------------------
// HandlerResult
// ---------------------------------------------------------------------------

/// Outcome of an inbound filter, as reported back to the transport.
///
/// Signal dispatch never consumes a message for other filters, so the
/// connection's filter always reports [`HandlerResult::NotYetHandled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// The message was consumed; later filters should not see it.
    Handled,
    /// The message was not consumed; keep offering it to other filters.
    NotYetHandled,
}

// ---------------------------------------------------------------------------
// PendingCall
// ---------------------------------------------------------------------------

/// Opaque correlation handle for an in-flight reply-callback call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    serial: u64,
}

impl PendingCall {
    /// Creates a handle for the given serial. Transports assign serials.
    #[must_use]
    pub fn new(serial: u64) -> Self {
        Self { serial }
    }

    /// The transport-assigned serial.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Failures surfaced by the transport itself (never remote errors —
/// an error reply arrives as an ordinary [`Message`] of error kind).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// A blocking call's timeout elapsed before any reply arrived.
    #[error("call timed out before a reply arrived")]
    Timeout,
    /// The connection to the peer is gone.
    #[error("transport disconnected")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Continuation invoked with the reply (or error reply) to a
/// reply-callback call.
pub type ReplyContinuation = Box<dyn FnOnce(Message) + Send + 'static>;

/// Filter receiving every inbound message.
pub type InboundFilter = Box<dyn Fn(&Message) -> HandlerResult + Send + Sync + 'static>;

/// The wire/protocol collaborator consumed by the dispatch core.
///
/// Timeouts are forwarded unchanged; `None` means the transport's own
/// default.
pub trait Transport: Send + Sync {
    /// Sends a message, expecting nothing back.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the peer is gone.
    fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Sends a message and registers `continuation` against the reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the peer is gone.
    fn send_with_reply(
        &self,
        message: Message,
        continuation: ReplyContinuation,
        timeout: Option<Duration>,
    ) -> Result<PendingCall, TransportError>;

    /// Sends a message and blocks until the reply arrives or `timeout`
    /// elapses. The returned message may be of error kind; interpreting
    /// it is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] on expiry or
    /// [`TransportError::Disconnected`] if the peer is gone.
    fn send_with_reply_blocking(
        &self,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<Message, TransportError>;

    /// Registers a filter to receive every inbound message.
    fn install_filter(&self, filter: InboundFilter);

    /// Whether a message pump (delivery loop) is configured. Signal
    /// subscriptions are refused without one.
    fn has_message_pump(&self) -> bool;
}

// ===========================================================================
// Test support
// ===========================================================================


// ===========================================================================
// Tests
// ===========================================================================
