//! The connection's dispatch registry — subscribe, unsubscribe, and the
//! inbound dispatch entry point.
//!
//! # Thread safety
//!
//! The signal index is the only shared mutable structure. All structural
//! mutation (subscribe, unsubscribe) is serialized by one write lock;
//! dispatch takes a read lock only long enough to clone the candidate
//! leaf `Arc`s and invokes handlers strictly outside any lock. Because
//! leaves are copy-on-write, a dispatch pass racing a removal keeps
//! iterating its stable snapshot — a subscription added or removed
//! concurrently with an in-flight message may or may not see that
//! message (best-effort, not linearizable), but nothing crashes.
//!
//! # Lifecycle
//!
//! The transport's filter holds only a [`Weak`] reference to the
//! connection internals, and so does every [`SignalMatch`]; dropping the
//! last [`Connection`] clone drops the index, and a later
//! [`SignalMatch::remove`] is a silent no-op.

use std::sync::{Arc, RwLock, Weak};

use crate::message::{Message, MessageKind};
use crate::subscription::{
    HandlerErrorSink, MatchIndex, MatchRuleError, MatchSpec, SignalHandler, SignalMatch,
    SubscribeOptions, TracingErrorSink,
};
use crate::transport::{HandlerResult, Transport};

// ---------------------------------------------------------------------------
// ConnectionError
// ---------------------------------------------------------------------------

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No message pump is configured, so nothing would ever deliver a
    /// subscribed signal.
    #[error("no message pump is configured; signal subscriptions cannot be delivered")]
    NoMessagePump,
    /// The match rule could not be constructed.
    #[error(transparent)]
    MatchRule(#[from] MatchRuleError),
}

// ---------------------------------------------------------------------------
// RemovalTarget
// ---------------------------------------------------------------------------

/// What a [`Connection::unsubscribe`] call identifies: a match by
/// identity, or a bare handler matched structurally against the spec.
pub enum RemovalTarget {
    /// The exact subscription returned by [`Connection::subscribe`].
    Match(Arc<SignalMatch>),
    /// A handler; every subscription whose removal spec and handler both
    /// match is removed.
    Handler(Arc<dyn SignalHandler>),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A connection to another endpoint: owns the signal-dispatch registry
/// and the call-completion protocols (see the `call` module).
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    pub(crate) transport: Arc<dyn Transport>,
    signals: RwLock<MatchIndex>,
    error_sink: Arc<dyn HandlerErrorSink>,
}

impl Connection {
    /// Opens a connection over the given transport, reporting handler
    /// panics via [`TracingErrorSink`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_error_sink(transport, Arc::new(TracingErrorSink))
    }

    /// Opens a connection with an injected panic-reporting sink. The
    /// sink is configured once and reused for the registry's lifetime.
    ///
    /// Installs this connection's dispatch entry point as the
    /// transport's inbound filter, holding the connection weakly so the
    /// transport never keeps a dropped connection's index alive.
    #[must_use]
    pub fn with_error_sink(
        transport: Arc<dyn Transport>,
        error_sink: Arc<dyn HandlerErrorSink>,
    ) -> Self {
        let inner = Arc::new(ConnectionInner {
            transport,
            signals: RwLock::new(MatchIndex::default()),
            error_sink,
        });
        let weak = Arc::downgrade(&inner);
        inner.transport.install_filter(Box::new(move |message| {
            weak.upgrade()
                .map_or(HandlerResult::NotYetHandled, |inner| inner.dispatch(message))
        }));
        Self { inner }
    }

    /// Arranges for `handler` to be called for every signal matching
    /// `spec`. The returned match is already installed; keep it (or the
    /// spec) to remove it later.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoMessagePump`] if the transport has
    /// no delivery loop, or [`ConnectionError::MatchRule`] if the spec
    /// is malformed.
    pub fn subscribe(
        &self,
        spec: MatchSpec,
        handler: Arc<dyn SignalHandler>,
        options: SubscribeOptions,
    ) -> Result<Arc<SignalMatch>, ConnectionError> {
        if !self.inner.transport.has_message_pump() {
            return Err(ConnectionError::NoMessagePump);
        }
        let m = Arc::new(SignalMatch::new(
            Arc::downgrade(&self.inner),
            spec,
            handler,
            options,
            Arc::clone(&self.inner.error_sink),
        )?);
        let mut signals = self.inner.signals.write().unwrap();
        signals.insert(Arc::clone(&m));
        Ok(m)
    }

    /// Removes subscriptions registered under exactly `(spec.path,
    /// spec.interface, spec.member)`: the target itself (by identity)
    /// and, for a handler target, every subscription whose removal spec
    /// matches. Removing something that was never registered is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn unsubscribe(&self, target: &RemovalTarget, spec: &MatchSpec) {
        let mut signals = self.inner.signals.write().unwrap();
        signals.remove_where(
            spec.path.as_deref(),
            spec.interface.as_deref(),
            spec.member.as_deref(),
            |m| match target {
                RemovalTarget::Match(t) => Arc::ptr_eq(m, t),
                RemovalTarget::Handler(h) => m.matches_removal_spec(spec, Some(h)),
            },
        );
    }

    /// The inbound dispatch entry point — called by the transport's
    /// filter for every message, and callable directly by tests or a
    /// server-side rule evaluator.
    ///
    /// Non-signals are left for other filters immediately. Signals are
    /// tested against every candidate match; within one index cell,
    /// earlier registrations run first. Signal dispatch never consumes
    /// the message, so this always reports
    /// [`HandlerResult::NotYetHandled`].
    pub fn dispatch(&self, message: &Message) -> HandlerResult {
        self.inner.dispatch(message)
    }
}

impl ConnectionInner {
    pub(crate) fn dispatch(&self, message: &Message) -> HandlerResult {
        if message.kind() != MessageKind::Signal {
            return HandlerResult::NotYetHandled;
        }
        // Clone the candidate leaves under the read lock, then invoke
        // handlers with no lock held.
        let leaves = {
            let signals = self.signals.read().unwrap();
            signals.candidates(message.path(), message.interface(), message.member())
        };
        for leaf in &leaves {
            for m in leaf.iter() {
                m.maybe_handle_message(message);
            }
        }
        HandlerResult::NotYetHandled
    }

    /// Removes one match by identity, using its own filter triple.
    pub(crate) fn remove_exact(&self, m: &Arc<SignalMatch>) {
        let mut signals = self.signals.write().unwrap();
        signals.remove_where(m.path(), m.interface(), m.member(), |candidate| {
            Arc::ptr_eq(candidate, m)
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
