//! Signal match rules — [`SignalMatch`] and the handler surface.
//!
//! A [`SignalMatch`] is an immutable (post-construction) rule describing
//! which signals a subscriber wants: optional sender / path / interface /
//! member filters, optional argument matchers, the subscriber's handler,
//! and its calling-convention preferences. It computes a canonical
//! textual match rule at construction for the benefit of any bus-aware
//! layer that installs server-side filtering, and knows how to test a
//! message against itself and invoke its handler safely.
//!
//! # Panic safety
//!
//! A panic inside the handler is caught via
//! [`std::panic::catch_unwind`], reported to the connection's
//! [`HandlerErrorSink`], and suppressed: the match still reports itself
//! as handled and later matches still run. One misbehaving subscriber
//! never compromises the dispatch loop.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, Weak};

use smallvec::SmallVec;

use crate::connection::ConnectionInner;
use crate::message::{ArgRepr, Message, Value, MATCH_REPR};
use crate::names::{
    validate_bus_name, validate_interface_name, validate_member_name, validate_object_path,
    InvalidNameError,
};

/// The largest argument index a matcher may target.
pub const MAX_ARG_MATCH_INDEX: u32 = 63;

// ---------------------------------------------------------------------------
// SignalHandler
// ---------------------------------------------------------------------------

/// A subscriber's signal handler.
///
/// Invoked synchronously on whichever thread the transport dispatches
/// from; a slow handler stalls further dispatch on that thread, so
/// handlers should be fast or offload their own work.
pub trait SignalHandler: Send + Sync + 'static {
    /// Called with the signal's extracted arguments (in the handler's
    /// configured representation) and the requested context fields.
    fn on_signal(&self, args: &[Value], ctx: &SignalContext);
}

/// Adapter that wraps a closure into a [`SignalHandler`].
struct FnHandler<F>(F);

impl<F: Fn(&[Value], &SignalContext) + Send + Sync + 'static> SignalHandler for FnHandler<F> {
    fn on_signal(&self, args: &[Value], ctx: &SignalContext) {
        (self.0)(args, ctx);
    }
}

/// Wraps a closure into a boxed [`SignalHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn SignalHandler>
where
    F: Fn(&[Value], &SignalContext) + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// ---------------------------------------------------------------------------
// SignalContext / ContextRequest
// ---------------------------------------------------------------------------

/// Context fields delivered to a handler alongside the positional
/// arguments. Each field is populated only when the subscription asked
/// for it in its [`ContextRequest`].
#[derive(Debug, Clone, Default)]
pub struct SignalContext {
    /// The signal's sender, when requested.
    pub sender: Option<String>,
    /// The signal's destination (usually absent — broadcasts), when requested.
    pub destination: Option<String>,
    /// The emitting object's path, when requested.
    pub path: Option<String>,
    /// The signal's interface, when requested.
    pub interface: Option<String>,
    /// The signal's member name, when requested.
    pub member: Option<String>,
    /// The raw message, when requested.
    pub message: Option<Message>,
}

impl SignalContext {
    /// Returns `true` if no context field was populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_none()
            && self.destination.is_none()
            && self.path.is_none()
            && self.interface.is_none()
            && self.member.is_none()
            && self.message.is_none()
    }
}

/// Which context fields a handler wants injected. All off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextRequest {
    /// Deliver the sender's unique name.
    pub sender: bool,
    /// Deliver the destination bus name.
    pub destination: bool,
    /// Deliver the emitting object's path.
    pub path: bool,
    /// Deliver the interface name.
    pub interface: bool,
    /// Deliver the member name.
    pub member: bool,
    /// Deliver the raw message.
    pub message: bool,
}

impl ContextRequest {
    /// Captures the requested fields from a message. A requested field
    /// the message does not carry (e.g. the destination of a broadcast)
    /// stays absent.
    #[must_use]
    pub fn capture(&self, message: &Message) -> SignalContext {
        SignalContext {
            sender: self
                .sender
                .then(|| message.sender().map(str::to_string))
                .flatten(),
            destination: self
                .destination
                .then(|| message.destination().map(str::to_string))
                .flatten(),
            path: self.path.then(|| message.path().map(str::to_string)).flatten(),
            interface: self
                .interface
                .then(|| message.interface().map(str::to_string))
                .flatten(),
            member: self
                .member
                .then(|| message.member().map(str::to_string))
                .flatten(),
            message: self.message.then(|| message.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// HandlerErrorSink
// ---------------------------------------------------------------------------

/// Error-reporting capability for handler panics, injected at connection
/// construction and reused for the registry's lifetime.
pub trait HandlerErrorSink: Send + Sync {
    /// A handler panicked while processing `message` under `rule`.
    fn handler_panicked(&self, rule: &str, message: &Message, detail: &str);
}

/// Default sink: logs via `tracing::error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl HandlerErrorSink for TracingErrorSink {
    fn handler_panicked(&self, rule: &str, message: &Message, detail: &str) {
        tracing::error!(
            rule,
            path = message.path(),
            interface = message.interface(),
            member = message.member(),
            detail,
            "signal handler panicked"
        );
    }
}

// ---------------------------------------------------------------------------
// MatchSpec / SubscribeOptions
// ---------------------------------------------------------------------------

/// A signal filter specification: each field is a concrete value or a
/// wildcard (`None` = match anything). Argument matchers are supplied as
/// `arg<N>` keys with required string values, in the order they should
/// appear in the rule text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSpec {
    /// Required sender bus name, or wildcard.
    pub sender: Option<String>,
    /// Required object path, or wildcard.
    pub path: Option<String>,
    /// Required interface name, or wildcard.
    pub interface: Option<String>,
    /// Required member name, or wildcard.
    pub member: Option<String>,
    /// `("arg<N>", value)` pairs; signal arguments at those positions
    /// must equal the given strings.
    pub arg_matchers: Vec<(String, String)>,
}

impl MatchSpec {
    /// An all-wildcard spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender filter.
    #[must_use]
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    /// Sets the path filter.
    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// Sets the interface filter.
    #[must_use]
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    /// Sets the member filter.
    #[must_use]
    pub fn with_member(mut self, member: &str) -> Self {
        self.member = Some(member.to_string());
        self
    }

    /// Adds an argument matcher under an `arg<N>` key.
    #[must_use]
    pub fn with_arg_match(mut self, key: &str, value: &str) -> Self {
        self.arg_matchers.push((key.to_string(), value.to_string()));
        self
    }
}

/// Calling-convention options for a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Representation for arguments handed to the handler. Does not
    /// affect matching: matcher comparison always uses [`MATCH_REPR`].
    pub repr: ArgRepr,
    /// Context fields to inject alongside the positional arguments.
    pub context: ContextRequest,
}

// ---------------------------------------------------------------------------
// MatchRuleError
// ---------------------------------------------------------------------------

/// Errors from match-rule construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchRuleError {
    /// A filter field failed its naming grammar.
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
    /// An argument-matcher key is not of the form `arg<N>`.
    #[error("unknown argument-matcher key {0:?} (expected \"arg0\"..\"arg63\")")]
    UnknownArgKey(String),
    /// An argument-matcher index is outside `0..=63`.
    #[error("argument-matcher index {0} out of range (0..=63)")]
    ArgIndexOutOfRange(u32),
}

fn parse_arg_matchers(
    pairs: &[(String, String)],
) -> Result<SmallVec<[(u32, String); 4]>, MatchRuleError> {
    let mut parsed = SmallVec::new();
    for (key, value) in pairs {
        let Some(index) = key
            .strip_prefix("arg")
            .and_then(|rest| rest.parse::<u32>().ok())
        else {
            return Err(MatchRuleError::UnknownArgKey(key.clone()));
        };
        if index > MAX_ARG_MATCH_INDEX {
            return Err(MatchRuleError::ArgIndexOutOfRange(index));
        }
        parsed.push((index, value.clone()));
    }
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// SignalMatch
// ---------------------------------------------------------------------------

/// An installed signal subscription rule.
///
/// Everything is immutable after construction except the resolved
/// sender, which a bus-aware layer may rewrite from a well-known name to
/// its unique owner via [`SignalMatch::set_resolved_sender`].
pub struct SignalMatch {
    spec: MatchSpec,
    /// The sender the rule currently matches against. Starts as the
    /// spec's sender; a bus-aware connection may rewrite it.
    resolved_sender: RwLock<Option<String>>,
    arg_matchers: SmallVec<[(u32, String); 4]>,
    handler: Arc<dyn SignalHandler>,
    repr: ArgRepr,
    context: ContextRequest,
    rule: String,
    connection: Weak<ConnectionInner>,
    error_sink: Arc<dyn HandlerErrorSink>,
}

impl SignalMatch {
    /// Validates the spec and builds the match.
    ///
    /// # Errors
    ///
    /// Returns [`MatchRuleError`] if a non-wildcard filter field is
    /// malformed or an argument-matcher key is invalid.
    pub(crate) fn new(
        connection: Weak<ConnectionInner>,
        spec: MatchSpec,
        handler: Arc<dyn SignalHandler>,
        options: SubscribeOptions,
        error_sink: Arc<dyn HandlerErrorSink>,
    ) -> Result<Self, MatchRuleError> {
        if let Some(member) = &spec.member {
            validate_member_name(member)?;
        }
        if let Some(interface) = &spec.interface {
            validate_interface_name(interface)?;
        }
        if let Some(sender) = &spec.sender {
            validate_bus_name(sender)?;
        }
        if let Some(path) = &spec.path {
            validate_object_path(path)?;
        }
        let arg_matchers = parse_arg_matchers(&spec.arg_matchers)?;

        // The bus will want the textual rule anyway, so construction
        // might as well compute it.
        let mut rule = vec!["type='signal'".to_string()];
        if let Some(sender) = &spec.sender {
            rule.push(format!("sender='{sender}'"));
        }
        if let Some(path) = &spec.path {
            rule.push(format!("path='{path}'"));
        }
        if let Some(interface) = &spec.interface {
            rule.push(format!("interface='{interface}'"));
        }
        if let Some(member) = &spec.member {
            rule.push(format!("member='{member}'"));
        }
        for (index, value) in &arg_matchers {
            rule.push(format!("arg{index}='{value}'"));
        }

        Ok(Self {
            resolved_sender: RwLock::new(spec.sender.clone()),
            arg_matchers,
            handler,
            repr: options.repr,
            context: options.context,
            rule: rule.join(","),
            connection,
            error_sink,
            spec,
        })
    }

    /// The sender filter, or `None` for wildcard.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.spec.sender.as_deref()
    }

    /// The path filter, or `None` for wildcard.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.spec.path.as_deref()
    }

    /// The interface filter, or `None` for wildcard.
    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.spec.interface.as_deref()
    }

    /// The member filter, or `None` for wildcard.
    #[must_use]
    pub fn member(&self) -> Option<&str> {
        self.spec.member.as_deref()
    }

    /// The canonical textual match rule.
    #[must_use]
    pub fn rule_text(&self) -> &str {
        &self.rule
    }

    /// The sender the rule currently matches against.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn resolved_sender(&self) -> Option<String> {
        self.resolved_sender.read().unwrap().clone()
    }

    /// Rewrites the matched sender. A bus-aware connection calls this
    /// once it has resolved a well-known sender name to its unique
    /// owner.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_resolved_sender(&self, sender: Option<String>) {
        *self.resolved_sender.write().unwrap() = sender;
    }

    /// Tests `message` against this rule and, on a match, invokes the
    /// handler. Returns `true` whenever the rule matched — including
    /// when the handler panicked (the panic is reported to the error
    /// sink, never rethrown, and does not unsubscribe the handler).
    ///
    /// The index pre-filters path / interface / member, but they are
    /// re-verified here so the function is also correct when invoked
    /// outside the index (e.g. by a server-side rule evaluator).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn maybe_handle_message(&self, message: &Message) -> bool {
        {
            let resolved = self.resolved_sender.read().unwrap();
            if let Some(expected) = resolved.as_deref() {
                if message.sender() != Some(expected) {
                    return false;
                }
            }
        }

        // Matcher comparison always runs under MATCH_REPR, regardless of
        // the handler's own representation flags.
        let mut match_args: Option<Vec<Value>> = None;
        if !self.arg_matchers.is_empty() {
            let args = message.args_as(MATCH_REPR);
            for (index, expected) in &self.arg_matchers {
                match args.get(*index as usize) {
                    Some(Value::Utf8(bytes)) if bytes == expected.as_bytes() => {}
                    _ => return false,
                }
            }
            match_args = Some(args);
        }

        if let Some(member) = self.member() {
            if message.member() != Some(member) {
                return false;
            }
        }
        if let Some(interface) = self.interface() {
            if message.interface() != Some(interface) {
                return false;
            }
        }
        if let Some(path) = self.path() {
            if message.path() != Some(path) {
                return false;
            }
        }

        // Reuse the matcher extraction only when the handler wants the
        // identical representation; otherwise re-extract.
        let args = match match_args {
            Some(args) if self.repr == MATCH_REPR => args,
            _ => message.args_as(self.repr),
        };
        let ctx = self.context.capture(message);

        let result = catch_unwind(AssertUnwindSafe(|| self.handler.on_signal(&args, &ctx)));
        if let Err(panic) = result {
            self.error_sink
                .handler_panicked(&self.rule, message, &panic_detail(&panic));
        }
        true
    }

    /// Structural equality against a removal spec: every filter field
    /// must be equal, the matcher sets must be equal (order-insensitive,
    /// indices normalized), and `handler`, when supplied, must be this
    /// match's own handler.
    #[must_use]
    pub fn matches_removal_spec(
        &self,
        spec: &MatchSpec,
        handler: Option<&Arc<dyn SignalHandler>>,
    ) -> bool {
        if let Some(h) = handler {
            if !Arc::ptr_eq(h, &self.handler) {
                return false;
            }
        }
        if spec.sender != self.spec.sender
            || spec.path != self.spec.path
            || spec.interface != self.spec.interface
            || spec.member != self.spec.member
        {
            return false;
        }
        let Ok(theirs) = parse_arg_matchers(&spec.arg_matchers) else {
            return false;
        };
        let mut theirs: Vec<_> = theirs.into_vec();
        let mut ours: Vec<_> = self.arg_matchers.to_vec();
        theirs.sort();
        ours.sort();
        theirs == ours
    }

    /// Removes this match from its connection, by identity. A no-op if
    /// the connection has already been dropped; idempotent either way.
    pub fn remove(self: &Arc<Self>) {
        if let Some(connection) = self.connection.upgrade() {
            connection.remove_exact(self);
        }
    }

}

impl fmt::Display for SignalMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rule)
    }
}

impl fmt::Debug for SignalMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalMatch")
            .field("rule", &self.rule)
            .field("repr", &self.repr)
            .finish_non_exhaustive()
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::message::Arg;
    use std::sync::Mutex;

    fn noop_handler() -> Arc<dyn SignalHandler> {
        handler_fn(|_, _| {})
    }

    fn build(spec: MatchSpec, options: SubscribeOptions) -> Result<SignalMatch, MatchRuleError> {
        SignalMatch::new(
            Weak::new(),
            spec,
            noop_handler(),
            options,
            Arc::new(TracingErrorSink),
        )
    }

    /// Builds an `Arc<SignalMatch>` for the given filter triple, with a
    /// no-op handler and no connection. Shared with the index tests.
    pub(crate) fn match_for(
        path: Option<&str>,
        interface: Option<&str>,
        member: Option<&str>,
    ) -> Arc<SignalMatch> {
        let mut spec = MatchSpec::new();
        spec.path = path.map(str::to_string);
        spec.interface = interface.map(str::to_string);
        spec.member = member.map(str::to_string);
        Arc::new(build(spec, SubscribeOptions::default()).unwrap())
    }

    fn signal(path: &str, interface: &str, member: &str) -> Message {
        Message::signal(path, interface, member).unwrap()
    }

    // --- Rule text ---

    #[test]
    fn test_rule_text_full_and_deterministic() {
        let spec = MatchSpec::new()
            .with_sender("org.x.Service")
            .with_path("/org/x")
            .with_interface("org.x.Props")
            .with_member("PropertiesChanged")
            .with_arg_match("arg0", "Color")
            .with_arg_match("arg1", "red");
        let a = build(spec.clone(), SubscribeOptions::default()).unwrap();
        let b = build(spec, SubscribeOptions::default()).unwrap();
        assert_eq!(
            a.rule_text(),
            "type='signal',sender='org.x.Service',path='/org/x',\
             interface='org.x.Props',member='PropertiesChanged',arg0='Color',arg1='red'"
        );
        assert_eq!(a.rule_text(), b.rule_text());
        assert_eq!(a.to_string(), a.rule_text());
    }

    #[test]
    fn test_rule_text_omits_wildcards() {
        let m = build(
            MatchSpec::new().with_interface("org.x.Y"),
            SubscribeOptions::default(),
        )
        .unwrap();
        assert_eq!(m.rule_text(), "type='signal',interface='org.x.Y'");
    }

    #[test]
    fn test_rule_text_all_wildcard() {
        let m = build(MatchSpec::new(), SubscribeOptions::default()).unwrap();
        assert_eq!(m.rule_text(), "type='signal'");
    }

    // --- Construction validation ---

    #[test]
    fn test_construction_validates_names() {
        assert!(matches!(
            build(MatchSpec::new().with_member("bad.member"), SubscribeOptions::default()),
            Err(MatchRuleError::InvalidName(_))
        ));
        assert!(build(MatchSpec::new().with_interface("nodots"), SubscribeOptions::default())
            .is_err());
        assert!(build(MatchSpec::new().with_sender("nodots"), SubscribeOptions::default())
            .is_err());
        assert!(build(MatchSpec::new().with_path("no-slash"), SubscribeOptions::default())
            .is_err());
    }

    #[test]
    fn test_arg_matcher_key_validation() {
        assert!(matches!(
            build(
                MatchSpec::new().with_arg_match("argX", "v"),
                SubscribeOptions::default()
            ),
            Err(MatchRuleError::UnknownArgKey(_))
        ));
        assert!(matches!(
            build(
                MatchSpec::new().with_arg_match("color", "v"),
                SubscribeOptions::default()
            ),
            Err(MatchRuleError::UnknownArgKey(_))
        ));
        assert!(matches!(
            build(
                MatchSpec::new().with_arg_match("arg64", "v"),
                SubscribeOptions::default()
            ),
            Err(MatchRuleError::ArgIndexOutOfRange(64))
        ));
        // The range boundaries are fine.
        build(MatchSpec::new().with_arg_match("arg0", "v"), SubscribeOptions::default())
            .unwrap();
        build(MatchSpec::new().with_arg_match("arg63", "v"), SubscribeOptions::default())
            .unwrap();
    }

    // --- Matching ---

    #[test]
    fn test_interface_only_match() {
        let m = build(
            MatchSpec::new().with_interface("org.x.Y"),
            SubscribeOptions::default(),
        )
        .unwrap();
        assert!(m.maybe_handle_message(&signal("/any/path", "org.x.Y", "Anything")));
        assert!(!m.maybe_handle_message(&signal("/any/path", "org.x.Other", "Anything")));
    }

    #[test]
    fn test_resolved_sender_gates_matching() {
        let m = build(
            MatchSpec::new().with_sender("org.x.Service"),
            SubscribeOptions::default(),
        )
        .unwrap();
        assert_eq!(m.resolved_sender().as_deref(), Some("org.x.Service"));

        // Unresolved: only the well-known name matches.
        let from_owner = signal("/p", "org.x.Y", "M").with_sender(":1.42");
        assert!(!m.maybe_handle_message(&from_owner));

        // After a bus-aware layer resolves the owner, the unique name matches.
        m.set_resolved_sender(Some(":1.42".to_string()));
        assert!(m.maybe_handle_message(&from_owner));
        assert!(!m.maybe_handle_message(&signal("/p", "org.x.Y", "M").with_sender(":1.43")));
    }

    #[test]
    fn test_arg_matcher_gating() {
        let m = build(
            MatchSpec::new().with_arg_match("arg0", "foo"),
            SubscribeOptions::default(),
        )
        .unwrap();

        let mut matching = signal("/p", "org.x.Y", "M");
        matching.append_args("s", vec![Arg::Str("foo".into())]).unwrap();
        assert!(m.maybe_handle_message(&matching));

        let mut wrong_value = signal("/p", "org.x.Y", "M");
        wrong_value.append_args("s", vec![Arg::Str("bar".into())]).unwrap();
        assert!(!m.maybe_handle_message(&wrong_value));

        // Too few arguments never matches.
        assert!(!m.maybe_handle_message(&signal("/p", "org.x.Y", "M")));

        // A non-string argument at the matched position never matches.
        let mut wrong_type = signal("/p", "org.x.Y", "M");
        wrong_type.append_args("u", vec![Arg::UInt32(7)]).unwrap();
        assert!(!m.maybe_handle_message(&wrong_type));
    }

    #[test]
    fn test_handler_receives_args_in_configured_repr() {
        let seen: Arc<Mutex<Vec<Vec<Value>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let m = SignalMatch::new(
            Weak::new(),
            MatchSpec::new().with_arg_match("arg0", "foo"),
            handler_fn(move |args, _| seen_clone.lock().unwrap().push(args.to_vec())),
            SubscribeOptions::default(), // default repr differs from MATCH_REPR
            Arc::new(TracingErrorSink),
        )
        .unwrap();

        let mut msg = signal("/p", "org.x.Y", "M");
        msg.append_args("s", vec![Arg::Str("foo".into())]).unwrap();
        assert!(m.maybe_handle_message(&msg));

        // Matching ran under MATCH_REPR, but the handler got the default
        // representation: a unicode string, not UTF-8 bytes.
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], vec![Value::Str("foo".into())]);
    }

    #[test]
    fn test_context_injection() {
        let seen: Arc<Mutex<Vec<SignalContext>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let options = SubscribeOptions {
            context: ContextRequest {
                sender: true,
                member: true,
                ..ContextRequest::default()
            },
            ..SubscribeOptions::default()
        };
        let m = SignalMatch::new(
            Weak::new(),
            MatchSpec::new(),
            handler_fn(move |_, ctx| seen_clone.lock().unwrap().push(ctx.clone())),
            options,
            Arc::new(TracingErrorSink),
        )
        .unwrap();

        assert!(m.maybe_handle_message(&signal("/p", "org.x.Y", "M").with_sender(":1.9")));
        let ctx = &seen.lock().unwrap()[0];
        assert_eq!(ctx.sender.as_deref(), Some(":1.9"));
        assert_eq!(ctx.member.as_deref(), Some("M"));
        assert!(ctx.destination.is_none());
        assert!(ctx.path.is_none());
        assert!(ctx.interface.is_none());
        assert!(ctx.message.is_none());
    }

    #[test]
    fn test_no_context_requested_yields_empty_context() {
        let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let m = SignalMatch::new(
            Weak::new(),
            MatchSpec::new(),
            handler_fn(move |_, ctx| seen_clone.lock().unwrap().push(ctx.is_empty())),
            SubscribeOptions::default(),
            Arc::new(TracingErrorSink),
        )
        .unwrap();
        assert!(m.maybe_handle_message(&signal("/p", "org.x.Y", "M")));
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    // --- Panic isolation ---

    #[test]
    fn test_panicking_handler_still_counts_as_handled() {
        struct Sink(Mutex<Vec<String>>);
        impl HandlerErrorSink for Sink {
            fn handler_panicked(&self, _rule: &str, _message: &Message, detail: &str) {
                self.0.lock().unwrap().push(detail.to_string());
            }
        }
        let sink = Arc::new(Sink(Mutex::new(Vec::new())));
        let m = SignalMatch::new(
            Weak::new(),
            MatchSpec::new(),
            handler_fn(|_, _| panic!("deliberate test panic")),
            SubscribeOptions::default(),
            Arc::clone(&sink) as Arc<dyn HandlerErrorSink>,
        )
        .unwrap();

        assert!(m.maybe_handle_message(&signal("/p", "org.x.Y", "M")));
        let reported = sink.0.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("deliberate test panic"));
    }

    // --- Removal spec ---

    #[test]
    fn test_matches_removal_spec_structural() {
        let spec = MatchSpec::new()
            .with_interface("org.x.Y")
            .with_arg_match("arg0", "foo")
            .with_arg_match("arg1", "bar");
        let handler = noop_handler();
        let m = SignalMatch::new(
            Weak::new(),
            spec.clone(),
            Arc::clone(&handler),
            SubscribeOptions::default(),
            Arc::new(TracingErrorSink),
        )
        .unwrap();

        assert!(m.matches_removal_spec(&spec, None));
        assert!(m.matches_removal_spec(&spec, Some(&handler)));

        // Matcher order does not matter for removal.
        let reordered = MatchSpec::new()
            .with_interface("org.x.Y")
            .with_arg_match("arg1", "bar")
            .with_arg_match("arg0", "foo");
        assert!(m.matches_removal_spec(&reordered, None));

        // A different handler, field, or matcher set does not match.
        assert!(!m.matches_removal_spec(&spec, Some(&noop_handler())));
        assert!(!m.matches_removal_spec(&spec.clone().with_member("M"), None));
        assert!(!m.matches_removal_spec(
            &MatchSpec::new().with_interface("org.x.Y"),
            None
        ));
    }

    #[test]
    fn test_remove_without_connection_is_noop() {
        let m = match_for(None, Some("org.x.Y"), None);
        m.remove();
        m.remove();
    }
}
