//! # Signal Subscription System
//!
//! Rules, indexing, and safe handler invocation for inbound signals.
//!
//! ## Types
//!
//! - [`SignalMatch`] — an installed subscription rule: filters, argument
//!   matchers, handler, calling conventions, and the canonical textual
//!   match rule for server-side filter installation
//! - [`MatchSpec`] / [`SubscribeOptions`] — what to match and how to
//!   call the handler
//! - [`SignalHandler`] / [`SignalContext`] — the handler surface
//! - [`HandlerErrorSink`] — injected panic-reporting capability
//! - `MatchIndex` (crate-private) — the three-level wildcard index with
//!   copy-on-write leaves that the connection dispatches through

mod index;
mod match_rule;

pub(crate) use index::MatchIndex;
pub use match_rule::{
    handler_fn, ContextRequest, HandlerErrorSink, MatchRuleError, MatchSpec, SignalContext,
    SignalHandler, SignalMatch, SubscribeOptions, TracingErrorSink, MAX_ARG_MATCH_INDEX,
};
