//! # Dispatcher Module
//!
//! The per-request lifecycle engine: it bridges the event-driven callbacks
//! of an HTTP wire parser into one synchronous handler invocation with a
//! fully materialised [`crate::Request`].
//!
//! ## Callback surface
//!
//! The engine consumes three callbacks, exposed as methods on
//! [`crate::Server`]:
//!
//! 1. [`crate::Server::uri_log`]: the raw URI arrived; per-request state
//!    ([`Transaction`]) is allocated.
//! 2. [`crate::Server::answer`]: called once for head-only methods, and
//!    N+1 times for bodyful ones (N chunks plus a zero-size terminator).
//!    The final call resolves the route, invokes the handler and yields the
//!    reply payload.
//! 3. [`crate::Server::request_completed`]: the connection finished
//!    writing; the response's completion action runs and the state drops.
//!
//! Everything else the engine needs from the parser (headers, cookies,
//! query arguments, footers, peer identity, credentials) is drained
//! through the [`Exchange`] trait, so any parser adapter (or a test double)
//! can drive the machine.
//!
//! ## States
//!
//! `preface` → `head-only` or `body-awaiting` → `body-complete` →
//! `dispatched` → `completed`. Body chunks accumulate into the raw body
//! buffer and, for form-urlencoded content, feed an incremental decoder
//! that emits named arguments.
//!
//! ## Unescaping
//!
//! The engine never trusts a parser's unescaping (one observed parser
//! version produced embedded NULs that broke later value lookups). Values
//! cross the `Exchange` boundary still escaped and are decoded here exactly
//! once, through the configured [`crate::Unescaper`] or the default
//! percent-decoder.

mod core;
mod form;

pub use core::{Exchange, RequestHead, Step, Termination, Transaction};
