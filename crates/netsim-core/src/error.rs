//! Errors surfaced synchronously to callers (§7).
//!
//! Only the two error kinds §7 calls out as "surfaced to the caller
//! synchronously" get a `Result::Err` anywhere in this crate:
//! routing failures and missing scenario configuration. Everything else
//! (TTL exhaustion, link loss, queue drops, scheduled drops, unknown
//! protocols, unbound 4-tuples) is logged via [`crate::trace`] and the call
//! returns normally, matching §7's propagation policy.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SimError {
    #[error("no route to host {hostname}")]
    RoutingFailed { hostname: String },

    #[error("no default protocol set")]
    DefaultProtocolMissing,

    #[error("no default length set")]
    DefaultLengthMissing,

    #[error("no route from {src} to destination")]
    NoRoute { src: String },

    #[error("forward_all_links is not implemented (unit-cost DVR only; see SPEC_FULL.md)")]
    AutoForwardingUnsupported,
}

pub type SimResult<T> = Result<T, SimError>;
