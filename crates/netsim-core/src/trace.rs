//! Per-category debug tracing (§6 "Simulator interface").
//!
//! The Python original gates `Sim.trace(tag, message)` on a set of tags
//! enabled via `Sim.set_debug(tag)`, printing the current virtual time plus
//! the message whenever the tag is active. We keep that call-site shape
//! but implement it on top of `tracing`, so the actual filtering is done by
//! a `tracing_subscriber::EnvFilter` (or any other `tracing` subscriber) the
//! caller installs — `set_debug` just becomes documentation for which
//! targets exist. Call sites elsewhere in this crate read like
//! `trace::trace("node", "...")`, matching `Sim.trace("Node", message)`.

/// Emit a trace message under the given category/target. Whether it is
/// printed depends entirely on the installed `tracing` subscriber's filter
/// (e.g. `RUST_LOG=netsim_core::node=debug`).
pub fn trace(tag: &str, message: &str) {
    tracing::debug!(target: "netsim_core", tag, "{}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_does_not_panic_without_subscriber() {
        trace("node", "hello");
    }
}
