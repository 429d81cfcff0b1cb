use crate::error::Result;
use crate::types::{ProbeVerdict, Protocol};
use std::time::Duration;

/// One transport's end-to-end probe.
///
/// From the caller's side `run_probe` is a single blocking call. Whatever
/// suspension the adapter needs internally (background network tasks, a
/// cooperative event loop, plain blocking I/O) stays private to it, and every
/// connection it opens is released before it returns.
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Performs one bounded exchange.
    ///
    /// Logical failures (bad status, content mismatch, no reply) come back as
    /// a failing [`ProbeVerdict`]; `Err` is reserved for faults the adapter
    /// could not interpret.
    fn run_probe(&self, timeout: Duration) -> Result<ProbeVerdict>;

    /// Upper bound on how long `run_probe(timeout)` may legitimately take.
    ///
    /// Adapters that spend `timeout` more than once (setup, then waiting for
    /// delivery) report the sum here so the driver does not abandon them
    /// early.
    fn time_budget(&self, timeout: Duration) -> Duration {
        timeout
    }
}
