//! Uniform, fault-isolating execution of a single adapter.
//!
//! The adapter runs on its own named thread. The driver waits for it for at
//! most the adapter's time budget plus a grace period; a probe that has not reported
//! by then is abandoned (its thread is detached) and recorded as failed, so a
//! defective adapter can delay the harness but never hang it.

use crate::adapter::ProtocolAdapter;
use crate::types::{ProbeOutcome, ProbeVerdict};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Extra time granted on top of an adapter's own timeout before it is
/// abandoned.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

type ProbeResult = thread::Result<crate::Result<ProbeVerdict>>;

#[derive(Debug, Clone)]
pub struct ProbeDriver {
    grace: Duration,
}

impl Default for ProbeDriver {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl ProbeDriver {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Runs `adapter` once and converts however it ends into an outcome.
    #[must_use]
    pub fn execute(&self, adapter: Arc<dyn ProtocolAdapter>, timeout: Duration) -> ProbeOutcome {
        let budget = self.budget_for(adapter.as_ref(), timeout);
        self.execute_within(adapter, timeout, budget)
    }

    /// How long the driver waits for `adapter` before abandoning it.
    #[must_use]
    pub fn budget_for(&self, adapter: &dyn ProtocolAdapter, timeout: Duration) -> Duration {
        adapter.time_budget(timeout).saturating_add(self.grace)
    }

    /// Like [`execute`](Self::execute) but abandons the probe after `budget`.
    #[must_use]
    pub fn execute_within(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        timeout: Duration,
        budget: Duration,
    ) -> ProbeOutcome {
        let protocol = adapter.protocol();
        let (tx, rx) = mpsc::sync_channel::<(ProbeResult, Duration)>(1);

        let spawned = thread::Builder::new()
            .name(format!("probe-{}", protocol.label().to_ascii_lowercase()))
            .spawn(move || {
                let start = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| adapter.run_probe(timeout)));
                let elapsed = start.elapsed();
                // The receiver is gone if the probe was abandoned.
                let _ = tx.send((result, elapsed));
            });

        if let Err(e) = spawned {
            error!(%protocol, error = %e, "Failed to spawn probe thread");
            return ProbeOutcome::failed(protocol, format!("Test crashed: {e}"));
        }

        match rx.recv_timeout(budget) {
            Ok((Ok(Ok(verdict)), elapsed)) => {
                debug!(%protocol, passed = verdict.passed, ?elapsed, "Probe finished");
                let duration = verdict.completed.then_some(elapsed);
                ProbeOutcome::new(protocol, verdict.passed, verdict.message, duration)
            }
            Ok((Ok(Err(e)), _)) => {
                warn!(%protocol, error = %e, "Probe failed with error");
                ProbeOutcome::failed(protocol, format!("Error: {e}"))
            }
            Ok((Err(payload), _)) => {
                let reason = panic_message(payload.as_ref());
                error!(%protocol, %reason, "Probe panicked");
                ProbeOutcome::failed(protocol, format!("Test crashed: {reason}"))
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                error!(%protocol, ?budget, "Probe did not report in time, abandoning it");
                ProbeOutcome::failed(
                    protocol,
                    format!(
                        "Probe abandoned: no result within {}",
                        humantime::format_duration(budget)
                    ),
                )
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                ProbeOutcome::failed(protocol, "Test crashed: probe thread exited without a result")
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
