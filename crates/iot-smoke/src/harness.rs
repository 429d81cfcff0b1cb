//! Runs every registered adapter once and collects one outcome per adapter.

use crate::adapter::ProtocolAdapter;
use crate::driver::ProbeDriver;
use crate::report::HarnessReport;
use crate::types::{ProbeOutcome, Protocol};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEADLINE_SKIPPED: &str = "Skipped: harness run deadline exceeded";

/// Whether adapters run one after another or side by side.
///
/// Either way the report lists outcomes in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Concurrent,
}

pub struct Harness {
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
    driver: ProbeDriver,
    timeout: Duration,
    mode: ExecutionMode,
    run_deadline: Option<Duration>,
}

impl Harness {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            adapters: Vec::new(),
            driver: ProbeDriver::default(),
            timeout,
            mode: ExecutionMode::default(),
            run_deadline: None,
        }
    }

    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| a.protocol());
        self
    }

    #[must_use]
    pub fn with_driver(mut self, driver: ProbeDriver) -> Self {
        self.driver = driver;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Caps the whole run. Adapters not started when it runs out are
    /// reported as skipped.
    #[must_use]
    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn protocols(&self) -> Vec<Protocol> {
        self.adapters.iter().map(|a| a.protocol()).collect()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs every adapter regardless of earlier failures.
    #[must_use]
    pub fn run(&self) -> HarnessReport {
        let deadline = self.run_deadline.map(|d| Instant::now() + d);
        info!(
            protocols = ?self.protocols(),
            timeout = ?self.timeout,
            mode = ?self.mode,
            "Starting smoke tests"
        );

        let outcomes: Vec<ProbeOutcome> = match self.mode {
            ExecutionMode::Sequential => self
                .adapters
                .iter()
                .map(|adapter| self.run_one(adapter, deadline))
                .collect(),
            ExecutionMode::Concurrent => thread::scope(|scope| {
                let handles: Vec<_> = self
                    .adapters
                    .iter()
                    .map(|adapter| {
                        let handle = scope.spawn(move || self.run_one(adapter, deadline));
                        (adapter.protocol(), handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(protocol, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            ProbeOutcome::failed(protocol, "Test crashed: probe runner panicked")
                        })
                    })
                    .collect()
            }),
        };

        HarnessReport::new(outcomes)
    }

    fn run_one(
        &self,
        adapter: &Arc<dyn ProtocolAdapter>,
        deadline: Option<Instant>,
    ) -> ProbeOutcome {
        let protocol = adapter.protocol();
        let budget = self.driver.budget_for(adapter.as_ref(), self.timeout);

        let Some(deadline) = deadline else {
            return self.driver.execute_within(Arc::clone(adapter), self.timeout, budget);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(%protocol, "Run deadline exceeded, skipping probe");
            return ProbeOutcome::failed(protocol, DEADLINE_SKIPPED);
        }
        self.driver
            .execute_within(Arc::clone(adapter), self.timeout, budget.min(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProbeError, Result};
    use crate::types::ProbeVerdict;

    struct Fixed {
        protocol: Protocol,
        passed: bool,
        delay: Duration,
    }

    impl ProtocolAdapter for Fixed {
        fn protocol(&self) -> Protocol {
            self.protocol
        }

        fn run_probe(&self, _timeout: Duration) -> Result<ProbeVerdict> {
            thread::sleep(self.delay);
            if self.passed {
                Ok(ProbeVerdict::pass("ok"))
            } else {
                Err(ProbeError::Protocol("boom".into()))
            }
        }
    }

    fn fixed(protocol: Protocol, passed: bool, delay_ms: u64) -> Arc<dyn ProtocolAdapter> {
        Arc::new(Fixed {
            protocol,
            passed,
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[test]
    fn adapters_are_kept_in_protocol_order() {
        let harness = Harness::new(Duration::from_secs(1))
            .with_adapter(fixed(Protocol::Constrained, true, 0))
            .with_adapter(fixed(Protocol::Messaging, true, 0))
            .with_adapter(fixed(Protocol::Web, true, 0));
        assert_eq!(harness.protocols(), Protocol::ALL.to_vec());
    }

    #[test]
    fn concurrent_run_reports_in_fixed_order() {
        let report = Harness::new(Duration::from_secs(1))
            .with_mode(ExecutionMode::Concurrent)
            .with_adapter(fixed(Protocol::Messaging, true, 60))
            .with_adapter(fixed(Protocol::Web, false, 0))
            .with_adapter(fixed(Protocol::Constrained, true, 30))
            .run();
        let protocols: Vec<_> = report.outcomes().iter().map(ProbeOutcome::protocol).collect();
        assert_eq!(protocols, Protocol::ALL.to_vec());
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn exhausted_deadline_skips_remaining_probes() {
        let report = Harness::new(Duration::from_secs(1))
            .with_driver(ProbeDriver::new(Duration::ZERO))
            .with_run_deadline(Duration::from_millis(50))
            .with_adapter(fixed(Protocol::Messaging, true, 300))
            .with_adapter(fixed(Protocol::Web, true, 0))
            .run();
        assert_eq!(report.total(), 2);
        assert!(report.outcomes()[0].message().starts_with("Probe abandoned"));
        assert_eq!(report.outcomes()[1].message(), DEADLINE_SKIPPED);
        assert_eq!(report.exit_code(), 1);
    }
}
