//! Smoke test report generation.
//!
//! Produces a human-readable text report and machine-readable JSON from the
//! outcomes of one harness run, and derives the process exit status.

use crate::types::ProbeOutcome;
use serde::Serialize;
use std::fmt::Write;

pub const EXIT_ALL_PASSED: i32 = 0;
pub const EXIT_SOME_FAILED: i32 = 1;
/// Configuration or startup problem; no probe ran.
pub const EXIT_STARTUP_FAILURE: i32 = 2;

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

/// Outcomes of one run, in execution order.
#[derive(Debug, Clone)]
pub struct HarnessReport {
    outcomes: Vec<ProbeOutcome>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    total: usize,
    passed: usize,
    failed: usize,
    exit_code: i32,
    outcomes: &'a [ProbeOutcome],
}

impl HarnessReport {
    #[must_use]
    pub fn new(outcomes: Vec<ProbeOutcome>) -> Self {
        Self { outcomes }
    }

    #[must_use]
    pub fn outcomes(&self) -> &[ProbeOutcome] {
        &self.outcomes
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.total() - self.passed_count()
    }

    /// `0` iff every outcome passed, `1` otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.outcomes.iter().all(ProbeOutcome::passed) {
            EXIT_ALL_PASSED
        } else {
            EXIT_SOME_FAILED
        }
    }

    /// Renders one block per outcome followed by the summary.
    #[must_use]
    pub fn render_text(&self, color: bool) -> String {
        let rule = "=".repeat(70);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        out.push_str("IoT Protocol Smoke Test\n");
        let _ = writeln!(out, "{rule}");
        out.push_str("\nVerifying end-to-end functionality for all protocols...\n");

        for outcome in &self.outcomes {
            out.push('\n');
            out.push_str(&render_outcome(outcome, color));
        }

        let _ = writeln!(out, "\n{rule}");
        out.push_str("SUMMARY\n");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total tests: {}", self.total());
        let _ = writeln!(out, "Passed: {}", self.passed_count());
        let _ = writeln!(out, "Failed: {}", self.failed_count());

        if self.exit_code() == EXIT_ALL_PASSED {
            out.push_str("\n✓ All tests passed!\n");
        } else {
            out.push_str("\n✗ Some tests failed. Please check the logs.\n");
        }
        let _ = writeln!(out, "{rule}");
        out
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&JsonReport {
            total: self.total(),
            passed: self.passed_count(),
            failed: self.failed_count(),
            exit_code: self.exit_code(),
            outcomes: &self.outcomes,
        })
    }
}

/// Renders the status line, message and (when measured) duration of one
/// outcome.
#[must_use]
pub fn render_outcome(outcome: &ProbeOutcome, color: bool) -> String {
    let (symbol, status, paint) = if outcome.passed() {
        ("✓", "PASS", GREEN)
    } else {
        ("✗", "FAIL", RED)
    };
    let (paint, reset) = if color { (paint, RESET) } else { ("", "") };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{paint}[{symbol}] {}: {status}{reset}",
        outcome.protocol()
    );
    let _ = writeln!(out, "    Message: {}", outcome.message());
    if outcome.duration_millis() > 0 {
        #[allow(clippy::cast_precision_loss)]
        let secs = outcome.duration_millis() as f64 / 1000.0;
        let _ = writeln!(out, "    Duration: {secs:.3}s");
    }
    out
}
