//! Request/response probe over HTTP.
//!
//! Purely blocking: a health check, then one JSON `POST` to the ingest
//! endpoint. Each call carries its own timeout, enforced by the transport.

pub mod client;
pub mod server;

use crate::adapter::ProtocolAdapter;
use crate::error::{ProbeError, Result};
use crate::types::{ProbeVerdict, Protocol, TelemetryRecord};
use std::time::Duration;
use tracing::{debug, info};

pub use client::ReqwestTransport;

pub const HEALTH_PATH: &str = "/health";
pub const INGEST_PATH: &str = "/ingest";
pub const CONNECTION_FAILED: &str = "Connection failed - is server running?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP collaborator.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse>;

    /// Sends `body` with `Content-Type: application/json`.
    fn post_json(&self, url: &str, body: &[u8], timeout: Duration) -> Result<HttpResponse>;
}

/// Web adapter: health check, ingest, verify the success marker.
pub struct WebProbe<T> {
    transport: T,
    base_url: String,
}

impl<T: HttpTransport> WebProbe<T> {
    pub fn new(transport: T, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            transport,
            base_url,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl<T: HttpTransport> ProtocolAdapter for WebProbe<T> {
    fn protocol(&self) -> Protocol {
        Protocol::Web
    }

    fn run_probe(&self, timeout: Duration) -> Result<ProbeVerdict> {
        info!(base_url = %self.base_url, "Testing HTTP...");

        let health_url = format!("{}{HEALTH_PATH}", self.base_url);
        let health = match self.transport.get(&health_url, timeout) {
            Ok(response) => response,
            Err(e) => return interpret_failure(e),
        };
        if !health.is_success() {
            return Ok(ProbeVerdict::early_fail(format!(
                "Health check failed: {}",
                health.status
            )));
        }
        debug!(status = health.status, "Health check passed");

        let body = TelemetryRecord::smoke().to_json()?;
        let ingest_url = format!("{}{INGEST_PATH}", self.base_url);
        let response = match self.transport.post_json(&ingest_url, &body, timeout) {
            Ok(response) => response,
            Err(e) => return interpret_failure(e),
        };

        Ok(judge_ingest_response(&response))
    }

    fn time_budget(&self, timeout: Duration) -> Duration {
        // health check and ingest each get the full timeout
        timeout * 2
    }
}

/// Connectivity problems and timeouts are reportable results; anything else
/// is a fault for the driver.
fn interpret_failure(err: ProbeError) -> Result<ProbeVerdict> {
    match err {
        ProbeError::Unreachable { target, reason } => {
            debug!(%target, %reason, "HTTP server unreachable");
            Ok(ProbeVerdict::early_fail(CONNECTION_FAILED))
        }
        ProbeError::Timeout(after) => Ok(ProbeVerdict::early_fail(format!(
            "No response within {}",
            humantime::format_duration(after)
        ))),
        other => Err(other),
    }
}

/// A success status alone is not enough: the body must carry
/// `"status": "success"`. Only a confirmed ingest records a duration.
fn judge_ingest_response(response: &HttpResponse) -> ProbeVerdict {
    if !response.is_success() {
        return ProbeVerdict::early_fail(format!("Request failed: {}", response.status));
    }
    let marker = serde_json::from_str::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_owned));
    match marker.as_deref() {
        Some("success") => ProbeVerdict::pass("Request sent and response received successfully"),
        _ => ProbeVerdict::early_fail(format!("Unexpected response: {}", response.body.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.to_owned(),
        }
    }

    #[test]
    fn success_needs_marker_field() {
        assert!(judge_ingest_response(&response(200, r#"{"status":"success"}"#)).passed);

        let bare = judge_ingest_response(&response(200, r#"{"ok":true}"#));
        assert!(!bare.passed);
        assert!(!bare.completed);
        assert!(bare.message.starts_with("Unexpected response"));

        let text = judge_ingest_response(&response(200, "OK"));
        assert!(!text.passed);
    }

    #[test]
    fn non_success_status_names_the_code() {
        let verdict = judge_ingest_response(&response(500, r#"{"status":"success"}"#));
        assert!(!verdict.passed);
        assert!(!verdict.completed);
        assert_eq!(verdict.message, "Request failed: 500");
    }

    #[test]
    fn unreachable_becomes_connection_failed_verdict() {
        let verdict =
            interpret_failure(ProbeError::unreachable("http://127.0.0.1:1", "refused")).unwrap();
        assert!(!verdict.passed);
        assert!(!verdict.completed);
        assert_eq!(verdict.message, CONNECTION_FAILED);
    }

    #[test]
    fn timeout_is_distinct_from_connection_failure() {
        let verdict = interpret_failure(ProbeError::Timeout(Duration::from_secs(5))).unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.message, "No response within 5s");
    }

    #[test]
    fn other_errors_propagate() {
        assert!(interpret_failure(ProbeError::Http("decode".into())).is_err());
    }

    #[test]
    fn budget_covers_both_calls() {
        let probe = WebProbe::new(crate::mock::MockHttpTransport::healthy(), "http://h:1");
        assert_eq!(
            probe.time_budget(Duration::from_secs(30)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let probe = WebProbe::new(crate::mock::MockHttpTransport::healthy(), "http://h:1/");
        assert_eq!(probe.base_url(), "http://h:1");
    }
}
