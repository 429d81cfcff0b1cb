//! Data carried through a harness run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Device identifier stamped on every smoke-test record.
pub const SMOKE_DEVICE_ID: &str = "smoke_test";

/// The transports under test, in the order the harness runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Messaging,
    Web,
    Constrained,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Messaging, Protocol::Web, Protocol::Constrained];

    /// Short wire-protocol name used in reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Messaging => "MQTT",
            Self::Web => "HTTP",
            Self::Constrained => "CoAP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mqtt" | "messaging" => Ok(Self::Messaging),
            "http" | "web" => Ok(Self::Web),
            "coap" | "constrained" => Ok(Self::Constrained),
            _ => Err(format!("unknown protocol '{s}', expected mqtt, http or coap")),
        }
    }
}

/// How an adapter's probe ended when it ended normally.
///
/// `completed` records whether the probe got far enough to time the full
/// exchange; short-circuits (failed health check, refused connection) leave it
/// `false` and the outcome carries no duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeVerdict {
    pub passed: bool,
    pub message: String,
    pub completed: bool,
}

impl ProbeVerdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            completed: true,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            completed: true,
        }
    }

    /// A failure detected before the exchange could be timed.
    pub fn early_fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            completed: false,
        }
    }
}

/// Result of one probe execution. Built once by the driver and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    protocol: Protocol,
    passed: bool,
    message: String,
    duration_millis: u64,
}

impl ProbeOutcome {
    pub(crate) fn new(
        protocol: Protocol,
        passed: bool,
        message: impl Into<String>,
        duration: Option<Duration>,
    ) -> Self {
        let duration_millis = duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            protocol,
            passed,
            message: message.into(),
            duration_millis,
        }
    }

    pub(crate) fn failed(protocol: Protocol, message: impl Into<String>) -> Self {
        Self::new(protocol, false, message, None)
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.passed
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn duration_millis(&self) -> u64 {
        self.duration_millis
    }
}

/// The structured record every probe and publisher sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub test: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl TelemetryRecord {
    /// The record sent by every smoke probe.
    #[must_use]
    pub fn smoke() -> Self {
        Self {
            device_id: SMOKE_DEVICE_ID.to_owned(),
            timestamp: now_rfc3339(),
            test: true,
            seq: None,
            payload: None,
        }
    }

    /// A regular telemetry sample, as produced by the standalone publishers.
    #[must_use]
    pub fn sample(device_id: &str, seq: u64, payload: &[u8]) -> Self {
        Self {
            device_id: device_id.to_owned(),
            timestamp: now_rfc3339(),
            test: false,
            seq: Some(seq),
            payload: Some(String::from_utf8_lossy(payload).into_owned()),
        }
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
