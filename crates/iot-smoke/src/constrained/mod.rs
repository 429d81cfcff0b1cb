//! Request/response probe over CoAP.
//!
//! Each probe builds its own current-thread tokio runtime, creates a client
//! context on it, performs one `POST`, shuts the context down and drops the
//! runtime before returning. Nothing outlives the call.

pub mod server;
pub mod udp;

use crate::adapter::ProtocolAdapter;
use crate::error::{ProbeError, Result};
use crate::types::{ProbeVerdict, Protocol, TelemetryRecord};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use udp::{UdpCoapConnector, UdpCoapContext};

pub const DEFAULT_PORT: u16 = 5683;
pub const TELEMETRY_PATH: &str = "telemetry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Whether requests ask the peer for an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reliability {
    #[default]
    NonConfirmable,
    Confirmable,
}

/// A CoAP response code, kept as the raw `class.detail` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const CHANGED: Self = Self(0x44);
    pub const CONTENT: Self = Self(0x45);
    pub const BAD_REQUEST: Self = Self(0x80);
    pub const NOT_FOUND: Self = Self(0x84);
    pub const METHOD_NOT_ALLOWED: Self = Self(0x85);
    pub const INTERNAL_SERVER_ERROR: Self = Self(0xA0);

    #[must_use]
    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    #[must_use]
    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapResponse {
    pub code: ResponseCode,
    pub payload: Vec<u8>,
}

/// Creates client contexts.
pub trait CoapConnector: Send + Sync {
    type Context: CoapContext;

    async fn create_client_context(&self) -> Result<Self::Context>;
}

/// A client context scoped to one probe.
pub trait CoapContext {
    async fn request(&self, method: Method, uri: &str, payload: Vec<u8>) -> Result<CoapResponse>;

    async fn shutdown(self) -> Result<()>;
}

/// Constrained adapter: one `POST /telemetry` on a private event loop.
pub struct ConstrainedProbe<C> {
    connector: C,
    uri: String,
}

impl<C: CoapConnector> ConstrainedProbe<C> {
    pub fn new(connector: C, host: &str, port: u16) -> Self {
        Self {
            connector,
            uri: format!("coap://{host}:{port}/{TELEMETRY_PATH}"),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn probe(&self, timeout: Duration) -> Result<ProbeVerdict> {
        let payload = TelemetryRecord::smoke().to_json()?;
        let context = self.connector.create_client_context().await?;

        let response =
            tokio::time::timeout(timeout, context.request(Method::Post, &self.uri, payload)).await;

        if let Err(e) = context.shutdown().await {
            warn!(error = %e, "CoAP context shutdown failed");
        }

        match response {
            Ok(Ok(response)) => Ok(judge_response(&response)),
            Ok(Err(ProbeError::Unreachable { target, reason })) => {
                debug!(%target, %reason, "CoAP server unreachable");
                Ok(ProbeVerdict::early_fail(format!(
                    "Connection failed - is server running? ({reason})"
                )))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(ProbeVerdict::fail("No response within timeout")),
        }
    }
}

impl<C: CoapConnector> ProtocolAdapter for ConstrainedProbe<C> {
    fn protocol(&self) -> Protocol {
        Protocol::Constrained
    }

    fn run_probe(&self, timeout: Duration) -> Result<ProbeVerdict> {
        info!(uri = %self.uri, "Testing CoAP...");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProbeError::Runtime(e.to_string()))?;
        runtime.block_on(self.probe(timeout))
    }
}

/// Judges a response.
///
/// A success code with a body that is not a JSON object still passes, with a
/// qualifying message: the exchange worked even though the body could not be
/// checked.
fn judge_response(response: &CoapResponse) -> ProbeVerdict {
    if !response.code.is_success() {
        return ProbeVerdict::fail(format!("Request failed: {}", response.code));
    }
    match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&response.payload)
    {
        Ok(body) if body.get("status").and_then(|s| s.as_str()) == Some("success") => {
            ProbeVerdict::pass("Request sent and response received successfully")
        }
        Ok(body) => ProbeVerdict::fail(format!(
            "Unexpected response: {}",
            serde_json::Value::Object(body)
        )),
        Err(_) => ProbeVerdict::pass("Response received (parsing failed)"),
    }
}
