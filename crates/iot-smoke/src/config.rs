//! Command-line arguments shared by the binary's subcommands.
//!
//! Every setting can also come from the environment; the defaults match a
//! broker, HTTP server and CoAP server all running on `localhost`.

use crate::harness::ExecutionMode;
use crate::messaging::{MessagingSettings, DEFAULT_SMOKE_TOPIC};
use crate::types::Protocol;
use clap::{Args, ValueEnum};
use mqtt5::QoS;
use std::time::Duration;

pub const DEFAULT_TELEMETRY_TOPIC: &str = "IOTS/LAB/telemetry";

pub fn parse_qos(s: &str) -> Result<QoS, String> {
    match s {
        "0" => Ok(QoS::AtMostOnce),
        "1" => Ok(QoS::AtLeastOnce),
        "2" => Ok(QoS::ExactlyOnce),
        _ => Err(format!("QoS must be 0, 1, or 2, got: {s}")),
    }
}

/// Accepts bare seconds (`5`) or a humantime duration (`500ms`, `1m`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Args, Debug, Clone)]
pub struct MqttEndpointArgs {
    /// MQTT broker host
    #[arg(
        id = "mqtt_host",
        long = "mqtt-host",
        env = "MQTT_BROKER_HOST",
        default_value = "localhost",
    )]
    pub host: String,

    /// MQTT broker port
    #[arg(id = "mqtt_port", long = "mqtt-port", env = "MQTT_PORT", default_value_t = 1883)]
    pub port: u16,
}

impl MqttEndpointArgs {
    #[must_use]
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

#[derive(Args, Debug, Clone)]
pub struct HttpEndpointArgs {
    /// HTTP server host
    #[arg(id = "http_host", long = "http-host", env = "HTTP_HOST", default_value = "localhost")]
    pub host: String,

    /// HTTP server port
    #[arg(id = "http_port", long = "http-port", env = "HTTP_PORT", default_value_t = 8080)]
    pub port: u16,
}

impl HttpEndpointArgs {
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Args, Debug, Clone)]
pub struct CoapEndpointArgs {
    /// CoAP server host
    #[arg(id = "coap_host", long = "coap-host", env = "COAP_HOST", default_value = "localhost")]
    pub host: String,

    /// CoAP server port
    #[arg(
        id = "coap_port",
        long = "coap-port",
        env = "COAP_PORT",
        default_value_t = crate::constrained::DEFAULT_PORT,
    )]
    pub port: u16,
}

impl CoapEndpointArgs {
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct SmokeArgs {
    #[command(flatten)]
    pub mqtt: MqttEndpointArgs,

    #[command(flatten)]
    pub http: HttpEndpointArgs,

    #[command(flatten)]
    pub coap: CoapEndpointArgs,

    /// Topic used for the MQTT round trip
    #[arg(long, env = "SMOKE_MQTT_TOPIC", default_value = DEFAULT_SMOKE_TOPIC)]
    pub topic: String,

    /// Quality of Service level (0, 1, or 2)
    #[arg(long, env = "MQTT_QOS", default_value = "1", value_parser = parse_qos)]
    pub qos: QoS,

    /// Per-probe timeout (e.g., 5s, 500ms)
    #[arg(long, env = "SMOKE_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Pause between subscribing and publishing
    #[arg(long, env = "SMOKE_SETTLE", default_value = "1s", value_parser = parse_duration)]
    pub settle: Duration,

    /// Extra time before an unresponsive probe is abandoned
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub grace: Duration,

    /// Upper bound for the whole run; probes not started by then are skipped
    #[arg(long, env = "SMOKE_DEADLINE", value_parser = parse_duration)]
    pub deadline: Option<Duration>,

    /// Only test these protocols (comma-separated: mqtt, http, coap)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<Protocol>,

    /// Run the probes concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Send the CoAP request as confirmable
    #[arg(long)]
    pub confirmable: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl SmokeArgs {
    /// Selected protocols in run order, without duplicates.
    #[must_use]
    pub fn protocols(&self) -> Vec<Protocol> {
        if self.only.is_empty() {
            return Protocol::ALL.to_vec();
        }
        let mut selected = self.only.clone();
        selected.sort();
        selected.dedup();
        selected
    }

    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.parallel {
            ExecutionMode::Concurrent
        } else {
            ExecutionMode::Sequential
        }
    }

    #[must_use]
    pub fn messaging_settings(&self) -> MessagingSettings {
        MessagingSettings {
            topic: self.topic.clone(),
            qos: self.qos,
            settle: self.settle,
            ..MessagingSettings::default()
        }
    }
}
