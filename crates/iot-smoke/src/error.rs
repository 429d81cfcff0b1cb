use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Everything that can end a probe abnormally.
///
/// None of these ever escape the [`ProbeDriver`](crate::driver::ProbeDriver):
/// they are rendered into a failing outcome carrying the `Display` text.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The broker, server or host could not be reached at all.
    #[error("Connection failed - is server running? ({target}: {reason})")]
    Unreachable { target: String, reason: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("MQTT error: {0}")]
    Messaging(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("CoAP error: {0}")]
    Coap(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start probe runtime: {0}")]
    Runtime(String),
}

impl ProbeError {
    pub fn unreachable(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unreachable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure points at the environment rather than the system
    /// under test.
    #[must_use]
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl From<mqtt5::MqttError> for ProbeError {
    fn from(err: mqtt5::MqttError) -> Self {
        match err {
            mqtt5::MqttError::Io(reason) | mqtt5::MqttError::ConnectionError(reason) => {
                Self::Unreachable {
                    target: "broker".to_owned(),
                    reason,
                }
            }
            other => Self::Messaging(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        let target = err
            .url()
            .map_or_else(|| "server".to_owned(), ToString::to_string);
        if err.is_connect() {
            Self::Unreachable {
                target,
                reason: err.to_string(),
            }
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<coap_lite::error::MessageError> for ProbeError {
    fn from(err: coap_lite::error::MessageError) -> Self {
        Self::Coap(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_message_names_connection_failure() {
        let err = ProbeError::unreachable("http://127.0.0.1:9/health", "connection refused");
        assert!(err.is_environmental());
        assert!(err.to_string().starts_with("Connection failed"));
    }

    #[test]
    fn timeout_is_not_environmental() {
        let err = ProbeError::Timeout(Duration::from_secs(5));
        assert!(!err.is_environmental());
        assert_eq!(err.to_string(), "Timeout after 5s");
    }

    #[test]
    fn mqtt_connection_errors_map_to_unreachable() {
        let err: ProbeError = mqtt5::MqttError::ConnectionError("refused".into()).into();
        assert!(err.is_environmental());
        let err: ProbeError = mqtt5::MqttError::NotConnected.into();
        assert!(!err.is_environmental());
    }
}
