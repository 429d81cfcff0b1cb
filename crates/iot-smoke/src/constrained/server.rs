//! Minimal CoAP telemetry server.
//!
//! Serves a single `/telemetry` resource that accepts `POST`. Confirmable
//! requests get a piggybacked acknowledgment; non-confirmable requests get a
//! non-confirmable response.

use super::udp::MAX_DATAGRAM;
use super::TELEMETRY_PATH;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use serde_json::json;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// What a successful ingest answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyStyle {
    /// `{"status":"success","counter":n}`
    #[default]
    Json,
    /// A bare `OK`, for clients that only check the response code.
    PlainOk,
}

/// The `/telemetry` resource and its request counter.
#[derive(Debug, Clone, Default)]
pub struct TelemetryResource {
    reply: ReplyStyle,
    requests: Arc<AtomicU64>,
    next_message_id: Arc<AtomicU16>,
}

impl TelemetryResource {
    #[must_use]
    pub fn new(reply: ReplyStyle) -> Self {
        Self {
            reply,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Builds the response for one request, or `None` if nothing should be
    /// sent back.
    #[must_use]
    pub fn respond(&self, request: &Packet) -> Option<Packet> {
        let request_type = request.header.get_type();
        let MessageClass::Request(method) = &request.header.code else {
            // empty confirmable message is a ping
            if request_type == MessageType::Confirmable
                && request.header.code == MessageClass::Empty
            {
                let mut reset = Packet::new();
                reset.header.set_type(MessageType::Reset);
                reset.header.code = MessageClass::Empty;
                reset.header.message_id = request.header.message_id;
                return Some(reset);
            }
            return None;
        };

        let path = uri_path(request);
        let (code, payload) = if path != TELEMETRY_PATH {
            (ResponseType::NotFound, b"Not Found".to_vec())
        } else if *method != RequestType::Post {
            (ResponseType::MethodNotAllowed, b"Method Not Allowed".to_vec())
        } else {
            let counter = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(counter, bytes = request.payload.len(), "Ingested CoAP telemetry");
            (ResponseType::Content, self.body(counter))
        };

        let mut response = Packet::new();
        if request_type == MessageType::Confirmable {
            response.header.set_type(MessageType::Acknowledgement);
            response.header.message_id = request.header.message_id;
        } else {
            response.header.set_type(MessageType::NonConfirmable);
            response.header.message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        }
        response.header.code = MessageClass::Response(code);
        response.set_token(request.get_token().to_vec());
        response.payload = payload;
        Some(response)
    }

    fn body(&self, counter: u64) -> Vec<u8> {
        match self.reply {
            ReplyStyle::Json => json!({ "status": "success", "counter": counter })
                .to_string()
                .into_bytes(),
            ReplyStyle::PlainOk => b"OK".to_vec(),
        }
    }
}

/// Serves `resource` on `socket` until `shutdown` resolves.
pub async fn serve(
    socket: UdpSocket,
    resource: TelemetryResource,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    if let Ok(addr) = socket.local_addr() {
        info!("CoAP server on coap://{addr}/{TELEMETRY_PATH}");
    }
    tokio::pin!(shutdown);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            () = &mut shutdown => return Ok(()),
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                        debug!(error = %e, "Peer went away");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let request = match Packet::from_bytes(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        debug!(%peer, error = %e, "Dropping malformed datagram");
                        continue;
                    }
                };
                let Some(response) = resource.respond(&request) else {
                    continue;
                };
                match response.to_bytes() {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, peer).await {
                            warn!(%peer, error = %e, "Failed to send CoAP response");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode CoAP response"),
                }
            }
        }
    }
}

fn uri_path(packet: &Packet) -> String {
    packet
        .get_option(CoapOption::UriPath)
        .map(|segments| {
            segments
                .iter()
                .map(|segment| String::from_utf8_lossy(segment).into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: MessageType, method: RequestType, path: &str) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.code = MessageClass::Request(method);
        packet.header.message_id = 42;
        packet.set_token(vec![9, 8, 7]);
        packet.add_option(CoapOption::UriPath, path.as_bytes().to_vec());
        packet.payload = br#"{"device_id":"smoke_test"}"#.to_vec();
        packet
    }

    #[test]
    fn post_to_telemetry_returns_content_with_marker() {
        let resource = TelemetryResource::default();
        let response = resource
            .respond(&request(MessageType::NonConfirmable, RequestType::Post, "telemetry"))
            .unwrap();
        assert_eq!(response.header.code, MessageClass::Response(ResponseType::Content));
        assert_eq!(response.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(response.get_token()[..], [9, 8, 7]);
        let body: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["counter"], 1);
        assert_eq!(resource.requests(), 1);
    }

    #[test]
    fn confirmable_request_gets_piggybacked_ack() {
        let response = TelemetryResource::default()
            .respond(&request(MessageType::Confirmable, RequestType::Post, "telemetry"))
            .unwrap();
        assert_eq!(response.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(response.header.message_id, 42);
    }

    #[test]
    fn unknown_path_and_method_are_rejected() {
        let resource = TelemetryResource::default();
        let missing = resource
            .respond(&request(MessageType::NonConfirmable, RequestType::Post, "other"))
            .unwrap();
        assert_eq!(missing.header.code, MessageClass::Response(ResponseType::NotFound));

        let wrong_method = resource
            .respond(&request(MessageType::NonConfirmable, RequestType::Get, "telemetry"))
            .unwrap();
        assert_eq!(
            wrong_method.header.code,
            MessageClass::Response(ResponseType::MethodNotAllowed)
        );
        assert_eq!(resource.requests(), 0);
    }

    #[test]
    fn plain_reply_style_answers_ok() {
        let response = TelemetryResource::new(ReplyStyle::PlainOk)
            .respond(&request(MessageType::NonConfirmable, RequestType::Post, "telemetry"))
            .unwrap();
        assert_eq!(response.payload, b"OK");
    }
}
