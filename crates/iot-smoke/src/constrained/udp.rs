//! CoAP client over UDP using `coap-lite` for the message codec.

use super::{
    CoapConnector, CoapContext, CoapResponse, Method, Reliability, ResponseCode, DEFAULT_PORT,
};
use crate::error::{ProbeError, Result};
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_RETRANSMIT: u32 = 4;
pub const MAX_DATAGRAM: usize = 1152;
const CONTENT_FORMAT_JSON: u8 = 50;

/// Opens [`UdpCoapContext`]s.
#[derive(Debug, Clone, Copy)]
pub struct UdpCoapConnector {
    reliability: Reliability,
    ack_timeout: Duration,
}

impl Default for UdpCoapConnector {
    fn default() -> Self {
        Self {
            reliability: Reliability::NonConfirmable,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

impl UdpCoapConnector {
    #[must_use]
    pub fn new(reliability: Reliability) -> Self {
        Self {
            reliability,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }
}

impl CoapConnector for UdpCoapConnector {
    type Context = UdpCoapContext;

    async fn create_client_context(&self) -> Result<UdpCoapContext> {
        Ok(UdpCoapContext {
            reliability: self.reliability,
            ack_timeout: self.ack_timeout,
            next_message_id: AtomicU16::new(rand::random()),
            open: AtomicBool::new(true),
        })
    }
}

/// Client context. Every request binds its own ephemeral socket, which is
/// closed when the request returns.
#[derive(Debug)]
pub struct UdpCoapContext {
    reliability: Reliability,
    ack_timeout: Duration,
    next_message_id: AtomicU16,
    open: AtomicBool,
}

impl CoapContext for UdpCoapContext {
    async fn request(&self, method: Method, uri: &str, payload: Vec<u8>) -> Result<CoapResponse> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ProbeError::Coap("client context already shut down".into()));
        }

        let target = Target::parse(uri)?;
        let addr = target.resolve(uri).await?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await.map_err(|e| io_failure(e, uri))?;

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let token: [u8; 4] = rand::random();
        let request = build_request(
            method,
            &target.path,
            payload,
            self.reliability,
            message_id,
            &token,
        );
        let datagram = request.to_bytes()?;

        debug!(%addr, message_id, ?method, reliability = ?self.reliability, "Sending CoAP request");
        socket.send(&datagram).await.map_err(|e| io_failure(e, uri))?;

        self.exchange(&socket, &datagram, message_id, &token, uri).await
    }

    async fn shutdown(self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}

impl UdpCoapContext {
    async fn exchange(
        &self,
        socket: &UdpSocket,
        datagram: &[u8],
        message_id: u16,
        token: &[u8],
        uri: &str,
    ) -> Result<CoapResponse> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut wait = self.ack_timeout;
        let mut retransmits = 0;
        let mut acknowledged = false;

        loop {
            let len = match tokio::time::timeout(wait, socket.recv(&mut buf)).await {
                Ok(received) => received.map_err(|e| io_failure(e, uri))?,
                Err(_) => {
                    if self.reliability == Reliability::Confirmable
                        && !acknowledged
                        && retransmits < MAX_RETRANSMIT
                    {
                        retransmits += 1;
                        wait *= 2;
                        debug!(message_id, retransmits, "Retransmitting confirmable request");
                        socket.send(datagram).await.map_err(|e| io_failure(e, uri))?;
                    }
                    continue;
                }
            };

            let packet = match Packet::from_bytes(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(error = %e, "Ignoring malformed datagram");
                    continue;
                }
            };

            match classify(&packet, message_id, token) {
                Reply::Response => {
                    if packet.header.get_type() == MessageType::Confirmable {
                        let ack = empty_ack(packet.header.message_id).to_bytes()?;
                        socket.send(&ack).await.map_err(|e| io_failure(e, uri))?;
                    }
                    return Ok(CoapResponse {
                        code: ResponseCode(u8::from(packet.header.code)),
                        payload: packet.payload,
                    });
                }
                Reply::EmptyAck => {
                    trace!(message_id, "Request acknowledged, awaiting separate response");
                    acknowledged = true;
                }
                Reply::Reset => {
                    return Err(ProbeError::Coap("request rejected with reset".into()));
                }
                Reply::Unrelated => trace!("Ignoring unrelated datagram"),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Response,
    EmptyAck,
    Reset,
    Unrelated,
}

fn classify(packet: &Packet, message_id: u16, token: &[u8]) -> Reply {
    let header = &packet.header;
    match (header.get_type(), &header.code) {
        (MessageType::Reset, _) if header.message_id == message_id => Reply::Reset,
        (MessageType::Acknowledgement, MessageClass::Empty) if header.message_id == message_id => {
            Reply::EmptyAck
        }
        (_, MessageClass::Response(_)) if packet.get_token()[..] == token[..] => Reply::Response,
        _ => Reply::Unrelated,
    }
}

fn build_request(
    method: Method,
    path: &[String],
    payload: Vec<u8>,
    reliability: Reliability,
    message_id: u16,
    token: &[u8],
) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(match reliability {
        Reliability::NonConfirmable => MessageType::NonConfirmable,
        Reliability::Confirmable => MessageType::Confirmable,
    });
    packet.header.code = MessageClass::Request(request_type(method));
    packet.header.message_id = message_id;
    packet.set_token(token.to_vec());
    for segment in path {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    if !payload.is_empty() {
        packet.add_option(CoapOption::ContentFormat, vec![CONTENT_FORMAT_JSON]);
    }
    packet.payload = payload;
    packet
}

fn empty_ack(message_id: u16) -> Packet {
    let mut ack = Packet::new();
    ack.header.set_type(MessageType::Acknowledgement);
    ack.header.code = MessageClass::Empty;
    ack.header.message_id = message_id;
    ack
}

fn request_type(method: Method) -> RequestType {
    match method {
        Method::Get => RequestType::Get,
        Method::Post => RequestType::Post,
        Method::Put => RequestType::Put,
        Method::Delete => RequestType::Delete,
    }
}

/// Host, port and path segments of a `coap://` URI.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    path: Vec<String>,
}

impl Target {
    fn parse(uri: &str) -> Result<Self> {
        let url = reqwest::Url::parse(uri)
            .map_err(|e| ProbeError::Config(format!("invalid CoAP URI '{uri}': {e}")))?;
        if url.scheme() != "coap" {
            return Err(ProbeError::Config(format!(
                "unsupported scheme '{}' in '{uri}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::Config(format!("missing host in '{uri}'")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let path = url
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            path,
        })
    }

    /// Resolves the host, preferring an IPv4 address.
    async fn resolve(&self, uri: &str) -> Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| ProbeError::unreachable(uri, e))?
            .collect();
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ProbeError::unreachable(uri, "host resolved to no addresses"))
    }
}

fn io_failure(err: io::Error, uri: &str) -> ProbeError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
            ProbeError::unreachable(uri, err)
        }
        _ => ProbeError::Io(err),
    }
}
