//! In-memory transport collaborators.
//!
//! Each mock records what the adapter asked of it so tests can assert on the
//! exchange as well as on the resulting verdict.

use crate::constrained::{CoapConnector, CoapContext, CoapResponse, Method, ResponseCode};
use crate::error::{ProbeError, Result};
use crate::messaging::{
    BrokerSession, ConnectionHandlers, MessageBroker, MessageHandler, ReceivedMessage,
};
use crate::web::{HttpResponse, HttpTransport};
use mqtt5::QoS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect { client_id: String },
    Subscribe { client_id: String, topic: String },
    Publish { client_id: String, topic: String, payload_len: usize },
    Disconnect { client_id: String },
}

/// How a [`MockBroker`] treats the traffic it sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerBehavior {
    /// Delivers every publish to matching subscribers unchanged.
    #[default]
    Echo,
    /// Delivers a different record than the one published.
    Tamper,
    /// Acknowledges publishes but never delivers them.
    Silent,
    /// Refuses every connection.
    Refuse,
    /// Panics while handling a publish.
    PanicOnPublish,
    /// Fails every publish with an error.
    RejectPublish,
}

struct Subscription {
    client_id: String,
    topic: String,
    handler: MessageHandler,
}

struct BrokerState {
    behavior: BrokerBehavior,
    subscriptions: Mutex<Vec<Subscription>>,
    calls: Mutex<Vec<MockCall>>,
}

/// A broker that lives in memory and routes by exact topic match.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new(BrokerBehavior::default())
    }
}

impl MockBroker {
    #[must_use]
    pub fn new(behavior: BrokerBehavior) -> Self {
        Self {
            state: Arc::new(BrokerState {
                behavior,
                subscriptions: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state.calls).clone()
    }

    /// Connections opened and not yet disconnected.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        let calls = lock(&self.state.calls);
        let connects = calls
            .iter()
            .filter(|c| matches!(c, MockCall::Connect { .. }))
            .count();
        let disconnects = calls
            .iter()
            .filter(|c| matches!(c, MockCall::Disconnect { .. }))
            .count();
        connects.saturating_sub(disconnects)
    }

    /// Subscriptions held by sessions that are still connected.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.state.subscriptions).len()
    }

    fn record(&self, call: MockCall) {
        lock(&self.state.calls).push(call);
    }

    fn deliver(&self, topic: &str, payload: Vec<u8>, qos: QoS) {
        let handlers: Vec<MessageHandler> = lock(&self.state.subscriptions)
            .iter()
            .filter(|sub| sub.topic == topic)
            .map(|sub| Arc::clone(&sub.handler))
            .collect();
        for handler in handlers {
            handler(ReceivedMessage {
                topic: topic.to_owned(),
                payload: payload.clone(),
                qos,
            });
        }
    }
}

impl std::fmt::Debug for MockBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBroker")
            .field("behavior", &self.state.behavior)
            .finish_non_exhaustive()
    }
}

impl MessageBroker for MockBroker {
    type Session = MockSession;

    fn address(&self) -> String {
        "mock://broker".to_owned()
    }

    async fn connect(&self, client_id: &str, handlers: &ConnectionHandlers) -> Result<MockSession> {
        if self.state.behavior == BrokerBehavior::Refuse {
            return Err(ProbeError::unreachable(self.address(), "connection refused"));
        }
        self.record(MockCall::Connect {
            client_id: client_id.to_owned(),
        });
        handlers.connected(client_id);
        Ok(MockSession {
            broker: self.clone(),
            client_id: client_id.to_owned(),
            handlers: handlers.clone(),
        })
    }
}

pub struct MockSession {
    broker: MockBroker,
    client_id: String,
    handlers: ConnectionHandlers,
}

impl BrokerSession for MockSession {
    async fn subscribe(&self, topic: &str, _qos: QoS, on_message: MessageHandler) -> Result<()> {
        self.broker.record(MockCall::Subscribe {
            client_id: self.client_id.clone(),
            topic: topic.to_owned(),
        });
        lock(&self.broker.state.subscriptions).push(Subscription {
            client_id: self.client_id.clone(),
            topic: topic.to_owned(),
            handler: on_message,
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, _retain: bool) -> Result<()> {
        self.broker.record(MockCall::Publish {
            client_id: self.client_id.clone(),
            topic: topic.to_owned(),
            payload_len: payload.len(),
        });
        match self.broker.state.behavior {
            BrokerBehavior::Echo => self.broker.deliver(topic, payload, qos),
            BrokerBehavior::Tamper => {
                let forged = br#"{"device_id":"intruder","test":true}"#.to_vec();
                self.broker.deliver(topic, forged, qos);
            }
            BrokerBehavior::PanicOnPublish => panic!("mock broker failed while routing"),
            BrokerBehavior::RejectPublish => {
                return Err(ProbeError::Messaging("publish rejected".to_owned()));
            }
            BrokerBehavior::Silent | BrokerBehavior::Refuse => {}
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        lock(&self.broker.state.subscriptions).retain(|sub| sub.client_id != self.client_id);
        self.broker.record(MockCall::Disconnect {
            client_id: self.client_id.clone(),
        });
        self.handlers.disconnected(&self.client_id);
        Ok(())
    }
}

/// Canned answer for one HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockHttpReply {
    Respond(HttpResponse),
    Refuse,
    Timeout,
    Panic,
}

impl MockHttpReply {
    fn json(status: u16, body: &str) -> Self {
        Self::Respond(HttpResponse {
            status,
            body: body.to_owned(),
        })
    }

    fn resolve(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        match self {
            Self::Respond(response) => Ok(response.clone()),
            Self::Refuse => Err(ProbeError::unreachable(url, "connection refused")),
            Self::Timeout => Err(ProbeError::Timeout(timeout)),
            Self::Panic => panic!("mock transport failed on {url}"),
        }
    }
}

/// Blocking HTTP transport with fixed replies for `/health` and `/ingest`.
#[derive(Debug, Clone)]
pub struct MockHttpTransport {
    health: MockHttpReply,
    ingest: MockHttpReply,
    latency: Duration,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockHttpTransport {
    #[must_use]
    pub fn new(health: MockHttpReply, ingest: MockHttpReply) -> Self {
        Self {
            health,
            ingest,
            latency: Duration::ZERO,
            requests: Arc::default(),
        }
    }

    /// Healthy server that acknowledges ingest with the success marker.
    #[must_use]
    pub fn healthy() -> Self {
        Self::new(
            MockHttpReply::json(200, r#"{"status":"ok"}"#),
            MockHttpReply::json(200, r#"{"status":"success","counter":1}"#),
        )
    }

    /// Nothing listening.
    #[must_use]
    pub fn refused() -> Self {
        Self::new(MockHttpReply::Refuse, MockHttpReply::Refuse)
    }

    #[must_use]
    pub fn with_health(mut self, reply: MockHttpReply) -> Self {
        self.health = reply;
        self
    }

    #[must_use]
    pub fn with_health_status(self, status: u16) -> Self {
        self.with_health(MockHttpReply::json(status, ""))
    }

    #[must_use]
    pub fn with_ingest(mut self, reply: MockHttpReply) -> Self {
        self.ingest = reply;
        self
    }

    #[must_use]
    pub fn with_ingest_response(self, status: u16, body: &str) -> Self {
        self.with_ingest(MockHttpReply::json(status, body))
    }

    /// Delays every reply by `latency`, still inside the per-call timeout.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `METHOD url` for every request seen, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

impl HttpTransport for MockHttpTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse> {
        lock(&self.requests).push(format!("GET {url}"));
        std::thread::sleep(self.latency);
        self.health.resolve(url, timeout)
    }

    fn post_json(&self, url: &str, _body: &[u8], timeout: Duration) -> Result<HttpResponse> {
        lock(&self.requests).push(format!("POST {url}"));
        std::thread::sleep(self.latency);
        self.ingest.resolve(url, timeout)
    }
}

/// How a [`MockCoapConnector`]'s contexts answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoapBehavior {
    Respond(CoapResponse),
    /// Never answers.
    Silent,
    Refuse,
    /// Fails to create a client context at all.
    FailCreate,
}

/// CoAP connector whose contexts answer from a script and count shutdowns.
#[derive(Debug, Clone)]
pub struct MockCoapConnector {
    behavior: CoapBehavior,
    requests: Arc<Mutex<Vec<(Method, String)>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl MockCoapConnector {
    #[must_use]
    pub fn new(behavior: CoapBehavior) -> Self {
        Self {
            behavior,
            requests: Arc::default(),
            shutdowns: Arc::default(),
        }
    }

    /// Answers `2.05` with the success marker.
    #[must_use]
    pub fn success() -> Self {
        Self::respond(ResponseCode::CONTENT, br#"{"status":"success"}"#)
    }

    #[must_use]
    pub fn respond(code: ResponseCode, payload: &[u8]) -> Self {
        Self::new(CoapBehavior::Respond(CoapResponse {
            code,
            payload: payload.to_vec(),
        }))
    }

    #[must_use]
    pub fn silent() -> Self {
        Self::new(CoapBehavior::Silent)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<(Method, String)> {
        lock(&self.requests).clone()
    }

    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl CoapConnector for MockCoapConnector {
    type Context = MockCoapContext;

    async fn create_client_context(&self) -> Result<MockCoapContext> {
        if self.behavior == CoapBehavior::FailCreate {
            return Err(ProbeError::Coap("failed to create client context".into()));
        }
        Ok(MockCoapContext {
            connector: self.clone(),
        })
    }
}

pub struct MockCoapContext {
    connector: MockCoapConnector,
}

impl CoapContext for MockCoapContext {
    async fn request(&self, method: Method, uri: &str, _payload: Vec<u8>) -> Result<CoapResponse> {
        lock(&self.connector.requests).push((method, uri.to_owned()));
        match &self.connector.behavior {
            CoapBehavior::Respond(response) => Ok(response.clone()),
            CoapBehavior::Silent => std::future::pending().await,
            CoapBehavior::Refuse => Err(ProbeError::unreachable(uri, "connection refused")),
            CoapBehavior::FailCreate => Err(ProbeError::Coap("no context".into())),
        }
    }

    async fn shutdown(self) -> Result<()> {
        self.connector.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
