//! Publish/subscribe probe.
//!
//! The probe subscribes first, lets the subscription settle, then publishes a
//! single [`TelemetryRecord`] from a second connection and waits for the
//! subscriber to see it. All client network activity runs on a multi-thread
//! tokio runtime owned by the probe; the probe body polls a single-slot
//! delivery signal that the message callback fills.

pub mod mqtt;

use crate::adapter::ProtocolAdapter;
use crate::error::{ProbeError, Result};
use crate::types::{ProbeVerdict, Protocol, TelemetryRecord};
use mqtt5::QoS;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use mqtt::{Mqtt5Broker, Mqtt5Session};

pub const DEFAULT_SMOKE_TOPIC: &str = "IOTS/TEST/smoke";
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RUNTIME_SHUTDOWN: Duration = Duration::from_secs(1);

/// A message handed to a subscription callback.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

pub type MessageHandler = Arc<dyn Fn(ReceivedMessage) + Send + Sync>;
pub type ConnectionEventHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle callbacks, keyed by client id.
#[derive(Clone, Default)]
pub struct ConnectionHandlers {
    pub on_connect: Option<ConnectionEventHandler>,
    pub on_disconnect: Option<ConnectionEventHandler>,
}

impl ConnectionHandlers {
    /// Handlers that only trace lifecycle events at debug level.
    #[must_use]
    pub fn tracing() -> Self {
        Self {
            on_connect: Some(Arc::new(|id| debug!(client_id = %id, "Connected"))),
            on_disconnect: Some(Arc::new(|id| debug!(client_id = %id, "Disconnected"))),
        }
    }

    pub fn connected(&self, client_id: &str) {
        if let Some(handler) = &self.on_connect {
            handler(client_id);
        }
    }

    pub fn disconnected(&self, client_id: &str) {
        if let Some(handler) = &self.on_disconnect {
            handler(client_id);
        }
    }
}

impl fmt::Debug for ConnectionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

/// Factory for broker connections.
pub trait MessageBroker: Send + Sync {
    type Session: BrokerSession;

    /// Human-readable broker address for diagnostics.
    fn address(&self) -> String;

    async fn connect(&self, client_id: &str, handlers: &ConnectionHandlers)
        -> Result<Self::Session>;
}

/// One live broker connection.
pub trait BrokerSession {
    /// Subscribes and returns once the broker acknowledged the subscription.
    async fn subscribe(&self, topic: &str, qos: QoS, on_message: MessageHandler) -> Result<()>;

    /// Publishes and returns once the delivery acknowledgment for `qos` arrived.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub topic: String,
    pub qos: QoS,
    /// Pause between the subscription acknowledgment and the publish.
    pub settle: Duration,
    pub client_id_prefix: String,
    pub worker_threads: usize,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_SMOKE_TOPIC.to_owned(),
            qos: QoS::AtLeastOnce,
            settle: DEFAULT_SETTLE,
            client_id_prefix: "smoke_test".to_owned(),
            worker_threads: 2,
        }
    }
}

/// Messaging adapter: subscribe, publish, await delivery, verify.
pub struct MessagingProbe<B> {
    broker: B,
    settings: MessagingSettings,
    handlers: ConnectionHandlers,
}

impl<B: MessageBroker> MessagingProbe<B> {
    pub fn new(broker: B, settings: MessagingSettings, handlers: ConnectionHandlers) -> Self {
        Self {
            broker,
            settings,
            handlers,
        }
    }

    async fn probe(
        &self,
        timeout: Duration,
        sessions: &OpenSessions<B::Session>,
    ) -> Result<ProbeVerdict> {
        let record = TelemetryRecord::smoke();
        let payload = record.to_json()?;
        let (on_message, mut delivered) = delivery_slot();

        let setup_deadline = Instant::now() + self.settings.settle + timeout;
        let sub_id = unique_client_id(&self.settings.client_id_prefix, "sub");
        let subscriber = within(
            setup_deadline,
            timeout,
            self.broker.connect(&sub_id, &self.handlers),
        )
        .await?;
        let subscriber = sessions.track(subscriber, &sub_id);

        self.subscribe_then_publish(
            &subscriber,
            sessions,
            on_message,
            payload,
            setup_deadline,
            timeout,
        )
        .await?;

        Ok(match await_delivery(&mut delivered, timeout).await {
            Some(payload) => verify(&payload, &record.device_id),
            None => ProbeVerdict::fail("Message not received within timeout"),
        })
    }

    async fn subscribe_then_publish(
        &self,
        subscriber: &B::Session,
        sessions: &OpenSessions<B::Session>,
        on_message: MessageHandler,
        payload: Vec<u8>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<()> {
        let topic = &self.settings.topic;
        let qos = self.settings.qos;

        within(deadline, timeout, subscriber.subscribe(topic, qos, on_message)).await?;
        debug!(%topic, ?qos, "Subscription acknowledged, settling");
        tokio::time::sleep(self.settings.settle).await;

        let pub_id = unique_client_id(&self.settings.client_id_prefix, "pub");
        let publisher = within(deadline, timeout, self.broker.connect(&pub_id, &self.handlers))
            .await?;
        let publisher = sessions.track(publisher, &pub_id);

        let result = within(
            deadline,
            timeout,
            publisher.publish(topic, payload, qos, false),
        )
        .await;
        sessions.release(&pub_id).await;
        result
    }
}

impl<B: MessageBroker> ProtocolAdapter for MessagingProbe<B> {
    fn protocol(&self) -> Protocol {
        Protocol::Messaging
    }

    fn run_probe(&self, timeout: Duration) -> Result<ProbeVerdict> {
        info!(broker = %self.broker.address(), topic = %self.settings.topic, "Testing MQTT...");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.settings.worker_threads.max(1))
            .thread_name("mqtt-probe")
            .enable_all()
            .build()
            .map_err(|e| ProbeError::Runtime(e.to_string()))?;

        let sessions = OpenSessions::default();
        let verdict = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.block_on(self.probe(timeout, &sessions))
        }));
        runtime.block_on(sessions.release_all());
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN);
        verdict.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }

    fn time_budget(&self, timeout: Duration) -> Duration {
        // setup (connect, subscribe, settle, publish) then delivery wait
        self.settings.settle + timeout * 2 + DISCONNECT_TIMEOUT * 2
    }
}

/// Builds the one-shot callback/receiver pair that carries the first
/// delivered payload to the waiting probe body.
fn delivery_slot() -> (MessageHandler, oneshot::Receiver<Vec<u8>>) {
    let (tx, rx) = oneshot::channel();
    let slot = Mutex::new(Some(tx));
    let handler: MessageHandler = Arc::new(move |message: ReceivedMessage| {
        let sender = slot.lock().ok().and_then(|mut guard| guard.take());
        if let Some(sender) = sender {
            debug!(topic = %message.topic, bytes = message.payload.len(), "Smoke message delivered");
            let _ = sender.send(message.payload);
        }
    });
    (handler, rx)
}

/// Polls the delivery slot until it is filled or `timeout` elapses.
async fn await_delivery(
    delivered: &mut oneshot::Receiver<Vec<u8>>,
    timeout: Duration,
) -> Option<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    loop {
        match delivered.try_recv() {
            Ok(payload) => return Some(payload),
            Err(TryRecvError::Closed) => return None,
            Err(TryRecvError::Empty) => {}
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

fn verify(payload: &[u8], expected_device: &str) -> ProbeVerdict {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => match value.get("device_id").and_then(serde_json::Value::as_str) {
            Some(device) if device == expected_device => {
                ProbeVerdict::pass("Message published and received successfully")
            }
            other => ProbeVerdict::fail(format!(
                "Received message content mismatch: expected device_id '{expected_device}', got {other:?}"
            )),
        },
        Err(e) => ProbeVerdict::fail(format!("Received message content mismatch: {e}")),
    }
}

async fn within<T>(
    deadline: Instant,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

/// Sessions opened during one run. Whatever is still tracked when the run
/// ends, including after a panic, is disconnected by [`release_all`].
///
/// [`release_all`]: OpenSessions::release_all
struct OpenSessions<S> {
    sessions: Mutex<Vec<(String, Arc<S>)>>,
}

impl<S> Default for OpenSessions<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
        }
    }
}

impl<S: BrokerSession> OpenSessions<S> {
    fn track(&self, session: S, client_id: &str) -> Arc<S> {
        let session = Arc::new(session);
        self.lock().push((client_id.to_owned(), Arc::clone(&session)));
        session
    }

    async fn release(&self, client_id: &str) {
        let session = {
            let mut sessions = self.lock();
            let index = sessions.iter().position(|(id, _)| id == client_id);
            index.map(|i| sessions.remove(i))
        };
        if let Some((id, session)) = session {
            release(session.as_ref(), &id).await;
        }
    }

    async fn release_all(&self) {
        let sessions = std::mem::take(&mut *self.lock());
        for (id, session) in sessions.iter().rev() {
            release(session.as_ref(), id).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Arc<S>)>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn release<S: BrokerSession>(session: &S, client_id: &str) {
    match tokio::time::timeout(DISCONNECT_TIMEOUT, session.disconnect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(client_id = %client_id, error = %e, "Disconnect failed"),
        Err(_) => warn!(client_id = %client_id, "Disconnect timed out"),
    }
}

/// Generates a unique client ID with the given prefix using a ULID suffix.
#[must_use]
pub fn unique_client_id(prefix: &str, role: &str) -> String {
    format!("{prefix}-{role}-{}", ulid::Ulid::new())
}
