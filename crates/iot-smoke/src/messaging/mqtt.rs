//! [`MessageBroker`] backed by the `mqtt5` async client.

use super::{BrokerSession, ConnectionHandlers, MessageBroker, MessageHandler, ReceivedMessage};
use crate::error::Result;
use mqtt5::{
    ConnectOptions, ConnectionEvent, Message, MqttClient, PublishOptions, QoS, SubscribeOptions,
};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Connects `mqtt5` clients to one broker URL.
#[derive(Debug, Clone)]
pub struct Mqtt5Broker {
    url: String,
    keep_alive: Duration,
}

impl Mqtt5Broker {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self::from_url(format!("mqtt://{host}:{port}"))
    }

    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

impl MessageBroker for Mqtt5Broker {
    type Session = Mqtt5Session;

    fn address(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self, client_id: &str, handlers: &ConnectionHandlers) -> Result<Mqtt5Session> {
        let options = ConnectOptions::new(client_id)
            .with_clean_start(true)
            .with_keep_alive(self.keep_alive);
        let client = MqttClient::with_options(options.clone());

        let events = handlers.clone();
        let id = client_id.to_owned();
        client
            .on_connection_event(move |event| match event {
                ConnectionEvent::Connected { .. } => events.connected(&id),
                ConnectionEvent::Disconnected { .. } => events.disconnected(&id),
                _ => {}
            })
            .await?;

        debug!(client_id = %client_id, url = %self.url, "Connecting to broker");
        client.connect_with_options(&self.url, options).await?;

        Ok(Mqtt5Session {
            client,
            client_id: client_id.to_owned(),
        })
    }
}

/// A connected `mqtt5` client.
pub struct Mqtt5Session {
    client: MqttClient,
    client_id: String,
}

impl Mqtt5Session {
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl BrokerSession for Mqtt5Session {
    async fn subscribe(&self, topic: &str, qos: QoS, on_message: MessageHandler) -> Result<()> {
        let options = SubscribeOptions {
            qos,
            ..Default::default()
        };
        let (packet_id, granted_qos) = self
            .client
            .subscribe_with_options(topic, options, move |message: Message| {
                on_message(ReceivedMessage {
                    topic: message.topic,
                    payload: message.payload,
                    qos: message.qos,
                });
            })
            .await?;
        debug!(
            client_id = %self.client_id,
            %topic,
            packet_id,
            ?granted_qos,
            "Subscription confirmed"
        );
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()> {
        let options = PublishOptions {
            qos,
            retain,
            ..Default::default()
        };
        self.client.publish_with_options(topic, payload, options).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }
}
