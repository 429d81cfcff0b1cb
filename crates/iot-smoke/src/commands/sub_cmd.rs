use anyhow::{Context, Result};
use clap::Args;
use iot_smoke::config::{parse_qos, MqttEndpointArgs, DEFAULT_TELEMETRY_TOPIC};
use iot_smoke::messaging::{
    unique_client_id, BrokerSession, ConnectionHandlers, MessageBroker, MessageHandler,
    Mqtt5Broker, ReceivedMessage,
};
use mqtt5::QoS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Args)]
pub struct SubCommand {
    #[command(flatten)]
    pub broker: MqttEndpointArgs,

    /// MQTT topic filter to subscribe to
    #[arg(long, short, env = "MQTT_TOPIC", default_value = DEFAULT_TELEMETRY_TOPIC)]
    pub topic: String,

    /// Quality of Service level (0, 1, or 2)
    #[arg(long, short, env = "MQTT_QOS", default_value = "1", value_parser = parse_qos)]
    pub qos: QoS,

    /// Exit after receiving this many messages (0 = run until Ctrl+C)
    #[arg(long, short = 'n', default_value_t = 0)]
    pub count: u64,
}

pub fn execute(cmd: SubCommand) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(subscribe(cmd))
}

async fn subscribe(cmd: SubCommand) -> Result<()> {
    let broker = Mqtt5Broker::from_url(cmd.broker.url());
    let client_id = unique_client_id("iot-smoke", "sub");
    let handlers = ConnectionHandlers {
        on_connect: Some(Arc::new(|id: &str| info!(client_id = %id, "Connected to broker"))),
        on_disconnect: Some(Arc::new(|id: &str| {
            warn!(client_id = %id, "Disconnected from broker");
        })),
    };

    info!("Connecting to {}...", broker.address());
    let session = broker
        .connect(&client_id, &handlers)
        .await
        .context("Failed to connect to MQTT broker")?;

    let target = cmd.count;
    let received = Arc::new(AtomicU64::new(0));
    let done = Arc::new(Notify::new());

    let on_message: MessageHandler = {
        let received = Arc::clone(&received);
        let done = Arc::clone(&done);
        Arc::new(move |message: ReceivedMessage| {
            let count = received.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                topic = %message.topic,
                qos = ?message.qos,
                bytes = message.payload.len(),
                count,
                "Message received"
            );
            println!(
                "{}: {}",
                message.topic,
                String::from_utf8_lossy(&message.payload)
            );
            if target > 0 && count >= target {
                done.notify_one();
            }
        })
    };

    session
        .subscribe(&cmd.topic, cmd.qos, on_message)
        .await
        .with_context(|| format!("Failed to subscribe to '{}'", cmd.topic))?;
    println!(
        "✓ Subscribed to '{}' - waiting for messages (Ctrl+C to exit)",
        cmd.topic
    );

    tokio::select! {
        () = done.notified() => println!("✓ Received {target} messages, exiting"),
        _ = signal::ctrl_c() => println!("\n✓ Received Ctrl+C, disconnecting..."),
    }

    session.disconnect().await?;
    info!(
        received = received.load(Ordering::Relaxed),
        "Subscriber stopped"
    );
    Ok(())
}
