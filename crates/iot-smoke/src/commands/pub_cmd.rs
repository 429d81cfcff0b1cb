use anyhow::{Context, Result};
use clap::Args;
use iot_smoke::config::{parse_qos, MqttEndpointArgs, DEFAULT_TELEMETRY_TOPIC};
use iot_smoke::messaging::{
    unique_client_id, BrokerSession, ConnectionHandlers, MessageBroker, Mqtt5Broker,
};
use iot_smoke::{payload, TelemetryRecord};
use mqtt5::QoS;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Args)]
pub struct PubCommand {
    #[command(flatten)]
    pub broker: MqttEndpointArgs,

    /// MQTT topic to publish to
    #[arg(long, short, env = "MQTT_TOPIC", default_value = DEFAULT_TELEMETRY_TOPIC)]
    pub topic: String,

    /// Number of messages to publish
    #[arg(long, short = 'n', default_value_t = 10)]
    pub count: u64,

    /// Messages per second (0 = as fast as possible)
    #[arg(long, default_value_t = 0.0)]
    pub rate: f64,

    /// Generated payload size in bytes
    #[arg(long, default_value_t = 32)]
    pub payload: usize,

    /// Quality of Service level (0, 1, or 2)
    #[arg(long, short, env = "MQTT_QOS", default_value = "1", value_parser = parse_qos)]
    pub qos: QoS,

    /// Retain messages
    #[arg(long, short)]
    pub retain: bool,

    /// Device id stamped on every record
    #[arg(long, default_value = "dev-001")]
    pub device_id: String,
}

pub fn execute(cmd: PubCommand) -> Result<()> {
    if !cmd.rate.is_finite() || cmd.rate < 0.0 {
        anyhow::bail!("--rate must be a non-negative number, got: {}", cmd.rate);
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(publish(cmd))
}

async fn publish(cmd: PubCommand) -> Result<()> {
    let broker = Mqtt5Broker::from_url(cmd.broker.url());
    info!("Connecting to {}...", broker.address());
    let elapsed = publish_with(&broker, &cmd).await?;

    println!(
        "✓ Published {} messages to '{}' in {:.2?}",
        cmd.count, cmd.topic, elapsed
    );
    Ok(())
}

/// Connects, publishes every record and disconnects, also when a publish fails.
async fn publish_with<B: MessageBroker>(broker: &B, cmd: &PubCommand) -> Result<Duration> {
    let client_id = unique_client_id("iot-smoke", "pub");
    let session = broker
        .connect(&client_id, &ConnectionHandlers::tracing())
        .await
        .context("Failed to connect to MQTT broker")?;

    let published = publish_all(&session, cmd).await;
    let disconnected = session.disconnect().await;
    let elapsed = published?;
    disconnected.context("Failed to disconnect from MQTT broker")?;
    Ok(elapsed)
}

async fn publish_all<S: BrokerSession>(session: &S, cmd: &PubCommand) -> Result<Duration> {
    let body = payload::generate(cmd.payload);
    let interval = (cmd.rate > 0.0)
        .then(|| Duration::try_from_secs_f64(1.0 / cmd.rate).ok())
        .flatten();
    let started = Instant::now();

    for seq in 0..cmd.count {
        let record = TelemetryRecord::sample(&cmd.device_id, seq, &body);
        session
            .publish(&cmd.topic, record.to_json()?, cmd.qos, cmd.retain)
            .await
            .with_context(|| format!("Failed to publish message {seq}"))?;
        debug!(seq, topic = %cmd.topic, qos = ?cmd.qos, "Published");
        if let Some(interval) = interval {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(started.elapsed())
}
