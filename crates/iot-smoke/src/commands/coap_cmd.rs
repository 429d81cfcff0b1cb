use anyhow::{Context, Result};
use clap::Args;
use iot_smoke::config::{parse_duration, CoapEndpointArgs};
use iot_smoke::constrained::server::{self, ReplyStyle, TelemetryResource};
use iot_smoke::constrained::{
    CoapConnector, CoapContext, Method, Reliability, UdpCoapConnector, TELEMETRY_PATH,
};
use iot_smoke::{payload, TelemetryRecord};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{info, warn};

#[derive(Args)]
pub struct CoapServeCommand {
    #[command(flatten)]
    pub endpoint: CoapEndpointArgs,

    /// Answer ingest with a bare "OK" instead of a JSON status
    #[arg(long)]
    pub plain: bool,
}

#[derive(Args)]
pub struct CoapSendCommand {
    #[command(flatten)]
    pub endpoint: CoapEndpointArgs,

    /// Number of records to send
    #[arg(long, short = 'n', default_value_t = 10)]
    pub count: u64,

    /// Generated payload size in bytes
    #[arg(long, default_value_t = 32)]
    pub payload: usize,

    /// Device id stamped on every record
    #[arg(long, default_value = "dev-001")]
    pub device_id: String,

    /// Send requests as confirmable
    #[arg(long)]
    pub confirmable: bool,

    /// Per-request timeout (e.g., 5s, 500ms)
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

pub fn serve(cmd: CoapServeCommand) -> Result<()> {
    let reply = if cmd.plain {
        ReplyStyle::PlainOk
    } else {
        ReplyStyle::Json
    };

    runtime()?.block_on(async {
        let addr = cmd.endpoint.bind_addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let resource = TelemetryResource::new(reply);
        println!("✓ CoAP server listening on coap://{addr}/{TELEMETRY_PATH} (Ctrl+C to stop)");

        server::serve(socket, resource.clone(), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("CoAP server failed")?;

        println!("\n✓ Stopped after {} ingest requests", resource.requests());
        Ok(())
    })
}

pub fn send(cmd: CoapSendCommand) -> Result<()> {
    let reliability = if cmd.confirmable {
        Reliability::Confirmable
    } else {
        Reliability::NonConfirmable
    };
    let uri = format!(
        "coap://{}:{}/{TELEMETRY_PATH}",
        cmd.endpoint.host, cmd.endpoint.port
    );
    let body = payload::generate(cmd.payload);

    runtime()?.block_on(async {
        let context = UdpCoapConnector::new(reliability)
            .create_client_context()
            .await
            .context("Failed to create CoAP client context")?;

        let mut delivered = 0u64;
        for seq in 0..cmd.count {
            let record = TelemetryRecord::sample(&cmd.device_id, seq, &body).to_json()?;
            match tokio::time::timeout(cmd.timeout, context.request(Method::Post, &uri, record))
                .await
            {
                Ok(Ok(response)) => {
                    if response.code.is_success() {
                        delivered += 1;
                    }
                    info!(
                        seq,
                        code = %response.code,
                        body = %String::from_utf8_lossy(&response.payload),
                        "Response"
                    );
                }
                Ok(Err(e)) => warn!(seq, error = %e, "Request failed"),
                Err(_) => warn!(seq, timeout = ?cmd.timeout, "No response"),
            }
        }
        context.shutdown().await?;

        println!("✓ Delivered {delivered}/{} records to {uri}", cmd.count);
        if delivered < cmd.count {
            anyhow::bail!("{} of {} records were not accepted", cmd.count - delivered, cmd.count);
        }
        Ok(())
    })
}
