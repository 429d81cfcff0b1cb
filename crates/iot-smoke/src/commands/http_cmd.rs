use anyhow::{Context, Result};
use clap::Args;
use iot_smoke::config::{parse_duration, HttpEndpointArgs};
use iot_smoke::web::server::{self, IngestState};
use iot_smoke::web::{HttpTransport, ReqwestTransport, INGEST_PATH};
use iot_smoke::{payload, TelemetryRecord};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Args)]
pub struct HttpServeCommand {
    #[command(flatten)]
    pub endpoint: HttpEndpointArgs,
}

#[derive(Args)]
pub struct HttpSendCommand {
    #[command(flatten)]
    pub endpoint: HttpEndpointArgs,

    /// Number of records to send
    #[arg(long, short = 'n', default_value_t = 10)]
    pub count: u64,

    /// Generated payload size in bytes
    #[arg(long, default_value_t = 32)]
    pub payload: usize,

    /// Device id stamped on every record
    #[arg(long, default_value = "dev-001")]
    pub device_id: String,

    /// Per-request timeout (e.g., 5s, 500ms)
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,
}

pub fn serve(cmd: HttpServeCommand) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let addr = cmd.endpoint.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let state = IngestState::default();
        println!("✓ HTTP ingest server listening on http://{addr} (Ctrl+C to stop)");

        server::serve(listener, state.clone(), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;

        println!("\n✓ Stopped after {} ingest requests", state.requests());
        Ok(())
    })
}

pub fn send(cmd: HttpSendCommand) -> Result<()> {
    let transport = ReqwestTransport::new().context("Failed to build HTTP client")?;
    let url = format!("{}{INGEST_PATH}", cmd.endpoint.base_url());
    let body = payload::generate(cmd.payload);

    let mut delivered = 0u64;
    for seq in 0..cmd.count {
        let record = TelemetryRecord::sample(&cmd.device_id, seq, &body).to_json()?;
        match transport.post_json(&url, &record, cmd.timeout) {
            Ok(response) if response.is_success() => {
                delivered += 1;
                info!(seq, status = response.status, body = %response.body.trim(), "Sent");
            }
            Ok(response) => warn!(seq, status = response.status, "Server rejected record"),
            Err(e) => warn!(seq, error = %e, "Request failed"),
        }
    }

    println!("✓ Delivered {delivered}/{} records to {url}", cmd.count);
    if delivered < cmd.count {
        anyhow::bail!("{} of {} records were not accepted", cmd.count - delivered, cmd.count);
    }
    Ok(())
}
