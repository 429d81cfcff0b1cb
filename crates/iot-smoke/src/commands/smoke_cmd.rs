use anyhow::{Context, Result};
use iot_smoke::config::{OutputFormat, SmokeArgs};
use iot_smoke::constrained::{ConstrainedProbe, Reliability, UdpCoapConnector};
use iot_smoke::messaging::{ConnectionHandlers, MessagingProbe, Mqtt5Broker};
use iot_smoke::web::{ReqwestTransport, WebProbe};
use iot_smoke::{Harness, ProbeDriver, Protocol, ProtocolAdapter};
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::debug;

pub fn execute(args: &SmokeArgs) -> Result<i32> {
    let harness = build_harness(args)?;
    let report = harness.run();

    match args.format {
        OutputFormat::Text => {
            let color = !args.no_color && std::io::stdout().is_terminal();
            print!("{}", report.render_text(color));
        }
        OutputFormat::Json => {
            let json = report.render_json().context("Failed to render JSON report")?;
            println!("{json}");
        }
    }

    Ok(report.exit_code())
}

fn build_harness(args: &SmokeArgs) -> Result<Harness> {
    if args.timeout.is_zero() {
        anyhow::bail!("--timeout must be greater than zero");
    }

    let mut harness = Harness::new(args.timeout)
        .with_driver(ProbeDriver::new(args.grace))
        .with_mode(args.execution_mode());
    if let Some(deadline) = args.deadline {
        harness = harness.with_run_deadline(deadline);
    }

    for protocol in args.protocols() {
        let adapter: Arc<dyn ProtocolAdapter> = match protocol {
            Protocol::Messaging => Arc::new(MessagingProbe::new(
                Mqtt5Broker::from_url(args.mqtt.url()),
                args.messaging_settings(),
                ConnectionHandlers::tracing(),
            )),
            Protocol::Web => Arc::new(WebProbe::new(
                ReqwestTransport::new().context("Failed to build HTTP client")?,
                args.http.base_url(),
            )),
            Protocol::Constrained => {
                let reliability = if args.confirmable {
                    Reliability::Confirmable
                } else {
                    Reliability::NonConfirmable
                };
                Arc::new(ConstrainedProbe::new(
                    UdpCoapConnector::new(reliability),
                    &args.coap.host,
                    args.coap.port,
                ))
            }
        };
        debug!(%protocol, "Registered adapter");
        harness = harness.with_adapter(adapter);
    }

    Ok(harness)
}
