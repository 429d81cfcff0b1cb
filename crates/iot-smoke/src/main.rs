use clap::{Parser, Subcommand};
use iot_smoke::config::SmokeArgs;
use iot_smoke::report::EXIT_STARTUP_FAILURE;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    coap_cmd::{CoapSendCommand, CoapServeCommand},
    http_cmd::{HttpSendCommand, HttpServeCommand},
    pub_cmd::PubCommand,
    sub_cmd::SubCommand,
};

#[derive(Parser)]
#[command(name = "iot-smoke")]
#[command(about = "Cross-protocol smoke tests for MQTT, HTTP and CoAP telemetry ingestion")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    smoke: SmokeArgs,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one end-to-end exchange per protocol and report (default)
    Smoke(SmokeArgs),
    /// Publish telemetry samples to an MQTT topic
    MqttPub(PubCommand),
    /// Subscribe to an MQTT topic and print what arrives
    MqttSub(SubCommand),
    /// Run the HTTP ingest server
    HttpServe(HttpServeCommand),
    /// Post telemetry samples to the HTTP ingest server
    HttpSend(HttpSendCommand),
    /// Run the CoAP telemetry server
    CoapServe(CoapServeCommand),
    /// Post telemetry samples to the CoAP telemetry server
    CoapSend(CoapSendCommand),
}

fn init_basic_tracing(verbose: bool, debug: bool) {
    let default_level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_basic_tracing(cli.verbose, cli.debug);

    let result = match cli.command.unwrap_or(Commands::Smoke(cli.smoke)) {
        Commands::Smoke(args) => commands::smoke_cmd::execute(&args),
        Commands::MqttPub(cmd) => commands::pub_cmd::execute(cmd).map(|()| 0),
        Commands::MqttSub(cmd) => commands::sub_cmd::execute(cmd).map(|()| 0),
        Commands::HttpServe(cmd) => commands::http_cmd::serve(cmd).map(|()| 0),
        Commands::HttpSend(cmd) => commands::http_cmd::send(cmd).map(|()| 0),
        Commands::CoapServe(cmd) => commands::coap_cmd::serve(cmd).map(|()| 0),
        Commands::CoapSend(cmd) => commands::coap_cmd::send(cmd).map(|()| 0),
    };

    let code = result.unwrap_or_else(|e| {
        eprintln!("Error: {e:#}");
        EXIT_STARTUP_FAILURE
    });
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_arguments_runs_the_smoke_test() {
        let cli = Cli::try_parse_from(["iot-smoke"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.smoke.protocols().len(), 3);
    }

    #[test]
    fn subcommands_parse_their_own_endpoints() {
        let cli = Cli::try_parse_from([
            "iot-smoke",
            "smoke",
            "--only",
            "http",
            "--http-port",
            "9090",
        ])
        .unwrap();
        let Some(Commands::Smoke(args)) = cli.command else {
            panic!("expected the smoke subcommand");
        };
        assert_eq!(args.http.port, 9090);

        assert!(Cli::try_parse_from(["iot-smoke", "coap-serve", "--coap-port", "5684"]).is_ok());
        assert!(Cli::try_parse_from(["iot-smoke", "http-send", "-n", "2"]).is_ok());
    }
}
