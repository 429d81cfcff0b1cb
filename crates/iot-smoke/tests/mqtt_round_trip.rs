mod common;

use common::MqttServer;
use iot_smoke::messaging::{
    ConnectionEventHandler, ConnectionHandlers, MessagingProbe, MessagingSettings, Mqtt5Broker,
};
use iot_smoke::{ProbeDriver, ProbeOutcome, Protocol};
use mqtt5::QoS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Lifecycle {
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl Lifecycle {
    fn handlers(&self) -> ConnectionHandlers {
        let connects = Arc::clone(&self.connects);
        let disconnects = Arc::clone(&self.disconnects);
        let on_connect: ConnectionEventHandler = Arc::new(move |_: &str| {
            connects.fetch_add(1, Ordering::SeqCst);
        });
        let on_disconnect: ConnectionEventHandler = Arc::new(move |_: &str| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
        ConnectionHandlers {
            on_connect: Some(on_connect),
            on_disconnect: Some(on_disconnect),
        }
    }

    fn counts(&self) -> (usize, usize) {
        (
            self.connects.load(Ordering::SeqCst),
            self.disconnects.load(Ordering::SeqCst),
        )
    }
}

fn run(
    broker: Mqtt5Broker,
    settings: MessagingSettings,
    handlers: ConnectionHandlers,
    timeout: Duration,
) -> ProbeOutcome {
    let probe = MessagingProbe::new(broker, settings, handlers);
    ProbeDriver::default().execute(Arc::new(probe), timeout)
}

// ---------------------------------------------------------------------------
// Against the in-process broker
// ---------------------------------------------------------------------------

#[test]
fn qos1_round_trip_passes() {
    let server = MqttServer::start();
    let lifecycle = Lifecycle::default();
    let settings = MessagingSettings {
        settle: Duration::from_millis(100),
        ..MessagingSettings::default()
    };
    assert_eq!(settings.qos, QoS::AtLeastOnce);

    let outcome = run(
        Mqtt5Broker::new(&server.host(), server.port()),
        settings,
        lifecycle.handlers(),
        TIMEOUT,
    );

    assert!(outcome.passed(), "{}", outcome.message());
    assert_eq!(outcome.protocol(), Protocol::Messaging);
    assert_eq!(
        outcome.message(),
        "Message published and received successfully"
    );
    assert!(outcome.duration_millis() > 0);
    assert_eq!(lifecycle.counts(), (2, 2));
}

#[test]
fn acknowledged_subscription_needs_no_settle_delay() {
    let server = MqttServer::start();
    let settings = MessagingSettings {
        settle: Duration::ZERO,
        ..MessagingSettings::default()
    };

    for _ in 0..3 {
        let outcome = run(
            Mqtt5Broker::new(&server.host(), server.port()),
            settings.clone(),
            ConnectionHandlers::default(),
            TIMEOUT,
        );
        assert!(outcome.passed(), "{}", outcome.message());
    }
}

#[test]
fn each_run_releases_both_clients() {
    let server = MqttServer::start();
    let lifecycle = Lifecycle::default();
    let settings = MessagingSettings {
        settle: Duration::from_millis(50),
        ..MessagingSettings::default()
    };

    for _ in 0..2 {
        let outcome = run(
            Mqtt5Broker::new(&server.host(), server.port()),
            settings.clone(),
            lifecycle.handlers(),
            TIMEOUT,
        );
        assert!(outcome.passed(), "{}", outcome.message());
    }
    assert_eq!(lifecycle.counts(), (4, 4));
}

// ---------------------------------------------------------------------------
// Unhealthy endpoints
// ---------------------------------------------------------------------------

#[test]
fn unresponsive_broker_is_bounded_by_timeout() {
    let silent = common::silent_tcp_listener();
    let port = silent.local_addr().unwrap().port();
    let timeout = Duration::from_millis(300);
    let settings = MessagingSettings {
        settle: Duration::from_millis(20),
        ..MessagingSettings::default()
    };

    let started = Instant::now();
    let outcome = run(
        Mqtt5Broker::new("127.0.0.1", port),
        settings,
        ConnectionHandlers::default(),
        timeout,
    );

    assert!(!outcome.passed());
    assert!(outcome.message().starts_with("Error: Timeout"), "{}", outcome.message());
    assert!(started.elapsed() < timeout + Duration::from_secs(3));
}

#[test]
fn missing_broker_reports_connection_failure() {
    let port = common::unused_tcp_port();
    let outcome = run(
        Mqtt5Broker::new("127.0.0.1", port),
        MessagingSettings::default(),
        ConnectionHandlers::default(),
        TIMEOUT,
    );

    assert!(!outcome.passed());
    assert_eq!(outcome.protocol(), Protocol::Messaging);
    assert_eq!(outcome.duration_millis(), 0);
}
