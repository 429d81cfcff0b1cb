mod common;

use common::{BrokerBehavior, MockBroker, MockCall};
use iot_smoke::messaging::{
    ConnectionEventHandler, ConnectionHandlers, MessagingProbe, MessagingSettings,
};
use iot_smoke::{ProbeDriver, ProbeOutcome, Protocol};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn settings() -> MessagingSettings {
    MessagingSettings {
        settle: Duration::from_millis(20),
        ..MessagingSettings::default()
    }
}

fn probe(broker: &MockBroker) -> MessagingProbe<MockBroker> {
    MessagingProbe::new(broker.clone(), settings(), ConnectionHandlers::default())
}

fn run(broker: &MockBroker, timeout: Duration) -> ProbeOutcome {
    ProbeDriver::default().execute(Arc::new(probe(broker)), timeout)
}

#[test]
fn round_trip_passes_and_releases_both_clients() {
    let broker = MockBroker::new(BrokerBehavior::Echo);
    let outcome = run(&broker, TIMEOUT);

    assert!(outcome.passed(), "{}", outcome.message());
    assert_eq!(outcome.protocol(), Protocol::Messaging);
    assert_eq!(
        outcome.message(),
        "Message published and received successfully"
    );
    assert_eq!(broker.open_sessions(), 0);

    let calls = broker.calls();
    let subscribed = calls
        .iter()
        .position(|c| matches!(c, MockCall::Subscribe { topic, .. } if topic == "IOTS/TEST/smoke"))
        .unwrap();
    let published = calls
        .iter()
        .position(|c| matches!(c, MockCall::Publish { .. }))
        .unwrap();
    assert!(subscribed < published);
}

#[test]
fn subscriber_and_publisher_use_distinct_client_ids() {
    let broker = MockBroker::new(BrokerBehavior::Echo);
    assert!(run(&broker, TIMEOUT).passed());

    let ids: Vec<String> = broker
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            MockCall::Connect { client_id } => Some(client_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(ids[0].starts_with("smoke_test-sub-"));
    assert!(ids[1].starts_with("smoke_test-pub-"));
}

#[test]
fn foreign_payload_is_a_content_mismatch() {
    let broker = MockBroker::new(BrokerBehavior::Tamper);
    let outcome = run(&broker, TIMEOUT);

    assert!(!outcome.passed());
    assert!(outcome.message().starts_with("Received message content mismatch"));
    assert_eq!(broker.open_sessions(), 0);
}

#[test]
fn silent_broker_times_out() {
    let broker = MockBroker::new(BrokerBehavior::Silent);
    let timeout = Duration::from_millis(300);

    let started = Instant::now();
    let outcome = run(&broker, timeout);

    assert!(!outcome.passed());
    assert_eq!(outcome.message(), "Message not received within timeout");
    assert!(started.elapsed() < timeout + Duration::from_secs(1));
    assert_eq!(broker.open_sessions(), 0);
    assert_eq!(broker.active_subscriptions(), 0);
}

#[test]
fn refused_connection_is_reported_not_raised() {
    let broker = MockBroker::new(BrokerBehavior::Refuse);
    let outcome = run(&broker, TIMEOUT);

    assert!(!outcome.passed());
    assert_eq!(outcome.protocol(), Protocol::Messaging);
    assert!(outcome.message().contains("Connection failed"));
}

#[test]
fn panicking_broker_is_contained() {
    let broker = MockBroker::new(BrokerBehavior::PanicOnPublish);
    let outcome = run(&broker, TIMEOUT);

    assert!(!outcome.passed());
    assert_eq!(
        outcome.message(),
        "Test crashed: mock broker failed while routing"
    );
    assert_eq!(broker.open_sessions(), 0);
    assert_eq!(broker.active_subscriptions(), 0);
}

#[test]
fn repeated_runs_do_not_share_delivery_state() {
    let broker = MockBroker::new(BrokerBehavior::Echo);
    let adapter = Arc::new(probe(&broker));
    let driver = ProbeDriver::default();

    assert!(driver.execute(adapter.clone(), TIMEOUT).passed());
    assert_eq!(broker.active_subscriptions(), 0);
    assert!(driver.execute(adapter, TIMEOUT).passed());
    assert_eq!(broker.open_sessions(), 0);
    assert_eq!(broker.active_subscriptions(), 0);

    let silent = MockBroker::new(BrokerBehavior::Silent);
    let outcome = run(&silent, Duration::from_millis(200));
    assert!(!outcome.passed());
}

#[test]
fn connection_handlers_observe_lifecycle() {
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let on_connect: ConnectionEventHandler = {
        let connects = Arc::clone(&connects);
        Arc::new(move |_: &str| {
            connects.fetch_add(1, Ordering::SeqCst);
        })
    };
    let on_disconnect: ConnectionEventHandler = {
        let disconnects = Arc::clone(&disconnects);
        Arc::new(move |_: &str| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        })
    };
    let handlers = ConnectionHandlers {
        on_connect: Some(on_connect),
        on_disconnect: Some(on_disconnect),
    };

    let broker = MockBroker::new(BrokerBehavior::Echo);
    let adapter = MessagingProbe::new(broker, settings(), handlers);
    assert!(ProbeDriver::default()
        .execute(Arc::new(adapter), TIMEOUT)
        .passed());

    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(disconnects.load(Ordering::SeqCst), 2);
}

#[test]
fn rejected_publish_still_releases_both_clients() {
    let broker = MockBroker::new(BrokerBehavior::RejectPublish);
    let outcome = run(&broker, TIMEOUT);

    assert!(!outcome.passed());
    assert_eq!(outcome.message(), "Error: MQTT error: publish rejected");
    assert_eq!(broker.open_sessions(), 0);
    assert_eq!(broker.active_subscriptions(), 0);
}
