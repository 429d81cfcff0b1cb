#![allow(dead_code, unused_imports)]

pub use iot_smoke::mock::{
    BrokerBehavior, CoapBehavior, MockBroker, MockCall, MockCoapConnector, MockHttpReply,
    MockHttpTransport,
};

use iot_smoke::constrained::server::{self as coap_server, ReplyStyle, TelemetryResource};
use iot_smoke::web::server::{self as http_server, IngestState};
use mqtt5::broker::config::{BrokerConfig, StorageBackend, StorageConfig};
use mqtt5::broker::server::MqttBroker;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// A server running on its own runtime thread, stopped on drop.
pub struct BackgroundServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundServer {
    /// Runs `run` on a fresh runtime thread. `run` reports the address it
    /// listens on once it is ready, then serves until its receiver fires.
    fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(mpsc::Sender<SocketAddr>, oneshot::Receiver<()>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()>,
    {
        let (tx, rx) = oneshot::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(run(ready_tx, rx));
        });
        let addr = ready_rx.recv().expect("server failed to start");
        Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// In-process HTTP ingest server on an ephemeral loopback port.
pub struct HttpServer {
    pub state: IngestState,
    server: BackgroundServer,
}

impl HttpServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let state = IngestState::default();
        let served = state.clone();

        let server = BackgroundServer::spawn(move |ready, stop| async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            ready.send(addr).unwrap();
            http_server::serve(listener, served, async move {
                let _ = stop.await;
            })
            .await
            .unwrap();
        });
        Self { state, server }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.server.addr())
    }
}

/// In-process CoAP telemetry server on an ephemeral loopback port.
pub struct CoapServer {
    pub resource: TelemetryResource,
    server: BackgroundServer,
}

impl CoapServer {
    pub fn start(reply: ReplyStyle) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        let addr = socket.local_addr().unwrap();
        let resource = TelemetryResource::new(reply);
        let served = resource.clone();

        let server = BackgroundServer::spawn(move |ready, stop| async move {
            let socket = tokio::net::UdpSocket::from_std(socket).unwrap();
            ready.send(addr).unwrap();
            coap_server::serve(socket, served, async move {
                let _ = stop.await;
            })
            .await
            .unwrap();
        });
        Self { resource, server }
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }
}

/// In-process MQTT broker with memory storage on an ephemeral loopback port.
pub struct MqttServer {
    server: BackgroundServer,
}

impl MqttServer {
    pub fn start() -> Self {
        let server = BackgroundServer::spawn(move |ready, stop| async move {
            let storage = StorageConfig {
                backend: StorageBackend::Memory,
                enable_persistence: true,
                ..Default::default()
            };
            let config = BrokerConfig::default()
                .with_bind_address("127.0.0.1:0".parse::<SocketAddr>().unwrap())
                .with_storage(storage);
            let mut broker = MqttBroker::with_config(config).await.unwrap();
            ready.send(broker.local_addr().unwrap()).unwrap();

            tokio::select! {
                _ = broker.run() => {}
                _ = stop => {}
            }
        });
        Self { server }
    }

    pub fn host(&self) -> String {
        self.server.addr().ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }
}

/// A TCP listener that accepts connections but never says anything.
pub fn silent_tcp_listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").unwrap()
}

/// A bound UDP socket that never answers. Keep it alive for the test.
pub fn silent_udp_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").unwrap()
}

/// A loopback TCP port with nothing listening on it.
pub fn unused_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
