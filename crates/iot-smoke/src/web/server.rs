//! Minimal HTTP ingest server.
//!
//! `GET /health`, `POST /ingest` and `GET /metrics`. Ingest accepts any body
//! and answers with the success marker the web probe looks for.

use crate::types::TelemetryRecord;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Shared request counter.
#[derive(Debug, Clone, Default)]
pub struct IngestState {
    requests: Arc<AtomicU64>,
}

impl IngestState {
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

pub fn router(state: IngestState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: IngestState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server on http://{addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ingest(State(state): State<IngestState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let counter = state.requests.fetch_add(1, Ordering::Relaxed) + 1;
    match serde_json::from_slice::<TelemetryRecord>(&body) {
        Ok(record) => debug!(
            device_id = %record.device_id,
            seq = ?record.seq,
            bytes = body.len(),
            "Ingested telemetry"
        ),
        Err(_) => debug!(bytes = body.len(), "Ingested non-telemetry body"),
    }
    (
        StatusCode::OK,
        Json(json!({ "status": "success", "counter": counter })),
    )
}

async fn metrics(State(state): State<IngestState>) -> Json<Value> {
    Json(json!({ "requests": state.requests() }))
}
