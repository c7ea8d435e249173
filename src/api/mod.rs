//! Report view channel: a small HTTP surface over the pipeline.
//!
//! - `GET /healthz`: liveness and uptime
//! - `GET /counters`: observability counters from every component
//! - `GET /reports/latest`: the most recently published report
//! - `GET /ws`: websocket stream of every published report (JSON text)
//!
//! This is the view channel only; the outward publisher bridges off the same
//! bus. Consumers must tolerate unknown keys in report JSON.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::bus::ReportBus;
use crate::inference::DispatchCounters;
use crate::picks::{PickCounters, TickQueue};
use crate::wavebuf::WaveBuffer;

/// Shared handles the handlers read from. Everything is a cheap clone.
#[derive(Clone)]
pub struct ApiState {
    pub bus: ReportBus,
    pub wave: Arc<WaveBuffer>,
    pub pick_counters: Arc<PickCounters>,
    pub dispatch_counters: Arc<DispatchCounters>,
    pub queue: Arc<TickQueue>,
    pub started: Instant,
}

/// Build the view-channel router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/counters", get(counters))
        .route("/reports/latest", get(latest_report))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until cancellation.
pub async fn serve(
    state: ApiState,
    addr: String,
    cancel: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "View channel listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn healthz(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

async fn counters(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "wave": state.wave.counters.snapshot(),
        "picks": state.pick_counters.snapshot(),
        "dispatch": state.dispatch_counters.snapshot(),
        "ticks_dropped": state.queue.dropped.load(std::sync::atomic::Ordering::Relaxed),
    }))
}

async fn latest_report(State(state): State<ApiState>) -> Response {
    match state.bus.latest() {
        Some(report) => Json(report.as_ref().clone()).into_response(),
        None => (StatusCode::NO_CONTENT, ()).into_response(),
    }
}

async fn ws_upgrade(State(state): State<ApiState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| ws_stream(socket, state))
}

/// Forward every bus report to one websocket client until it goes away.
async fn ws_stream(mut socket: WebSocket, state: ApiState) {
    let mut reports = state.bus.subscribe();
    debug!("Websocket report subscriber connected");
    loop {
        tokio::select! {
            report = reports.recv() => {
                let report = match report {
                    Ok(report) => report,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Websocket subscriber lagged, skipping");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let Ok(text) = serde_json::to_string(report.as_ref()) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                // Clients only listen; any close/error ends the stream.
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("Websocket report subscriber disconnected");
}
