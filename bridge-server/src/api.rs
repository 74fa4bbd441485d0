use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use stream_bridge::{PipelineState, PublisherStats, ReceiverStats};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::BridgeState;

#[derive(Debug, Serialize)]
pub struct PublisherStatus {
    pub state: PipelineState,
    pub address: String,
    pub stats: PublisherStats,
}

#[derive(Debug, Serialize)]
pub struct ReceiverStatus {
    pub state: PipelineState,
    pub address: String,
    pub streaming: bool,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub stats: ReceiverStats,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub mode: &'static str,
    pub publisher: Option<PublisherStatus>,
    pub receiver: Option<ReceiverStatus>,
}

impl From<&BridgeState> for Status {
    fn from(state: &BridgeState) -> Self {
        Self {
            mode: state.mode,
            publisher: state.publisher.as_ref().map(|p| PublisherStatus {
                state: p.state(),
                address: p.endpoint().address.clone(),
                stats: p.stats(),
            }),
            receiver: state.receiver.as_ref().map(|r| ReceiverStatus {
                state: r.state(),
                address: r.config().address.clone(),
                streaming: r.is_streaming(),
                frame_rate: r.frame_rate(),
                width: r.width(),
                height: r.height(),
                stats: r.stats(),
            }),
        }
    }
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/snapshot.jpg", get(snapshot))
        .with_state(state)
}

async fn index() -> &'static str {
    "stream bridge"
}

async fn status(State(state): State<BridgeState>) -> Json<Status> {
    Json(Status::from(&state))
}

async fn snapshot(State(state): State<BridgeState>) -> Response {
    let snapshot = state.snapshot.clone();
    // jpeg encoding is CPU bound
    match tokio::task::spawn_blocking(move || snapshot.jpeg()).await {
        Ok(Ok(Some(jpeg))) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(Ok(None)) => (StatusCode::NOT_FOUND, "no frame yet").into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serves the API on an already bound listener until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: BridgeState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
}

pub async fn start_api_server(
    addr: SocketAddr,
    state: BridgeState,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("API server listening on {}", listener.local_addr()?);
    Ok(tokio::spawn(async move {
        if let Err(e) = serve(listener, state, cancel).await {
            log::error!("API server: {}", e);
        }
    }))
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("shutting down API server");
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
