//! Ops HTTP Surface
//!
//! Endpoints:
//! - GET  /health          - Service and per-network status
//! - GET  /api/currencies  - Ready currencies grouped by symbol
//! - POST /api/addresses   - Issue (or look up) a deposit address
//! - GET  /ws/events       - WebSocket stream of every engine event

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::common::error::EngineError;
use crate::registry::{Registry, RegistryError};

/// Shared state of the handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
}

#[derive(Debug, Deserialize)]
pub struct IssueAddressRequest {
    pub coin: String,
    pub uhash: String,
}

/// Build the ops router
pub fn create_router(registry: Arc<Registry>) -> Router {
    let state = ApiState { registry };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/currencies", get(handle_currencies))
        .route("/api/addresses", post(handle_issue_address))
        .route("/ws/events", get(handle_events_ws))
        .layer(cors)
        .with_state(state)
}

/// Serve the ops surface until the listener fails
pub async fn serve(registry: Arc<Registry>, port: u16) -> Result<(), EngineError> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(target: "custody::system", %addr, "ops API listening");
    axum::serve(listener, create_router(registry)).await?;
    Ok(())
}

fn error_response(status: StatusCode, err: EngineError) -> Response {
    (
        status,
        Json(json!({
            "error": err.error_code(),
            "details": err.to_string(),
        })),
    )
        .into_response()
}

async fn handle_health(State(state): State<ApiState>) -> impl IntoResponse {
    let networks: Vec<_> = state
        .registry
        .networks()
        .iter()
        .filter_map(|network| state.registry.adapter(network))
        .map(|adapter| {
            json!({
                "network": adapter.network(),
                "ready": adapter.is_ready(),
                "height": adapter.last_height(),
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "service": "custody-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "networks": networks,
    }))
}

async fn handle_currencies(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.registry.catalog_by_symbol().await)
}

async fn handle_issue_address(
    State(state): State<ApiState>,
    Json(request): Json<IssueAddressRequest>,
) -> Response {
    if request.uhash.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            EngineError::validation("uhash must not be empty"),
        );
    }

    match state.registry.issue_address(&request.coin, request.uhash.trim()).await {
        Ok(issued) => (StatusCode::OK, Json(issued)).into_response(),
        Err(e) => {
            let status = match e {
                RegistryError::UnknownCoin(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, e.into())
        }
    }
}

async fn handle_events_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

/// Forward every engine event to one client until either side hangs up
async fn stream_events(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.registry.events().subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "custody::system", skipped, "event stream client lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(_) => continue,
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}
