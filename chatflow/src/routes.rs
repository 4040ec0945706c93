//! HTTP routes for the chatflow service.
//!
//! - `POST /webhook/inbound`: provider webhook, one inbound message
//! - `POST /v1/dispatch`: start a flow for a contact programmatically
//! - `POST /v1/messages`: send a message outside any flow
//! - `POST /v1/blacklist`, `GET /v1/blacklist`: blacklist control
//! - `GET /health`, `GET /ready`: liveness and readiness

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chatflow_common::util::normalize_contact_id;
use chatflow_common::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::message::Event;

// ============================================================================
// State
// ============================================================================

/// Shared state for the HTTP server.
pub struct BotState {
    pub dispatcher: Dispatcher,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    flows: usize,
    sessions: usize,
    dispatcher: DispatcherStats,
}

#[derive(Debug, Serialize, Deserialize)]
struct WebhookResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl WebhookResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn with_message(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: Some(message.into()),
        }
    }
}

fn error_response(err: &Error) -> (StatusCode, Json<WebhookResponse>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(WebhookResponse::with_message(false, err.to_string())))
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "chatflow",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    let stats = state.dispatcher.stats().await;
    let flows = state.dispatcher.context().graph.len();
    let sessions = state.dispatcher.context().sessions.len();

    // A full queue rejects every new event
    let (status, label) = if stats.pending >= stats.queue_capacity {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    } else {
        (StatusCode::OK, "ready")
    };

    (
        status,
        Json(ReadyResponse {
            status: label,
            service: "chatflow",
            version: env!("CARGO_PKG_VERSION"),
            flows,
            sessions,
            dispatcher: stats,
        }),
    )
}

// ============================================================================
// Inbound Webhook
// ============================================================================

async fn inbound_webhook(
    State(state): State<Arc<BotState>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let from = payload
        .get("from")
        .and_then(|v| v.as_str().map(String::from).or_else(|| v.as_u64().map(|n| n.to_string())))
        .unwrap_or_default();
    let body = payload
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let event = match Event::inbound(&from, body, payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping invalid inbound message");
            return error_response(&e);
        }
    };

    match state.dispatcher.enqueue(event).await {
        Ok(_) => (StatusCode::OK, Json(WebhookResponse::ok())),
        // Acknowledge so the provider does not redeliver
        Err(Error::Blacklisted(_)) => (
            StatusCode::OK,
            Json(WebhookResponse::with_message(true, "ignored")),
        ),
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Dispatch API
// ============================================================================

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    /// Named event or flow id
    flow: String,
    /// Contact to run the flow for
    number: String,
    /// Data made available to the flow's actions
    #[serde(default)]
    payload: serde_json::Value,
}

async fn dispatch_flow(
    State(state): State<Arc<BotState>>,
    Json(req): Json<DispatchRequest>,
) -> impl IntoResponse {
    match state
        .dispatcher
        .dispatch(&req.flow, &req.number, req.payload)
        .await
    {
        Ok(_) => {
            tracing::info!(flow = %req.flow, "Flow dispatched");
            (
                StatusCode::ACCEPTED,
                Json(WebhookResponse::with_message(true, "trigger")),
            )
        }
        Err(e) => error_response(&e),
    }
}

// ============================================================================
// Send API (for outbound messages)
// ============================================================================

#[derive(Debug, Deserialize)]
struct SendRequest {
    /// Contact to message
    number: String,
    /// Text, or caption when media is attached
    #[serde(default)]
    message: String,
    /// Optional media URL
    #[serde(default, rename = "urlMedia")]
    url_media: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn send_message(
    State(state): State<Arc<BotState>>,
    Json(req): Json<SendRequest>,
) -> impl IntoResponse {
    let to = normalize_contact_id(&req.number);
    let media = req.url_media.filter(|u| !u.trim().is_empty());

    if to.is_empty() || (media.is_none() && req.message.trim().is_empty()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(SendResponse {
                success: false,
                message_id: None,
                error: Some("number and message (or urlMedia) are required".to_string()),
            }),
        );
    }

    let outbound = &state.dispatcher.context().outbound;
    let result = match &media {
        Some(url) => {
            let caption = Some(req.message.as_str()).filter(|m| !m.is_empty());
            outbound.send_media(&to, url, caption).await
        }
        None => outbound.send_text(&to, &req.message).await,
    };

    match result {
        Ok(message_id) => (
            StatusCode::OK,
            Json(SendResponse {
                success: true,
                message_id: Some(message_id),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Direct send failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(SendResponse {
                    success: false,
                    message_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

// ============================================================================
// Blacklist API
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BlacklistIntent {
    Add,
    Remove,
}

#[derive(Debug, Deserialize)]
struct BlacklistRequest {
    number: String,
    intent: BlacklistIntent,
}

#[derive(Debug, Serialize)]
struct BlacklistResponse {
    status: &'static str,
    number: String,
    intent: BlacklistIntent,
    changed: bool,
}

#[derive(Debug, Serialize)]
struct BlacklistListResponse {
    numbers: Vec<String>,
}

async fn update_blacklist(
    State(state): State<Arc<BotState>>,
    Json(req): Json<BlacklistRequest>,
) -> impl IntoResponse {
    let blacklist = &state.dispatcher.context().blacklist;
    let changed = match req.intent {
        BlacklistIntent::Add => blacklist.add(&req.number).await,
        BlacklistIntent::Remove => blacklist.remove(&req.number).await,
    };

    Json(BlacklistResponse {
        status: "ok",
        number: req.number,
        intent: req.intent,
        changed,
    })
}

async fn list_blacklist(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    Json(BlacklistListResponse {
        numbers: state.dispatcher.context().blacklist.list().await,
    })
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the HTTP router.
pub fn build_router(state: Arc<BotState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Provider webhook
        .route("/webhook/inbound", post(inbound_webhook))
        // Control API
        .route("/v1/dispatch", post(dispatch_flow))
        .route("/v1/messages", post(send_message))
        .route("/v1/blacklist", get(list_blacklist).post(update_blacklist))
        .with_state(state)
}

/// Wrap a dispatcher in router state.
pub fn create_state(dispatcher: Dispatcher) -> Arc<BotState> {
    Arc::new(BotState { dispatcher })
}
