//! Integration tests for the chatflow HTTP surface.
//!
//! Drives the full stack (router → dispatcher → flows → outbound) through
//! the webhook and control endpoints.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use chatflow::flows::{default_flows, AGE_PROMPT, NAME_PROMPT, REGISTER_EVENT};
use chatflow::{
    build_router, create_state, ActionContext, AppContext, BookingClient, Dispatcher, Event,
    FlowDefinition, FlowState, MemoryOutbound, Step, Trigger,
};
use chatflow_common::{Config, Error, QueueConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Test helper to create a test router.
fn create_test_app() -> (axum::Router, Arc<MemoryOutbound>) {
    let outbound = Arc::new(MemoryOutbound::new());
    let booking = Arc::new(BookingClient::with_url("http://127.0.0.1:9"));
    let ctx = AppContext::new(default_flows(booking), outbound.clone()).unwrap();
    let dispatcher = Dispatcher::new(ctx, QueueConfig::default(), "sorry");
    (build_router(create_state(dispatcher)), outbound)
}

/// Helper to make a JSON request.
async fn request_json(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = if let Some(b) = body {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&b).unwrap()))
            .unwrap()
    } else {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    (status, json)
}

/// Wait until `count` messages have been sent.
async fn wait_for_sent(outbound: &MemoryOutbound, count: usize) -> Vec<String> {
    for _ in 0..100 {
        let sent = outbound.sent().await;
        if sent.len() >= count {
            return sent
                .iter()
                .filter_map(|m| m.as_text().map(String::from))
                .collect();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} outbound messages");
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Check Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let (app, _outbound) = create_test_app();

    let (status, json) = request_json(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "chatflow");
}

#[tokio::test]
async fn test_ready_check() {
    let (app, _outbound) = create_test_app();

    let (status, json) = request_json(&app, Method::GET, "/ready", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["flows"], 2);
    assert_eq!(json["dispatcher"]["pending"], 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration over HTTP
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_registration_over_http() {
    let (app, outbound) = create_test_app();

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/v1/dispatch",
        Some(json!({ "flow": REGISTER_EVENT, "number": "+34 600 111 222" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(wait_for_sent(&outbound, 1).await[0], NAME_PROMPT);

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/webhook/inbound",
        Some(json!({ "from": "34600111222", "body": "Ana" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wait_for_sent(&outbound, 2).await[1], AGE_PROMPT);

    request_json(
        &app,
        Method::POST,
        "/webhook/inbound",
        Some(json!({ "from": "34600111222", "body": "30" })),
    )
    .await;
    let sent = wait_for_sent(&outbound, 3).await;
    assert!(sent[2].contains("Ana"));
    assert!(sent[2].contains("30"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound Webhook Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inbound_webhook_unmatched_text() {
    let (app, outbound) = create_test_app();

    let (status, json) = request_json(
        &app,
        Method::POST,
        "/webhook/inbound",
        Some(json!({ "from": "34600111222", "body": "what time is it?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(outbound.sent().await.is_empty());
}

#[tokio::test]
async fn test_inbound_webhook_invalid_json() {
    let (app, _outbound) = create_test_app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhook/inbound")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_blacklist_blocks_inbound() {
    let (app, outbound) = create_test_app();

    request_json(
        &app,
        Method::POST,
        "/v1/blacklist",
        Some(json!({ "number": "34600111222", "intent": "add" })),
    )
    .await;

    let (status, json) = request_json(
        &app,
        Method::POST,
        "/v1/dispatch",
        Some(json!({ "flow": REGISTER_EVENT, "number": "34600111222" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["success"], false);

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/v1/blacklist",
        Some(json!({ "number": "34600111222", "intent": "remove" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/v1/dispatch",
        Some(json!({ "flow": REGISTER_EVENT, "number": "34600111222" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(wait_for_sent(&outbound, 1).await[0], NAME_PROMPT);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure Handling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_default_config_apologizes_for_failed_action() {
    let config = Config::default();
    let outbound = Arc::new(MemoryOutbound::new());
    let flows = vec![FlowDefinition::new(
        "lessons",
        Trigger::keywords(["lessons"]),
        vec![Step::action_fn(|_ctx: ActionContext| async move {
            Err(Error::Adapter("booking API unreachable".into()))
        })],
    )];
    let ctx = AppContext::new(flows, outbound.clone()).unwrap();
    let dispatcher = Dispatcher::new(
        ctx,
        config.queue.clone(),
        config.outbound.apology_text.clone(),
    );

    let event = Event::inbound("34600111222", "lessons", json!({})).unwrap();
    let err = dispatcher.enqueue(event).await.unwrap().wait().await.unwrap_err();
    assert!(err.is_adapter());

    let sent = outbound.sent_to("34600111222").await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].as_text(), Some(config.outbound.apology_text.as_str()));
    assert!(!config.outbound.apology_text.is_empty());
    assert_eq!(dispatcher.state("34600111222").await, FlowState::NoActiveFlow);
}

#[tokio::test]
async fn test_build_app_from_default_config() {
    let (app, dispatcher) = chatflow::build_app(&Config::default()).unwrap();
    assert_eq!(dispatcher.context().graph.len(), 2);

    let (status, json) = request_json(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sessions"], 0);
}
