//! The bot's welcome and registration flows, end to end through the dispatcher.

use chatflow::flows::{
    default_flows, AGE_PROMPT, AGE_RETRY, NAME_PROMPT, NOT_REGISTERED_TEXT, NO_LESSONS_TEXT,
    REGISTER_EVENT, SERVER_ERROR_TEXT,
};
use chatflow::{AppContext, BookingClient, Dispatcher, Event, FlowState, MemoryOutbound};
use chatflow_common::{Error, QueueConfig};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONTACT: &str = "34600111222";

fn bot(booking_url: &str) -> (Dispatcher, Arc<MemoryOutbound>) {
    let outbound = Arc::new(MemoryOutbound::new());
    let booking = Arc::new(BookingClient::with_url(booking_url));
    let ctx = AppContext::new(default_flows(booking), outbound.clone()).unwrap();
    (
        Dispatcher::new(ctx, QueueConfig::default(), "sorry"),
        outbound,
    )
}

async fn say(dispatcher: &Dispatcher, body: &str) -> chatflow::ExecutionReport {
    let event = Event::inbound(CONTACT, body, json!({})).unwrap();
    dispatcher.enqueue(event).await.unwrap().wait().await.unwrap()
}

async fn booking_api(response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(query_param("phone", CONTACT))
        .and(query_param("withLessons", "true"))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_unknown_user_gets_generic_welcome() {
    let server = booking_api(ResponseTemplate::new(200).set_body_json(json!({ "user": null }))).await;
    let (dispatcher, outbound) = bot(&server.uri());

    let report = say(&dispatcher, "hi").await;

    let sent = outbound.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].as_text(), Some(NOT_REGISTERED_TEXT));
    assert!(matches!(report.state, FlowState::Done { .. }));
}

#[tokio::test]
async fn test_registered_user_without_lessons() {
    let server = booking_api(
        ResponseTemplate::new(200).set_body_json(json!({ "user": { "name": "Ana" }, "lessons": [] })),
    )
    .await;
    let (dispatcher, outbound) = bot(&server.uri());

    say(&dispatcher, "Hello").await;

    let sent = outbound.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].as_text(), Some(NO_LESSONS_TEXT));
}

#[tokio::test]
async fn test_registered_user_with_lessons() {
    let server = booking_api(ResponseTemplate::new(200).set_body_json(json!({
        "user": { "name": "Ana" },
        "lessons": [
            { "date": "2024-03-05", "startTime": "19:00" },
            { "date": "2024-03-12T00:00:00.000Z" }
        ]
    })))
    .await;
    let (dispatcher, outbound) = bot(&server.uri());

    say(&dispatcher, "HOLA").await;

    let sent = outbound.sent().await;
    assert_eq!(sent.len(), 1);
    let text = sent[0].as_text().unwrap();
    assert!(text.starts_with("📚 *Hi Ana \n Your booked lessons:*\n\n"));
    assert!(text.contains("*Date: 3/5/2024\n   Hour: 19:00"));
    assert!(text.contains("*Date: 3/12/2024\n   Hour: TBD"));
}

#[tokio::test]
async fn test_booking_failure_is_reported_to_user() {
    let server = booking_api(ResponseTemplate::new(503)).await;
    let (dispatcher, outbound) = bot(&server.uri());

    let report = say(&dispatcher, "hi").await;

    let sent = outbound.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].as_text(), Some(SERVER_ERROR_TEXT));
    assert!(matches!(report.state, FlowState::Done { .. }));
}

#[tokio::test]
async fn test_trigger_matching_ignores_case() {
    let server = booking_api(ResponseTemplate::new(200).set_body_json(json!({ "user": null }))).await;
    let (dispatcher, outbound) = bot(&server.uri());

    for greeting in ["HI", "Hi", "hi"] {
        let report = say(&dispatcher, greeting).await;
        assert_eq!(report.flow_id.as_deref(), Some("welcome"));
    }
    assert_eq!(outbound.sent().await.len(), 3);
}

#[tokio::test]
async fn test_blacklisted_contact_gets_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": null })))
        .expect(0)
        .mount(&server)
        .await;
    let (dispatcher, outbound) = bot(&server.uri());
    dispatcher.context().blacklist.add(CONTACT).await;

    let event = Event::inbound(CONTACT, "hi", json!({})).unwrap();
    let err = dispatcher.enqueue(event).await.unwrap_err();

    assert!(matches!(err, Error::Blacklisted(_)));
    assert!(outbound.sent().await.is_empty());
    assert_eq!(dispatcher.state(CONTACT).await, FlowState::NoActiveFlow);
}

#[tokio::test]
async fn test_registration_flow() {
    let (dispatcher, outbound) = bot("http://127.0.0.1:9");

    let report = dispatcher
        .dispatch(REGISTER_EVENT, CONTACT, json!({ "name": "Ana" }))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.outputs[0].as_text(), Some(NAME_PROMPT));

    let report = say(&dispatcher, "Ana").await;
    assert_eq!(report.outputs[0].as_text(), Some(AGE_PROMPT));
    assert_eq!(
        dispatcher.context().sessions.get(CONTACT, "name"),
        Some(json!("Ana"))
    );

    let report = say(&dispatcher, "thirty").await;
    assert_eq!(report.outputs[0].as_text(), Some(AGE_RETRY));

    let report = say(&dispatcher, "30").await;
    let text = report.outputs[0].as_text().unwrap();
    assert_eq!(text, "Ana, thanks for your information!: Your age: 30");
    assert!(matches!(report.state, FlowState::Done { ref flow_id } if flow_id == "register"));
    assert!(dispatcher.context().sessions.snapshot(CONTACT).is_empty());

    assert_eq!(outbound.sent_to(CONTACT).await.len(), 4);
}

#[tokio::test]
async fn test_greeting_interrupts_registration() {
    let server = booking_api(ResponseTemplate::new(200).set_body_json(json!({ "user": null }))).await;
    let (dispatcher, outbound) = bot(&server.uri());

    dispatcher
        .dispatch(REGISTER_EVENT, CONTACT, json!({}))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    say(&dispatcher, "Ana").await;

    let report = say(&dispatcher, "hi").await;
    assert_eq!(report.flow_id.as_deref(), Some("welcome"));
    assert!(dispatcher.context().sessions.get(CONTACT, "name").is_none());

    let last = outbound.sent().await.pop().unwrap();
    assert_eq!(last.as_text(), Some(NOT_REGISTERED_TEXT));
}
