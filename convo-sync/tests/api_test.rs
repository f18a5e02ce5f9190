//! HTTP API integration tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ractor::{Actor, ActorRef};
use serde_json::{json, Value};
use shared_types::{Message, SimilarUserMatch};
use tower::ServiceExt;

use convo_sync::actors::bus::{ConversationChanged, MessageBusMsg, CONVERSATION_CHANGED};
use convo_sync::actors::controller::{
    self, ControllerActor, ControllerArguments, ControllerMsg, ControllerSettings,
};
use convo_sync::actors::record_store::{RecordStoreActor, RecordStoreArguments};
use convo_sync::actors::MessageBusActor;
use convo_sync::api;
use convo_sync::fingerprint::fingerprint;
use convo_sync::similarity::{SimilarityError, SimilarityService};

struct NoMatches;

#[async_trait]
impl SimilarityService for NoMatches {
    async fn upsert_conversation(
        &self,
        _id: &str,
        _title: &str,
        _content: &str,
    ) -> Result<Vec<SimilarUserMatch>, SimilarityError> {
        Ok(vec![])
    }
}

async fn setup_test_app() -> (axum::Router, ActorRef<MessageBusMsg>, ActorRef<ControllerMsg>) {
    let (store, _) = Actor::spawn(None, RecordStoreActor, RecordStoreArguments::InMemory)
        .await
        .expect("Failed to create record store");
    let (bus, _) = Actor::spawn(None, MessageBusActor, ())
        .await
        .expect("Failed to create bus");
    let (controller_ref, _) = Actor::spawn(
        None,
        ControllerActor,
        ControllerArguments {
            bus: bus.clone(),
            store: store.clone(),
            service: Arc::new(NoMatches),
            settings: ControllerSettings {
                remote_timeout: Duration::from_secs(2),
                min_assistant_chars: 1,
                auto_process: false,
            },
        },
    )
    .await
    .expect("Failed to create controller");

    let api_state = api::ApiState {
        controller: controller_ref.clone(),
        store,
        bus: bus.clone(),
    };
    (api::router().with_state(api_state), bus, controller_ref)
}

async fn show_conversation(bus: &ActorRef<MessageBusMsg>, controller_ref: &ActorRef<ControllerMsg>) {
    let messages = vec![Message::user("hi"), Message::assistant("hello")];
    let hash = fingerprint(&messages);
    CONVERSATION_CHANGED.dispatch(
        bus,
        ConversationChanged {
            id: "c-1".to_string(),
            snapshot: Some(messages),
            hash: Some(hash.clone()),
            title: Some("Bread".to_string()),
        },
    );
    let mut rx = controller::subscribe_view(controller_ref).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(3),
        rx.wait_for(|view| view.content_hash.as_deref() == Some(hash.as_str())),
    )
    .await
    .expect("View never updated")
    .unwrap();
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("Invalid JSON response");
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _bus, _controller) = setup_test_app().await;

    let (status, body) = json_response(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "convo-sync");
    assert_eq!(body["subscribers"]["controller"], 1);
    assert_eq!(body["subscribers"]["observer"], 0);
}

#[tokio::test]
async fn test_conversation_view_before_navigation() {
    let (app, _bus, _controller) = setup_test_app().await;

    let (status, body) = json_response(&app, get("/conversation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display"]["state"], "no_conversation");
    assert_eq!(body["view"]["conversation_id"], Value::Null);
}

#[tokio::test]
async fn test_process_then_read_records() {
    let (app, bus, controller_ref) = setup_test_app().await;
    show_conversation(&bus, &controller_ref).await;

    let req = Request::builder()
        .method("POST")
        .uri("/conversation/process")
        .header("content-type", "application/json")
        .body(Body::from(json!({"force_refresh": false}).to_string()))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"outcome": "completed", "matches": []}));

    // No body: same content, nothing to do.
    let req = Request::builder()
        .method("POST")
        .uri("/conversation/process")
        .body(Body::empty())
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "skipped");
    assert_eq!(body["reason"]["kind"], "up_to_date");

    let (status, body) = json_response(&app, get("/conversation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display"]["state"], "empty");
    assert_eq!(body["view"]["title"], "Bread");

    let (status, body) = json_response(&app, get("/records")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (status, body) = json_response(&app, get("/records/c-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert!(body["content_hash"].is_string());

    let (status, body) = json_response(&app, get("/records/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["conversation_id"], "unknown");
}

#[tokio::test]
async fn test_process_without_conversation_is_skipped() {
    let (app, _bus, _controller) = setup_test_app().await;

    let req = Request::builder()
        .method("POST")
        .uri("/conversation/process")
        .header("content-type", "application/json")
        .body(Body::from(json!({"force_refresh": true}).to_string()))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "skipped");
    assert_eq!(body["reason"]["kind"], "not_ready");
    assert_eq!(body["reason"]["detail"], "no active conversation");
}

#[tokio::test]
async fn test_stopped_controller_returns_service_unavailable() {
    let (app, _bus, controller_ref) = setup_test_app().await;
    controller_ref.stop(None);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = json_response(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscribers"]["controller"], 0);

    let (status, body) = json_response(&app, get("/conversation")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .starts_with("controller unavailable"));

    let req = Request::builder()
        .method("POST")
        .uri("/conversation/process")
        .body(Body::empty())
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.get("outcome").is_none());
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .starts_with("controller unavailable"));
}
