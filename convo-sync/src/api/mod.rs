//! HTTP adapter for the UI
//!
//! Stateless views over the Controller and the record store. The UI polls
//! `GET /conversation` and asks for a (re)run with `POST /conversation/process`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ractor::ActorRef;
use serde_json::json;

pub mod conversation;
pub mod records;

use crate::actors::bus::{bus_stats, subscriber_count, Context, MessageBusMsg};
use crate::actors::controller::ControllerMsg;
use crate::actors::record_store::RecordStoreMsg;

#[derive(Clone)]
pub struct ApiState {
    pub controller: ActorRef<ControllerMsg>,
    pub store: ActorRef<RecordStoreMsg>,
    pub bus: ActorRef<MessageBusMsg>,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/conversation", get(conversation::get_conversation))
        .route(
            "/conversation/process",
            post(conversation::process_conversation),
        )
        .route("/records", get(records::list_records))
        .route("/records/{conversation_id}", get(records::get_record))
}

pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let bus = async {
        let stats = bus_stats(&state.bus).await?;
        let mut subscribers = serde_json::Map::new();
        for context in Context::ALL {
            let count = subscriber_count(&state.bus, context).await?;
            subscribers.insert(context.as_str().to_string(), json!(count));
        }
        Ok::<_, ractor::RactorErr<MessageBusMsg>>((stats, subscribers))
    };
    let (bus, subscribers) = match bus.await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(error = %e, "Message bus unavailable during health check");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "service": "convo-sync",
                    "error": e.to_string()
                })),
            );
        }
    };
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "convo-sync",
            "version": env!("CARGO_PKG_VERSION"),
            "bus": bus,
            "subscribers": subscribers
        })),
    )
}
