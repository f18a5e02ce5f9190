//! Processing record endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::actors::record_store::{self, StoreError};
use crate::api::ApiState;

fn store_error_response(e: StoreError) -> axum::response::Response {
    let status = match e {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!(error = %e, "Record store request failed");
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

/// GET /records
pub async fn list_records(State(state): State<ApiState>) -> impl IntoResponse {
    match record_store::list_records(&state.store).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_error_response(e),
    }
}

/// GET /records/{conversation_id}
pub async fn get_record(
    State(state): State<ApiState>,
    Path(conversation_id): Path<String>,
) -> impl IntoResponse {
    match record_store::get_record(&state.store, conversation_id.clone()).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "record not found", "conversation_id": conversation_id })),
        )
            .into_response(),
        Err(e) => store_error_response(e),
    }
}
