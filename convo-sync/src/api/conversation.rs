//! Active conversation endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::actors::controller;
use crate::api::ApiState;

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub force_refresh: bool,
}

/// GET /conversation - the published view and what to render for it
pub async fn get_conversation(State(state): State<ApiState>) -> impl IntoResponse {
    match controller::get_view(&state.controller).await {
        Ok(view) => {
            let display = view.display();
            (
                StatusCode::OK,
                Json(json!({ "view": view, "display": display })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read conversation view");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": format!("controller unavailable: {e}") })),
            )
        }
    }
}

/// POST /conversation/process - run one processing attempt and wait for it
///
/// The body is optional; `{"force_refresh": true}` ignores a settled record.
pub async fn process_conversation(
    State(state): State<ApiState>,
    body: Option<Json<ProcessRequest>>,
) -> impl IntoResponse {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    match controller::process_conversation(&state.controller, request.force_refresh).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to reach controller");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": format!("controller unavailable: {e}") })),
            )
        }
    }
}
