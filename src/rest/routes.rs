//! Route handlers for the HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::intake::{EventRequest, IntakeError};
use crate::AppContext;

pub async fn healthz(State(_ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

pub async fn list_notifications(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    match ctx.store.list_tasks(50).await {
        Ok(items) => (StatusCode::OK, Json(json!({ "items": items }))).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "failed to list tasks");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to load tasks" })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct CreateEventRequest {
    #[serde(default, rename = "eventType")]
    pub event_type: Option<String>,
    #[serde(default, rename = "entityId")]
    pub entity_id: Option<String>,
    #[serde(default, rename = "recipientEmail")]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, rename = "chaosFailPercent")]
    pub chaos_fail_percent: Option<i64>,
}

pub async fn create_event(State(ctx): State<Arc<AppContext>>, body: String) -> impl IntoResponse {
    let req: CreateEventRequest = if body.trim().is_empty() {
        CreateEventRequest {
            event_type: None,
            entity_id: None,
            recipient_email: None,
            priority: None,
            chaos_fail_percent: None,
        }
    } else {
        match serde_json::from_str(&body) {
            Ok(req) => req,
            Err(_) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid JSON" }))).into_response();
            }
        }
    };

    let result = ctx
        .intake
        .submit(EventRequest {
            event_type: req.event_type,
            entity_id: req.entity_id,
            recipient_email: req.recipient_email,
            priority: req.priority,
            chaos_fail_percent: req.chaos_fail_percent,
        })
        .await;

    match result {
        Ok(r) => (
            StatusCode::OK,
            Json(json!({
                "task_id": r.task_id,
                "idempotency_key": r.idempotency_key,
                "entity_id": r.entity_id,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(err = %e, "intake failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

pub async fn replay_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    if task_id.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "task_id required" }))).into_response();
    }

    match ctx.intake.replay(&task_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true, "task_id": task_id }))).into_response(),
        Err(IntakeError::Store(e)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(IntakeError::Queue(e)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
