//! api.rs — the operator-facing HTTP surface.
//!
//! Submission, item inspection, operator retry/skip, queue stats, and the
//! pause/resume/reload admin switches. Everything here is a thin layer
//! over the store and the shared control handles; no pipeline logic.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::coordinator::ProcessingControl;
use crate::dedup::DuplicateIndex;
use crate::model::Submission;
use crate::policy::PolicyHandle;
use crate::store::{JobStore, ReserveOutcome};

pub struct AppState<S: JobStore> {
    pub store: Arc<S>,
    pub dedup: DuplicateIndex<S>,
    pub control: ProcessingControl,
    pub policies: PolicyHandle,
}

impl<S: JobStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dedup: DuplicateIndex::new(Arc::clone(&self.store)),
            control: self.control.clone(),
            policies: self.policies.clone(),
        }
    }
}

pub fn create_router<S: JobStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/submit", post(submit::<S>))
        .route("/items/{id}", get(get_item::<S>))
        .route("/items/{id}/retry", post(retry_item::<S>))
        .route("/items/{id}/skip", post(skip_item::<S>))
        .route("/stats", get(stats::<S>))
        .route("/admin/pause", post(admin_pause::<S>))
        .route("/admin/resume", post(admin_resume::<S>))
        .route("/admin/reload-policies", post(admin_reload_policies::<S>))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(json!({ "error": message.into() }))).into_response()
}

/// Admission endpoint. A duplicate is not an error: it answers 200 with
/// the existing item's id and status so the submitter can follow up.
async fn submit<S: JobStore>(
    State(state): State<AppState<S>>,
    Json(submission): Json<Submission>,
) -> Response {
    match state.dedup.check_and_reserve(submission).await {
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(Err(invalid)) => error_response(StatusCode::BAD_REQUEST, invalid.to_string()),
        Ok(Ok(admission)) => {
            let code = if admission.is_duplicate() {
                StatusCode::OK
            } else {
                StatusCode::ACCEPTED
            };
            let body = match &admission.outcome {
                ReserveOutcome::Created { item_id } => json!({
                    "outcome": "created",
                    "item_id": item_id,
                    "canonical_url": admission.canonical_url,
                    "canonical_id": admission.canonical_id,
                }),
                ReserveOutcome::Existing { item_id, status } => json!({
                    "outcome": "duplicate",
                    "item_id": item_id,
                    "status": status,
                    "canonical_url": admission.canonical_url,
                    "canonical_id": admission.canonical_id,
                }),
            };
            (code, Json(body)).into_response()
        }
    }
}

async fn get_item<S: JobStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.get(id).await {
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no item {id}")),
        Ok(Some(item)) => Json(item).into_response(),
    }
}

/// Operator retry: failed → pending. Anything else is a conflict.
async fn retry_item<S: JobStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.retry(id, Utc::now()).await {
        Ok(item) => Json(item).into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn skip_item<S: JobStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.request_skip(id).await {
        Ok(()) => Json(json!({ "skip_requested": true })).into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn stats<S: JobStore>(State(state): State<AppState<S>>) -> Response {
    match state.store.stats().await {
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(stats) => Json(json!({
            "paused": state.control.is_paused(),
            "policy_version": state.policies.snapshot().version_tag(),
            "queue": stats,
        }))
        .into_response(),
    }
}

async fn admin_pause<S: JobStore>(State(state): State<AppState<S>>) -> Json<serde_json::Value> {
    state.control.pause();
    Json(json!({ "paused": true }))
}

async fn admin_resume<S: JobStore>(State(state): State<AppState<S>>) -> Json<serde_json::Value> {
    state.control.resume();
    Json(json!({ "paused": false }))
}

async fn admin_reload_policies<S: JobStore>(State(state): State<AppState<S>>) -> Response {
    match state.policies.reload() {
        Ok(version) => Json(json!({ "reloaded": true, "policy_version": version })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
