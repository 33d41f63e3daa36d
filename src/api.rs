//! HTTP surface — inbox read API and service admin API.
//!
//! Thin collaborator over the store and filter engine: read routes compose
//! the base address query with a routing scope at query time; admin routes
//! mutate the service registry only and never touch stored mail.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::DatabaseError;
use crate::filter::{Scope, ServiceFilter};
use crate::store::{Database, EmailRecord, ServiceRecord};

/// Shared state for all API routes.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    pub served_domains: Vec<String>,
    pub excluded_sender: String,
}

/// Build the full router. CORS is wide open — the consumer is a browser SPA.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/services", get(list_services))
        .route("/api/emails/{user}", get(emails_all))
        .route("/api/emails/{user}/service/{scope}", get(emails_scoped))
        .route("/api/admin/services", post(create_service))
        .route("/api/admin/services/{id}", put(update_service))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Read routes ─────────────────────────────────────────────────────

async fn health() -> &'static str {
    "mailsink backend running"
}

/// GET /api/services — list all routing services.
async fn list_services(State(state): State<ApiState>) -> Response {
    match state.db.list_services().await {
        Ok(services) => Json(services).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// GET /api/emails/{user} — the unscoped "all" view: every resolved or
/// unresolved message for the inbox, named-service mail included.
async fn emails_all(State(state): State<ApiState>, Path(user): Path<String>) -> Response {
    match state
        .db
        .emails_for_address(&user, &state.served_domains, &state.excluded_sender)
        .await
    {
        Ok(emails) => Json(emails).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// GET /api/emails/{user}/service/{scope} — scoped view. `scope` is a
/// service id, a service name, or `other` for the catch-all scope.
async fn emails_scoped(
    State(state): State<ApiState>,
    Path((user, scope)): Path<(String, String)>,
) -> Response {
    let services = match state.db.list_services().await {
        Ok(services) => services,
        Err(e) => return internal_error(&e),
    };

    let Some(scope) = resolve_scope(&scope, &services) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Unknown service scope"})),
        )
            .into_response();
    };

    match state
        .db
        .emails_for_address(&user, &state.served_domains, &state.excluded_sender)
        .await
    {
        Ok(emails) => {
            let filtered: Vec<EmailRecord> =
                emails.into_iter().filter(|e| scope.includes(e)).collect();
            Json(filtered).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

// ── Admin routes ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateService {
    #[serde(default)]
    name: String,
    #[serde(default)]
    sender_filter: String,
    #[serde(default)]
    subject_filter: String,
}

/// POST /api/admin/services — create a routing service.
async fn create_service(
    State(state): State<ApiState>,
    Json(body): Json<CreateService>,
) -> Response {
    if body.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Service name is required"})),
        )
            .into_response();
    }

    match state
        .db
        .create_service(&body.name, &body.sender_filter, &body.subject_filter)
        .await
    {
        Ok(id) => Json(serde_json::json!({"success": true, "id": id})).into_response(),
        Err(e) => internal_error(&e),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateService {
    #[serde(default)]
    sender_filter: String,
    #[serde(default)]
    subject_filter: String,
}

/// PUT /api/admin/services/{id} — replace a service's filters.
async fn update_service(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateService>,
) -> Response {
    match state
        .db
        .update_service(id, &body.sender_filter, &body.subject_filter)
        .await
    {
        Ok(()) => Json(serde_json::json!({"success": true})).into_response(),
        Err(DatabaseError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Service not found"})),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Resolve a scope selector against the registry. Ids stay accepted for
/// wire compatibility; names are the stable way to address well-known
/// services; `other` selects the catch-all scope.
fn resolve_scope(selector: &str, services: &[ServiceRecord]) -> Option<Scope> {
    if selector.eq_ignore_ascii_case("other") {
        return Some(Scope::catch_all(services));
    }
    if let Ok(id) = selector.parse::<i64>() {
        return services
            .iter()
            .find(|s| s.id == id)
            .map(|s| Scope::Service(ServiceFilter::from_record(s)));
    }
    services
        .iter()
        .find(|s| s.name == selector)
        .map(|s| Scope::Service(ServiceFilter::from_record(s)))
}

fn internal_error(e: &DatabaseError) -> Response {
    tracing::error!("API storage error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "Internal Error"})),
    )
        .into_response()
}

// ── Tests ───────────────────────────────────────────────────────────
