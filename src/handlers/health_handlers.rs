//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> the backends this proxy can route to

use crate::services::server::ProxyState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Cheap liveness probe. Never touches a backend.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Lists the registered backend ids, default first, and the size of the
/// MIME table. No network calls are made: a backend that is down only
/// fails the requests routed to it.
pub async fn readyz(State(state): State<ProxyState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(ReadyResponse {
            status: "ok".into(),
            backends: state.registry.ids(),
            mime_types: state.mime.len(),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backends: Vec<String>,
    mime_types: usize,
}
