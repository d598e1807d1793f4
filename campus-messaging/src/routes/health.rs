use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campus_shared::{HealthCheck, HealthResponse};

use crate::AppState;

/// Liveness plus a store health check.
pub async fn health_check(State(state): State<AppState>) -> Response {
    let store = match state.messaging.store_healthy().await {
        Ok(()) => HealthCheck::passed("store"),
        Err(e) => HealthCheck::failed("store", e),
    };

    let response = HealthResponse::healthy("campus-messaging", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![store]);

    (response.http_status(), Json(response)).into_response()
}

/// Prometheus text exposition; 404 when the recorder could not be installed.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
