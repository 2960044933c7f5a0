//! Health endpoints: liveness, readiness (active probe), detail view, and
//! the operator circuit reset. Status codes are 200 / 503 only.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::state::AppState;

/// Always 200 while the process runs.
pub async fn liveness() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// 200 iff the database answers a probe AND the circuit is closed. The
/// active probe makes recovery visible promptly; the external load balancer
/// drains traffic on 503.
pub async fn readiness(State(state): State<AppState>) -> Response {
    let Some(tenant) = state.probe_tenant() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no tenants configured").into_response();
    };
    // The probe respects the circuit: while open inside the reset window it
    // fails fast; after the window it doubles as the recovery probe.
    let available = state.gateway.is_available(tenant).await;
    if available && !state.gateway.is_circuit_open() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
    }
}

/// Detailed JSON view for operators.
pub async fn detail(State(state): State<AppState>) -> Response {
    let database_up = match state.probe_tenant() {
        Some(tenant) => state.gateway.is_available(tenant).await,
        None => false,
    };
    // Read after the probe so a failure it just recorded is visible.
    let circuit_open = state.gateway.is_circuit_open();
    let body = json!({
        "status": if database_up && !circuit_open { "UP" } else { "DOWN" },
        "database": if database_up { "up" } else { "down" },
        "circuit": if circuit_open { "OPEN" } else { "CLOSED" },
        "lastFailureAt": state.gateway.last_failure_at().map(|t| t.to_string()),
        "backend": state.gateway.backend_name(),
    });
    let status = if database_up && !circuit_open {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(body)).into_response()
}

/// Manual transition to closed, for operators after known-good recovery.
/// The next database call is attempted and circuit state reflects its
/// outcome.
pub async fn circuit_reset(State(state): State<AppState>) -> Response {
    state.gateway.reset_circuit();
    (StatusCode::OK, axum::Json(json!({"circuit": "CLOSED"}))).into_response()
}
