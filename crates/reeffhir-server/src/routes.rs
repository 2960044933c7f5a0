//! Router assembly: tenant-prefixed FHIR endpoints plus health.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::health;
use crate::middleware;
use crate::state::AppState;

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .route("/health", get(health::detail))
        .route("/health/circuit/reset", post(health::circuit_reset))
        .route("/fhir/{tenant}", post(handlers::bundle))
        .route(
            "/fhir/{tenant}/{rtype}",
            get(handlers::search).post(handlers::create),
        )
        .route(
            "/fhir/{tenant}/Patient/{id}/$everything",
            get(handlers::everything),
        )
        .route(
            "/fhir/{tenant}/{rtype}/{id}",
            get(handlers::read)
                .put(handlers::update)
                .patch(handlers::patch)
                .delete(handlers::delete),
        )
        .route("/fhir/{tenant}/{rtype}/{id}/_history", get(handlers::history))
        .route(
            "/fhir/{tenant}/{rtype}/{id}/_history/{vid}",
            get(handlers::vread),
        )
        .layer(axum::middleware::from_fn(middleware::instrument))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
