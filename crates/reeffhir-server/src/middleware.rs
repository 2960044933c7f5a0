//! Request instrumentation.
//!
//! Every request gets an 8-byte reqId at ingress (mirrored on the response)
//! and exactly one structured INFO line on completion. Sub-operations stay
//! at DEBUG on the hot path.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use reeffhir_core::RequestId;

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub async fn instrument(mut req: Request<Body>, next: Next) -> Response {
    let req_id = RequestId::generate();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let (resource, operation) = classify(&path, method.as_str());

    req.extensions_mut().insert(req_id.clone());
    let start = Instant::now();
    let mut res = next.run(req).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let http_status = res.status().as_u16();
    let status = if res.status().is_client_error() || res.status().is_server_error() {
        "error"
    } else {
        "success"
    };
    tracing::info!(
        reqId = %req_id,
        method = %method,
        path = %path,
        duration_ms,
        status,
        http_status,
        resource = resource.as_deref().unwrap_or(""),
        operation = operation.unwrap_or(""),
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(req_id.as_str()) {
        res.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    res
}

/// Best-effort resource/operation labels for the completion line.
fn classify(path: &str, method: &str) -> (Option<String>, Option<&'static str>) {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    if segments.first() != Some(&"fhir") {
        return (None, None);
    }
    let resource = segments.get(2).map(|s| (*s).to_string());
    let operation = match (method, segments.len()) {
        ("POST", 2) => Some("bundle"),
        ("POST", 3) => Some("create"),
        ("GET", 3) => Some("search"),
        ("GET", 4) => Some("read"),
        ("PUT", 4) => Some("update"),
        ("PATCH", 4) => Some("patch"),
        ("DELETE", 4) => Some("delete"),
        ("GET", 5) if segments.last() == Some(&"_history") => Some("history"),
        ("GET", 5) if segments.get(4) == Some(&"$everything") => Some("everything"),
        ("GET", 6) => Some("vread"),
        _ => None,
    };
    (resource, operation)
}
