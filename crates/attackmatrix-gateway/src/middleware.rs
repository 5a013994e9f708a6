//! Request logging
//!
//! One structured log line per query request, carrying the operation path
//! and how long the engine took to answer. Token values travel in the query
//! string, so only the path is logged, never the raw query.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Log every request with its resolved status and latency.
pub async fn logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let start = Instant::now();
    let response = next.run(request).await;

    tracing::info!(
        %method,
        path,
        status = %response.status(),
        latency_us = start.elapsed().as_micros() as u64,
        "query served"
    );

    response
}
