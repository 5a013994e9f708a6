//! API handlers
//!
//! Thin wrappers over the query engine. Absent results are served as JSON
//! `null`, never as errors; a bad or missing token yields 403.

use crate::AppState;
use attackmatrix::query::{self, MatrixFilter};
use attackmatrix::catalog;
use axum::{
    extract::{Path, RawQuery},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the process is serving.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Number of loaded matrices.
    pub matrices: usize,
}

/// Health check.
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        matrices: state.graphs.len(),
    })
}

/// Catalog entry served by `/api/matrices`.
#[derive(Serialize)]
pub struct MatrixInfo {
    /// Matrix name; the key used in queries.
    pub name: String,
    /// Human-readable title.
    pub title: String,
    /// Matrix description.
    pub description: String,
    /// Whether a graph for this matrix is currently loaded.
    pub loaded: bool,
}

/// List the known matrices and whether each is loaded.
pub async fn matrices(Extension(state): Extension<Arc<AppState>>) -> Json<Vec<MatrixInfo>> {
    Json(
        catalog::MATRICES
            .iter()
            .map(|m| MatrixInfo {
                name: m.name.to_string(),
                title: m.title.to_string(),
                description: m.description.to_string(),
                loaded: state.graphs.contains_key(m.name),
            })
            .collect(),
    )
}

/// Explore from the snapshot root.
pub async fn explore_root(
    Extension(state): Extension<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    explore_at(&state, "", &raw)
}

/// Explore the subtree at `path`.
pub async fn explore(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<String>,
    RawQuery(raw): RawQuery,
) -> Response {
    explore_at(&state, &path, &raw)
}

fn explore_at(state: &AppState, path: &str, raw: &Option<String>) -> Response {
    let params = query_params(raw);
    if let Err(denied) = authorize(state, &params) {
        return denied;
    }
    match query::explore(&state.graphs, path) {
        Some(subtree) => Json(subtree).into_response(),
        None => Json(Value::Null).into_response(),
    }
}

/// Case-insensitive OR search over names and descriptions.
/// Repeated `params=` terms; optional repeated `matrix=` scoping.
pub async fn search(
    Extension(state): Extension<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let params = query_params(&raw);
    if let Err(denied) = authorize(&state, &params) {
        return denied;
    }
    let terms = values(&params, "params");
    let filter = MatrixFilter::from_params(values(&params, "matrix"));
    Json(query::search(&state.graphs, &terms, &filter)).into_response()
}

/// Overlapping TTPs of two actors (`actor1=`, `actor2=`).
pub async fn actor_overlap(
    Extension(state): Extension<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let params = query_params(&raw);
    if let Err(denied) = authorize(&state, &params) {
        return denied;
    }
    let (Some(actor1), Some(actor2)) = (value(&params, "actor1"), value(&params, "actor2")) else {
        return bad_request("actor1 and actor2 are required");
    };
    match query::actor_overlap(&state.graphs, &actor1, &actor2) {
        Some(overlap) => Json(overlap).into_response(),
        None => Json(Value::Null).into_response(),
    }
}

/// Actors covering every given TTP id (repeated `ttp=`).
pub async fn ttp_overlap(
    Extension(state): Extension<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let params = query_params(&raw);
    if let Err(denied) = authorize(&state, &params) {
        return denied;
    }
    let ttps = values(&params, "ttp");
    Json(query::ttp_overlap(&state.graphs, &ttps)).into_response()
}

// =============================================================================
// Helpers
// =============================================================================

/// Decode the raw query string, preserving repeated keys.
fn query_params(raw: &Option<String>) -> Vec<(String, String)> {
    match raw {
        Some(raw) => form_urlencoded::parse(raw.as_bytes())
            .into_owned()
            .collect(),
        None => Vec::new(),
    }
}

fn values(params: &[(String, String)], key: &str) -> Vec<String> {
    params
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .collect()
}

fn value(params: &[(String, String)], key: &str) -> Option<String> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

/// Check the `token` query parameter against the configured token.
fn authorize(state: &AppState, params: &[(String, String)]) -> Result<(), Response> {
    let Some(expected) = &state.token else {
        return Ok(());
    };
    if value(params, "token").as_deref() == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": "Missing or incorrect token"})),
        )
            .into_response())
    }
}

fn bad_request(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"detail": detail})),
    )
        .into_response()
}

// =============================================================================
// Tests
// =============================================================================
