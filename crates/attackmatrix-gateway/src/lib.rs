//! ATT&CK Matrix API Gateway
//!
//! Exposes the query engine over HTTP:
//! - `GET /api/explore/*path` — raw subtree exploration
//! - `GET /api/search` — multi-term OR search (`params=`, `matrix=`)
//! - `GET /api/actoroverlap` — pairwise actor comparison (`actor1=`, `actor2=`)
//! - `GET /api/ttpoverlap` — multi-id TTP matching (`ttp=`)
//!
//! Graphs are loaded once at startup and served read-only; concurrent
//! queries need no locking. Access can be gated by a shared token passed as
//! a `token` query parameter.

#![warn(missing_docs)]

pub mod handlers;
pub mod middleware;

use attackmatrix::GraphSet;
use axum::{routing::get, Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;

/// Immutable application state shared across handlers.
pub struct AppState {
    /// The loaded matrix snapshot.
    pub graphs: GraphSet,
    /// Optional access token; `None` disables authentication.
    pub token: Option<String>,
}

impl AppState {
    /// Create state over a loaded graph snapshot.
    pub fn new(graphs: GraphSet, token: Option<String>) -> Self {
        Self { graphs, token }
    }
}

/// Build the API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Matrix catalog
        .route("/api/matrices", get(handlers::matrices))
        // Query API
        .route("/api/explore/", get(handlers::explore_root))
        .route("/api/explore/*path", get(handlers::explore))
        .route("/api/search/", get(handlers::search))
        .route("/api/search", get(handlers::search))
        .route("/api/actoroverlap/", get(handlers::actor_overlap))
        .route("/api/actoroverlap", get(handlers::actor_overlap))
        .route("/api/ttpoverlap/", get(handlers::ttp_overlap))
        .route("/api/ttpoverlap", get(handlers::ttp_overlap))
        .layer(axum::middleware::from_fn(middleware::logging))
        .layer(Extension(state))
}

/// Start the gateway server.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), std::io::Error> {
    let matrices = state.graphs.len();
    let app = build_router(Arc::new(state));

    tracing::info!(%addr, matrices, "ATT&CK matrix gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
