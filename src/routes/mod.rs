//! HTTP routes.
//!
//! Every route is mounted under the operator's optional path prefix.
//! Request tracing and the blacklist wrap all of them.

pub mod health;
pub mod status;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::middleware::{blacklist_layer, request_id_layer};
use crate::state::AppState;

/// Normalise a path prefix to `/segment[/segment...]` with no trailing slash.
fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{}", trimmed))
    }
}

/// Creates the Axum router.
pub fn create_router(state: AppState, prefix: Option<&str>) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/status", get(status::status));

    let routes = match prefix.and_then(normalize_prefix) {
        Some(prefix) => Router::new().nest(&prefix, routes),
        None => routes,
    };

    routes
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, blacklist_layer))
        .layer(TraceLayer::new_for_http())
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
