//! HTTP API endpoints.

pub mod health;
pub mod workflows;

use axum::Router;

use crate::AppState;

/// Merge all API routers.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(workflows::router())
}
