//! HTTP surface: welcome route and the GitLab webhook endpoint

pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;
pub use webhook::handle_gitlab;

pub const WEBHOOK_PATH: &str = "/gitlab";

pub async fn root() -> &'static str {
    "Hello, World!"
}

/// Build the application router
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        // every method reaches the handler so it can answer 405 itself
        .route(WEBHOOK_PATH, routing::any(handle_gitlab))
        .with_state(state)
}
