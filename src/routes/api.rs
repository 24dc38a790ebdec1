use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{api, token};
use crate::state::AppState;

/// Create the token broker router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/token", get(token::generate_token))
        .layer(TraceLayer::new_for_http())
}
