//! Admin API.
//!
//! Bearer-key protected JSON views of engine state, served on a separate
//! listener.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::engine::Engine;

pub fn setup_admin_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(get_sessions))
        .route("/admin/sessions/closed", get(get_closed_sessions))
        .route("/admin/cache", get(get_cache))
        .route("/admin/endpoints", get(get_endpoints))
        .route("/admin/exceptions", get(get_exceptions))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&engine),
            admin_auth_middleware,
        ))
        .with_state(engine)
}
