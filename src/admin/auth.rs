use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::engine::Engine;

pub async fn admin_auth_middleware(
    State(engine): State<Arc<Engine>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let config = engine.config();
    if config.admin.api_key.is_empty() {
        tracing::warn!("Admin request refused: no API key configured");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if let Some(auth_val) = auth_header {
        if auth_val.strip_prefix("Bearer ") == Some(config.admin.api_key.as_str()) {
            return Ok(next.run(request).await);
        }
    }

    Err(StatusCode::UNAUTHORIZED)
}
