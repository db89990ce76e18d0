//! Routes answered by the engine itself.
//!
//! Forced built-ins (logout, header auth, server time, message poll) run
//! before module resolution and cannot be shadowed. Optional built-ins
//! (favicon, logo, login probe) are only consulted when no module claims
//! the path.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;

use crate::cache::CacheDuration;
use crate::compression::CompressionPreferences;
use crate::config::BuiltinRoutesConfig;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::http::response::{self, Outgoing, Payload};
use crate::http::RequestContext;
use crate::routing::{Content, Endpoint, FnProvider, StaticContent};

const SVG: &str = "image/svg+xml";

/// Answer `ctx` if its path is a forced built-in.
pub(crate) async fn forced(
    engine: &Engine,
    ctx: &RequestContext,
    routes: &BuiltinRoutesConfig,
) -> Option<EngineResult<Response>> {
    let path = ctx.path();
    let result = if path == routes.logout {
        logout(engine, ctx)
    } else if path == routes.auth {
        authenticate(engine, ctx)
    } else if path == routes.server_time {
        server_time(ctx)
    } else if path == routes.messages {
        poll_messages(engine, ctx).await
    } else {
        return None;
    };
    Some(result)
}

/// Only same-site paths are accepted as redirect targets.
fn return_target(ctx: &RequestContext) -> Option<String> {
    ctx.query_param("return")
        .filter(|target| target.starts_with('/') && !target.starts_with("//"))
}

fn logout(engine: &Engine, ctx: &RequestContext) -> EngineResult<Response> {
    let changed = engine.sessions().set_auth(&ctx.session, None);
    match return_target(ctx) {
        Some(target) => Ok(response::redirect(&target)),
        None => json_response(&json!({ "logged_out": changed }), ctx),
    }
}

fn authenticate(engine: &Engine, ctx: &RequestContext) -> EngineResult<Response> {
    let authenticator = engine
        .authenticator()
        .ok_or_else(|| EngineError::NotFound(ctx.path().to_string()))?;

    let identity = authenticator
        .authenticate(&ctx.headers)
        .ok_or(EngineError::Unauthorized)?;
    engine.sessions().set_auth(&ctx.session, Some(identity));

    Ok(response::redirect(
        &return_target(ctx).unwrap_or_else(|| "/".to_string()),
    ))
}

fn server_time(ctx: &RequestContext) -> EngineResult<Response> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    json_response(&json!({ "now_ms": now.as_millis() as u64 }), ctx)
}

async fn poll_messages(engine: &Engine, ctx: &RequestContext) -> EngineResult<Response> {
    let since = ctx
        .query_param("since")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    let types: Vec<String> = ctx
        .query_param("types")
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let wait = ctx
        .query_param("wait")
        .and_then(|w| w.parse::<u64>().ok())
        .map(Duration::from_secs);

    let outcome = engine
        .messages()
        .poll(&ctx.session, since, &types, wait, &ctx.cancel)
        .await;
    json_response(&outcome, ctx)
}

fn json_response<T: Serialize>(value: &T, ctx: &RequestContext) -> EngineResult<Response> {
    let body = serde_json::to_vec(value)
        .map_err(|e| EngineError::Internal(format!("failed to encode response: {e}")))?;
    Ok(Outgoing {
        status: StatusCode::OK,
        payload: Payload::Bytes(Bytes::from(body)),
        encoding: None,
        content_type: Some("application/json"),
        etag: None,
        cache_control: "no-store",
        content_range: None,
        vary_encoding: false,
    }
    .into_response(ctx.method == axum::http::Method::HEAD))
}

/// Fallback endpoints for paths no module claimed.
pub(crate) struct OptionalBuiltins {
    favicon: Arc<Endpoint>,
    logo: Arc<Endpoint>,
    login_probe: Arc<Endpoint>,
}

impl OptionalBuiltins {
    pub(crate) fn new() -> Self {
        Self {
            favicon: Arc::new(image_endpoint("favicon", favicon_svg())),
            logo: Arc::new(image_endpoint("logo", logo_svg())),
            login_probe: Arc::new(login_probe_endpoint()),
        }
    }

    pub(crate) fn resolve(&self, path: &str, routes: &BuiltinRoutesConfig) -> Option<Arc<Endpoint>> {
        let endpoint = if path == routes.favicon {
            &self.favicon
        } else if path == routes.logo {
            &self.logo
        } else if path == routes.login_probe {
            &self.login_probe
        } else {
            return None;
        };
        Some(Arc::clone(endpoint))
    }
}

fn image_endpoint(key: &str, svg: String) -> Endpoint {
    let mut hasher = DefaultHasher::new();
    svg.hash(&mut hasher);
    let etag = format!("{key}-{:016x}", hasher.finish());

    Endpoint::new(key, Arc::new(StaticContent::new(svg).with_etag(etag)))
        .with_content_type(SVG)
        .with_server_cache(CacheDuration::Global(Duration::from_secs(3600)))
        .with_client_cache(Duration::from_secs(24 * 3600))
}

fn login_probe_endpoint() -> Endpoint {
    let provider = FnProvider::new(|ctx: &RequestContext| {
        let body = match ctx.session.identity() {
            Some(identity) => json!({
                "logged_in": true,
                "user": identity.name,
                "tokens": identity.tokens,
            }),
            None => json!({ "logged_in": false }),
        };
        Ok(Content::from(body.to_string()))
    });
    Endpoint::new("login_probe", Arc::new(provider))
        .with_content_type("application/json")
        .with_compression(CompressionPreferences::none())
}

fn favicon_svg() -> String {
    concat!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16">"##,
        r##"<rect width="16" height="16" rx="3" fill="#2b6cb0"/>"##,
        r##"<path d="M4 4h8v2H6v1h5v2H6v1h6v2H4z" fill="#fff"/></svg>"##
    )
    .to_string()
}

fn logo_svg() -> String {
    concat!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 120 32">"##,
        r##"<rect width="32" height="32" rx="6" fill="#2b6cb0"/>"##,
        r##"<path d="M8 8h16v4H13v2h9v4h-9v2h11v4H8z" fill="#fff"/>"##,
        r##"<text x="40" y="22" font-family="sans-serif" font-size="16" fill="#2b6cb0">engine</text>"##,
        r##"</svg>"##
    )
    .to_string()
}

/// Value for `WWW-Authenticate` on 401 responses.
pub(crate) fn challenge(engine: &Engine) -> String {
    engine
        .authenticator()
        .map_or_else(|| "Bearer".to_string(), |a| a.challenge())
}

pub(crate) fn set_challenge(response: &mut Response, engine: &Engine) {
    response::insert(
        response.headers_mut(),
        header::WWW_AUTHENTICATE,
        &challenge(engine),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_builtins_follow_configured_paths() {
        let builtins = OptionalBuiltins::new();
        let mut routes = BuiltinRoutesConfig::default();
        assert_eq!(builtins.resolve("/favicon.ico", &routes).unwrap().key, "favicon");
        assert!(builtins.resolve("/icon.svg", &routes).is_none());

        routes.favicon = "/icon.svg".to_string();
        assert!(builtins.resolve("/icon.svg", &routes).is_some());
    }

    #[test]
    fn test_images_cache_globally() {
        let builtins = OptionalBuiltins::new();
        let logo = builtins
            .resolve("/logo.png", &BuiltinRoutesConfig::default())
            .unwrap();
        assert_eq!(logo.server_cache, CacheDuration::Global(Duration::from_secs(3600)));
        assert_eq!(logo.content_type.as_deref(), Some(SVG));
    }

    #[test]
    fn test_return_target_rejects_foreign_hosts() {
        let ctx = RequestContext::for_path("/_logout?return=//evil.example/");
        assert!(return_target(&ctx).is_none());
        let ctx = RequestContext::for_path("/_logout?return=%2Fhome");
        assert_eq!(return_target(&ctx).as_deref(), Some("/home"));
    }
}
