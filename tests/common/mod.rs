//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use tower::ServiceExt;

use request_engine::config::EngineConfig;
use request_engine::engine::{Engine, EngineBuilder};
use request_engine::error::EngineResult;
use request_engine::http::{build_router, RequestContext};
use request_engine::routing::{Content, ContentProvider, Endpoint, MemoryModule};

/// Provider returning fixed bytes and counting how often it ran.
pub struct CountingProvider {
    body: Bytes,
    etag: Option<String>,
    pub calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(body: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            body: body.into(),
            etag: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn with_etag(body: impl Into<Bytes>, etag: &str) -> Arc<Self> {
        Arc::new(Self {
            body: body.into(),
            etag: Some(etag.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProvider for CountingProvider {
    async fn fetch(&self, _ctx: &RequestContext) -> EngineResult<Content> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Content::Buffer(self.body.clone()))
    }

    fn etag(&self, _ctx: &RequestContext) -> Option<String> {
        self.etag.clone()
    }
}

/// Engine serving `endpoints` from one memory module.
pub fn engine_with(config: EngineConfig, endpoints: Vec<(&str, Endpoint)>) -> Arc<Engine> {
    builder_with(config, endpoints).build()
}

pub fn builder_with(config: EngineConfig, endpoints: Vec<(&str, Endpoint)>) -> EngineBuilder {
    let module = MemoryModule::new("test");
    for (path, endpoint) in endpoints {
        module.add(path, endpoint);
    }
    Engine::builder(config).module(Arc::new(module))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `name=value` pairs of every `Set-Cookie`, ready for a `Cookie` header.
    pub fn cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::to_string)
            .collect()
    }

    pub fn cookie_header(&self) -> String {
        self.cookies().join("; ")
    }
}

/// Send one request through the full router in process.
pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(router: &Router, path: &str, headers: &[(&str, &str)]) -> TestResponse {
    let mut request = Request::get(path);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    send(router, request.body(Body::empty()).unwrap()).await
}

pub fn router(engine: &Arc<Engine>) -> Router {
    build_router(Arc::clone(engine))
}
