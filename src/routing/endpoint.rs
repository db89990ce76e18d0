//! Resolved handlers.
//!
//! An [`Endpoint`] is what a module hands back for a request: the policy
//! the pipeline applies (caching, compression, auth, limits) plus a
//! [`ContentProvider`] producing the bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::cache::{CacheDuration, CacheKeyMode};
use crate::compression::{ByteStream, CompressionPreferences, Encoding};
use crate::error::EngineResult;
use crate::http::RequestContext;
use crate::security::{RateLimit, RateLimiter};

/// Body produced by a provider.
pub enum Content {
    Buffer(Bytes),
    Stream(ByteStream),
}

impl Content {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(b) => f.debug_tuple("Buffer").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for Content {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}

impl From<&'static str> for Content {
    fn from(text: &'static str) -> Self {
        Self::Buffer(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Buffer(Bytes::from(text))
    }
}

/// Produces the content of an endpoint.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn fetch(&self, ctx: &RequestContext) -> EngineResult<Content>;

    /// Version tag of the current content, unquoted. `None` disables
    /// conditional requests.
    fn etag(&self, _ctx: &RequestContext) -> Option<String> {
        None
    }
}

/// Fixed bytes.
#[derive(Debug, Clone)]
pub struct StaticContent {
    body: Bytes,
    etag: Option<String>,
}

impl StaticContent {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

#[async_trait]
impl ContentProvider for StaticContent {
    async fn fetch(&self, _ctx: &RequestContext) -> EngineResult<Content> {
        Ok(Content::Buffer(self.body.clone()))
    }

    fn etag(&self, _ctx: &RequestContext) -> Option<String> {
        self.etag.clone()
    }
}

/// Adapts a plain closure into a provider.
pub struct FnProvider<F> {
    f: F,
    etag: Option<String>,
}

impl<F> FnProvider<F>
where
    F: Fn(&RequestContext) -> EngineResult<Content> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f, etag: None }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

#[async_trait]
impl<F> ContentProvider for FnProvider<F>
where
    F: Fn(&RequestContext) -> EngineResult<Content> + Send + Sync,
{
    async fn fetch(&self, ctx: &RequestContext) -> EngineResult<Content> {
        (self.f)(ctx)
    }

    fn etag(&self, _ctx: &RequestContext) -> Option<String> {
        self.etag.clone()
    }
}

/// Handler resolved for a request.
pub struct Endpoint {
    /// Stable identity of the resource, used for limiter keys and listings.
    pub key: String,
    pub client_cache: Duration,
    pub server_cache: CacheDuration,
    /// Hand the content to the client as it is produced.
    pub stream: bool,
    pub compression: CompressionPreferences,
    /// Encoding the provider's bytes are already in.
    pub precompressed: Option<Encoding>,
    pub required_tokens: Vec<String>,
    pub cache_key_mode: CacheKeyMode,
    /// Content differs per language when a translator is configured.
    pub localized: bool,
    /// Run the content through the templater.
    pub template: bool,
    pub content_type: Option<String>,
    /// Shared by every session.
    pub rate_limit: Option<RateLimiter>,
    /// Instantiated lazily inside each session.
    pub session_rate_limit: Option<RateLimit>,
    known_dynamic: AtomicBool,
    provider: Arc<dyn ContentProvider>,
}

impl Endpoint {
    pub fn new(key: impl Into<String>, provider: Arc<dyn ContentProvider>) -> Self {
        Self {
            key: key.into(),
            client_cache: Duration::ZERO,
            server_cache: CacheDuration::None,
            stream: false,
            compression: CompressionPreferences::standard(),
            precompressed: None,
            required_tokens: Vec::new(),
            cache_key_mode: CacheKeyMode::Path,
            localized: false,
            template: false,
            content_type: None,
            rate_limit: None,
            session_rate_limit: None,
            known_dynamic: AtomicBool::new(false),
            provider,
        }
    }

    pub fn with_client_cache(mut self, duration: Duration) -> Self {
        self.client_cache = duration;
        self
    }

    pub fn with_server_cache(mut self, duration: CacheDuration) -> Self {
        self.server_cache = duration;
        self
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_compression(mut self, preferences: CompressionPreferences) -> Self {
        self.compression = preferences;
        self
    }

    pub fn precompressed(mut self, encoding: Encoding) -> Self {
        self.precompressed = Some(encoding).filter(|e| *e != Encoding::Identity);
        self
    }

    pub fn require_token(mut self, token: impl Into<String>) -> Self {
        self.required_tokens.push(token.into());
        self
    }

    pub fn with_cache_key(mut self, mode: CacheKeyMode) -> Self {
        self.cache_key_mode = mode;
        self
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn templated(mut self) -> Self {
        self.template = true;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(RateLimiter::new(limit));
        self
    }

    pub fn with_session_rate_limit(mut self, limit: RateLimit) -> Self {
        self.session_rate_limit = Some(limit);
        self
    }

    pub fn provider(&self) -> &dyn ContentProvider {
        self.provider.as_ref()
    }

    /// Set once rendering has shown the content varies per viewer. From
    /// then on the endpoint skips ETags and the global tier.
    pub fn is_known_dynamic(&self) -> bool {
        self.known_dynamic.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dynamic(&self) {
        if !self.known_dynamic.swap(true, Ordering::AcqRel) {
            tracing::debug!(endpoint = %self.key, "Endpoint content is viewer dependent");
        }
    }

    /// Server cache policy after dynamic detection.
    pub fn effective_server_cache(&self) -> CacheDuration {
        if self.is_known_dynamic() {
            self.server_cache.into_session()
        } else {
            self.server_cache
        }
    }

    pub fn info(&self, module: &str) -> EndpointInfo {
        EndpointInfo {
            key: self.key.clone(),
            module: module.to_string(),
            server_cache: match self.server_cache {
                CacheDuration::None => "none".to_string(),
                CacheDuration::Global(d) => format!("global:{}s", d.as_secs()),
                CacheDuration::PerSession(d) => format!("session:{}s", d.as_secs()),
            },
            client_cache_secs: self.client_cache.as_secs(),
            stream: self.stream,
            precompressed: self.precompressed.map(|e| e.as_str()),
            required_tokens: self.required_tokens.clone(),
            dynamic: self.is_known_dynamic(),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("key", &self.key)
            .field("server_cache", &self.server_cache)
            .field("stream", &self.stream)
            .field("precompressed", &self.precompressed)
            .finish_non_exhaustive()
    }
}

/// Introspection record for endpoint listings.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointInfo {
    pub key: String,
    pub module: String,
    pub server_cache: String,
    pub client_cache_secs: u64,
    pub stream: bool,
    pub precompressed: Option<&'static str>,
    pub required_tokens: Vec<String>,
    pub dynamic: bool,
}
