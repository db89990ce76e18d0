//! The request pipeline.
//!
//! # Data Flow
//! ```text
//! Request
//!     → server admission            (429)
//!     → session resolve / create    (cookies, device id, language)
//!     → session admission           (429)
//!     → forced built-ins            (logout, auth, time, messages)
//!     → module resolution           (optional built-ins, else 404)
//!     → endpoint admission          (global, then per session; 429)
//!     → authorization               (302 / 401 / 403)
//!     → conditional request         (304)
//!     → cache lookup                (hit: replay)
//!     → content acquisition         (template, dynamic detection)
//!     → stored encoding             (passthrough / transcode / decode)
//!     → range                       (206 / 416)
//!     → runtime compression         (buffered or streamed)
//!     → cache store
//!     → write
//! ```
//!
//! # Design Decisions
//! - Steps run in a fixed order; the first failure ends the request and is
//!   converted into a response by [`error_response`]
//! - Ranged responses bypass the cache and are always sent unencoded
//! - Passthrough of stored encodings is never cached; the stored bytes are
//!   already the cheapest form
//! - Concurrent misses for one key all render; the last store wins

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::cache::{cache_key, resource_key, CacheDuration, CacheEntry, CachedResponse, ResponseCache};
use crate::compression::{
    can_transcode, collect_body, compress, compress_stream, decompress, decompress_stream,
    transcode, ByteStream, CompressionChoice, Encoding,
};
use crate::config::EngineConfig;
use crate::content::{negotiate_language, TemplateContext};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::http::builtins;
use crate::http::range::parse_range;
use crate::http::response::{self, cache_control, etag_matches, localized_etag, quote_etag, Outgoing, Payload};
use crate::http::RequestContext;
use crate::net::ClientAddr;
use crate::observability::metrics;
use crate::routing::{Content, Endpoint};
use crate::security::access_control::{authorize, credentials_supplied};
use crate::security::AdmissionScope;
use crate::session::{read_cookie, InFlightGuard, Session, SessionOrigin};

/// Longest client cache lifetime of viewer-dependent content.
const DYNAMIC_CLIENT_CACHE: Duration = Duration::from_secs(1);

const ALLOWED_HEADERS: &str = "Authorization, Content-Type, If-None-Match, Range";

/// Per-request state that outlives the step that produced it.
#[derive(Default)]
struct Exchange {
    set_cookies: Vec<HeaderValue>,
    language: Option<String>,
    in_flight: Option<InFlightGuard>,
    streaming: bool,
}

/// Run one request through the pipeline. Never fails: every error becomes
/// a response.
pub async fn handle(engine: &Engine, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let head = method == Method::HEAD;
    engine.stats().record_request();

    // Dropped with this future when the client goes away.
    let cancel = CancellationToken::new();
    let cancel_guard = cancel.clone().drop_guard();

    let mut exchange = Exchange::default();
    let response = match run(engine, request, &cancel, &mut exchange).await {
        Ok(response) => response,
        Err(err) => error_response(engine, classify(err), exchange.language.as_deref(), head),
    };

    let config = engine.config();
    let mut response = finish(response, &mut exchange, &config);
    metrics::record_request(method.as_str(), response.status().as_u16(), start);

    if exchange.streaming {
        response = keep_alive_while_streaming(response, cancel_guard, exchange.in_flight.take());
    }
    response
}

async fn run(
    engine: &Engine,
    request: Request<Body>,
    cancel: &CancellationToken,
    exchange: &mut Exchange,
) -> EngineResult<Response> {
    let config = engine.config();
    let (parts, body) = request.into_parts();
    if !matches!(parts.method, Method::GET | Method::HEAD | Method::POST) {
        return Err(EngineError::application(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ));
    }

    if let Some(limiter) = engine.server_limiter() {
        limiter.acquire(AdmissionScope::Server).await?;
    }

    let now = Instant::now();
    let guard = resolve_session(engine, &parts, exchange, now);
    let session = Arc::clone(guard.session());
    exchange.in_flight = Some(guard);

    let language = negotiate_request_language(engine, &parts, &session);
    exchange.language = language.clone();

    if let Some(limiter) = session.limiter() {
        limiter.acquire(AdmissionScope::Session).await?;
    }

    let body = read_body(&parts, body, config.server.max_body_bytes).await?;
    let ctx = RequestContext {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
        session,
        language,
        cancel: cancel.clone(),
    };

    if let Some(result) = builtins::forced(engine, &ctx, &config.routes).await {
        return result;
    }

    let endpoint = match engine.modules().resolve(&ctx).await {
        Some((module, endpoint)) => {
            tracing::trace!(module = %module, endpoint = %endpoint.key, "Resolved endpoint");
            endpoint
        }
        None => engine
            .builtins()
            .resolve(ctx.path(), &config.routes)
            .ok_or_else(|| EngineError::NotFound(ctx.path().to_string()))?,
    };

    if let Some(limiter) = &endpoint.rate_limit {
        limiter.acquire(AdmissionScope::Endpoint).await?;
    }
    if let Some(limit) = endpoint.session_rate_limit {
        ctx.session
            .endpoint_limiter(&endpoint.key, limit)
            .acquire(AdmissionScope::EndpointSession)
            .await?;
    }

    if let Some(redirect) = authorize_request(engine, &ctx, &endpoint, &config)? {
        return Ok(redirect);
    }

    let response = serve_endpoint(engine, &ctx, &endpoint, &config).await?;
    if response.status() != StatusCode::NOT_MODIFIED && endpoint.stream {
        exchange.streaming = true;
    }
    Ok(response)
}

fn resolve_session(
    engine: &Engine,
    parts: &Parts,
    exchange: &mut Exchange,
    now: Instant,
) -> InFlightGuard {
    let names = engine.cookie_names();
    if let Some(token) = read_cookie(&parts.headers, &names.session) {
        if let Some(guard) = engine.sessions().checkout(&token, now) {
            return guard;
        }
    }

    let device_id = match read_cookie(&parts.headers, &names.device) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().simple().to_string();
            exchange.set_cookies.extend(names.set_cookie(&names.device, &id));
            id
        }
    };

    let header_text = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let origin = SessionOrigin {
        user_agent: header_text(header::USER_AGENT),
        address: parts
            .extensions
            .get::<ConnectInfo<ClientAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default(),
        protocol: format!("{:?}", parts.version),
        device_id,
    };

    let session = engine.sessions().create(origin, now);
    exchange
        .set_cookies
        .extend(names.set_cookie(&names.session, session.token()));
    session.acquire_in_flight()
}

fn negotiate_request_language(
    engine: &Engine,
    parts: &Parts,
    session: &Session,
) -> Option<String> {
    let translator = engine.translator()?;
    let negotiated = parts
        .headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| negotiate_language(h, translator));
    match negotiated {
        Some(language) => {
            if session.language().as_deref().map(String::as_str) != Some(language.as_str()) {
                session.set_language(Some(language.clone()));
            }
            Some(language)
        }
        None => session.language().map(|l| l.to_string()),
    }
}

async fn read_body(parts: &Parts, body: Body, max: usize) -> EngineResult<Bytes> {
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max) {
        return Err(EngineError::application(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large",
        ));
    }

    let bytes = axum::body::to_bytes(body, max).await.map_err(|e| {
        tracing::debug!(error = %e, "Failed to read request body");
        EngineError::Transport
    })?;

    let encoding = parts
        .headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Encoding::from_token(&v.trim().to_ascii_lowercase()));
    match encoding {
        Some(encoding) if encoding != Encoding::Identity && !bytes.is_empty() => {
            decompress(&bytes, encoding).map_err(|_| {
                EngineError::application(StatusCode::BAD_REQUEST, "Malformed request body encoding")
            })
        }
        _ => Ok(bytes),
    }
}

/// Enforce the endpoint's required tokens. Returns a redirect to the login
/// page when one is configured and the request carries no credentials.
fn authorize_request(
    engine: &Engine,
    ctx: &RequestContext,
    endpoint: &Endpoint,
    config: &EngineConfig,
) -> EngineResult<Option<Response>> {
    if endpoint.required_tokens.is_empty() {
        return Ok(None);
    }

    let supplied = credentials_supplied(&ctx.headers);
    let mut identity = ctx.session.identity();
    let satisfied = identity
        .as_ref()
        .is_some_and(|i| i.has_all(&endpoint.required_tokens));

    if !satisfied && supplied {
        if let Some(found) = engine.authenticator().and_then(|a| a.authenticate(&ctx.headers)) {
            engine.sessions().set_auth(&ctx.session, Some(found));
            identity = ctx.session.identity();
        }
    }

    match authorize(&endpoint.required_tokens, identity.as_deref(), supplied) {
        Ok(()) => Ok(None),
        Err(EngineError::Unauthorized) => match &config.routes.login_redirect {
            Some(login) => {
                let target = ctx
                    .uri
                    .path_and_query()
                    .map_or_else(|| ctx.path().to_string(), |pq| pq.as_str().to_string());
                let location = format!(
                    "{login}?return={}",
                    url::form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>()
                );
                Ok(Some(response::redirect(&location)))
            }
            None => Err(EngineError::Unauthorized),
        },
        Err(other) => Err(other),
    }
}

/// Caching headers of one response, recomputed once content turns out to be
/// viewer dependent.
struct Validators {
    etag: Option<String>,
    cache_control: String,
}

impl Validators {
    fn new(endpoint: &Endpoint, ctx: &RequestContext, language: Option<&str>) -> Self {
        let dynamic = endpoint.is_known_dynamic();
        let etag = if dynamic {
            None
        } else {
            endpoint.provider().etag(ctx).map(|tag| match language {
                Some(_) => localized_etag(&tag, language),
                None => quote_etag(&tag),
            })
        };
        Self {
            etag,
            cache_control: Self::cache_control(endpoint, dynamic),
        }
    }

    fn cache_control(endpoint: &Endpoint, dynamic: bool) -> String {
        let private = !endpoint.required_tokens.is_empty()
            || matches!(endpoint.effective_server_cache(), CacheDuration::PerSession(_));
        let client_cache = if dynamic {
            endpoint.client_cache.min(DYNAMIC_CLIENT_CACHE)
        } else {
            endpoint.client_cache
        };
        cache_control(client_cache, private)
    }

    fn mark_dynamic(&mut self, endpoint: &Endpoint) {
        self.etag = None;
        self.cache_control = Self::cache_control(endpoint, true);
    }
}

/// Body as it moves through the encoding steps.
enum Stage {
    Buffer(Bytes),
    Stream(ByteStream),
}

impl Stage {
    async fn into_bytes(self) -> EngineResult<Bytes> {
        match self {
            Self::Buffer(bytes) => Ok(bytes),
            Self::Stream(stream) => Ok(collect_body(stream).await?),
        }
    }
}

async fn serve_endpoint(
    engine: &Engine,
    ctx: &RequestContext,
    endpoint: &Endpoint,
    config: &EngineConfig,
) -> EngineResult<Response> {
    let head = ctx.method == Method::HEAD;
    let localized = endpoint.localized && engine.translator().is_some();
    let language = ctx.language.as_deref().filter(|_| localized);

    // Conditional request.
    let mut validators = Validators::new(endpoint, ctx, language);
    if let (Some(etag), Some(wanted)) = (&validators.etag, ctx.header(header::IF_NONE_MATCH.as_str())) {
        if etag_matches(wanted, etag) {
            return Ok(response::not_modified(etag, &validators.cache_control));
        }
    }

    // Cache lookup.
    let accept_encoding = ctx.header(header::ACCEPT_ENCODING.as_str()).unwrap_or_default();
    let range = ctx
        .header(header::RANGE.as_str())
        .filter(|_| ctx.method != Method::POST)
        .map(str::to_string);
    let key = if range.is_some() || endpoint.effective_server_cache().ttl().is_none() {
        None
    } else {
        resource_key(
            endpoint.cache_key_mode,
            ctx.path(),
            ctx.query(),
            &ctx.body,
            config.cache.max_key_input_bytes,
        )
        .as_key()
        .map(|resource| cache_key(resource, accept_encoding, ctx.method.as_str(), language))
    };
    if let Some(key) = &key {
        let tier = tier_for(engine, ctx, endpoint.effective_server_cache());
        if let Some(entry) = tier.and_then(|t| t.try_get(key, Instant::now())) {
            tracing::trace!(endpoint = %endpoint.key, tier = entry_tier(engine, ctx, endpoint), "Cache hit");
            return Ok(response::from_cache(&entry.response, head));
        }
    }

    // Content acquisition.
    let content = endpoint.provider().fetch(ctx).await?;
    let mut stored = endpoint.precompressed;
    let mut stage = match content {
        Content::Buffer(bytes) => Stage::Buffer(bytes),
        Content::Stream(stream) => Stage::Stream(stream),
    };

    if endpoint.template {
        if let Some(templater) = engine.templater() {
            let mut source = stage.into_bytes().await?;
            if let Some(encoding) = stored.take() {
                source = decompress(&source, encoding)?;
            }
            let identity = ctx.session.identity();
            let rendered = templater.render(
                &source,
                &TemplateContext {
                    path: ctx.path(),
                    language: ctx.language.as_deref(),
                    identity: identity.as_deref(),
                    device_id: ctx.session.device_id(),
                },
            )?;
            if rendered.dynamic {
                endpoint.mark_dynamic();
                validators.mark_dynamic(endpoint);
            }
            stage = Stage::Buffer(rendered.body);
        }
    }

    let server_cache = endpoint.effective_server_cache();
    let mut cacheable = key.is_some() && server_cache.ttl().is_some();
    let choice = engine.negotiator().choose(&endpoint.compression, accept_encoding);
    let mut encoding = None;

    // Stored encoding.
    if let Some(stored) = stored {
        let accepted = engine.negotiator().accepted(accept_encoding);
        if range.is_none() && accepted.accepts(stored) {
            cacheable = false;
            encoding = Some(stored);
        } else if range.is_none()
            && stored != Encoding::Deflate
            && can_transcode(stored, Encoding::Deflate)
            && accepted.accepts(Encoding::Deflate)
        {
            let bytes = stage.into_bytes().await?;
            let deflated = transcode(stored, Encoding::Deflate, bytes)
                .map_err(|e| EngineError::Internal(format!("transcoding failed: {e}")))?;
            stage = Stage::Buffer(deflated);
            encoding = Some(Encoding::Deflate);
        } else {
            let bytes = stage.into_bytes().await?;
            let decode_in_memory = cacheable || range.is_some() || choice.is_some();
            stage = if decode_in_memory {
                Stage::Buffer(decompress(&bytes, stored)?)
            } else {
                Stage::Stream(decompress_stream(bytes, stored))
            };
        }
    }

    if cacheable || !endpoint.stream {
        if let Stage::Stream(stream) = stage {
            stage = Stage::Buffer(collect_body(stream).await?);
        }
    }

    // Range.
    let mut status = StatusCode::OK;
    let mut content_range = None;
    if let Some(range) = &range {
        let bytes = stage.into_bytes().await?;
        let parsed = parse_range(range, bytes.len() as u64)?;
        stage = Stage::Buffer(bytes.slice(parsed.start as usize..=parsed.end as usize));
        status = StatusCode::PARTIAL_CONTENT;
        content_range = Some(parsed.content_range());
    }

    // Runtime compression.
    if encoding.is_none() && range.is_none() {
        if let Some(choice) = choice {
            stage = compress_stage(stage, choice, cacheable)?;
            encoding = Some(choice.encoding);
        }
    }

    // Cache store.
    if cacheable {
        if let (Some(key), Stage::Buffer(body), Some(ttl)) = (&key, &stage, server_cache.ttl()) {
            let cached = CachedResponse {
                body: body.clone(),
                content_encoding: encoding,
                content_type: endpoint.content_type.clone(),
                etag: validators.etag.clone(),
                cache_control: validators.cache_control.clone(),
            };
            let entry = CacheEntry::new(
                cached,
                Instant::now(),
                ttl,
                format!("{} {}", ctx.method, ctx.uri),
                ctx.path().to_string(),
            );
            if let Some(tier) = tier_for(engine, ctx, server_cache) {
                tier.put(key.clone(), entry);
            }
        }
    }

    let payload = match stage {
        Stage::Buffer(bytes) => Payload::Bytes(bytes),
        Stage::Stream(stream) => Payload::Stream(stream),
    };
    Ok(Outgoing {
        status,
        payload,
        encoding,
        content_type: endpoint.content_type.as_deref(),
        etag: validators.etag.as_deref(),
        cache_control: &validators.cache_control,
        content_range,
        vary_encoding: !endpoint.compression.is_empty() || endpoint.precompressed.is_some(),
    }
    .into_response(head))
}

fn compress_stage(stage: Stage, choice: CompressionChoice, cacheable: bool) -> EngineResult<Stage> {
    let choice = if cacheable { choice.escalated() } else { choice };
    Ok(match stage {
        Stage::Buffer(bytes) => Stage::Buffer(compress(&bytes, choice.encoding, choice.level)?),
        Stage::Stream(stream) => Stage::Stream(compress_stream(stream, choice.encoding, choice.level)),
    })
}

fn tier_for<'a>(
    engine: &'a Engine,
    ctx: &'a RequestContext,
    duration: CacheDuration,
) -> Option<&'a ResponseCache> {
    match duration {
        CacheDuration::None => None,
        CacheDuration::Global(_) => Some(engine.global_cache()),
        CacheDuration::PerSession(_) => Some(ctx.session.cache()),
    }
}

fn entry_tier(engine: &Engine, ctx: &RequestContext, endpoint: &Endpoint) -> &'static str {
    tier_for(engine, ctx, endpoint.effective_server_cache()).map_or("none", |t| t.tier().as_str())
}

/// Fold transport-level io failures into [`EngineError::Transport`].
fn classify(err: EngineError) -> EngineError {
    use std::io::ErrorKind;
    match err {
        EngineError::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) =>
        {
            EngineError::Transport
        }
        other => other,
    }
}

/// Convert a classified failure into a response.
pub(crate) fn error_response(
    engine: &Engine,
    err: EngineError,
    language: Option<&str>,
    head: bool,
) -> Response {
    let kind = err.code();
    engine.stats().record_exception(kind);
    metrics::record_exception(kind);

    match &err {
        EngineError::Internal(_) | EngineError::Io(_) => {
            tracing::error!(error = %err, "Request failed")
        }
        EngineError::Transport => {
            tracing::debug!("Client disconnected");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = err.status_code();
            return response;
        }
        _ => tracing::debug!(error = %err, status = %err.status_code(), "Request rejected"),
    }

    let message = engine.translate(&err.public_message(), language);
    let mut response = response::text(err.status_code(), message, head);
    if matches!(err, EngineError::Unauthorized) {
        builtins::set_challenge(&mut response, engine);
    }
    response
}

fn finish(mut response: Response, exchange: &mut Exchange, config: &EngineConfig) -> Response {
    let headers = response.headers_mut();
    for cookie in exchange.set_cookies.drain(..) {
        headers.append(header::SET_COOKIE, cookie);
    }
    if config.server.cross_origin_embed {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
    }
    response
}

/// Hold the cancellation guard and the in-flight mark until the streamed
/// body has been written or dropped.
fn keep_alive_while_streaming(
    response: Response,
    cancel_guard: DropGuard,
    in_flight: Option<InFlightGuard>,
) -> Response {
    let (parts, body) = response.into_parts();
    let guards = (cancel_guard, in_flight);
    let stream = body.into_data_stream().map(move |chunk| {
        let _held = &guards;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_broken_pipe_is_transport() {
        let err = EngineError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(classify(err), EngineError::Transport));

        let err = EngineError::Io(io::Error::new(io::ErrorKind::InvalidData, "bad"));
        assert!(matches!(classify(err), EngineError::Io(_)));
    }
}
