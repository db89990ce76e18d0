//! End-to-end behavior of the request pipeline, driven in process.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use flate2::read::{DeflateDecoder, GzDecoder};

use request_engine::cache::CacheDuration;
use request_engine::compression::{compress, Encoding, Level};
use request_engine::config::{EngineConfig, LimitConfig};
use request_engine::content::{DictionaryTranslator, VariableTemplater};
use request_engine::error::EngineError;
use request_engine::http::RequestContext;
use request_engine::routing::{Content, Endpoint, FnProvider, StaticContent};
use request_engine::security::{Identity, RateLimit, StaticTokenAuthenticator};

mod common;
use common::{builder_with, engine_with, get, router, send, CountingProvider};

fn inflate(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    DeflateDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

#[tokio::test]
async fn test_global_cache_reused_across_sessions() {
    let provider = CountingProvider::new("shared page");
    let endpoint = Endpoint::new("/page", provider.clone())
        .with_server_cache(CacheDuration::Global(Duration::from_secs(60)));
    let engine = engine_with(EngineConfig::default(), vec![("/page", endpoint)]);
    let app = router(&engine);

    let first = get(&app, "/page", &[]).await;
    let second = get(&app, "/page", &[]).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.text(), "shared page");
    assert_eq!(second.text(), "shared page");
    assert_eq!(provider.calls(), 1);
    assert_eq!(engine.global_cache().stats().hits, 1);
    assert_eq!(engine.sessions().len(), 2);
}

#[tokio::test]
async fn test_session_cache_isolated_per_session() {
    let provider = CountingProvider::new("mine");
    let endpoint = Endpoint::new("/inbox", provider.clone())
        .with_server_cache(CacheDuration::PerSession(Duration::from_secs(60)))
        .with_client_cache(Duration::from_secs(10));
    let engine = engine_with(EngineConfig::default(), vec![("/inbox", endpoint)]);
    let app = router(&engine);

    let first = get(&app, "/inbox", &[]).await;
    let cookie = first.cookie_header();
    get(&app, "/inbox", &[("cookie", &cookie)]).await;
    assert_eq!(provider.calls(), 1);

    get(&app, "/inbox", &[]).await;
    assert_eq!(provider.calls(), 2);
    assert_eq!(first.header("cache-control"), Some("private, max-age=10"));
}

#[tokio::test]
async fn test_conditional_request_gets_304() {
    let provider = CountingProvider::with_etag("versioned", "v1");
    let endpoint = Endpoint::new("/doc", provider.clone())
        .with_client_cache(Duration::from_secs(30));
    let engine = engine_with(EngineConfig::default(), vec![("/doc", endpoint)]);
    let app = router(&engine);

    let fresh = get(&app, "/doc", &[]).await;
    assert_eq!(fresh.header("etag"), Some("\"v1\""));
    assert_eq!(fresh.header("cache-control"), Some("public, max-age=30"));

    let revalidated = get(&app, "/doc", &[("if-none-match", "\"v1\"")]).await;
    assert_eq!(revalidated.status, StatusCode::NOT_MODIFIED);
    assert!(revalidated.body.is_empty());
    assert_eq!(revalidated.header("etag"), Some("\"v1\""));
    assert_eq!(provider.calls(), 1);

    let stale = get(&app, "/doc", &[("if-none-match", "\"v0\"")]).await;
    assert_eq!(stale.status, StatusCode::OK);
}

#[tokio::test]
async fn test_range_requests() {
    let endpoint = Endpoint::new("/digits", Arc::new(StaticContent::new("0123456789")));
    let engine = engine_with(EngineConfig::default(), vec![("/digits", endpoint)]);
    let app = router(&engine);

    let partial = get(&app, "/digits", &[("range", "bytes=0-4"), ("accept-encoding", "gzip")]).await;
    assert_eq!(partial.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.text(), "01234");
    assert_eq!(partial.header("content-range"), Some("bytes 0-4/10"));
    assert!(partial.header("content-encoding").is_none());

    let tail = get(&app, "/digits", &[("range", "bytes=7-")]).await;
    assert_eq!(tail.text(), "789");
    assert_eq!(tail.header("content-range"), Some("bytes 7-9/10"));

    let invalid = get(&app, "/digits", &[("range", "bytes=20-")]).await;
    assert_eq!(invalid.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(engine.stats().exception_count("bad_range"), 1);
}

#[tokio::test]
async fn test_session_rate_limit_rejects_fourth_request() {
    let mut config = EngineConfig::default();
    config.rate_limit.session = Some(LimitConfig {
        count: 3,
        duration_ms: 60_000,
        max_delay_ms: 0,
        max_queue: 0,
    });
    let endpoint = Endpoint::new("/", Arc::new(StaticContent::new("home")));
    let engine = engine_with(config, vec![("/", endpoint)]);
    let app = router(&engine);

    let first = get(&app, "/", &[]).await;
    let cookie = first.cookie_header();
    assert_eq!(get(&app, "/", &[("cookie", &cookie)]).await.status, StatusCode::OK);
    assert_eq!(get(&app, "/", &[("cookie", &cookie)]).await.status, StatusCode::OK);

    let rejected = get(&app, "/", &[("cookie", &cookie)]).await;
    assert_eq!(rejected.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.text(), "Too many requests");

    // Another session has its own budget.
    assert_eq!(get(&app, "/", &[]).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_endpoint_limits_apply_per_scope() {
    let global = Endpoint::new("/search", Arc::new(StaticContent::new("results")))
        .with_rate_limit(RateLimit::new(1, Duration::from_secs(60)));
    let per_session = Endpoint::new("/export", Arc::new(StaticContent::new("csv")))
        .with_session_rate_limit(RateLimit::new(1, Duration::from_secs(60)));
    let engine = engine_with(
        EngineConfig::default(),
        vec![("/search", global), ("/export", per_session)],
    );
    let app = router(&engine);

    assert_eq!(get(&app, "/search", &[]).await.status, StatusCode::OK);
    assert_eq!(get(&app, "/search", &[]).await.status, StatusCode::TOO_MANY_REQUESTS);

    let first = get(&app, "/export", &[]).await;
    let cookie = first.cookie_header();
    assert_eq!(
        get(&app, "/export", &[("cookie", &cookie)]).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(get(&app, "/export", &[]).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_expired_session_is_replaced() {
    let mut config = EngineConfig::default();
    config.sessions.extend_lifetime_secs = 1;
    let endpoint = Endpoint::new("/", Arc::new(StaticContent::new("home")));
    let engine = engine_with(config, vec![("/", endpoint)]);
    let app = router(&engine);

    let first = get(&app, "/", &[]).await;
    let cookie = first.cookie_header();
    let session_cookie = first
        .cookies()
        .into_iter()
        .find(|c| c.starts_with("engine_session="))
        .unwrap();

    // Within the window the cookie is honored and no new session is issued.
    let reused = get(&app, "/", &[("cookie", &cookie)]).await;
    assert!(reused.cookies().is_empty());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let renewed = get(&app, "/", &[("cookie", &cookie)]).await;
    let new_cookie = renewed
        .cookies()
        .into_iter()
        .find(|c| c.starts_with("engine_session="))
        .unwrap();
    assert_ne!(new_cookie, session_cookie);
    assert_eq!(engine.sessions().len(), 1);
    assert_eq!(engine.sessions().stats().created, 2);
}

#[tokio::test]
async fn test_session_held_by_long_poll_survives_its_deadline() {
    let mut config = EngineConfig::default();
    config.sessions.extend_lifetime_secs = 1;
    let endpoint = Endpoint::new("/", Arc::new(StaticContent::new("home")));
    let engine = engine_with(config, vec![("/", endpoint)]);
    let app = router(&engine);

    let connect = get(&app, "/_messages?since=0", &[]).await;
    let cookie = connect.cookie_header();
    let token = connect
        .cookies()
        .into_iter()
        .find_map(|c| c.strip_prefix("engine_session=").map(str::to_string))
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&connect.body).unwrap();
    let cursor = body["since"].as_u64().unwrap();

    let polling = {
        let app = app.clone();
        let cookie = cookie.clone();
        let path = format!("/_messages?since={cursor}&wait=3");
        tokio::spawn(async move { get(&app, &path, &[("cookie", &cookie)]).await })
    };

    // Past the sliding deadline while the poll still holds the session.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let during = get(&app, "/", &[("cookie", &cookie)]).await;
    assert_eq!(during.status, StatusCode::OK);
    assert!(!during
        .cookies()
        .iter()
        .any(|c| c.starts_with("engine_session=")));
    assert_eq!(engine.sessions().stats().created, 1);

    let session = engine
        .sessions()
        .resolve(&token, std::time::Instant::now())
        .unwrap();
    engine
        .messages()
        .push(&session, "chat", serde_json::json!("still here"), false, false);

    let polled = polling.await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&polled.body).unwrap();
    assert_eq!(body["messages"][0]["type"], "chat");
    assert_eq!(engine.sessions().len(), 1);
}

#[tokio::test]
async fn test_gzip_resource_transcoded_for_deflate_clients() {
    let original = b"stored once, served three ways. ".repeat(200);
    let gzipped = compress(&original, Encoding::Gzip, Level::Best).unwrap();
    let endpoint = Endpoint::new("/asset", Arc::new(StaticContent::new(gzipped.clone())))
        .precompressed(Encoding::Gzip);
    let engine = engine_with(EngineConfig::default(), vec![("/asset", endpoint)]);
    let app = router(&engine);

    let passthrough = get(&app, "/asset", &[("accept-encoding", "gzip, deflate")]).await;
    assert_eq!(passthrough.header("content-encoding"), Some("gzip"));
    assert_eq!(passthrough.body, gzipped);

    let transcoded = get(&app, "/asset", &[("accept-encoding", "deflate")]).await;
    assert_eq!(transcoded.header("content-encoding"), Some("deflate"));
    assert_eq!(transcoded.body.len(), gzipped.len() - 18);
    assert_eq!(inflate(&transcoded.body), original);

    let plain = get(&app, "/asset", &[]).await;
    assert!(plain.header("content-encoding").is_none());
    assert_eq!(plain.body, original);
}

#[tokio::test]
async fn test_runtime_compression_and_cached_variants() {
    let text = "compress me please. ".repeat(100);
    let provider = CountingProvider::new(text.clone());
    let endpoint = Endpoint::new("/text", provider.clone())
        .with_server_cache(CacheDuration::Global(Duration::from_secs(60)))
        .with_content_type("text/plain");
    let engine = engine_with(EngineConfig::default(), vec![("/text", endpoint)]);
    let app = router(&engine);

    let gzip = get(&app, "/text", &[("accept-encoding", "gzip")]).await;
    assert_eq!(gzip.header("content-encoding"), Some("gzip"));
    assert_eq!(gzip.header("vary"), Some("Accept-Encoding"));
    assert_eq!(gunzip(&gzip.body), text.as_bytes());

    let identity = get(&app, "/text", &[]).await;
    assert_eq!(identity.text(), text);

    // One render per encoding variant, then hits.
    get(&app, "/text", &[("accept-encoding", "gzip")]).await;
    assert_eq!(provider.calls(), 2);
    assert_eq!(engine.global_cache().len(), 2);
}

#[tokio::test]
async fn test_dynamic_template_never_shared() {
    let templater = VariableTemplater::new().with_var("site", "shop");
    let endpoint = Endpoint::new(
        "/welcome",
        Arc::new(StaticContent::new("{{site}} device {{device}}").with_etag("w1")),
    )
    .templated()
    .with_server_cache(CacheDuration::Global(Duration::from_secs(60)))
    .with_client_cache(Duration::from_secs(3600));
    let engine = builder_with(EngineConfig::default(), vec![("/welcome", endpoint)])
        .templater(Arc::new(templater))
        .build();
    let app = router(&engine);

    let alice = get(&app, "/welcome", &[("cookie", "engine_device=alice")]).await;
    let bob = get(&app, "/welcome", &[("cookie", "engine_device=bob")]).await;

    assert_eq!(alice.text(), "shop device alice");
    assert_eq!(bob.text(), "shop device bob");
    assert!(bob.header("etag").is_none());
    assert_eq!(bob.header("cache-control"), Some("private, max-age=1"));
    assert_eq!(engine.global_cache().len(), 0);

    let listed = engine.modules().enumerate("/");
    assert!(listed.iter().any(|e| e.key == "/welcome" && e.dynamic));
}

#[tokio::test]
async fn test_localized_content_cached_per_language() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let provider = FnProvider::new(move |ctx: &RequestContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Content::from(format!(
            "lang={}",
            ctx.language.as_deref().unwrap_or("none")
        )))
    })
    .with_etag("page1");
    let endpoint = Endpoint::new("/news", Arc::new(provider))
        .localized()
        .with_server_cache(CacheDuration::Global(Duration::from_secs(60)));
    let translator = DictionaryTranslator::new()
        .with_language("de")
        .with_language("fr");
    let engine = builder_with(EngineConfig::default(), vec![("/news", endpoint)])
        .translator(Arc::new(translator))
        .build();
    let app = router(&engine);

    let de = get(&app, "/news", &[("accept-language", "de-AT, en;q=0.5")]).await;
    let fr = get(&app, "/news", &[("accept-language", "fr")]).await;
    let de_again = get(&app, "/news", &[("accept-language", "de")]).await;

    assert_eq!(de.text(), "lang=de");
    assert_eq!(fr.text(), "lang=fr");
    assert_eq!(de_again.text(), "lang=de");
    assert_eq!(de.header("etag"), Some("\"page1-de\""));
    assert_eq!(fr.header("etag"), Some("\"page1-fr\""));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_required_tokens_401_403_and_header_login() {
    let authenticator = StaticTokenAuthenticator::new()
        .with_token("admin-key", Identity::new("ann").with_token("admin"))
        .with_token("reader-key", Identity::new("bob").with_token("read"));
    let endpoint = Endpoint::new("/admin", Arc::new(StaticContent::new("secret"))).require_token("admin");
    let engine = builder_with(EngineConfig::default(), vec![("/admin", endpoint)])
        .authenticator(Arc::new(authenticator))
        .build();
    let app = router(&engine);

    let anonymous = get(&app, "/admin", &[]).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.header("www-authenticate"), Some("Bearer"));

    let reader = get(&app, "/admin", &[("authorization", "Bearer reader-key")]).await;
    assert_eq!(reader.status, StatusCode::FORBIDDEN);

    let bogus = get(&app, "/admin", &[("authorization", "Bearer nope")]).await;
    assert_eq!(bogus.status, StatusCode::FORBIDDEN);

    let admin = get(&app, "/admin", &[("authorization", "Bearer admin-key")]).await;
    assert_eq!(admin.status, StatusCode::OK);
    assert_eq!(admin.text(), "secret");

    // The login sticks to the session.
    let cookie = admin.cookie_header();
    let again = get(&app, "/admin", &[("cookie", &cookie)]).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(engine.sessions().sessions_of("ann").len(), 1);
}

#[tokio::test]
async fn test_login_redirect_when_configured() {
    let mut config = EngineConfig::default();
    config.routes.login_redirect = Some("/login".to_string());
    let endpoint = Endpoint::new("/account", Arc::new(StaticContent::new("me"))).require_token("user");
    let engine = engine_with(config, vec![("/account", endpoint)]);
    let app = router(&engine);

    let response = get(&app, "/account?tab=1", &[]).await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.header("location"), Some("/login?return=%2Faccount%3Ftab%3D1"));
}

#[tokio::test]
async fn test_auth_and_logout_builtins() {
    let authenticator = StaticTokenAuthenticator::new()
        .with_token("k", Identity::new("ann").with_token("user"));
    let engine = builder_with(EngineConfig::default(), vec![])
        .authenticator(Arc::new(authenticator))
        .build();
    let app = router(&engine);

    let login = get(&app, "/_auth?return=/home", &[("authorization", "Bearer k")]).await;
    assert_eq!(login.status, StatusCode::FOUND);
    assert_eq!(login.header("location"), Some("/home"));
    let cookie = login.cookie_header();

    let probe = get(&app, "/_login", &[("cookie", &cookie)]).await;
    let probe: serde_json::Value = serde_json::from_slice(&probe.body).unwrap();
    assert_eq!(probe["logged_in"], true);
    assert_eq!(probe["user"], "ann");

    let logout = get(&app, "/_logout", &[("cookie", &cookie)]).await;
    let logout: serde_json::Value = serde_json::from_slice(&logout.body).unwrap();
    assert_eq!(logout["logged_out"], true);
    assert!(engine.sessions().sessions_of("ann").is_empty());

    let failed = get(&app, "/_auth", &[("authorization", "Bearer wrong")]).await;
    assert_eq!(failed.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_not_found_and_optional_builtins() {
    let engine = engine_with(EngineConfig::default(), vec![]);
    let app = router(&engine);

    let missing = get(&app, "/nope", &[]).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(engine.stats().exception_count("not_found"), 1);

    let icon = get(&app, "/favicon.ico", &[]).await;
    assert_eq!(icon.status, StatusCode::OK);
    assert_eq!(icon.header("content-type"), Some("image/svg+xml"));
    assert!(icon.header("etag").is_some());

    let time = get(&app, "/_time", &[]).await;
    let time: serde_json::Value = serde_json::from_slice(&time.body).unwrap();
    assert!(time["now_ms"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_head_has_length_but_no_body() {
    let endpoint = Endpoint::new("/file", Arc::new(StaticContent::new("twelve bytes")));
    let engine = engine_with(EngineConfig::default(), vec![("/file", endpoint)]);
    let app = router(&engine);

    let request = Request::head("/file").body(Body::empty()).unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-length"), Some("12"));
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_application_errors_are_translated() {
    let provider = FnProvider::new(|_ctx: &RequestContext| {
        Err(EngineError::application(StatusCode::CONFLICT, "Already taken"))
    });
    let endpoint = Endpoint::new("/claim", Arc::new(provider));
    let translator = DictionaryTranslator::new().with_phrase("de", "Already taken", "Schon vergeben");
    let engine = builder_with(EngineConfig::default(), vec![("/claim", endpoint)])
        .translator(Arc::new(translator))
        .build();
    let app = router(&engine);

    let response = get(&app, "/claim", &[("accept-language", "de")]).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.text(), "Schon vergeben");
    assert_eq!(engine.stats().exception_count("application"), 1);
}

#[tokio::test]
async fn test_post_body_keys_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let provider = FnProvider::new(move |ctx: &RequestContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Content::from(format!("echo:{}", ctx.body_text())))
    });
    let endpoint = Endpoint::new("/search", Arc::new(provider))
        .with_cache_key(request_engine::cache::CacheKeyMode::PathQueryAndBody)
        .with_server_cache(CacheDuration::Global(Duration::from_secs(60)));
    let engine = engine_with(EngineConfig::default(), vec![("/search", endpoint)]);
    let app = router(&engine);

    let post = |body: &'static str| Request::post("/search").body(Body::from(body)).unwrap();
    assert_eq!(send(&app, post("a")).await.text(), "echo:a");
    assert_eq!(send(&app, post("b")).await.text(), "echo:b");
    assert_eq!(send(&app, post("a")).await.text(), "echo:a");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cross_origin_cookie_attributes() {
    let mut config = EngineConfig::default();
    config.server.cross_origin_embed = true;
    let engine = engine_with(config, vec![]);
    let app = router(&engine);

    let response = get(&app, "/_time", &[]).await;
    let raw: Vec<&str> = response
        .headers
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert!(raw.iter().all(|c| c.ends_with("Path=/;HttpOnly;SameSite=None;Secure")));
    assert!(response.header("access-control-allow-headers").is_some());
    assert!(response.header("x-request-id").is_some());
}
