//! Long-poll message delivery through the `/_messages` route.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use request_engine::config::EngineConfig;
use request_engine::engine::Engine;
use request_engine::security::{Identity, StaticTokenAuthenticator};
use request_engine::session::Session;

mod common;
use common::{builder_with, engine_with, get, router, TestResponse};

fn session_token(response: &TestResponse) -> String {
    response
        .cookies()
        .into_iter()
        .find_map(|c| c.strip_prefix("engine_session=").map(str::to_string))
        .unwrap()
}

fn session_of(engine: &Engine, response: &TestResponse) -> Arc<Session> {
    engine
        .sessions()
        .resolve(&session_token(response), Instant::now())
        .unwrap()
}

fn json_body(response: &TestResponse) -> Value {
    serde_json::from_slice(&response.body).unwrap()
}

#[tokio::test]
async fn test_first_poll_connects_with_nonzero_cursor() {
    let engine = engine_with(EngineConfig::default(), vec![]);
    let app = router(&engine);

    let response = get(&app, "/_messages?since=0", &[]).await;
    assert_eq!(response.header("cache-control"), Some("no-store"));
    let body = json_body(&response);
    assert_eq!(body["messages"][0]["type"], "connected");
    assert!(body["since"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_push_wakes_waiting_poll() {
    let engine = engine_with(EngineConfig::default(), vec![]);
    let app = router(&engine);

    let connect = get(&app, "/_messages?since=0", &[]).await;
    let cursor = json_body(&connect)["since"].as_u64().unwrap();
    let cookie = connect.cookie_header();
    let session = session_of(&engine, &connect);

    let waiting = {
        let app = app.clone();
        let path = format!("/_messages?since={cursor}&wait=5");
        tokio::spawn(async move { get(&app, &path, &[("cookie", &cookie)]).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    engine
        .messages()
        .push(&session, "chat", json!({ "text": "hi" }), false, false);

    let response = waiting.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    let body = json_body(&response);
    assert_eq!(body["messages"][0]["type"], "chat");
    assert_eq!(body["messages"][0]["payload"]["text"], "hi");
    assert_eq!(body["since"].as_u64().unwrap(), cursor + 1);
}

#[tokio::test]
async fn test_type_filter_and_timeout() {
    let engine = engine_with(EngineConfig::default(), vec![]);
    let app = router(&engine);

    let connect = get(&app, "/_messages?since=0", &[]).await;
    let cursor = json_body(&connect)["since"].as_u64().unwrap();
    let cookie = connect.cookie_header();
    let session = session_of(&engine, &connect);

    engine.messages().push(&session, "noise", json!(1), false, false);
    engine.messages().push(&session, "alert", json!(2), false, false);

    let path = format!("/_messages?since={cursor}&types=alert&wait=1");
    let body = json_body(&get(&app, &path, &[("cookie", &cookie)]).await);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "alert");

    // Nothing new: the poll runs out its wait and returns empty.
    let since = body["since"].as_u64().unwrap();
    let path = format!("/_messages?since={since}&wait=1");
    let body = json_body(&get(&app, &path, &[("cookie", &cookie)]).await);
    assert!(body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_cursor_asks_client_to_reconnect() {
    let engine = engine_with(EngineConfig::default(), vec![]);
    let app = router(&engine);

    let connect = get(&app, "/_messages?since=0", &[]).await;
    let cookie = connect.cookie_header();

    let body = json_body(&get(&app, "/_messages?since=9999&wait=1", &[("cookie", &cookie)]).await);
    assert_eq!(body["messages"][0]["type"], "reconnect");
}

#[tokio::test]
async fn test_identity_broadcast_reaches_logged_in_sessions() {
    let authenticator =
        StaticTokenAuthenticator::new().with_token("k", Identity::new("ann").with_token("user"));
    let engine = builder_with(EngineConfig::default(), vec![])
        .authenticator(Arc::new(authenticator))
        .build();
    let app = router(&engine);

    let tab1 = get(&app, "/_auth", &[("authorization", "Bearer k")]).await;
    let tab2 = get(&app, "/_auth", &[("authorization", "Bearer k")]).await;
    let stranger = get(&app, "/_messages?since=0", &[]).await;
    for tab in [&tab1, &tab2] {
        get(&app, "/_messages?since=0", &[("cookie", &tab.cookie_header())]).await;
    }

    let delivered = engine
        .messages()
        .broadcast_to_identity(engine.sessions(), "ann", "notice", json!("hello ann"));
    assert_eq!(delivered, 2);

    for tab in [&tab1, &tab2] {
        let cookie = tab.cookie_header();
        let body = json_body(&get(&app, "/_messages?since=1&wait=1", &[("cookie", &cookie)]).await);
        let kinds: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|m| m["type"].as_str())
            .collect();
        assert!(kinds.contains(&"notice"));
    }

    let cookie = stranger.cookie_header();
    let since = json_body(&stranger)["since"].as_u64().unwrap();
    let path = format!("/_messages?since={since}&wait=1");
    let body = json_body(&get(&app, &path, &[("cookie", &cookie)]).await);
    assert!(body["messages"].as_array().unwrap().is_empty());
}
