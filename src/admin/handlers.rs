use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::engine::Engine;
use crate::routing::EndpointInfo;
use crate::session::{ClosedSessionInfo, SessionSnapshot, SessionStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub server: String,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub active_sessions: usize,
    pub modules: usize,
}

#[derive(Serialize)]
pub struct SessionsView {
    pub stats: SessionStats,
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Serialize)]
pub struct CacheView {
    pub global: CacheStats,
    pub session: CacheStats,
}

#[derive(Deserialize)]
pub struct EndpointQuery {
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_root() -> String {
    "/".to_string()
}

pub async fn get_status(State(engine): State<Arc<Engine>>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        server: engine.config().server.name.clone(),
        uptime_secs: engine.uptime().as_secs(),
        total_requests: engine.stats().requests(),
        active_sessions: engine.sessions().len(),
        modules: engine.modules().len(),
    })
}

pub async fn get_sessions(State(engine): State<Arc<Engine>>) -> Json<SessionsView> {
    let mut sessions = engine.sessions().snapshots(Instant::now());
    sessions.sort_by(|a, b| b.total_requests.cmp(&a.total_requests));
    Json(SessionsView {
        stats: engine.sessions().stats(),
        sessions,
    })
}

pub async fn get_closed_sessions(
    State(engine): State<Arc<Engine>>,
) -> Json<Vec<ClosedSessionInfo>> {
    Json(engine.sessions().closed_sessions(Instant::now()))
}

pub async fn get_cache(State(engine): State<Arc<Engine>>) -> Json<CacheView> {
    Json(CacheView {
        global: engine.global_cache().stats(),
        session: engine.session_cache_stats(),
    })
}

pub async fn get_endpoints(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<EndpointQuery>,
) -> Json<Vec<EndpointInfo>> {
    Json(engine.modules().enumerate(&query.root))
}

pub async fn get_exceptions(State(engine): State<Arc<Engine>>) -> Json<BTreeMap<String, u64>> {
    Json(engine.stats().exceptions())
}
