//! The engine value.
//!
//! # Responsibilities
//! - Own every piece of per-server state: sessions, the global cache tier,
//!   the module table, limiters, the message bus and counters
//! - Apply hot-reloaded configuration
//! - Run one maintenance pass on demand
//!
//! # Design Decisions
//! - No process-wide state: several engines can live in one process
//! - Configuration is published through `ArcSwap`, readers never block
//! - The server limiter is rebuilt only when its parameters change, so a
//!   reload does not forget recent admissions

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use serde::Serialize;

use crate::cache::{CacheStats, CacheTier, ResponseCache};
use crate::compression::Negotiator;
use crate::config::EngineConfig;
use crate::content::{Templater, Translator};
use crate::http::builtins::OptionalBuiltins;
use crate::messaging::MessageBus;
use crate::observability::metrics;
use crate::routing::{MemoryModule, Module, ModuleTable};
use crate::security::{Authenticator, RateLimit, RateLimiter};
use crate::session::{CookieNames, SessionListener, SessionStore};

/// In-process request and failure counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    requests: AtomicU64,
    exceptions: DashMap<&'static str, AtomicU64>,
}

impl EngineStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exception(&self, kind: &'static str) {
        self.exceptions
            .entry(kind)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Failure counts by kind.
    pub fn exceptions(&self) -> BTreeMap<String, u64> {
        self.exceptions
            .iter()
            .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    pub fn exception_count(&self, kind: &str) -> u64 {
        self.exceptions
            .get(kind)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}

/// Work done by one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub sessions_pruned: usize,
    pub global_entries_pruned: usize,
    pub session_entries_pruned: usize,
    pub messages_pruned: usize,
}

/// Assembles an [`Engine`] with its integration points.
pub struct EngineBuilder {
    config: EngineConfig,
    modules: Vec<Arc<dyn Module>>,
    listeners: Vec<Arc<dyn SessionListener>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    templater: Option<Arc<dyn Templater>>,
    translator: Option<Arc<dyn Translator>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            modules: Vec::new(),
            listeners: Vec::new(),
            authenticator: None,
            templater: None,
            translator: None,
        }
    }

    /// Register a module. Unprefixed modules are consulted in registration
    /// order.
    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn session_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn templater(mut self, templater: Arc<dyn Templater>) -> Self {
        self.templater = Some(templater);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn build(self) -> Arc<Engine> {
        let config = self.config;

        let mut sessions = SessionStore::new(
            config.sessions.clone(),
            config.rate_limit.session.map(RateLimit::from),
        );
        for listener in self.listeners {
            sessions = sessions.with_listener(listener);
        }
        sessions.configure(
            config.sessions.clone(),
            config.rate_limit.session.map(RateLimit::from),
            Duration::from_secs(config.messaging.retention_secs),
        );

        let modules = ModuleTable::new();
        if !config.static_content.is_empty() {
            modules.register(Arc::new(MemoryModule::from_static_content(&config.static_content)));
        }
        for module in self.modules {
            modules.register(module);
        }

        let server_limiter = config
            .rate_limit
            .server
            .map(|limit| Arc::new(RateLimiter::new(RateLimit::from(limit))));

        tracing::info!(
            server = %config.server.name,
            modules = modules.len(),
            "Engine initialized"
        );

        Arc::new(Engine {
            cookies: ArcSwap::from_pointee(CookieNames::from_config(&config)),
            messages: MessageBus::new(config.messaging.clone()),
            config: ArcSwap::from_pointee(config),
            sessions,
            global_cache: ResponseCache::new(CacheTier::Global),
            negotiator: Negotiator::new(),
            server_limiter: ArcSwapOption::new(server_limiter),
            modules,
            authenticator: self.authenticator,
            templater: self.templater,
            translator: self.translator,
            builtins: OptionalBuiltins::new(),
            stats: EngineStats::default(),
            started: Instant::now(),
        })
    }
}

/// One request lifecycle engine and all its state.
pub struct Engine {
    config: ArcSwap<EngineConfig>,
    cookies: ArcSwap<CookieNames>,
    sessions: SessionStore,
    global_cache: ResponseCache,
    negotiator: Negotiator,
    server_limiter: ArcSwapOption<RateLimiter>,
    modules: ModuleTable,
    messages: MessageBus,
    authenticator: Option<Arc<dyn Authenticator>>,
    templater: Option<Arc<dyn Templater>>,
    translator: Option<Arc<dyn Translator>>,
    builtins: OptionalBuiltins,
    stats: EngineStats,
    started: Instant,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.load_full()
    }

    pub fn cookie_names(&self) -> Arc<CookieNames> {
        self.cookies.load_full()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn global_cache(&self) -> &ResponseCache {
        &self.global_cache
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn server_limiter(&self) -> Option<Arc<RateLimiter>> {
        self.server_limiter.load_full()
    }

    pub fn modules(&self) -> &ModuleTable {
        &self.modules
    }

    pub fn messages(&self) -> &MessageBus {
        &self.messages
    }

    pub fn authenticator(&self) -> Option<&dyn Authenticator> {
        self.authenticator.as_deref()
    }

    pub fn templater(&self) -> Option<&dyn Templater> {
        self.templater.as_deref()
    }

    pub fn translator(&self) -> Option<&dyn Translator> {
        self.translator.as_deref()
    }

    pub(crate) fn builtins(&self) -> &OptionalBuiltins {
        &self.builtins
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Translate a user-facing message when a translator and a language
    /// are available.
    pub fn translate(&self, text: &str, language: Option<&str>) -> String {
        match (self.translator.as_deref(), language) {
            (Some(translator), Some(language)) => translator.translate(text, language),
            _ => text.to_string(),
        }
    }

    /// Publish a reloaded configuration.
    pub fn apply_config(&self, config: EngineConfig) {
        let server_limit = config.rate_limit.server.map(RateLimit::from);
        let current = self.server_limiter.load_full().map(|l| l.limit());
        if current != server_limit {
            self.server_limiter
                .store(server_limit.map(|limit| Arc::new(RateLimiter::new(limit))));
            tracing::info!(enabled = server_limit.is_some(), "Server rate limit replaced");
        }

        self.sessions.configure(
            config.sessions.clone(),
            config.rate_limit.session.map(RateLimit::from),
            Duration::from_secs(config.messaging.retention_secs),
        );
        self.messages.apply(config.messaging.clone());
        self.cookies.store(Arc::new(CookieNames::from_config(&config)));
        self.config.store(Arc::new(config));
        tracing::info!("Configuration applied");
    }

    /// One pass of expiry work. Each cache step is bounded by
    /// `cache.prune_batch`; the session tier shares one budget across all
    /// sessions.
    pub fn run_maintenance(&self, now: Instant) -> MaintenanceReport {
        let batch = self.config.load().cache.prune_batch;
        let retention = self.messages.retention();

        let mut report = MaintenanceReport {
            sessions_pruned: self.sessions.prune(now),
            global_entries_pruned: self.global_cache.prune(now, batch),
            ..Default::default()
        };

        let mut budget = batch;
        let mut session_entries = 0;
        self.sessions.for_each(|session| {
            if budget > 0 {
                let pruned = session.cache().prune(now, budget);
                budget -= pruned.min(budget);
                report.session_entries_pruned += pruned;
            }
            session_entries += session.cache().len();
            report.messages_pruned += session.messages().prune(now, retention);
        });

        metrics::record_cache_entries(CacheTier::Global.as_str(), self.global_cache.len());
        metrics::record_cache_entries(CacheTier::Session.as_str(), session_entries);
        report
    }

    /// Aggregate statistics of the session tier.
    pub fn session_cache_stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        self.sessions.for_each(|session| {
            let stats = session.cache().stats();
            total.entries += stats.entries;
            total.hits += stats.hits;
            total.misses += stats.misses;
            total.stores += stats.stores;
            total.pruned += stats.pruned;
        });
        total
    }

    /// Close every session. Called once the listener has stopped.
    pub fn shutdown(&self) -> usize {
        let closed = self.sessions.close_all(Instant::now());
        self.global_cache.clear();
        tracing::info!(sessions = closed, "Engine shut down");
        closed
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.sessions.len())
            .field("global_cache", &self.global_cache.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}
