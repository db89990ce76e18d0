//! A single client session.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use serde::Serialize;

use crate::cache::{CacheTier, ResponseCache};
use crate::messaging::MessageQueue;
use crate::security::{Identity, RateLimit, RateLimiter};

/// Where a session came from. Captured once at creation.
#[derive(Debug, Clone, Default)]
pub struct SessionOrigin {
    pub user_agent: String,
    pub address: String,
    pub protocol: String,
    pub device_id: String,
}

/// Per-client state shared by every request carrying the same token.
#[derive(Debug)]
pub struct Session {
    token: String,
    origin: SessionOrigin,
    created: Instant,
    hard_cap: Instant,
    /// Sliding deadline in milliseconds after `created`.
    deadline_ms: AtomicU64,
    in_flight: AtomicUsize,
    total_requests: AtomicU64,
    identity: ArcSwapOption<Identity>,
    language: ArcSwapOption<String>,
    cache: ResponseCache,
    limiter: Option<RateLimiter>,
    endpoint_limiters: DashMap<String, Arc<RateLimiter>>,
    messages: MessageQueue,
}

impl Session {
    pub(crate) fn new(
        token: String,
        origin: SessionOrigin,
        now: Instant,
        max_lifetime: Duration,
        extend_lifetime: Duration,
        limit: Option<RateLimit>,
    ) -> Self {
        let extend = extend_lifetime.min(max_lifetime);
        Self {
            token,
            origin,
            created: now,
            hard_cap: now + max_lifetime,
            deadline_ms: AtomicU64::new(extend.as_millis() as u64),
            in_flight: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            identity: ArcSwapOption::empty(),
            language: ArcSwapOption::empty(),
            cache: ResponseCache::new(CacheTier::Session),
            limiter: limit.map(RateLimiter::new),
            endpoint_limiters: DashMap::new(),
            messages: MessageQueue::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn origin(&self) -> &SessionOrigin {
        &self.origin
    }

    pub fn device_id(&self) -> &str {
        &self.origin.device_id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// min(hard cap, sliding deadline).
    pub fn expires_at(&self) -> Instant {
        let sliding = self.created + Duration::from_millis(self.deadline_ms.load(Ordering::Acquire));
        sliding.min(self.hard_cap)
    }

    /// Expired and idle. A session serving a request never expires.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.in_flight() == 0 && now >= self.expires_at()
    }

    /// Push the sliding deadline to `now + extend`. Concurrent touches race
    /// and the last exchange wins.
    pub fn touch(&self, now: Instant, extend: Duration) {
        let offset = now.saturating_duration_since(self.created) + extend;
        self.deadline_ms
            .swap(offset.as_millis() as u64, Ordering::AcqRel);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Hold the session alive for the duration of a request.
    pub fn acquire_in_flight(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            session: Arc::clone(self),
        }
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.identity.load_full()
    }

    /// Swap the bound identity, returning the previous one.
    pub(crate) fn replace_identity(&self, identity: Option<Identity>) -> Option<Arc<Identity>> {
        self.identity.swap(identity.map(Arc::new))
    }

    pub fn language(&self) -> Option<Arc<String>> {
        self.language.load_full()
    }

    pub fn set_language(&self, language: Option<String>) {
        self.language.store(language.map(Arc::new));
    }

    /// Private response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Session-wide limiter, when configured.
    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Limiter of one endpoint for this session, created on first use.
    pub fn endpoint_limiter(&self, endpoint: &str, limit: RateLimit) -> Arc<RateLimiter> {
        if let Some(existing) = self.endpoint_limiters.get(endpoint) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.endpoint_limiters
                .entry(endpoint.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(limit)))
                .value(),
        )
    }

    pub fn messages(&self) -> &MessageQueue {
        &self.messages
    }

    /// Diagnostic view. Only a prefix of the token is exposed.
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            token: self.token.chars().take(8).collect(),
            device_id: self.origin.device_id.clone(),
            user_agent: self.origin.user_agent.clone(),
            address: self.origin.address.clone(),
            protocol: self.origin.protocol.clone(),
            identity: self.identity().map(|i| i.name.clone()),
            language: self.language().map(|l| l.to_string()),
            age_secs: now.saturating_duration_since(self.created).as_secs(),
            expires_in_secs: self.expires_at().saturating_duration_since(now).as_secs(),
            total_requests: self.total_requests(),
            in_flight: self.in_flight(),
            cache_entries: self.cache.len(),
            queued_messages: self.messages.len(),
        }
    }
}

/// Keeps `in_flight` raised until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    session: Arc<Session>,
}

impl InFlightGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.session.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub token: String,
    pub device_id: String,
    pub user_agent: String,
    pub address: String,
    pub protocol: String,
    pub identity: Option<String>,
    pub language: Option<String>,
    pub age_secs: u64,
    pub expires_in_secs: u64,
    pub total_requests: u64,
    pub in_flight: usize,
    pub cache_entries: usize,
    pub queued_messages: usize,
}
