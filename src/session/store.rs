//! Session table.
//!
//! # Responsibilities
//! - Resolve tokens to live sessions, creating new ones on demand
//! - Keep sessions alive while requests are in flight
//! - Sweep expired sessions in bounded batches
//! - Track which sessions belong to which logged-in identity
//! - Keep recently closed sessions visible to diagnostics

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::SessionConfig;
use crate::messaging::PushOptions;
use crate::observability::metrics;
use crate::security::{Identity, RateLimit};
use crate::session::hooks::{Hook, HookError, SessionListener};
use crate::session::{InFlightGuard, Session, SessionOrigin, SessionSnapshot};

/// Message pushed to the remaining sessions of an identity that logged out.
pub const LOGOUT_MESSAGE: &str = "logout";

const TOKEN_BYTES: usize = 16;

#[derive(Debug, Clone)]
struct StoreSettings {
    config: SessionConfig,
    limit: Option<RateLimit>,
    message_retention: Duration,
}

/// Why a session left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Expired,
    Shutdown,
}

#[derive(Debug, Clone)]
struct ClosedSession {
    snapshot: SessionSnapshot,
    reason: CloseReason,
    closed: Instant,
}

/// Entry of the closed-session retention queue.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedSessionInfo {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub reason: CloseReason,
    pub closed_secs_ago: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SessionStats {
    pub active: usize,
    pub identities: usize,
    pub created: u64,
    pub pruned: u64,
    pub retained: usize,
    pub callback_errors: u64,
}

/// Concurrent session table owned by one engine.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    identities: DashMap<String, HashSet<String>>,
    retained: Mutex<VecDeque<ClosedSession>>,
    listeners: Vec<Arc<dyn SessionListener>>,
    settings: ArcSwap<StoreSettings>,
    created: AtomicU64,
    pruned: AtomicU64,
    callback_errors: AtomicU64,
}

impl SessionStore {
    pub fn new(config: SessionConfig, limit: Option<RateLimit>) -> Self {
        Self {
            sessions: DashMap::new(),
            identities: DashMap::new(),
            retained: Mutex::new(VecDeque::new()),
            listeners: Vec::new(),
            settings: ArcSwap::from_pointee(StoreSettings {
                config,
                limit,
                message_retention: Duration::from_secs(15),
            }),
            created: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
            callback_errors: AtomicU64::new(0),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replace lifetimes and limits. Existing sessions keep their hard cap
    /// and limiter; new sessions and future touches use the new values.
    pub fn configure(&self, config: SessionConfig, limit: Option<RateLimit>, message_retention: Duration) {
        self.settings.store(Arc::new(StoreSettings {
            config,
            limit,
            message_retention,
        }));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Live session for `token`, with its sliding deadline extended.
    pub fn resolve(&self, token: &str, now: Instant) -> Option<Arc<Session>> {
        self.checkout(token, now).map(|guard| Arc::clone(guard.session()))
    }

    /// Like [`SessionStore::resolve`], but returns the session already marked
    /// in flight so a concurrent prune cannot take it away.
    pub fn checkout(&self, token: &str, now: Instant) -> Option<InFlightGuard> {
        let session = self.sessions.get(token).map(|s| Arc::clone(s.value()))?;
        let guard = session.acquire_in_flight();

        // The count includes this guard; any other holder keeps it alive.
        if now >= session.expires_at() && session.in_flight() <= 1 {
            drop(guard);
            if let Some((_, expired)) = self.sessions.remove_if(token, |_, s| s.is_expired(now)) {
                self.close(&expired, CloseReason::Expired, now);
            }
            return None;
        }

        // A prune may have removed it between the lookup and the guard.
        let present = self
            .sessions
            .get(token)
            .is_some_and(|s| Arc::ptr_eq(s.value(), &session));
        if !present {
            return None;
        }

        self.touch(&session, now);
        Some(guard)
    }

    /// Create a session under a fresh, unique token.
    pub fn create(&self, origin: SessionOrigin, now: Instant) -> Arc<Session> {
        let settings = self.settings.load_full();
        let session = loop {
            match self.sessions.entry(new_token()) {
                Entry::Occupied(_) => {
                    tracing::warn!("Session token collision, retrying");
                }
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session::new(
                        slot.key().clone(),
                        origin,
                        now,
                        settings.config.max_lifetime(),
                        settings.config.extend_lifetime(),
                        settings.limit,
                    ));
                    slot.insert(Arc::clone(&session));
                    break session;
                }
            }
        };

        self.touch(&session, now);
        self.created.fetch_add(1, Ordering::Relaxed);
        metrics::record_sessions_active(self.sessions.len());
        tracing::debug!(device_id = %session.device_id(), "Session created");

        self.run_hooks(Hook::Start, |l| l.on_start(&session));
        session
    }

    /// Extend the sliding deadline and count the request.
    pub fn touch(&self, session: &Session, now: Instant) {
        session.touch(now, self.settings.load().config.extend_lifetime());
    }

    /// Remove at most `prune_batch` expired sessions, then age out the
    /// retention queue. Returns the number of sessions removed.
    pub fn prune(&self, now: Instant) -> usize {
        let batch = self.settings.load().config.prune_batch;
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_expired(now))
            .take(batch)
            .map(|s| s.key().clone())
            .collect();

        let mut removed = 0;
        for token in candidates {
            // Re-check under the shard lock: a request may have arrived.
            if let Some((_, session)) = self.sessions.remove_if(&token, |_, s| s.is_expired(now)) {
                self.close(&session, CloseReason::Expired, now);
                removed += 1;
            }
        }

        self.prune_retained(now);

        if removed > 0 {
            self.pruned.fetch_add(removed as u64, Ordering::Relaxed);
            metrics::record_sessions_pruned(removed);
            tracing::debug!(removed, remaining = self.sessions.len(), "Pruned expired sessions");
        }
        metrics::record_sessions_active(self.sessions.len());
        removed
    }

    /// Close every session, e.g. on shutdown.
    pub fn close_all(&self, now: Instant) -> usize {
        let tokens: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        let mut closed = 0;
        for token in tokens {
            if let Some((_, session)) = self.sessions.remove(&token) {
                self.close(&session, CloseReason::Shutdown, now);
                closed += 1;
            }
        }
        closed
    }

    /// Bind `identity` to the session, or unbind with `None`.
    ///
    /// A change clears the session cache, since cached content may depend on
    /// the viewer. Logging out notifies the identity's other sessions.
    /// Returns whether the identity changed.
    pub fn set_auth(&self, session: &Session, identity: Option<Identity>) -> bool {
        if session.identity().as_deref() == identity.as_ref() {
            return false;
        }

        let previous = session.replace_identity(identity.clone());
        session.cache().clear();

        if let Some(previous) = &previous {
            self.unregister(&previous.name, session.token());
            self.run_hooks(Hook::Logout, |l| l.on_logout(session, previous));
        }

        match identity {
            Some(identity) => {
                self.identities
                    .entry(identity.name.clone())
                    .or_default()
                    .insert(session.token().to_string());
                self.run_hooks(Hook::Login, |l| l.on_login(session, &identity));
                tracing::info!(identity = %identity.name, "Session logged in");
            }
            None => {
                if let Some(previous) = previous {
                    self.fan_out_logout(&previous.name);
                    tracing::info!(identity = %previous.name, "Session logged out");
                }
            }
        }
        true
    }

    /// Live sessions bound to `identity`.
    pub fn sessions_of(&self, identity: &str) -> Vec<Arc<Session>> {
        let tokens: Vec<String> = match self.identities.get(identity) {
            Some(set) => set.iter().cloned().collect(),
            None => return Vec::new(),
        };
        tokens
            .iter()
            .filter_map(|t| self.sessions.get(t).map(|s| Arc::clone(s.value())))
            .collect()
    }

    pub fn snapshots(&self, now: Instant) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|s| s.snapshot(now)).collect()
    }

    /// Recently closed sessions, oldest first.
    pub fn closed_sessions(&self, now: Instant) -> Vec<ClosedSessionInfo> {
        self.lock_retained()
            .iter()
            .map(|c| ClosedSessionInfo {
                session: c.snapshot.clone(),
                reason: c.reason,
                closed_secs_ago: now.saturating_duration_since(c.closed).as_secs(),
            })
            .collect()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.sessions.len(),
            identities: self.identities.len(),
            created: self.created.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            retained: self.lock_retained().len(),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
        }
    }

    /// Call `f` on every live session.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Session>)) {
        for entry in self.sessions.iter() {
            f(entry.value());
        }
    }

    fn close(&self, session: &Session, reason: CloseReason, now: Instant) {
        if let Some(identity) = session.replace_identity(None) {
            self.unregister(&identity.name, session.token());
            self.run_hooks(Hook::Logout, |l| l.on_logout(session, &identity));
        }
        session.cache().clear();
        self.run_hooks(Hook::Close, |l| l.on_close(session));

        let settings = self.settings.load();
        let mut retained = self.lock_retained();
        retained.push_back(ClosedSession {
            snapshot: session.snapshot(now),
            reason,
            closed: now,
        });
        while retained.len() > settings.config.retention_capacity {
            retained.pop_front();
        }
    }

    fn prune_retained(&self, now: Instant) {
        let retention = self.settings.load().config.retention();
        let mut retained = self.lock_retained();
        while retained
            .front()
            .is_some_and(|c| now.saturating_duration_since(c.closed) >= retention)
        {
            retained.pop_front();
        }
    }

    fn fan_out_logout(&self, identity: &str) {
        let retention = self.settings.load().message_retention;
        for other in self.sessions_of(identity) {
            let options = PushOptions {
                only_latest: true,
                audience: Some(identity.to_string()),
            };
            other.messages().push(
                LOGOUT_MESSAGE,
                serde_json::json!({ "identity": identity }),
                options,
                retention,
            );
        }
    }

    fn unregister(&self, identity: &str, token: &str) {
        if let Some(mut set) = self.identities.get_mut(identity) {
            set.remove(token);
        }
        self.identities.remove_if(identity, |_, set| set.is_empty());
    }

    /// Run one callback on every listener. Failures, including panics, are
    /// counted and logged; the caller never sees them.
    fn run_hooks<F>(&self, hook: Hook, f: F)
    where
        F: Fn(&dyn SessionListener) -> Result<(), HookError>,
    {
        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "callback panicked".to_string(),
            };
            self.callback_errors.fetch_add(1, Ordering::Relaxed);
            metrics::record_callback_error(hook.as_str());
            tracing::warn!(hook = hook.as_str(), error = %error, "Session callback failed");
        }
    }

    fn lock_retained(&self) -> MutexGuard<'_, VecDeque<ClosedSession>> {
        self.retained.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
