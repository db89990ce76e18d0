//! Session-scoped long-poll push channel.
//!
//! # Data Flow
//! ```text
//! push(session, message)            poll(session, since, types, wait)
//!     → MessageQueue (per session)      → since == 0      → "connected"
//!     → id = ++counter                  → since > counter → "reconnect"
//!     → watch::Sender wakes waiters     → wait on watch until a qualifying
//!                                         message, timeout or supersession
//! ```
//!
//! # Design Decisions
//! - Queues live in their session, so closing a session drops its messages
//! - Shared mode collapses duplicate polls of one browser into the newest
//! - Unpolled messages expire after the retention window

pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;

use crate::config::MessagingConfig;
use crate::session::{Session, SessionStore};

pub use queue::{MessageQueue, PollOutcome, PollRequest, PushMessage, PushOptions, CONNECTED, RECONNECT};

/// Front door to the per-session queues.
#[derive(Debug)]
pub struct MessageBus {
    settings: ArcSwap<MessagingConfig>,
}

impl MessageBus {
    pub fn new(settings: MessagingConfig) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
        }
    }

    pub fn apply(&self, settings: MessagingConfig) {
        self.settings.store(Arc::new(settings));
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.settings.load().retention_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.settings.load().max_wait_secs)
    }

    /// Enqueue `payload` on the session's queue.
    ///
    /// With `require_same_auth` the message is bound to the identity that is
    /// logged in right now and is invisible to anyone else polling later.
    pub fn push(
        &self,
        session: &Session,
        kind: &str,
        payload: serde_json::Value,
        only_latest: bool,
        require_same_auth: bool,
    ) -> u64 {
        let audience = require_same_auth
            .then(|| session.identity().map(|i| i.name.clone()))
            .flatten();
        let options = PushOptions {
            only_latest,
            audience,
        };
        session
            .messages()
            .push(kind, payload, options, self.retention())
    }

    /// Long-poll the session's queue. `requested_wait` is capped by the
    /// configured maximum.
    pub async fn poll(
        &self,
        session: &Session,
        since: u64,
        types: &[String],
        requested_wait: Option<Duration>,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let settings = self.settings.load_full();
        let cap = Duration::from_secs(settings.max_wait_secs);
        let request = PollRequest {
            since,
            types,
            max_wait: requested_wait.map_or(cap, |w| w.min(cap)),
            shared: settings.shared_poll,
        };
        session
            .messages()
            .poll(request, || session.identity().map(|i| i.name.clone()), cancel)
            .await
    }

    /// Push to every live session of `identity`. Returns how many sessions
    /// received the message.
    pub fn broadcast_to_identity(
        &self,
        sessions: &SessionStore,
        identity: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> usize {
        let targets = sessions.sessions_of(identity);
        for session in &targets {
            self.push(session, kind, payload.clone(), false, true);
        }
        tracing::debug!(identity, kind, sessions = targets.len(), "Broadcast to identity");
        targets.len()
    }
}
