//! Per-session push queue with cooperative long-poll waits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Synthetic message answering a poll that starts from zero.
pub const CONNECTED: &str = "connected";
/// Synthetic message telling the client its cursor is from another process.
pub const RECONNECT: &str = "reconnect";

/// A queued notification.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(skip)]
    enqueued: Instant,
    /// Identity the message is restricted to, if any.
    #[serde(skip)]
    audience: Option<String>,
}

impl PushMessage {
    fn synthetic(id: u64, kind: &str) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            payload: serde_json::Value::Null,
            enqueued: Instant::now(),
            audience: None,
        }
    }

    fn visible_to(&self, identity: Option<&str>) -> bool {
        self.audience.as_deref().map_or(true, |a| Some(a) == identity)
    }
}

/// Options of one push.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Replace any undelivered message of the same type.
    pub only_latest: bool,
    /// Deliver only while this identity is still bound to the session.
    pub audience: Option<String>,
}

/// Result of a poll: messages in id order and the cursor to send next time.
#[derive(Debug, Clone, Serialize)]
pub struct PollOutcome {
    pub messages: Vec<PushMessage>,
    pub since: u64,
}

/// Parameters of one poll.
#[derive(Debug, Clone)]
pub struct PollRequest<'a> {
    pub since: u64,
    /// Empty means every type.
    pub types: &'a [String],
    pub max_wait: Duration,
    /// A newer waiter on the same queue supersedes this one.
    pub shared: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<PushMessage>,
    counter: u64,
}

/// Queue owned by one session.
#[derive(Debug)]
pub struct MessageQueue {
    state: Mutex<QueueState>,
    /// Carries the latest counter; also poked on generation bumps.
    wake: watch::Sender<u64>,
    generation: AtomicU64,
    pollers: AtomicUsize,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        let (wake, _) = watch::channel(0);
        Self {
            state: Mutex::new(QueueState::default()),
            wake,
            generation: AtomicU64::new(0),
            pollers: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id of the newest message ever pushed.
    pub fn counter(&self) -> u64 {
        self.lock().counter
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of polls currently waiting.
    pub fn pollers(&self) -> usize {
        self.pollers.load(Ordering::Acquire)
    }

    /// Enqueue a message and wake waiters. Returns its id.
    pub fn push(
        &self,
        kind: &str,
        payload: serde_json::Value,
        options: PushOptions,
        retention: Duration,
    ) -> u64 {
        let now = Instant::now();
        let id = {
            let mut state = self.lock();
            if self.pollers() == 0 {
                Self::drop_older_than(&mut state, now, retention);
            }
            if options.only_latest {
                state.messages.retain(|m| m.kind != kind);
            }
            state.counter += 1;
            let id = state.counter;
            state.messages.push_back(PushMessage {
                id,
                kind: kind.to_string(),
                payload,
                enqueued: now,
                audience: options.audience,
            });
            id
        };
        self.wake.send_replace(id);
        id
    }

    /// Drop messages older than `retention` unless someone is polling.
    pub fn prune(&self, now: Instant, retention: Duration) -> usize {
        if self.pollers() > 0 {
            return 0;
        }
        Self::drop_older_than(&mut self.lock(), now, retention)
    }

    fn drop_older_than(state: &mut QueueState, now: Instant, retention: Duration) -> usize {
        let before = state.messages.len();
        while state
            .messages
            .front()
            .is_some_and(|m| now.saturating_duration_since(m.enqueued) > retention)
        {
            state.messages.pop_front();
        }
        before - state.messages.len()
    }

    /// Wait for messages newer than `request.since`.
    ///
    /// `identity` is sampled at the start and on every wake; a change ends
    /// the wait with nothing delivered.
    pub async fn poll<F>(
        &self,
        request: PollRequest<'_>,
        identity: F,
        cancel: &CancellationToken,
    ) -> PollOutcome
    where
        F: Fn() -> Option<String>,
    {
        if request.since == 0 {
            // The cursor handed out must be non-zero, or the client would
            // keep restarting from scratch.
            let counter = {
                let mut state = self.lock();
                state.counter = state.counter.max(1);
                state.counter
            };
            return PollOutcome {
                messages: vec![PushMessage::synthetic(counter, CONNECTED)],
                since: counter,
            };
        }
        let counter = self.counter();
        if request.since > counter {
            return PollOutcome {
                messages: vec![PushMessage::synthetic(counter, RECONNECT)],
                since: counter,
            };
        }

        // Subscribe before the first check so no push slips between them.
        let mut wake = self.wake.subscribe();
        wake.borrow_and_update();

        let generation = if request.shared {
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            self.wake.send_modify(|_| {});
            wake.borrow_and_update();
            Some(generation)
        } else {
            None
        };

        self.pollers.fetch_add(1, Ordering::AcqRel);
        let _waiting = PollerGuard(&self.pollers);

        let started_as = identity();
        let deadline = tokio::time::Instant::now() + request.max_wait;

        loop {
            if identity() != started_as {
                tracing::debug!("Identity changed during long poll");
                return PollOutcome {
                    messages: Vec::new(),
                    since: request.since,
                };
            }
            if let Some(generation) = generation {
                if self.generation.load(Ordering::Acquire) != generation {
                    tracing::debug!("Long poll superseded by a newer waiter");
                    return PollOutcome {
                        messages: Vec::new(),
                        since: request.since,
                    };
                }
            }

            let (messages, counter) = self.collect(&request, started_as.as_deref());
            if !messages.is_empty() {
                return PollOutcome {
                    messages,
                    since: counter,
                };
            }

            tokio::select! {
                changed = wake.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
                _ = cancel.cancelled() => break,
            }
        }

        // A push may have landed after the last check; the cursor handed
        // back must never move past an undelivered message.
        if identity() != started_as {
            return PollOutcome {
                messages: Vec::new(),
                since: request.since,
            };
        }
        let (messages, counter) = self.collect(&request, started_as.as_deref());
        PollOutcome {
            messages,
            since: counter,
        }
    }

    fn collect(&self, request: &PollRequest<'_>, identity: Option<&str>) -> (Vec<PushMessage>, u64) {
        let state = self.lock();
        let messages = state
            .messages
            .iter()
            .filter(|m| m.id > request.since)
            .filter(|m| request.types.is_empty() || request.types.iter().any(|t| *t == m.kind))
            .filter(|m| m.visible_to(identity))
            .cloned()
            .collect();
        (messages, state.counter)
    }
}

struct PollerGuard<'a>(&'a AtomicUsize);

impl Drop for PollerGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
