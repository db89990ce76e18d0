//! Admission control.
//!
//! One [`RateLimiter`] type serves all four scopes (server, session, endpoint,
//! endpoint-per-session). A limiter admits at most `count` events per sliding
//! `duration`. Callers over the limit are handed a delayed [`QueueSlot`] as
//! long as the delay stays within `max_delay` and fewer than `max_queue`
//! callers are already waiting; anything beyond that is rejected (429).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::LimitConfig;
use crate::error::EngineError;
use crate::observability::metrics;

/// Scope a limiter instance guards. Evaluated in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionScope {
    Server,
    Session,
    Endpoint,
    EndpointSession,
}

impl AdmissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Session => "session",
            Self::Endpoint => "endpoint",
            Self::EndpointSession => "endpoint_session",
        }
    }
}

impl fmt::Display for AdmissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub duration: Duration,
    pub max_delay: Duration,
    pub max_queue: usize,
}

impl RateLimit {
    /// Strict limit: no queuing, excess requests are rejected immediately.
    pub fn new(count: u32, duration: Duration) -> Self {
        Self {
            count,
            duration,
            max_delay: Duration::ZERO,
            max_queue: 0,
        }
    }

    /// Allow up to `max_queue` callers to wait at most `max_delay`.
    pub fn with_queue(mut self, max_delay: Duration, max_queue: usize) -> Self {
        self.max_delay = max_delay;
        self.max_queue = max_queue;
        self
    }
}

impl From<LimitConfig> for RateLimit {
    fn from(config: LimitConfig) -> Self {
        RateLimit::new(config.count, Duration::from_millis(config.duration_ms)).with_queue(
            Duration::from_millis(config.max_delay_ms),
            config.max_queue,
        )
    }
}

/// Outcome of a single admission check.
#[derive(Debug)]
pub enum Admission {
    Admitted,
    /// Admitted after waiting; the slot counts against `max_queue` until it
    /// is dropped.
    Delayed(QueueSlot),
    Rejected,
}

/// A reserved place in a limiter's wait queue.
#[derive(Debug)]
pub struct QueueSlot {
    delay: Duration,
    waiting: Arc<AtomicUsize>,
}

impl QueueSlot {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep until the reserved admission time, then release the slot.
    pub async fn wait(self) {
        tokio::time::sleep(self.delay).await;
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Sliding-window limiter with a bounded delay queue.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    /// Admission times of the most recent `count` events, ascending. Delayed
    /// callers reserve their future admission time here.
    history: Mutex<VecDeque<Instant>>,
    waiting: Arc<AtomicUsize>,
    rejected: AtomicU64,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            history: Mutex::new(VecDeque::with_capacity(limit.count as usize)),
            waiting: Arc::new(AtomicUsize::new(0)),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Number of callers currently delayed.
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Decide admission for an event arriving at `now`.
    pub fn admit(&self, now: Instant) -> Admission {
        let count = self.limit.count.max(1) as usize;
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        let earliest = if history.len() < count {
            now
        } else {
            let oldest = history[history.len() - count];
            (oldest + self.limit.duration).max(now)
        };

        if earliest <= now {
            Self::record(&mut history, now, count);
            return Admission::Admitted;
        }

        let delay = earliest - now;
        if delay > self.limit.max_delay {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Admission::Rejected;
        }

        // Reserve a queue place without letting concurrent callers overshoot.
        let reserved = self
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.limit.max_queue).then_some(current + 1)
            })
            .is_ok();
        if !reserved {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Admission::Rejected;
        }

        Self::record(&mut history, earliest, count);
        Admission::Delayed(QueueSlot {
            delay,
            waiting: Arc::clone(&self.waiting),
        })
    }

    /// Admit or wait, mapping a rejection to [`EngineError::RateLimited`].
    pub async fn acquire(&self, scope: AdmissionScope) -> Result<(), EngineError> {
        match self.admit(Instant::now()) {
            Admission::Admitted => Ok(()),
            Admission::Delayed(slot) => {
                tracing::debug!(scope = %scope, delay = ?slot.delay(), "Admission delayed");
                slot.wait().await;
                Ok(())
            }
            Admission::Rejected => {
                tracing::warn!(scope = %scope, "Rate limit exceeded");
                metrics::record_rate_limited(scope.as_str());
                Err(EngineError::RateLimited(scope))
            }
        }
    }

    fn record(history: &mut VecDeque<Instant>, at: Instant, count: usize) {
        // Keep the log ascending even when an earlier caller reserved a
        // future admission time.
        let at = history.back().map_or(at, |last| (*last).max(at));
        history.push_back(at);
        while history.len() > count {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourth_request_rejected_without_queue() {
        let limiter = RateLimiter::new(RateLimit::new(3, Duration::from_secs(1)));
        let now = Instant::now();

        for i in 0..3 {
            let at = now + Duration::from_millis(i * 10);
            assert!(matches!(limiter.admit(at), Admission::Admitted));
        }
        assert!(matches!(
            limiter.admit(now + Duration::from_millis(50)),
            Admission::Rejected
        ));
        assert_eq!(limiter.rejected(), 1);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(RateLimit::new(2, Duration::from_secs(1)));
        let now = Instant::now();

        assert!(matches!(limiter.admit(now), Admission::Admitted));
        assert!(matches!(limiter.admit(now), Admission::Admitted));
        assert!(matches!(limiter.admit(now), Admission::Rejected));
        assert!(matches!(
            limiter.admit(now + Duration::from_millis(1001)),
            Admission::Admitted
        ));
    }

    #[test]
    fn test_delay_bounded_by_max_delay() {
        let limit = RateLimit::new(1, Duration::from_millis(100))
            .with_queue(Duration::from_millis(150), 10);
        let limiter = RateLimiter::new(limit);
        let now = Instant::now();

        assert!(matches!(limiter.admit(now), Admission::Admitted));

        let slot = match limiter.admit(now) {
            Admission::Delayed(slot) => slot,
            other => panic!("expected delay, got {other:?}"),
        };
        assert_eq!(slot.delay(), Duration::from_millis(100));

        // The next free time is now + 200ms, beyond the 150ms allowance.
        assert!(matches!(limiter.admit(now), Admission::Rejected));
        drop(slot);
    }

    #[test]
    fn test_queue_depth_bounded() {
        let limit = RateLimit::new(1, Duration::from_millis(10))
            .with_queue(Duration::from_secs(5), 1);
        let limiter = RateLimiter::new(limit);
        let now = Instant::now();

        assert!(matches!(limiter.admit(now), Admission::Admitted));
        let slot = match limiter.admit(now) {
            Admission::Delayed(slot) => slot,
            other => panic!("expected delay, got {other:?}"),
        };
        assert_eq!(limiter.queued(), 1);
        assert!(matches!(limiter.admit(now), Admission::Rejected));

        drop(slot);
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test]
    async fn test_acquire_maps_rejection() {
        let limiter = RateLimiter::new(RateLimit::new(1, Duration::from_secs(60)));
        assert!(limiter.acquire(AdmissionScope::Server).await.is_ok());
        let err = limiter.acquire(AdmissionScope::Server).await.unwrap_err();
        assert!(matches!(err, EngineError::RateLimited(AdmissionScope::Server)));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_slot() {
        let limit = RateLimit::new(1, Duration::from_millis(30))
            .with_queue(Duration::from_millis(500), 4);
        let limiter = RateLimiter::new(limit);

        let start = Instant::now();
        limiter.acquire(AdmissionScope::Session).await.unwrap();
        limiter.acquire(AdmissionScope::Session).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(limiter.queued(), 0);
    }
}
