//! Two-tier response cache.
//!
//! # Data Flow
//! ```text
//! Endpoint cache policy (CacheDuration)
//!     → Global(ttl)     → Engine-wide ResponseCache
//!     → PerSession(ttl) → the Session's private ResponseCache
//!     → None            → never stored
//!
//! Lookup key = resource key ⊕ Accept-Encoding ⊕ method ⊕ [language]
//! ```
//!
//! # Design Decisions
//! - Tiers are the same type; only the owner differs
//! - Population after a miss is last-writer-wins, no single-flight
//! - Expired entries are never served; pruning only reclaims memory

pub mod key;
pub mod store;

use std::fmt;
use std::time::Duration;

pub use key::{cache_key, resource_key, CacheKey, CacheKeyMode};
pub use store::{CacheEntry, CacheStats, CachedResponse, ResponseCache};

/// Which map an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Global,
    Session,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side cache policy of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheDuration {
    #[default]
    None,
    /// Shared by every viewer.
    Global(Duration),
    /// Private to the requesting session.
    PerSession(Duration),
}

impl CacheDuration {
    /// Decode the legacy sign-encoded seconds value: negative means session
    /// tier, positive means global, zero disables caching.
    pub fn from_signed_secs(secs: i64) -> Self {
        match secs {
            0 => Self::None,
            s if s < 0 => Self::PerSession(Duration::from_secs(s.unsigned_abs())),
            s => Self::Global(Duration::from_secs(s as u64)),
        }
    }

    /// Time to live, `None` when caching is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Global(d) | Self::PerSession(d) if d.is_zero() => None,
            Self::Global(d) | Self::PerSession(d) => Some(*d),
        }
    }

    pub fn tier(&self) -> Option<CacheTier> {
        self.ttl()?;
        match self {
            Self::None => None,
            Self::Global(_) => Some(CacheTier::Global),
            Self::PerSession(_) => Some(CacheTier::Session),
        }
    }

    /// Viewer-dependent content must stay private.
    pub fn into_session(self) -> Self {
        match self {
            Self::Global(d) => Self::PerSession(d),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_seconds_select_tier() {
        assert_eq!(CacheDuration::from_signed_secs(0), CacheDuration::None);
        assert_eq!(
            CacheDuration::from_signed_secs(-30).tier(),
            Some(CacheTier::Session)
        );
        assert_eq!(
            CacheDuration::from_signed_secs(-30).ttl(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            CacheDuration::from_signed_secs(60).tier(),
            Some(CacheTier::Global)
        );
    }

    #[test]
    fn test_zero_ttl_disables() {
        assert!(CacheDuration::Global(Duration::ZERO).tier().is_none());
    }

    #[test]
    fn test_dynamic_forces_session_tier() {
        let d = CacheDuration::Global(Duration::from_secs(5)).into_session();
        assert_eq!(d, CacheDuration::PerSession(Duration::from_secs(5)));
        assert_eq!(CacheDuration::None.into_session(), CacheDuration::None);
    }
}
