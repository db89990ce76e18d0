//! Cache key derivation.

use std::fmt::Write;

/// How an endpoint derives the resource part of its cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKeyMode {
    /// The request path only.
    #[default]
    Path,
    /// Path plus query string.
    PathAndQuery,
    /// Path, query and request body (e.g. POSTed search forms).
    PathQueryAndBody,
}

/// Resource key, or the sentinel that keeps a response out of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    Key(String),
    DoNotCache,
}

impl CacheKey {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(k) => Some(k),
            Self::DoNotCache => None,
        }
    }
}

/// Derive the resource key. Bodies above `max_input` bytes are not keyed;
/// the request is simply not cached.
pub fn resource_key(
    mode: CacheKeyMode,
    path: &str,
    query: Option<&str>,
    body: &[u8],
    max_input: usize,
) -> CacheKey {
    match mode {
        CacheKeyMode::Path => CacheKey::Key(path.to_string()),
        CacheKeyMode::PathAndQuery => match query {
            Some(q) if !q.is_empty() => CacheKey::Key(format!("{path}?{q}")),
            _ => CacheKey::Key(path.to_string()),
        },
        CacheKeyMode::PathQueryAndBody => {
            if body.len() > max_input {
                return CacheKey::DoNotCache;
            }
            // The body is embedded verbatim (hex) so distinct bodies never
            // share a key.
            let mut key = format!("{path}?{}#", query.unwrap_or(""));
            key.reserve(body.len() * 2);
            for byte in body {
                let _ = write!(key, "{byte:02x}");
            }
            CacheKey::Key(key)
        }
    }
}

/// Composite lookup key. The language part is present only for localized
/// resources served with a translator configured.
pub fn cache_key(
    resource: &str,
    accept_encoding: &str,
    method: &str,
    language: Option<&str>,
) -> String {
    // '\n' cannot occur inside header values, so components never collide.
    match language {
        Some(lang) => format!("{resource}\n{accept_encoding}\n{method}\n{lang}"),
        None => format!("{resource}\n{accept_encoding}\n{method}"),
    }
}
