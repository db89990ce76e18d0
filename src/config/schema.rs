//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the request engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Server identity and global request settings.
    pub server: ServerConfig,

    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Session lifetimes, pruning and cookie names.
    pub sessions: SessionConfig,

    /// Response cache maintenance.
    pub cache: CacheConfig,

    /// Server-wide and per-session admission limits.
    pub rate_limit: RateLimitConfig,

    /// Long-poll message bus settings.
    pub messaging: MessagingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Paths of the built-in routes.
    pub routes: BuiltinRoutesConfig,

    /// Statically configured pages served by the memory module.
    pub static_content: Vec<StaticContentConfig>,
}

/// Server identity and request-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, substituted for `{server}` in cookie name templates.
    pub name: String,

    /// Allow the site to be embedded cross-origin. Switches the cookie
    /// attributes to `SameSite=None;Secure` and emits CORS header hints.
    pub cross_origin_embed: bool,

    /// Maximum request body size read into memory.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "engine".to_string(),
            cross_origin_embed: false,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Resolve a `{server}` placeholder in a name template.
    pub fn resolve_name(&self, template: &str) -> String {
        template.replace("{server}", &self.name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard cap on a session's lifetime in seconds.
    pub max_lifetime_secs: u64,

    /// Sliding keep-alive window in seconds, pushed forward on every request.
    pub extend_lifetime_secs: u64,

    /// Maximum number of expired sessions removed per prune tick.
    pub prune_batch: usize,

    /// How long closed sessions stay visible to diagnostics.
    pub retention_secs: u64,

    /// Upper bound on the closed-session retention queue.
    pub retention_capacity: usize,

    /// Session cookie name template.
    pub cookie_name: String,

    /// Device id cookie name template.
    pub device_cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_lifetime_secs: 24 * 3600,
            extend_lifetime_secs: 20 * 60,
            prune_batch: 100,
            retention_secs: 15 * 60,
            retention_capacity: 1000,
            cookie_name: "{server}_session".to_string(),
            device_cookie_name: "{server}_device".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn extend_lifetime(&self) -> Duration {
        Duration::from_secs(self.extend_lifetime_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Response cache maintenance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of expired entries removed per tier per tick.
    pub prune_batch: usize,

    /// Interval of the maintenance tick in milliseconds.
    pub prune_interval_ms: u64,

    /// Request bodies above this size are never used to derive cache keys.
    pub max_key_input_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prune_batch: 1000,
            prune_interval_ms: 1000,
            max_key_input_bytes: 4096,
        }
    }
}

/// Admission limits applied to every request.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Server-wide limit. `None` disables the scope.
    pub server: Option<LimitConfig>,

    /// Limit applied to each session.
    pub session: Option<LimitConfig>,
}

/// Parameters of a single limiter instance.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum permitted events per window.
    pub count: u32,

    /// Sliding window length in milliseconds.
    pub duration_ms: u64,

    /// Longest a caller may be delayed before admission, in milliseconds.
    #[serde(default)]
    pub max_delay_ms: u64,

    /// Maximum number of concurrently delayed callers.
    #[serde(default)]
    pub max_queue: usize,
}

/// Long-poll message bus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messages older than this are dropped when nobody is polling.
    pub retention_secs: u64,

    /// Upper bound on a single long-poll wait.
    pub max_wait_secs: u64,

    /// A newer poll from the same session supersedes older ones.
    pub shared_poll: bool,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            retention_secs: 15,
            max_wait_secs: 25,
            shared_poll: true,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for a request/response in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Paths answered by the engine itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuiltinRoutesConfig {
    pub logout: String,
    /// Header-auth entry point; redirects back to `return` on success.
    pub auth: String,
    pub server_time: String,
    pub messages: String,
    pub login_probe: String,
    pub favicon: String,
    pub logo: String,

    /// Where unauthenticated browsers are sent for endpoints requiring
    /// tokens. `None` answers 401 instead.
    pub login_redirect: Option<String>,
}

impl Default for BuiltinRoutesConfig {
    fn default() -> Self {
        Self {
            logout: "/_logout".to_string(),
            auth: "/_auth".to_string(),
            server_time: "/_time".to_string(),
            messages: "/_messages".to_string(),
            login_probe: "/_login".to_string(),
            favicon: "/favicon.ico".to_string(),
            logo: "/logo.png".to_string(),
            login_redirect: None,
        }
    }
}

/// Cache tier requested by a statically configured page.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheTierKind {
    #[default]
    None,
    Global,
    Session,
}

/// A page served from memory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticContentConfig {
    pub path: String,
    pub body: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub cache: CacheTierKind,
    #[serde(default)]
    pub server_cache_secs: u64,
    #[serde(default)]
    pub client_cache_secs: u64,
    #[serde(default)]
    pub etag: Option<String>,
    /// Run the body through the template engine.
    #[serde(default)]
    pub template: bool,
}

fn default_content_type() -> String {
    "text/html; charset=utf-8".to_string()
}
