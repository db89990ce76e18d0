//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → published through ArcSwap in the Engine
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Engine::apply_config swaps the Arc and rebuilds the server limiter
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Existing sessions keep the lifetimes they were created with

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, BuiltinRoutesConfig, CacheConfig, CacheTierKind, EngineConfig, LimitConfig,
    ListenerConfig, MessagingConfig, ObservabilityConfig, RateLimitConfig, ServerConfig,
    SessionConfig, StaticContentConfig, TimeoutConfig,
};
pub use loader::{load_config, parse_config, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
