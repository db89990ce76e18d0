//! HTTP request lifecycle engine.
//!
//! Sits between the connection layer and application modules: resolves
//! sessions, applies admission limits, routes to module endpoints, and
//! serves their content through a two-tier response cache with
//! content-encoding negotiation. A long-poll message bus pushes events to
//! sessions.

// Core subsystems
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Request state
pub mod cache;
pub mod compression;
pub mod content;
pub mod messaging;
pub mod session;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
