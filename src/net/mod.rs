//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → Hand off to axum::serve and the HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - The connection slot is released when the stream is dropped

pub mod listener;

pub use listener::{BoundedListener, ClientAddr, ListenerError, LimitedStream};
