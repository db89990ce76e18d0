//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → server drains, maintenance and admin stop
//!
//! Maintenance (maintenance.rs):
//!     every cache.prune_interval_ms → sessions, cache tiers, message queues
//! ```
//!
//! # Design Decisions
//! - Every long-running task owns a broadcast receiver
//! - Sessions are closed only after the listener has drained

pub mod maintenance;
pub mod shutdown;
pub mod signals;

pub use maintenance::MaintenanceTask;
pub use shutdown::Shutdown;
pub use signals::{forward_signals, shutdown_signal};
