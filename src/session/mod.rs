//! Session lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Cookie header
//!     → cookies.rs (session token, device id)
//!     → store.rs checkout (live? extend sliding deadline, mark in flight)
//!         miss/expired → store.rs create (unique random token, start hooks)
//!     → request runs holding an InFlightGuard
//!
//! Maintenance tick:
//!     store.rs prune (bounded batch, re-check under shard lock)
//!     → close hooks → retention queue (diagnostics)
//! ```
//!
//! # Design Decisions
//! - Effective expiry is min(hard cap, sliding deadline)
//! - In-flight sessions never expire
//! - Each session owns its cache tier, limiter and message queue
//! - Callback failures are counted and logged, never propagated

pub mod cookies;
pub mod hooks;
pub mod state;
pub mod store;

pub use cookies::{read_cookie, CookieNames};
pub use hooks::{HookError, SessionListener};
pub use state::{InFlightGuard, Session, SessionOrigin, SessionSnapshot};
pub use store::{ClosedSessionInfo, CloseReason, SessionStats, SessionStore, LOGOUT_MESSAGE};
