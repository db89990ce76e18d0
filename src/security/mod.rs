//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (server, session, endpoint, endpoint-per-session limits)
//!     → access_control.rs (required tokens, header auth, 401/403 decision)
//!     → Pass to content acquisition
//! ```
//!
//! # Design Decisions
//! - Admission runs before any expensive work so rejected load costs O(1)
//! - Fail closed: missing identity with required tokens never reaches content
//! - Credential validation is delegated to an `Authenticator`

pub mod access_control;
pub mod rate_limit;

pub use access_control::{Authenticator, Identity, StaticTokenAuthenticator};
pub use rate_limit::{Admission, AdmissionScope, QueueSlot, RateLimit, RateLimiter};
