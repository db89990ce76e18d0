//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, RequestContext)
//!     → pipeline.rs (admission, sessions, routing, caching, encoding)
//!     → builtins.rs (engine-owned routes)
//!     → range.rs / response.rs (partial content, headers, body)
//!     → Send to client
//! ```

pub mod builtins;
pub mod pipeline;
pub mod range;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::handle;
pub use range::{parse_range, ByteRange};
pub use request::{RequestContext, X_REQUEST_ID};
pub use server::{build_router, HttpServer};
