//! Module resolution subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext (path)
//!     → table.rs (prefix index by first segment, then unprefixed modules)
//!     → module.rs (Module::handler_async, first Some wins)
//!     → endpoint.rs (Endpoint policy + ContentProvider)
//!     → Return: Endpoint or no match (404 after optional built-ins)
//! ```
//!
//! # Design Decisions
//! - Handlers are registered statically as values or closures
//! - Index rebuilt on registration only, reads are lock-free
//! - Deterministic: same path and same modules give the same endpoint

pub mod endpoint;
pub mod memory;
pub mod module;
pub mod table;

pub use endpoint::{Content, ContentProvider, Endpoint, EndpointInfo, FnProvider, StaticContent};
pub use memory::MemoryModule;
pub use module::Module;
pub use table::ModuleTable;
