//! Content module contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::http::RequestContext;
use crate::routing::{Endpoint, EndpointInfo};

/// A pluggable source of endpoints: a file tree, an API surface, a proxy.
///
/// Modules declaring `prefixes` are only asked about paths under one of
/// them; modules without prefixes are asked about every path that no
/// prefixed module answered, in registration order.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Path prefixes this module serves, e.g. `/api/`.
    fn prefixes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Resolve the handler for a request, or `None` to let the next module
    /// try.
    fn handler(&self, ctx: &RequestContext) -> Option<Arc<Endpoint>>;

    /// Async variant. Modules that need I/O to resolve override this one.
    async fn handler_async(&self, ctx: &RequestContext) -> Option<Arc<Endpoint>> {
        self.handler(ctx)
    }

    /// Endpoints reachable under `root`, for introspection.
    fn enumerate_endpoints(&self, root: &str) -> Vec<EndpointInfo>;
}
