//! Endpoints registered in memory, keyed by exact path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::CacheDuration;
use crate::config::{CacheTierKind, StaticContentConfig};
use crate::http::RequestContext;
use crate::routing::{Endpoint, EndpointInfo, Module, StaticContent};

/// Static registry of closures and fixed pages.
pub struct MemoryModule {
    name: String,
    prefixes: Vec<String>,
    endpoints: DashMap<String, Arc<Endpoint>>,
}

impl MemoryModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefixes: Vec::new(),
            endpoints: DashMap::new(),
        }
    }

    /// Restrict the module to paths under `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn with_endpoint(self, path: impl Into<String>, endpoint: Endpoint) -> Self {
        self.add(path, endpoint);
        self
    }

    pub fn add(&self, path: impl Into<String>, endpoint: Endpoint) {
        self.endpoints.insert(path.into(), Arc::new(endpoint));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.endpoints.remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Module serving the `[[static_content]]` pages of the config.
    pub fn from_static_content(pages: &[StaticContentConfig]) -> Self {
        let module = Self::new("static");
        for page in pages {
            module.add(page.path.clone(), static_endpoint(page));
        }
        module
    }
}

fn static_endpoint(page: &StaticContentConfig) -> Endpoint {
    let mut provider = StaticContent::new(page.body.clone());
    if let Some(etag) = &page.etag {
        provider = provider.with_etag(etag.clone());
    }

    let ttl = Duration::from_secs(page.server_cache_secs);
    let server_cache = match page.cache {
        CacheTierKind::None => CacheDuration::None,
        CacheTierKind::Global => CacheDuration::Global(ttl),
        CacheTierKind::Session => CacheDuration::PerSession(ttl),
    };

    let endpoint = Endpoint::new(page.path.clone(), Arc::new(provider))
        .with_server_cache(server_cache)
        .with_client_cache(Duration::from_secs(page.client_cache_secs))
        .with_content_type(page.content_type.clone());
    if page.template {
        endpoint.templated()
    } else {
        endpoint
    }
}

#[async_trait]
impl Module for MemoryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefixes(&self) -> Vec<String> {
        self.prefixes.clone()
    }

    fn handler(&self, ctx: &RequestContext) -> Option<Arc<Endpoint>> {
        self.endpoints.get(ctx.path()).map(|e| Arc::clone(e.value()))
    }

    fn enumerate_endpoints(&self, root: &str) -> Vec<EndpointInfo> {
        let mut listed: Vec<EndpointInfo> = self
            .endpoints
            .iter()
            .filter(|e| e.key().starts_with(root))
            .map(|e| e.value().info(&self.name))
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        listed
    }
}
