//! Module resolution table.
//!
//! # Responsibilities
//! - Keep registered modules in order
//! - Index prefixed modules by first path segment
//! - Resolve a request to the first module that returns a handler
//!
//! # Design Decisions
//! - Registration rebuilds the index under a mutex and publishes it
//!   through `ArcSwap`; lookups never lock
//! - Among candidates, registration order decides

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::http::RequestContext;
use crate::routing::{Endpoint, EndpointInfo, Module};

#[derive(Clone)]
struct Prefixed {
    order: usize,
    prefix: String,
    module: Arc<dyn Module>,
}

#[derive(Default)]
struct Index {
    /// Keyed by the first path segment of the prefix; `""` for `/`.
    by_segment: HashMap<String, Vec<Prefixed>>,
    unprefixed: Vec<Arc<dyn Module>>,
    all: Vec<Arc<dyn Module>>,
}

impl Index {
    fn build(modules: &[Arc<dyn Module>]) -> Self {
        let mut index = Index::default();
        for (order, module) in modules.iter().enumerate() {
            let prefixes = module.prefixes();
            if prefixes.is_empty() {
                index.unprefixed.push(Arc::clone(module));
            }
            for prefix in prefixes {
                index
                    .by_segment
                    .entry(first_segment(&prefix).to_string())
                    .or_default()
                    .push(Prefixed {
                        order,
                        prefix,
                        module: Arc::clone(module),
                    });
            }
            index.all.push(Arc::clone(module));
        }
        index
    }

    /// Prefixed modules matching `path`, in registration order, each once.
    fn candidates(&self, path: &str) -> Vec<Arc<dyn Module>> {
        let mut matches: Vec<&Prefixed> = [first_segment(path), ""]
            .iter()
            .filter_map(|segment| self.by_segment.get(*segment))
            .flatten()
            .filter(|p| path.starts_with(p.prefix.as_str()))
            .collect();
        matches.sort_by_key(|p| p.order);
        matches.dedup_by_key(|p| p.order);
        matches.into_iter().map(|p| Arc::clone(&p.module)).collect()
    }
}

fn first_segment(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
}

/// Registered modules with a lock-free lookup index.
pub struct ModuleTable {
    modules: Mutex<Vec<Arc<dyn Module>>>,
    index: ArcSwap<Index>,
}

impl Default for ModuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleTable {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            index: ArcSwap::from_pointee(Index::default()),
        }
    }

    /// Append a module and republish the index.
    pub fn register(&self, module: Arc<dyn Module>) {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(module = module.name(), prefixes = ?module.prefixes(), "Module registered");
        modules.push(module);
        self.index.store(Arc::new(Index::build(&modules)));
    }

    pub fn len(&self) -> usize {
        self.index.load().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First handler offered for the request, with the module's name.
    pub async fn resolve(&self, ctx: &RequestContext) -> Option<(String, Arc<Endpoint>)> {
        let index = self.index.load_full();
        let prefixed = index.candidates(ctx.path());
        for module in prefixed.iter().chain(index.unprefixed.iter()) {
            if let Some(endpoint) = module.handler_async(ctx).await {
                return Some((module.name().to_string(), endpoint));
            }
        }
        None
    }

    /// Endpoints of every module under `root`.
    pub fn enumerate(&self, root: &str) -> Vec<EndpointInfo> {
        self.index
            .load()
            .all
            .iter()
            .flat_map(|m| m.enumerate_endpoints(root))
            .collect()
    }
}
