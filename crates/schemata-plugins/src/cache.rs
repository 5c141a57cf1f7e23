//! Read-through caching of query results.
//!
//! Reads outside a transaction are answered from the backend when a fresh
//! entry exists and stored after execute otherwise. Writes invalidate, after
//! execute and inside the write's transaction, according to the configured
//! [`InvalidationStrategy`]. Entries hold the stored records, so localization
//! and includes are applied per call on top of a hit.

use std::fmt;
use std::sync::Arc;

use schemata_core::value::record_id;
use schemata_core::{
    BoxOutcome, Cx, Error, Filter, ID_FIELD, OperationKind, OperationOutput, OperationRequest,
    Outcome, Result, Value,
};
use schemata_engine::CollectionHandle;
use schemata_schema::{
    Extension, Flow, MiddlewareBinding, MiddlewareCall, OperationMiddleware, Plugin,
};

use crate::backend::{CacheBackend, CacheStats, CacheStrategy, MemoryCache};

/// Plugin name, also the key of its per-collection state.
pub const CACHE: &str = "cache";

/// What a write evicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidationStrategy {
    /// Query results of the collection plus the by-id lookups of the
    /// written records.
    #[default]
    Exact,
    /// Every entry of the collection.
    Pattern,
    /// The whole backend.
    All,
}

#[derive(Clone)]
pub struct CacheConfig {
    pub strategy: CacheStrategy,
    /// Read operations served from the cache.
    pub operations: Vec<OperationKind>,
    pub invalidation: InvalidationStrategy,
    /// Collections whose entries a write here also evicts.
    pub related: Vec<String>,
    /// Shared backend; a [`MemoryCache`] built from `strategy` when unset.
    pub backend: Option<Arc<dyn CacheBackend>>,
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("strategy", &self.strategy)
            .field("operations", &self.operations)
            .field("invalidation", &self.invalidation)
            .field("related", &self.related)
            .field("backend", &self.backend.is_some())
            .finish()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::default(),
            operations: OperationKind::READS.to_vec(),
            invalidation: InvalidationStrategy::default(),
            related: Vec::new(),
            backend: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn operations(mut self, operations: &[OperationKind]) -> Self {
        self.operations = operations.iter().copied().filter(|k| k.is_read()).collect();
        self
    }

    pub fn invalidation(mut self, invalidation: InvalidationStrategy) -> Self {
        self.invalidation = invalidation;
        self
    }

    pub fn related(mut self, slug: impl Into<String>) -> Self {
        self.related.push(slug.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

fn list_tag(slug: &str) -> String {
    format!("{slug}:list")
}

fn record_tag(slug: &str, id: &Value) -> String {
    format!("{slug}#{id}")
}

/// Whether `filter` restricts the result to one identity.
fn pins_id(filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, .. } => field.as_str() == ID_FIELD,
        Filter::And(children) => children.iter().any(pins_id),
        _ => false,
    }
}

fn ready<'a, T: Send + 'a>(result: Result<T>) -> BoxOutcome<'a, T> {
    let outcome = match result {
        Ok(value) => Outcome::Ok(value),
        Err(e) => Outcome::Err(e),
    };
    Box::pin(std::future::ready(outcome))
}

fn cache_error(error: Error) -> Error {
    match error {
        Error::Cache(_) => error,
        other => Error::Cache(other.to_string()),
    }
}

struct CacheState {
    backend: Arc<dyn CacheBackend>,
}

struct CacheMiddleware {
    backend: Arc<dyn CacheBackend>,
    operations: Vec<OperationKind>,
    invalidation: InvalidationStrategy,
    related: Vec<String>,
}

impl CacheMiddleware {
    fn serves(&self, call: MiddlewareCall<'_>, request: &OperationRequest) -> bool {
        // Reads inside a write may see uncommitted records.
        self.operations.contains(&request.kind) && !call.context.in_transaction()
    }

    fn key(call: MiddlewareCall<'_>, request: &OperationRequest) -> Result<String> {
        let options = serde_json::to_string(&request.options.normalized())?;
        let locale = call.context.locale.as_deref().unwrap_or("");
        Ok(format!(
            "{}:{}:{locale}:{options}",
            call.collection.slug, request.kind
        ))
    }

    fn lookup(&self, call: MiddlewareCall<'_>, request: &OperationRequest) -> Result<Flow> {
        let key = Self::key(call, request)?;
        let cached = self.backend.get(&key).map_err(cache_error)?;
        let output = match cached {
            Some(Value::Array(items)) => Some(OperationOutput::Records(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::Object(record) => Some(record),
                        _ => None,
                    })
                    .collect(),
            )),
            Some(Value::Number(n)) => n.as_u64().map(OperationOutput::Count),
            _ => None,
        };
        match output {
            Some(output) => {
                tracing::debug!(key = %key, "cache hit");
                Ok(Flow::Handled(output))
            }
            None => Ok(Flow::Continue),
        }
    }

    fn store(
        &self,
        call: MiddlewareCall<'_>,
        request: &OperationRequest,
        output: &OperationOutput,
    ) -> Result<()> {
        let slug = &call.collection.slug;
        let key = Self::key(call, request)?;
        let mut tags = request.tags.clone();
        let value = match output {
            OperationOutput::Records(records) => {
                // Only a found record pinned by id is unaffected by writes to
                // other records; any other result may change on any write.
                let pinned = request.kind == OperationKind::FindUnique
                    && request.options.filter.as_ref().is_some_and(pins_id)
                    && !records.is_empty();
                if pinned {
                    tags.extend(
                        records
                            .iter()
                            .filter_map(record_id)
                            .map(|id| record_tag(slug, id)),
                    );
                } else {
                    tags.push(list_tag(slug));
                }
                Value::Array(records.iter().cloned().map(Value::Object).collect())
            }
            OperationOutput::Count(n) => {
                tags.push(list_tag(slug));
                Value::from(*n)
            }
        };
        self.backend.set(&key, value, &tags).map_err(cache_error)
    }

    fn invalidate(
        &self,
        call: MiddlewareCall<'_>,
        request: &OperationRequest,
        output: &OperationOutput,
    ) -> Result<()> {
        let slug = &call.collection.slug;
        let evicted = match self.invalidation {
            InvalidationStrategy::Exact => {
                let mut tags = vec![list_tag(slug)];
                if request.kind != OperationKind::Create {
                    tags.extend(
                        call.previous
                            .iter()
                            .chain(output.records())
                            .filter_map(record_id)
                            .map(|id| record_tag(slug, id)),
                    );
                }
                self.backend.evict_tags(&tags).map_err(cache_error)?
            }
            InvalidationStrategy::Pattern => self
                .backend
                .evict_prefix(&format!("{slug}:"))
                .map_err(cache_error)?,
            InvalidationStrategy::All => {
                self.backend.clear().map_err(cache_error)?;
                0
            }
        };
        let mut related = 0;
        for other in &self.related {
            related += self
                .backend
                .evict_prefix(&format!("{other}:"))
                .map_err(cache_error)?;
        }
        if !request.tags.is_empty() {
            related += self.backend.evict_tags(&request.tags).map_err(cache_error)?;
        }
        tracing::debug!(
            collection = %slug,
            operation = %request.kind,
            evicted,
            related,
            "cache invalidated"
        );
        Ok(())
    }
}

impl OperationMiddleware for CacheMiddleware {
    fn before<'a>(
        &'a self,
        _cx: &'a Cx,
        call: MiddlewareCall<'a>,
        request: &'a mut OperationRequest,
    ) -> BoxOutcome<'a, Flow> {
        let flow = if request.kind.is_read() && self.serves(call, request) {
            self.lookup(call, request)
        } else {
            Ok(Flow::Continue)
        };
        ready(flow)
    }

    fn after<'a>(
        &'a self,
        _cx: &'a Cx,
        call: MiddlewareCall<'a>,
        request: &'a OperationRequest,
        output: &'a mut OperationOutput,
    ) -> BoxOutcome<'a, ()> {
        let result = if request.kind.is_write() {
            self.invalidate(call, request, output)
        } else if self.serves(call, request) {
            self.store(call, request, output)
        } else {
            Ok(())
        };
        ready(result)
    }
}

/// Cache reads of the collections it is applied to.
///
/// One backend is shared by every collection the returned plugin is
/// applied to, so `related` evictions reach the other collections' entries
/// when they use the same plugin value.
pub fn cache(config: CacheConfig) -> Plugin {
    let backend: Arc<dyn CacheBackend> = match &config.backend {
        Some(backend) => Arc::clone(backend),
        None => Arc::new(MemoryCache::new(config.strategy.clone())),
    };
    let mut operations = config.operations.clone();
    operations.extend(OperationKind::WRITES);
    let middleware = Arc::new(CacheMiddleware {
        backend: Arc::clone(&backend),
        operations: config.operations,
        invalidation: config.invalidation,
        related: config.related,
    });
    Plugin::new(CACHE)
        .middleware(MiddlewareBinding::new(CACHE, &operations, middleware))
        .extend(move |_| {
            Ok(Extension::new().state(CacheState {
                backend: Arc::clone(&backend),
            }))
        })
}

/// Cache controls on a cached collection.
pub trait CacheExt {
    /// Drop every entry of this collection; returns how many.
    fn invalidate_cache(&self) -> Result<usize>;

    fn invalidate_tags(&self, tags: &[String]) -> Result<usize>;

    /// Counters of the backend this collection shares.
    fn cache_stats(&self) -> Result<CacheStats>;
}

fn backend<'a>(handle: &'a CollectionHandle, operation: &str) -> Result<&'a Arc<dyn CacheBackend>> {
    handle
        .collection()
        .plugin_state::<CacheState>(CACHE)
        .map(|state| &state.backend)
        .ok_or_else(|| Error::UnknownOperation {
            collection: handle.slug().to_string(),
            operation: operation.to_string(),
        })
}

impl CacheExt for CollectionHandle {
    fn invalidate_cache(&self) -> Result<usize> {
        let evicted = backend(self, "invalidate_cache")?.evict_prefix(&format!("{}:", self.slug()))?;
        tracing::info!(collection = %self.slug(), evicted, "cache cleared");
        Ok(evicted)
    }

    fn invalidate_tags(&self, tags: &[String]) -> Result<usize> {
        backend(self, "invalidate_tags")?.evict_tags(tags)
    }

    fn cache_stats(&self) -> Result<CacheStats> {
        backend(self, "cache_stats")?.stats()
    }
}
