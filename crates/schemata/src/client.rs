//! The handle returned by [`define_config`](crate::define_config).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use schemata_core::{Error, Result, Store};
use schemata_engine::{CollectionHandle, Engine};
use schemata_schema::ResolvedSchema;

/// Per-collection operation API plus the raw persistence handle.
///
/// Cheap to clone; clones share the engine and store.
#[derive(Clone)]
pub struct Client {
    collections: BTreeMap<String, CollectionHandle>,
    engine: Arc<Engine>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .field("store", &self.engine.store().name())
            .finish()
    }
}

impl Client {
    /// Build a client over every collection of the engine's schema.
    pub fn new(engine: Arc<Engine>) -> Result<Self> {
        let mut collections = BTreeMap::new();
        for slug in engine.resolved().slugs() {
            collections.insert(slug.clone(), engine.handle(slug)?);
        }
        Ok(Self {
            collections,
            engine,
        })
    }

    /// Operations on `slug`, including auxiliary collections such as
    /// version histories.
    pub fn collection(&self, slug: &str) -> Result<CollectionHandle> {
        self.collections
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::UnknownCollection(slug.to_string()))
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionHandle> {
        self.collections.values()
    }

    /// The persistence collaborator, for queries outside the pipeline.
    pub fn db(&self) -> &Arc<dyn Store> {
        self.engine.store()
    }

    pub fn schema(&self) -> &ResolvedSchema {
        self.engine.resolved()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}
