//! Top-level configuration and the `define_config` entry point.

use std::fmt;
use std::sync::Arc;

use schemata_core::{
    ConfigurationError, FieldTypeDescriptor, FieldTypeRegistry, LocaleCatalog, Result, Store,
};
use schemata_engine::{Engine, EngineConfig};
use schemata_schema::{CollectionDeclaration, Plugin, ResolvedSchema, SchemaResolver};

use crate::client::Client;

/// The persistence side of a [`Config`].
#[derive(Clone)]
pub struct DatabaseConfig {
    pub store: Arc<dyn Store>,
    /// A schema resolved earlier, attached as-is instead of resolving the
    /// config's declarations again.
    pub existing_schema: Option<Arc<ResolvedSchema>>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("store", &self.store.name())
            .field("existing_schema", &self.existing_schema.as_ref().map(|s| s.slugs()))
            .finish()
    }
}

impl DatabaseConfig {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            existing_schema: None,
        }
    }

    pub fn existing_schema(mut self, schema: Arc<ResolvedSchema>) -> Self {
        self.existing_schema = Some(schema);
        self
    }
}

/// Everything [`define_config`] needs.
///
/// Declarations are plain values; nothing is checked until
/// [`define_config`] resolves them.
#[derive(Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Global field-type scope; the builtins unless replaced.
    pub registry: FieldTypeRegistry,
    pub collections: Vec<CollectionDeclaration>,
    /// Applied to every collection, in order, before collection plugins.
    pub plugins: Vec<Plugin>,
    pub engine: EngineConfig,
    pub catalog: Option<Arc<dyn LocaleCatalog>>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("collections", &self.collections)
            .field("plugins", &self.plugins)
            .field("engine", &self.engine)
            .field("catalog", &self.catalog.is_some())
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn new(database: DatabaseConfig) -> Self {
        Self {
            database,
            registry: FieldTypeRegistry::with_builtins(),
            collections: Vec::new(),
            plugins: Vec::new(),
            engine: EngineConfig::default(),
            catalog: None,
        }
    }

    /// Config backed by a fresh in-process store.
    #[cfg(feature = "memory")]
    pub fn in_memory() -> Self {
        Self::new(DatabaseConfig::new(Arc::new(
            schemata_memory::MemoryStore::new(),
        )))
    }

    pub fn registry(mut self, registry: FieldTypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register an application field type in the global scope.
    pub fn field_type(mut self, descriptor: FieldTypeDescriptor) -> Result<Self> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    pub fn collection(mut self, collection: CollectionDeclaration) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn collections(mut self, collections: impl IntoIterator<Item = CollectionDeclaration>) -> Self {
        self.collections.extend(collections);
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Enable strict side effects: cache and versioning failures abort.
    pub fn strict(mut self, strict: bool) -> Self {
        self.engine.strict = strict;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn LocaleCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }
}

/// Resolve `config` into a ready [`Client`].
///
/// Every configuration problem surfaces here; a returned client never fails
/// for schema reasons later.
#[tracing::instrument(level = "debug", skip(config), fields(store = config.database.store.name()))]
pub fn define_config(config: Config) -> Result<Client> {
    let Config {
        database,
        registry,
        collections,
        plugins,
        engine,
        catalog,
    } = config;

    let schema = match database.existing_schema {
        Some(schema) => {
            if !collections.is_empty() || !plugins.is_empty() {
                return Err(ConfigurationError::InvalidDeclaration {
                    subject: "database.existing_schema".to_string(),
                    message: "an existing schema cannot be combined with collections or plugins"
                        .to_string(),
                }
                .into());
            }
            tracing::debug!(collections = schema.len(), "Attaching existing schema");
            schema
        }
        None => Arc::new(
            SchemaResolver::new(registry)
                .plugins(plugins)
                .resolve(collections)?,
        ),
    };

    let mut engine = Engine::new(schema, database.store).with_config(engine);
    if let Some(catalog) = catalog {
        engine = engine.with_catalog(catalog);
    }
    let client = Client::new(Arc::new(engine))?;
    tracing::info!(
        collections = client.schema().len(),
        strict = client.engine().config().strict,
        "Schemata client ready"
    );
    Ok(client)
}
