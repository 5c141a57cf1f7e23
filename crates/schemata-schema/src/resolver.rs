//! Schema resolution: every declaration and plugin in, one immutable
//! [`ResolvedSchema`] out.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use schemata_core::{ConfigurationError, FieldKind, FieldTypeRegistry, Result};

use crate::collection::CollectionDeclaration;
use crate::composer::PluginComposer;
use crate::plugin::Plugin;
use crate::resolved::{ResolvedCollection, ResolvedSchema};

/// Resolves declarations against a field-type registry and global plugins.
///
/// This is the only way to build a [`ResolvedSchema`]; collections cannot
/// be added afterwards.
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    registry: FieldTypeRegistry,
    plugins: Vec<Plugin>,
}

impl Default for SchemaResolver {
    fn default() -> Self {
        Self::new(FieldTypeRegistry::with_builtins())
    }
}

impl SchemaResolver {
    pub fn new(registry: FieldTypeRegistry) -> Self {
        Self {
            registry,
            plugins: Vec::new(),
        }
    }

    /// Add a global plugin (applied to every collection, in order).
    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    #[tracing::instrument(level = "debug", skip(self, collections))]
    pub fn resolve(self, collections: Vec<CollectionDeclaration>) -> Result<ResolvedSchema> {
        let mut global = self.registry;
        for plugin in &self.plugins {
            for descriptor in plugin.field_types() {
                global.register(descriptor.clone())?;
            }
        }
        let global = Arc::new(global);
        let composer = PluginComposer::new(&global, &self.plugins);

        // Collections declared statically by plugins join the queue once per
        // plugin, however many collections the plugin applies to.
        let mut seen_plugins = BTreeSet::new();
        let mut plugin_collections = Vec::new();
        let applied = self
            .plugins
            .iter()
            .chain(collections.iter().flat_map(|c| c.plugins().iter()));
        for plugin in applied {
            if seen_plugins.insert(plugin.name().to_string()) {
                plugin_collections.extend(plugin.collections().iter().cloned());
            }
        }

        let declared = collections.len();
        let mut queue: VecDeque<CollectionDeclaration> = collections.into();
        queue.extend(plugin_collections);

        let mut resolved: BTreeMap<String, Arc<ResolvedCollection>> = BTreeMap::new();
        let mut order = Vec::new();
        while let Some(declaration) = queue.pop_front() {
            if resolved.contains_key(declaration.slug()) {
                return Err(
                    ConfigurationError::DuplicateCollection(declaration.slug().to_string()).into(),
                );
            }
            let composition = composer.compose(&declaration)?;
            // Auxiliary collections are composed with global plugins only.
            queue.extend(composition.auxiliary);
            order.push(declaration.slug().to_string());
            resolved.insert(
                declaration.slug().to_string(),
                Arc::new(composition.collection),
            );
        }

        check_references(&resolved)?;

        tracing::info!(
            collections = resolved.len(),
            declared = declared,
            auxiliary = resolved.len() - declared,
            global_plugins = self.plugins.len(),
            "Resolved schema"
        );

        Ok(ResolvedSchema {
            collections: resolved,
            order,
            registry: global,
        })
    }
}

/// Every relation target must exist; every reverse relation must name a
/// relation field on its target pointing back.
fn check_references(collections: &BTreeMap<String, Arc<ResolvedCollection>>) -> Result<()> {
    for collection in collections.values() {
        for field in &collection.fields {
            let (target, foreign_key) = match &field.declaration.kind {
                FieldKind::Relation { target, .. } => (target, None),
                FieldKind::ReverseRelation {
                    target,
                    foreign_key,
                } => (target, Some(foreign_key)),
                _ => continue,
            };
            let Some(target_collection) = collections.get(target) else {
                return Err(ConfigurationError::UnknownCollection {
                    collection: collection.slug.clone(),
                    field: field.name.clone(),
                    target: target.clone(),
                }
                .into());
            };
            if let Some(fk) = foreign_key {
                let points_back = target_collection
                    .field(fk)
                    .and_then(|f| f.relation_target())
                    .is_some_and(|(t, _)| t == collection.slug);
                if !points_back {
                    return Err(ConfigurationError::InvalidDeclaration {
                        subject: format!("{}.{}", collection.slug, field.name),
                        message: format!(
                            "'{target}.{fk}' is not a relation to '{}'",
                            collection.slug
                        ),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}

/// Resolve `collections` with `plugins` as global plugins.
pub fn resolve(
    registry: FieldTypeRegistry,
    collections: Vec<CollectionDeclaration>,
    plugins: Vec<Plugin>,
) -> Result<ResolvedSchema> {
    SchemaResolver::new(registry)
        .plugins(plugins)
        .resolve(collections)
}
