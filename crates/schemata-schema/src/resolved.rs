//! The resolved schema: immutable, fully composed and cross-referenced.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use schemata_core::{
    Contributor, Error, FieldDeclaration, FieldKind, FieldTypeDescriptor, FieldTypeRegistry,
    HookBinding, HookStage, LocalizedText, OperationKind, Result, ValidationRule,
};

use crate::collection::Access;
use crate::middleware::MiddlewareBinding;
use crate::plugin::PluginState;

/// A field after composition, with its field type narrowed by its options.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub name: String,
    pub declaration: FieldDeclaration,
    /// `None` for reverse relations, which have no field type.
    pub descriptor: Option<FieldTypeDescriptor>,
    pub contributor: Contributor,
}

impl ResolvedField {
    pub fn kind(&self) -> &FieldKind {
        &self.declaration.kind
    }

    pub fn validation(&self) -> Option<&ValidationRule> {
        self.descriptor.as_ref().map(|d| &d.validation)
    }

    pub fn is_stored(&self) -> bool {
        self.declaration.is_stored()
    }

    pub fn is_required(&self) -> bool {
        self.declaration.required
    }

    /// Target of a forward (single or many) relation.
    pub fn relation_target(&self) -> Option<(&str, bool)> {
        match &self.declaration.kind {
            FieldKind::Relation { target, many } => Some((target, *many)),
            _ => None,
        }
    }
}

/// A hook together with who contributed it.
#[derive(Debug, Clone)]
pub struct ResolvedHook {
    pub binding: HookBinding,
    pub source: Contributor,
}

/// A middleware together with who contributed it.
#[derive(Debug, Clone)]
pub struct ResolvedMiddleware {
    pub binding: MiddlewareBinding,
    pub source: Contributor,
}

/// A field replaced by an overriding plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOverride {
    pub field: String,
    pub replaced: Contributor,
    pub replacement: Contributor,
}

/// One collection composed with every applicable plugin.
#[derive(Clone)]
pub struct ResolvedCollection {
    pub slug: String,
    pub fields: Vec<ResolvedField>,
    /// Every hook, in execution order.
    pub hooks: Vec<ResolvedHook>,
    pub middlewares: Vec<ResolvedMiddleware>,
    /// Names of the plugins applied, in application order.
    pub plugins: Vec<String>,
    pub overrides: Vec<FieldOverride>,
    pub label: LocalizedText,
    pub description: LocalizedText,
    pub access: Access,
    pub auxiliary_of: Option<String>,
    pub(crate) state: BTreeMap<String, PluginState>,
}

impl std::fmt::Debug for ResolvedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCollection")
            .field("slug", &self.slug)
            .field("fields", &self.field_names())
            .field("hooks", &self.hooks.len())
            .field("middlewares", &self.middlewares.len())
            .field("plugins", &self.plugins)
            .field("overrides", &self.overrides)
            .field("auxiliary_of", &self.auxiliary_of)
            .finish_non_exhaustive()
    }
}

impl ResolvedCollection {
    pub fn field(&self, name: &str) -> Option<&ResolvedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn stored_fields(&self) -> impl Iterator<Item = &ResolvedField> {
        self.fields.iter().filter(|f| f.is_stored())
    }

    /// Hooks to run at `stage` for `operation`, in order.
    pub fn hooks_for(
        &self,
        stage: HookStage,
        operation: OperationKind,
    ) -> impl Iterator<Item = &ResolvedHook> {
        self.hooks
            .iter()
            .filter(move |h| h.binding.applies_to(stage, operation))
    }

    pub fn middlewares_for(
        &self,
        operation: OperationKind,
    ) -> impl Iterator<Item = &ResolvedMiddleware> {
        self.middlewares
            .iter()
            .filter(move |m| m.binding.applies_to(operation))
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p == name)
    }

    /// State attached by `plugin`, if it attached a `T`.
    pub fn plugin_state<T: Any + Send + Sync>(&self, plugin: &str) -> Option<&T> {
        self.state.get(plugin).and_then(|s| s.downcast_ref::<T>())
    }
}

/// Every resolved collection, keyed by slug.
///
/// Built once by [`SchemaResolver`](crate::SchemaResolver); read-only
/// afterwards and shared across concurrent operations.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub(crate) collections: BTreeMap<String, Arc<ResolvedCollection>>,
    /// Slugs in resolution order (declared first, then auxiliary).
    pub(crate) order: Vec<String>,
    pub(crate) registry: Arc<FieldTypeRegistry>,
}

impl ResolvedSchema {
    pub fn get(&self, slug: &str) -> Option<&Arc<ResolvedCollection>> {
        self.collections.get(slug)
    }

    /// Like [`get`](Self::get), failing with `Error::UnknownCollection`.
    pub fn collection(&self, slug: &str) -> Result<&Arc<ResolvedCollection>> {
        self.get(slug)
            .ok_or_else(|| Error::UnknownCollection(slug.to_string()))
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.collections.contains_key(slug)
    }

    /// Slugs in resolution order.
    pub fn slugs(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedCollection> {
        self.order
            .iter()
            .filter_map(|slug| self.collections.get(slug).map(AsRef::as_ref))
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// The global field-type scope the schema was resolved with.
    pub fn registry(&self) -> &FieldTypeRegistry {
        &self.registry
    }

    /// Forward relation fields in other collections pointing at `target`.
    pub fn referencing<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = (&'a ResolvedCollection, &'a ResolvedField)> + 'a {
        self.iter().flat_map(move |c| {
            c.fields
                .iter()
                .filter(move |f| f.relation_target().is_some_and(|(t, _)| t == target))
                .map(move |f| (c, f))
        })
    }
}
