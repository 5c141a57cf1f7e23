//! Plugin descriptors.
//!
//! A plugin is a closed set of optional capabilities. The composer only looks
//! at which capabilities are present: unconditional field types, fields,
//! hooks, middlewares and collections, plus an `extend` function that sees
//! the collection composed so far and returns a partial contribution.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use schemata_core::{FieldDeclaration, FieldTypeDescriptor, HookBinding, Result};

use crate::collection::CollectionDeclaration;
use crate::composer::CollectionDraft;
use crate::middleware::MiddlewareBinding;

/// Type-erased per-collection plugin state.
pub type PluginState = Arc<dyn Any + Send + Sync>;

/// Function computing a plugin's contribution to one collection.
pub type ExtendFn = Arc<dyn Fn(&CollectionDraft) -> Result<Extension> + Send + Sync>;

/// What `extend` contributes to a collection.
#[derive(Default)]
pub struct Extension {
    pub fields: Vec<(String, FieldDeclaration)>,
    pub hooks: Vec<HookBinding>,
    pub middlewares: Vec<MiddlewareBinding>,
    /// Auxiliary collections, resolved alongside (not merged into) this one.
    pub collections: Vec<CollectionDeclaration>,
    /// State attached to the resolved collection under the plugin's name.
    pub state: Option<PluginState>,
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("fields", &self.fields)
            .field("hooks", &self.hooks)
            .field("middlewares", &self.middlewares)
            .field("collections", &self.collections)
            .field("state", &self.state.is_some())
            .finish()
    }
}

impl Extension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field: FieldDeclaration) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn hook(mut self, hook: HookBinding) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareBinding) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn collection(mut self, collection: CollectionDeclaration) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn state<T: Any + Send + Sync>(mut self, state: T) -> Self {
        self.state = Some(Arc::new(state));
        self
    }
}

/// A composable contributor of fields, hooks, field types, collections and
/// operation middleware.
#[derive(Clone)]
pub struct Plugin {
    name: String,
    requires: Vec<String>,
    field_types: Vec<FieldTypeDescriptor>,
    fields: Vec<(String, FieldDeclaration)>,
    hooks: Vec<HookBinding>,
    middlewares: Vec<MiddlewareBinding>,
    collections: Vec<CollectionDeclaration>,
    extend: Option<ExtendFn>,
    overrides: bool,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .field(
                "field_types",
                &self.field_types.iter().map(|t| &t.id).collect::<Vec<_>>(),
            )
            .field(
                "fields",
                &self.fields.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("hooks", &self.hooks.len())
            .field("middlewares", &self.middlewares.len())
            .field("collections", &self.collections.len())
            .field("extend", &self.extend.is_some())
            .field("overrides", &self.overrides)
            .finish()
    }
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            field_types: Vec::new(),
            fields: Vec::new(),
            hooks: Vec::new(),
            middlewares: Vec::new(),
            collections: Vec::new(),
            extend: None,
            overrides: false,
        }
    }

    /// Declare a dependency on a plugin that must be applied earlier.
    pub fn requires(mut self, plugin: impl Into<String>) -> Self {
        self.requires.push(plugin.into());
        self
    }

    pub fn field_type(mut self, descriptor: FieldTypeDescriptor) -> Self {
        self.field_types.push(descriptor);
        self
    }

    /// Field added to every collection the plugin applies to.
    pub fn field(mut self, name: impl Into<String>, field: FieldDeclaration) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn hook(mut self, hook: HookBinding) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareBinding) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Collection declared once per resolution, whatever the plugin applies to.
    pub fn collection(mut self, collection: CollectionDeclaration) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn extend<F>(mut self, f: F) -> Self
    where
        F: Fn(&CollectionDraft) -> Result<Extension> + Send + Sync + 'static,
    {
        self.extend = Some(Arc::new(f));
        self
    }

    /// Let this plugin's fields replace same-named fields of earlier
    /// contributors instead of conflicting with them.
    pub fn overriding(mut self) -> Self {
        self.overrides = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> &[String] {
        &self.requires
    }

    pub fn field_types(&self) -> &[FieldTypeDescriptor] {
        &self.field_types
    }

    pub fn fields(&self) -> &[(String, FieldDeclaration)] {
        &self.fields
    }

    pub fn hooks(&self) -> &[HookBinding] {
        &self.hooks
    }

    pub fn middlewares(&self) -> &[MiddlewareBinding] {
        &self.middlewares
    }

    pub fn collections(&self) -> &[CollectionDeclaration] {
        &self.collections
    }

    pub fn extender(&self) -> Option<&ExtendFn> {
        self.extend.as_ref()
    }

    pub fn is_override(&self) -> bool {
        self.overrides
    }
}
