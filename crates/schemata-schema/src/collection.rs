//! Collection declarations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use schemata_core::{
    FieldDeclaration, HookBinding, LocalizedText, OperationContext, OperationKind,
};

use crate::plugin::Plugin;

/// Who may run an operation on a collection.
#[derive(Clone)]
pub enum AccessRule {
    Allow,
    Deny,
    /// Any call with an actor.
    Authenticated,
    /// Actors holding at least one of the roles.
    Roles(Vec<String>),
    Custom(Arc<dyn Fn(&OperationContext) -> bool + Send + Sync>),
}

impl AccessRule {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&OperationContext) -> bool + Send + Sync + 'static,
    {
        AccessRule::Custom(Arc::new(f))
    }

    pub fn allows(&self, ctx: &OperationContext) -> bool {
        match self {
            AccessRule::Allow => true,
            AccessRule::Deny => false,
            AccessRule::Authenticated => ctx.actor.is_some(),
            AccessRule::Roles(roles) => ctx
                .actor
                .as_ref()
                .is_some_and(|a| roles.iter().any(|r| a.has_role(r))),
            AccessRule::Custom(f) => f(ctx),
        }
    }
}

impl fmt::Debug for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRule::Allow => f.write_str("Allow"),
            AccessRule::Deny => f.write_str("Deny"),
            AccessRule::Authenticated => f.write_str("Authenticated"),
            AccessRule::Roles(roles) => f.debug_tuple("Roles").field(roles).finish(),
            AccessRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Per-operation access rules. Operations without a rule are allowed.
#[derive(Debug, Clone, Default)]
pub struct Access {
    rules: BTreeMap<OperationKind, AccessRule>,
}

impl Access {
    pub fn set(&mut self, operation: OperationKind, rule: AccessRule) {
        self.rules.insert(operation, rule);
    }

    pub fn rule(&self, operation: OperationKind) -> Option<&AccessRule> {
        self.rules.get(&operation)
    }

    pub fn allows(&self, operation: OperationKind, ctx: &OperationContext) -> bool {
        self.rule(operation).is_none_or(|rule| rule.allows(ctx))
    }
}

/// Immutable description of one collection.
///
/// Built with [`CollectionDeclaration::builder`]. Plugins never mutate a
/// declaration; composition produces a new resolved collection.
#[derive(Debug, Clone)]
pub struct CollectionDeclaration {
    slug: String,
    fields: Vec<(String, FieldDeclaration)>,
    hooks: Vec<HookBinding>,
    plugins: Vec<Plugin>,
    label: LocalizedText,
    description: LocalizedText,
    access: Access,
    auxiliary_of: Option<String>,
}

impl CollectionDeclaration {
    pub fn builder(slug: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder {
            declaration: CollectionDeclaration {
                slug: slug.into(),
                fields: Vec::new(),
                hooks: Vec::new(),
                plugins: Vec::new(),
                label: LocalizedText::new(),
                description: LocalizedText::new(),
                access: Access::default(),
                auxiliary_of: None,
            },
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[(String, FieldDeclaration)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDeclaration> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Inline hooks, in declaration order.
    pub fn hooks(&self) -> &[HookBinding] {
        &self.hooks
    }

    /// Collection-local plugins, in configuration order.
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn label(&self) -> &LocalizedText {
        &self.label
    }

    pub fn description(&self) -> &LocalizedText {
        &self.description
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    /// Slug of the collection (or name of the plugin) this one was
    /// contributed for, when it is a plugin-contributed collection.
    pub fn auxiliary_of(&self) -> Option<&str> {
        self.auxiliary_of.as_deref()
    }
}

/// Builder for [`CollectionDeclaration`].
#[derive(Debug, Clone)]
pub struct CollectionBuilder {
    declaration: CollectionDeclaration,
}

impl CollectionBuilder {
    pub fn field(mut self, name: impl Into<String>, field: FieldDeclaration) -> Self {
        self.declaration.fields.push((name.into(), field));
        self
    }

    pub fn hook(mut self, hook: HookBinding) -> Self {
        self.declaration.hooks.push(hook);
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.declaration.plugins.push(plugin);
        self
    }

    pub fn label(mut self, label: impl Into<LocalizedText>) -> Self {
        self.declaration.label = label.into();
        self
    }

    pub fn description(mut self, description: impl Into<LocalizedText>) -> Self {
        self.declaration.description = description.into();
        self
    }

    pub fn access(mut self, operation: OperationKind, rule: AccessRule) -> Self {
        self.declaration.access.set(operation, rule);
        self
    }

    /// Apply `rule` to every write operation.
    pub fn write_access(mut self, rule: AccessRule) -> Self {
        for op in OperationKind::WRITES {
            self.declaration.access.set(op, rule.clone());
        }
        self
    }

    pub fn auxiliary_of(mut self, owner: impl Into<String>) -> Self {
        self.declaration.auxiliary_of = Some(owner.into());
        self
    }

    pub fn build(self) -> CollectionDeclaration {
        self.declaration
    }
}
