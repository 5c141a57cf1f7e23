//! Plugin composition: one declaration plus an ordered plugin list in, one
//! resolved collection out.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemata_core::{
    ConfigurationError, ConflictError, Contributor, Error, FieldDeclaration, FieldKind,
    FieldTypeRegistry, HookBinding, Result,
};

use crate::collection::CollectionDeclaration;
use crate::middleware::MiddlewareBinding;
use crate::plugin::{Plugin, PluginState};
use crate::resolved::{
    FieldOverride, ResolvedCollection, ResolvedField, ResolvedHook, ResolvedMiddleware,
};

/// The collection as composed so far, handed to a plugin's `extend`.
#[derive(Debug, Clone)]
pub struct CollectionDraft {
    slug: String,
    fields: Vec<(String, FieldDeclaration, Contributor)>,
    plugins: Vec<String>,
    auxiliary_of: Option<String>,
}

impl CollectionDraft {
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn field(&self, name: &str) -> Option<&FieldDeclaration> {
        self.fields
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, f, _)| f)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _, _)| n.as_str())
    }

    /// Stored fields, i.e. the fields a snapshot of a record holds.
    pub fn stored_field_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, f, _)| f.is_stored())
            .map(|(n, _, _)| n.as_str())
    }

    /// Plugins applied before the one being asked to extend.
    pub fn applied_plugins(&self) -> &[String] {
        &self.plugins
    }

    pub fn is_auxiliary(&self) -> bool {
        self.auxiliary_of.is_some()
    }
}

/// Result of composing one collection.
#[derive(Debug)]
pub struct Composition {
    pub collection: ResolvedCollection,
    /// Collections contributed by `extend`, for the resolver's side list.
    pub auxiliary: Vec<CollectionDeclaration>,
}

/// Composes collection declarations with plugins.
pub struct PluginComposer<'a> {
    registry: &'a Arc<FieldTypeRegistry>,
    global: &'a [Plugin],
}

impl<'a> PluginComposer<'a> {
    /// `registry` is the global scope (builtins plus the field types of
    /// `global` plugins, already registered).
    pub fn new(registry: &'a Arc<FieldTypeRegistry>, global: &'a [Plugin]) -> Self {
        Self { registry, global }
    }

    /// Compose `declaration` with the global plugins followed by its own.
    #[tracing::instrument(level = "debug", skip(self, declaration), fields(slug = declaration.slug()))]
    pub fn compose(&self, declaration: &CollectionDeclaration) -> Result<Composition> {
        let slug = declaration.slug();
        let plugins: Vec<&Plugin> = self
            .global
            .iter()
            .chain(declaration.plugins().iter())
            .collect();
        check_dependencies(slug, &plugins)?;

        let mut local = FieldTypeRegistry::child(self.registry);
        for plugin in declaration.plugins() {
            for descriptor in plugin.field_types() {
                local.register(descriptor.clone())?;
            }
        }

        let mut acc = Accumulator::new(declaration);
        for (name, field) in declaration.fields() {
            acc.merge_field(name, field.clone(), Contributor::Collection(slug.to_string()), false)?;
        }

        for plugin in &plugins {
            let source = Contributor::Plugin(plugin.name().to_string());
            for (name, field) in plugin.fields() {
                acc.merge_field(name, field.clone(), source.clone(), plugin.is_override())?;
            }
            acc.push_hooks(plugin.hooks().iter().cloned(), &source);
            acc.push_middlewares(plugin.middlewares().iter().cloned(), &source);

            if let Some(extend) = plugin.extender() {
                let extension = extend(&acc.draft)?;
                for (name, field) in extension.fields {
                    acc.merge_field(&name, field, source.clone(), plugin.is_override())?;
                }
                acc.push_hooks(extension.hooks, &source);
                acc.push_middlewares(extension.middlewares, &source);
                acc.auxiliary.extend(extension.collections);
                if let Some(state) = extension.state {
                    acc.state.insert(plugin.name().to_string(), state);
                }
            }
            acc.draft.plugins.push(plugin.name().to_string());
        }

        // Inline hooks run after every plugin hook.
        acc.push_hooks(
            declaration.hooks().iter().cloned(),
            &Contributor::Collection(slug.to_string()),
        );

        let fields = resolve_fields(slug, &local, &acc.draft.fields)?;
        tracing::debug!(
            slug = slug,
            fields = fields.len(),
            hooks = acc.hooks.len(),
            plugins = acc.draft.plugins.len(),
            "Composed collection"
        );

        Ok(Composition {
            collection: ResolvedCollection {
                slug: slug.to_string(),
                fields,
                hooks: acc.hooks,
                middlewares: acc.middlewares,
                plugins: acc.draft.plugins,
                overrides: acc.overrides,
                label: declaration.label().clone(),
                description: declaration.description().clone(),
                access: declaration.access().clone(),
                auxiliary_of: declaration.auxiliary_of().map(ToString::to_string),
                state: acc.state,
            },
            auxiliary: acc.auxiliary,
        })
    }
}

fn check_dependencies(slug: &str, plugins: &[&Plugin]) -> Result<()> {
    for (i, plugin) in plugins.iter().enumerate() {
        let earlier = &plugins[..i];
        if earlier.iter().any(|p| p.name() == plugin.name()) {
            return Err(ConfigurationError::DuplicatePlugin(
                plugin.name().to_string(),
                slug.to_string(),
            )
            .into());
        }
        for requires in plugin.required() {
            if !earlier.iter().any(|p| p.name() == requires) {
                return Err(ConfigurationError::MissingDependency {
                    plugin: plugin.name().to_string(),
                    requires: requires.clone(),
                    collection: slug.to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}

struct Accumulator {
    draft: CollectionDraft,
    hooks: Vec<ResolvedHook>,
    middlewares: Vec<ResolvedMiddleware>,
    overrides: Vec<FieldOverride>,
    auxiliary: Vec<CollectionDeclaration>,
    state: BTreeMap<String, PluginState>,
}

impl Accumulator {
    fn new(declaration: &CollectionDeclaration) -> Self {
        Self {
            draft: CollectionDraft {
                slug: declaration.slug().to_string(),
                fields: Vec::new(),
                plugins: Vec::new(),
                auxiliary_of: declaration.auxiliary_of().map(ToString::to_string),
            },
            hooks: Vec::new(),
            middlewares: Vec::new(),
            overrides: Vec::new(),
            auxiliary: Vec::new(),
            state: BTreeMap::new(),
        }
    }

    /// Add a field, replacing in place when `may_override` is set.
    fn merge_field(
        &mut self,
        name: &str,
        field: FieldDeclaration,
        incoming: Contributor,
        may_override: bool,
    ) -> Result<()> {
        let existing = self.draft.fields.iter_mut().find(|(n, _, _)| n == name);
        match existing {
            None => {
                self.draft.fields.push((name.to_string(), field, incoming));
                Ok(())
            }
            Some(slot) if may_override => {
                tracing::debug!(
                    slug = %self.draft.slug,
                    field = name,
                    replaced = %slot.2,
                    replacement = %incoming,
                    "Field overridden"
                );
                self.overrides.push(FieldOverride {
                    field: name.to_string(),
                    replaced: slot.2.clone(),
                    replacement: incoming.clone(),
                });
                slot.1 = field;
                slot.2 = incoming;
                Ok(())
            }
            Some(slot) => Err(Error::Conflict(ConflictError {
                collection: self.draft.slug.clone(),
                field: name.to_string(),
                existing: slot.2.clone(),
                incoming,
            })),
        }
    }

    fn push_hooks(&mut self, hooks: impl IntoIterator<Item = HookBinding>, source: &Contributor) {
        self.hooks
            .extend(hooks.into_iter().map(|binding| ResolvedHook {
                binding,
                source: source.clone(),
            }));
    }

    fn push_middlewares(
        &mut self,
        middlewares: impl IntoIterator<Item = MiddlewareBinding>,
        source: &Contributor,
    ) {
        self.middlewares
            .extend(middlewares.into_iter().map(|binding| ResolvedMiddleware {
                binding,
                source: source.clone(),
            }));
    }
}

/// Narrow every field's type by its options and check declaration-level
/// consistency (contradictory constraints, computed dependencies).
fn resolve_fields(
    slug: &str,
    registry: &FieldTypeRegistry,
    fields: &[(String, FieldDeclaration, Contributor)],
) -> Result<Vec<ResolvedField>> {
    let mut resolved = Vec::with_capacity(fields.len());
    for (name, declaration, contributor) in fields {
        let subject = format!("{slug}.{name}");
        let descriptor = match declaration.field_type() {
            Some(id) => {
                let base =
                    registry
                        .get(id)
                        .ok_or_else(|| ConfigurationError::UnknownFieldType {
                            collection: slug.to_string(),
                            field: name.clone(),
                            field_type: id.to_string(),
                        })?;
                let descriptor = base.resolve_options(&declaration.options)?;
                let contradictions = descriptor.validation.contradictions();
                if !contradictions.is_empty() {
                    return Err(ConfigurationError::InvalidDeclaration {
                        subject,
                        message: contradictions.join("; "),
                    }
                    .into());
                }
                Some(descriptor)
            }
            None => None,
        };

        if let FieldKind::Computed { depends_on, .. } = &declaration.kind {
            if let Some(missing) = depends_on
                .iter()
                .find(|dep| !fields.iter().any(|(n, _, _)| n == *dep))
            {
                return Err(ConfigurationError::InvalidDeclaration {
                    subject,
                    message: format!("computed field depends on unknown field '{missing}'"),
                }
                .into());
            }
        }
        if declaration.localized && !declaration.is_stored() {
            return Err(ConfigurationError::InvalidDeclaration {
                subject,
                message: "only stored fields can be localized".to_string(),
            }
            .into());
        }

        resolved.push(ResolvedField {
            name: name.clone(),
            declaration: declaration.clone(),
            descriptor,
            contributor: contributor.clone(),
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_core::{HookSignal, HookStage, OperationKind};

    fn registry() -> Arc<FieldTypeRegistry> {
        Arc::new(FieldTypeRegistry::with_builtins())
    }

    #[test]
    fn test_hook_order_global_local_inline() {
        let registry = registry();
        let global = vec![
            Plugin::new("audit")
                .hook(HookBinding::before_create("audit", |_| Ok(HookSignal::Continue))),
        ];
        let posts = CollectionDeclaration::builder("posts")
            .field("title", FieldDeclaration::text())
            .hook(HookBinding::before_create("inline", |_| Ok(HookSignal::Continue)))
            .plugin(
                Plugin::new("slugs")
                    .hook(HookBinding::before_create("slugs", |_| Ok(HookSignal::Continue))),
            )
            .build();

        let composed = PluginComposer::new(&registry, &global)
            .compose(&posts)
            .unwrap()
            .collection;
        let order: Vec<&str> = composed
            .hooks_for(HookStage::BeforeOperation, OperationKind::Create)
            .map(|h| h.binding.name.as_str())
            .collect();
        assert_eq!(order, ["audit", "slugs", "inline"]);
        assert_eq!(composed.plugins, ["audit", "slugs"]);
        assert_eq!(
            composed.hooks[2].source,
            Contributor::Collection("posts".into())
        );
    }

    #[test]
    fn test_override_replaces_and_records() {
        let registry = registry();
        let posts = CollectionDeclaration::builder("posts")
            .field("slug", FieldDeclaration::text())
            .plugin(
                Plugin::new("permalinks")
                    .field("slug", FieldDeclaration::text().option("max_length", 80))
                    .overriding(),
            )
            .build();
        let composed = PluginComposer::new(&registry, &[])
            .compose(&posts)
            .unwrap()
            .collection;
        assert_eq!(composed.fields.len(), 1);
        assert_eq!(
            composed.overrides,
            vec![FieldOverride {
                field: "slug".into(),
                replaced: Contributor::Collection("posts".into()),
                replacement: Contributor::Plugin("permalinks".into()),
            }]
        );
        assert_eq!(
            composed.field("slug").unwrap().contributor,
            Contributor::Plugin("permalinks".into())
        );
    }

    #[test]
    fn test_missing_and_misordered_dependency() {
        let registry = registry();
        let posts = CollectionDeclaration::builder("posts")
            .plugin(Plugin::new("search").requires("versioning"))
            .plugin(Plugin::new("versioning"))
            .build();
        let err = PluginComposer::new(&registry, &[])
            .compose(&posts)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingDependency { ref plugin, ref requires, .. })
                if plugin == "search" && requires == "versioning"
        ));
    }

    #[test]
    fn test_dependency_satisfied_by_global_plugin() {
        let registry = registry();
        let global = vec![Plugin::new("versioning")];
        let posts = CollectionDeclaration::builder("posts")
            .plugin(Plugin::new("search").requires("versioning"))
            .build();
        assert!(PluginComposer::new(&registry, &global).compose(&posts).is_ok());
    }

    #[test]
    fn test_local_field_types_are_scoped() {
        let registry = registry();
        let slug_type = schemata_core::FieldTypeDescriptor::new(
            "slug",
            schemata_core::ValidationRule::new(schemata_core::ValueKind::Text),
            schemata_core::StorageColumn::new(schemata_core::ColumnType::Varchar(120)),
        );
        let posts = CollectionDeclaration::builder("posts")
            .field("slug", FieldDeclaration::of("slug"))
            .plugin(Plugin::new("permalinks").field_type(slug_type))
            .build();
        let pages = CollectionDeclaration::builder("pages")
            .field("slug", FieldDeclaration::of("slug"))
            .build();

        let composer = PluginComposer::new(&registry, &[]);
        assert!(composer.compose(&posts).is_ok());
        let err = composer.compose(&pages).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownFieldType { ref field_type, .. })
                if field_type == "slug"
        ));
    }

    #[test]
    fn test_extend_sees_accumulator_and_attaches_state() {
        let registry = registry();
        let posts = CollectionDeclaration::builder("posts")
            .field("title", FieldDeclaration::text())
            .plugin(Plugin::new("tracker").extend(|draft| {
                let tracked: Vec<String> = draft.field_names().map(ToString::to_string).collect();
                Ok(crate::plugin::Extension::new()
                    .field("tracked_count", FieldDeclaration::integer())
                    .state(tracked))
            }))
            .build();
        let composed = PluginComposer::new(&registry, &[])
            .compose(&posts)
            .unwrap()
            .collection;
        assert!(composed.has_field("tracked_count"));
        assert_eq!(
            composed.plugin_state::<Vec<String>>("tracker"),
            Some(&vec!["title".to_string()])
        );
    }

    #[test]
    fn test_contradictory_options_fail_at_declaration() {
        let registry = registry();
        let posts = CollectionDeclaration::builder("posts")
            .field(
                "rating",
                FieldDeclaration::integer().option("min", 10).option("max", 1),
            )
            .build();
        let err = PluginComposer::new(&registry, &[])
            .compose(&posts)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidDeclaration { ref subject, .. })
                if subject == "posts.rating"
        ));
    }

    #[test]
    fn test_computed_dependency_must_exist() {
        let registry = registry();
        let users = CollectionDeclaration::builder("users")
            .field(
                "full_name",
                FieldDeclaration::computed("text", ["first", "last"], |_| {
                    schemata_core::Value::Null
                }),
            )
            .field("first", FieldDeclaration::text())
            .build();
        let err = PluginComposer::new(&registry, &[])
            .compose(&users)
            .unwrap_err();
        assert!(err.to_string().contains("'last'"));
    }
}
