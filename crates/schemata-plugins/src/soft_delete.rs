//! Soft deletion with cascades.
//!
//! Deleting marks records with a deletion timestamp and actor instead of
//! removing them. Marked records are invisible to every operation unless
//! the query opts in with `include_deleted`. Permanent deletes bypass the
//! plugin entirely.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use schemata_core::value::record_id;
use schemata_core::{
    BoxOutcome, ConfigurationError, Cx, Error, FieldDeclaration, Filter, FindOptions,
    OperationKind, OperationOutput, OperationRequest, Outcome, Record, Result, Value, try_outcome,
    try_result,
};
use schemata_engine::CollectionHandle;
use schemata_schema::{
    Extension, Flow, MiddlewareBinding, MiddlewareCall, OperationMiddleware, Plugin,
    ResolvedCollection,
};

/// Plugin name, also the key of its per-collection state.
pub const SOFT_DELETE: &str = "soft_delete";

/// What deleting a parent does to the records referencing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeBehavior {
    /// Soft-delete them too; the related collection needs the plugin.
    SoftDelete,
    /// Clear their reference.
    Nullify,
    /// Refuse the delete while any exist.
    Restrict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeRule {
    pub collection: String,
    pub behavior: CascadeBehavior,
    /// Referencing field; the related collection's relation to this one
    /// when unset.
    pub foreign_key: Option<String>,
}

impl CascadeRule {
    fn new(collection: impl Into<String>, behavior: CascadeBehavior) -> Self {
        Self {
            collection: collection.into(),
            behavior,
            foreign_key: None,
        }
    }

    pub fn soft_delete(collection: impl Into<String>) -> Self {
        Self::new(collection, CascadeBehavior::SoftDelete)
    }

    pub fn nullify(collection: impl Into<String>) -> Self {
        Self::new(collection, CascadeBehavior::Nullify)
    }

    pub fn restrict(collection: impl Into<String>) -> Self {
        Self::new(collection, CascadeBehavior::Restrict)
    }

    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeleteConfig {
    pub deleted_at_field: String,
    pub deleted_by_field: String,
    pub cascade: Vec<CascadeRule>,
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self {
            deleted_at_field: "deleted_at".to_string(),
            deleted_by_field: "deleted_by".to_string(),
            cascade: Vec::new(),
        }
    }
}

impl SoftDeleteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted_at_field(mut self, field: impl Into<String>) -> Self {
        self.deleted_at_field = field.into();
        self
    }

    pub fn deleted_by_field(mut self, field: impl Into<String>) -> Self {
        self.deleted_by_field = field.into();
        self
    }

    pub fn cascade(mut self, rule: CascadeRule) -> Self {
        self.cascade.push(rule);
        self
    }
}

struct SoftDeleteState {
    config: Arc<SoftDeleteConfig>,
}

struct SoftDeleter {
    config: Arc<SoftDeleteConfig>,
}

/// Field of `child` referencing `parent`.
fn foreign_key(rule: &CascadeRule, parent: &str, child: &ResolvedCollection) -> Result<String> {
    if let Some(field) = &rule.foreign_key {
        return Ok(field.clone());
    }
    child
        .fields
        .iter()
        .find(|f| f.relation_target() == Some((parent, false)))
        .map(|f| f.name.clone())
        .ok_or_else(|| {
            ConfigurationError::InvalidDeclaration {
                subject: format!("{parent}.cascade.{}", rule.collection),
                message: format!("'{}' has no relation to '{parent}'", rule.collection),
            }
            .into()
        })
}

impl SoftDeleter {
    async fn check_restrictions(
        &self,
        cx: &Cx,
        call: MiddlewareCall<'_>,
        ids: &[Value],
    ) -> Outcome<(), Error> {
        let parent = call.collection.slug.as_str();
        let ctx = call.context.nested();
        for rule in self
            .config
            .cascade
            .iter()
            .filter(|r| r.behavior == CascadeBehavior::Restrict)
        {
            let child = try_result!(call.dispatcher.schema().collection(&rule.collection));
            let fk = try_result!(foreign_key(rule, parent, child));
            let options = FindOptions::new().filter(Filter::is_in(fk, ids.to_vec()));
            let found = try_outcome!(
                call.dispatcher
                    .dispatch(cx, &ctx, &rule.collection, OperationRequest::count(options))
                    .await
            );
            let count = found.count();
            if count > 0 {
                return Outcome::Err(Error::Restricted {
                    collection: parent.to_string(),
                    related: rule.collection.clone(),
                    count,
                });
            }
        }
        Outcome::Ok(())
    }

    async fn cascade(&self, cx: &Cx, call: MiddlewareCall<'_>, ids: &[Value]) -> Outcome<(), Error> {
        let parent = call.collection.slug.as_str();
        let ctx = call.context.nested();
        for rule in &self.config.cascade {
            let child = try_result!(call.dispatcher.schema().collection(&rule.collection));
            let fk = try_result!(foreign_key(rule, parent, child));
            let filter = Filter::is_in(fk.clone(), ids.to_vec());
            let request = match rule.behavior {
                CascadeBehavior::Restrict => continue,
                CascadeBehavior::SoftDelete => {
                    if !child.has_plugin(SOFT_DELETE) {
                        return Outcome::Err(
                            ConfigurationError::InvalidDeclaration {
                                subject: format!("{parent}.cascade.{}", rule.collection),
                                message: format!(
                                    "soft-delete cascade requires '{}' to use soft delete",
                                    rule.collection
                                ),
                            }
                            .into(),
                        );
                    }
                    OperationRequest::delete(filter.clone())
                }
                CascadeBehavior::Nullify => {
                    OperationRequest::update(filter.clone(), Record::new()).set(fk, Value::Null)
                }
            };
            // Updates and deletes fail when nothing matches.
            let affected = try_outcome!(
                call.dispatcher
                    .dispatch(
                        cx,
                        &ctx,
                        &rule.collection,
                        OperationRequest::count(FindOptions::new().filter(filter)),
                    )
                    .await
            )
            .count();
            if affected == 0 {
                continue;
            }
            try_outcome!(
                call.dispatcher
                    .dispatch(cx, &ctx, &rule.collection, request)
                    .await
            );
            tracing::debug!(
                collection = %parent,
                related = %rule.collection,
                behavior = ?rule.behavior,
                affected,
                "cascaded delete"
            );
        }
        Outcome::Ok(())
    }

    async fn soft_delete(&self, cx: &Cx, call: MiddlewareCall<'_>) -> Outcome<Flow, Error> {
        let ids: Vec<Value> = call.previous.iter().filter_map(record_id).cloned().collect();
        try_outcome!(self.check_restrictions(cx, call, &ids).await);

        let ctx = call.context.nested();
        let mark = OperationRequest::update(Filter::ids(ids.clone()), Record::new())
            .set(
                self.config.deleted_at_field.clone(),
                Value::String(Utc::now().to_rfc3339()),
            )
            .set(self.config.deleted_by_field.clone(), ctx.actor_id());
        let marked = try_outcome!(
            call.dispatcher
                .dispatch(cx, &ctx, &call.collection.slug, mark)
                .await
        );
        try_outcome!(self.cascade(cx, call, &ids).await);
        tracing::info!(
            collection = %call.collection.slug,
            count = ids.len(),
            "soft-deleted records"
        );
        Outcome::Ok(Flow::Handled(marked))
    }
}

impl SoftDeleter {
    /// Restrict `request` to live records unless it opted out.
    fn apply_visibility(&self, request: &mut OperationRequest) {
        let skip = request.kind == OperationKind::Create
            || request.options.include_deleted
            || (request.kind == OperationKind::Delete && request.permanent);
        if !skip {
            request
                .options
                .and_filter(Filter::is_null(self.config.deleted_at_field.clone()));
        }
    }
}

impl OperationMiddleware for SoftDeleter {
    fn prepare(&self, _call: MiddlewareCall<'_>, request: &mut OperationRequest) -> Result<()> {
        self.apply_visibility(request);
        Ok(())
    }

    fn before<'a>(
        &'a self,
        cx: &'a Cx,
        call: MiddlewareCall<'a>,
        request: &'a mut OperationRequest,
    ) -> BoxOutcome<'a, Flow> {
        Box::pin(async move {
            if request.kind != OperationKind::Delete || request.permanent {
                return Outcome::Ok(Flow::Continue);
            }
            self.soft_delete(cx, call).await
        })
    }
}

/// Soft-delete the records of the collections it is applied to.
pub fn soft_delete(config: SoftDeleteConfig) -> Plugin {
    let config = Arc::new(config);
    Plugin::new(SOFT_DELETE)
        .field(
            config.deleted_at_field.clone(),
            FieldDeclaration::timestamp().indexed(),
        )
        .field(config.deleted_by_field.clone(), FieldDeclaration::json())
        .middleware(MiddlewareBinding::new(
            SOFT_DELETE,
            &OperationKind::ALL,
            Arc::new(SoftDeleter {
                config: Arc::clone(&config),
            }),
        ))
        .extend(move |_| {
            Ok(Extension::new().state(SoftDeleteState {
                config: Arc::clone(&config),
            }))
        })
}

/// Operations on soft-deleted records.
pub trait SoftDeleteExt {
    /// Clear the deletion marks of the deleted records matching `filter`.
    fn restore(
        &self,
        cx: &Cx,
        filter: Filter,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send;

    /// Only the soft-deleted records.
    fn find_deleted(
        &self,
        cx: &Cx,
        options: FindOptions,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send;
}

fn config<'a>(handle: &'a CollectionHandle, operation: &str) -> Result<&'a SoftDeleteConfig> {
    handle
        .collection()
        .plugin_state::<SoftDeleteState>(SOFT_DELETE)
        .map(|state| state.config.as_ref())
        .ok_or_else(|| Error::UnknownOperation {
            collection: handle.slug().to_string(),
            operation: operation.to_string(),
        })
}

impl SoftDeleteExt for CollectionHandle {
    fn restore(
        &self,
        cx: &Cx,
        filter: Filter,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send {
        async move {
            let config = try_result!(config(self, "restore"));
            let request = OperationRequest::update(
                filter.and(Filter::is_not_null(config.deleted_at_field.clone())),
                Record::new(),
            )
            .set(config.deleted_at_field.clone(), Value::Null)
            .set(config.deleted_by_field.clone(), Value::Null)
            .include_deleted(true);
            let output: OperationOutput = try_outcome!(self.execute(cx, request).await);
            tracing::info!(collection = %self.slug(), count = output.count(), "restored records");
            Outcome::Ok(output.into_records())
        }
    }

    fn find_deleted(
        &self,
        cx: &Cx,
        options: FindOptions,
    ) -> impl Future<Output = Outcome<Vec<Record>, Error>> + Send {
        async move {
            let config = try_result!(config(self, "find_deleted"));
            let options = options
                .filter(Filter::is_not_null(config.deleted_at_field.clone()))
                .include_deleted(true);
            self.find_many(cx, options).await
        }
    }
}
