//! The operation executor.
//!
//! Read path: validate query, authorize, prepare, before-read hooks,
//! execute, after-read hooks, shape. Write path: validate input, authorize,
//! prepare, then inside one transaction: load previous records,
//! before-operation hooks, built-in validation, validate hooks,
//! before-database hooks, execute, after-operation hooks, shape.
//!
//! The transaction stays open until after-operation hooks have run, so any
//! failure up to that point rolls back the primary write together with every
//! nested write (versions, cascades) it triggered.

use std::fmt;
use std::sync::Arc;

use schemata_core::{
    BoxOutcome, Cx, Error, FieldError, Filter, FindOptions, HookArgs, HookError, HookSignal,
    HookStage, LocaleCatalog, OperationContext, OperationKind, OperationOutput, OperationRequest,
    Outcome, Record, Result, Store, Transaction, ValidationError, Value, try_outcome, try_result,
};
use schemata_core::value::record_id;
use schemata_schema::{
    Dispatcher, Flow, MiddlewareCall, ResolvedCollection, ResolvedMiddleware, ResolvedSchema,
};

use crate::config::EngineConfig;
use crate::handle::CollectionHandle;
use crate::{input, shape};

/// Runs operations against a resolved schema and a persistence collaborator.
///
/// One engine is shared (behind an `Arc`) by every collection handle; it
/// holds no per-operation state.
pub struct Engine {
    schema: Arc<ResolvedSchema>,
    store: Arc<dyn Store>,
    config: EngineConfig,
    catalog: Option<Arc<dyn LocaleCatalog>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("collections", &self.schema.slugs())
            .field("store", &self.store.name())
            .field("config", &self.config)
            .field("catalog", &self.catalog.is_some())
            .finish()
    }
}

impl Engine {
    pub fn new(schema: Arc<ResolvedSchema>, store: Arc<dyn Store>) -> Self {
        Self {
            schema,
            store,
            config: EngineConfig::default(),
            catalog: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn LocaleCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn resolved(&self) -> &Arc<ResolvedSchema> {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&dyn LocaleCatalog> {
        self.catalog.as_deref()
    }

    /// Operation API for one collection.
    pub fn handle(self: &Arc<Self>, slug: &str) -> Result<CollectionHandle> {
        let collection = Arc::clone(self.schema.collection(slug)?);
        Ok(CollectionHandle::new(Arc::clone(self), collection))
    }

    /// Run `request` against collection `slug`.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, ctx, request),
        fields(operation = %request.kind, depth = ctx.depth())
    )]
    pub async fn execute(
        &self,
        cx: &Cx,
        ctx: &OperationContext,
        slug: &str,
        request: OperationRequest,
    ) -> Outcome<OperationOutput, Error> {
        if ctx.depth() > self.config.max_cascade_depth {
            return Outcome::Err(Error::custom(format!(
                "nested operation on '{slug}' exceeds the maximum depth of {}",
                self.config.max_cascade_depth
            )));
        }
        let collection = Arc::clone(try_result!(self.schema.collection(slug)));
        if request.kind.is_read() {
            self.read(cx, ctx, &collection, request).await
        } else {
            self.write(cx, ctx, &collection, request).await
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    async fn read(
        &self,
        cx: &Cx,
        ctx: &OperationContext,
        collection: &ResolvedCollection,
        mut request: OperationRequest,
    ) -> Outcome<OperationOutput, Error> {
        try_result!(input::validate_query(collection, &request.options));
        try_result!(authorize(collection, ctx, request.kind));
        try_result!(self.prepare(collection, ctx, &mut request));
        let locale = self.locale_for(ctx, &request.options);

        let mut args = HookArgs::new(collection.slug.clone(), request.kind, ctx.clone());
        args.query = request.options.clone();
        let signal = try_outcome!(
            self.run_hooks(cx, collection, HookStage::BeforeRead, &mut args)
                .await
        );
        request.options = args.query.clone();

        let output = if signal == HookSignal::Skip {
            tracing::debug!(collection = %collection.slug, "read skipped by hook");
            empty_output(request.kind)
        } else {
            try_outcome!(
                self.run_execute(cx, ctx, collection, &mut request, &[], &locale)
                    .await
            )
        };
        match output {
            OperationOutput::Count(n) => args.count = Some(n),
            OperationOutput::Records(records) => args.result = records,
        }
        try_outcome!(
            self.run_hooks(cx, collection, HookStage::AfterRead, &mut args)
                .await
        );

        if request.kind == OperationKind::Count {
            return Outcome::Ok(OperationOutput::Count(args.count.unwrap_or(0)));
        }
        let mut records = std::mem::take(&mut args.result);
        if request.kind == OperationKind::FindUnique && records.is_empty() {
            return Outcome::Err(Error::not_found(
                collection.slug.clone(),
                request.options.filter.as_ref(),
            ));
        }
        try_outcome!(
            shape::shape_records(
                cx,
                self,
                ctx,
                collection,
                &mut records,
                &request.options,
                &locale,
                &self.config.default_locale,
            )
            .await
        );
        Outcome::Ok(OperationOutput::Records(records))
    }

    // ========================================================================
    // Write path
    // ========================================================================

    async fn write(
        &self,
        cx: &Cx,
        ctx: &OperationContext,
        collection: &ResolvedCollection,
        mut request: OperationRequest,
    ) -> Outcome<OperationOutput, Error> {
        try_result!(input::validate_query(collection, &request.options));
        try_result!(input::validate_input(
            collection,
            &request.data,
            request.kind
        ));
        try_result!(authorize(collection, ctx, request.kind));
        try_result!(self.prepare(collection, ctx, &mut request));

        if ctx.in_transaction() {
            return self.write_pipeline(cx, ctx, collection, request).await;
        }

        let tx = try_outcome!(self.store.begin(cx).await);
        tracing::info!(
            collection = %collection.slug,
            operation = %request.kind,
            store = self.store.name(),
            "Beginning transaction"
        );
        let tx_ctx = ctx.clone().with_transaction(Arc::clone(&tx));
        match self.write_pipeline(cx, &tx_ctx, collection, request).await {
            Outcome::Ok(output) => {
                tracing::info!(collection = %collection.slug, "Committing transaction");
                try_outcome!(tx.commit(cx).await);
                Outcome::Ok(output)
            }
            failed => {
                tracing::info!(collection = %collection.slug, "Rolling back transaction");
                match tx.rollback(cx).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => {
                        tracing::warn!(collection = %collection.slug, error = %e, "rollback failed");
                    }
                    Outcome::Cancelled(_) | Outcome::Panicked(_) => {
                        tracing::warn!(collection = %collection.slug, "rollback interrupted");
                    }
                }
                failed
            }
        }
    }

    async fn write_pipeline(
        &self,
        cx: &Cx,
        ctx: &OperationContext,
        collection: &ResolvedCollection,
        mut request: OperationRequest,
    ) -> Outcome<OperationOutput, Error> {
        let Some(tx) = ctx.transaction() else {
            return Outcome::Err(Error::Persistence(
                "write pipeline started without a transaction".to_string(),
            ));
        };
        let kind = request.kind;
        let locale = self.locale_for(ctx, &request.options);

        let previous = if kind == OperationKind::Create {
            input::apply_defaults(collection, &mut request.data);
            Vec::new()
        } else {
            let lookup = FindOptions {
                filter: request.options.filter.clone(),
                ..FindOptions::default()
            };
            let found = try_outcome!(tx.find_many(cx, &collection.slug, &lookup).await);
            if found.is_empty() {
                return Outcome::Err(Error::not_found(
                    collection.slug.clone(),
                    request.options.filter.as_ref(),
                ));
            }
            found
        };

        let mut args = HookArgs::new(collection.slug.clone(), kind, ctx.clone());
        args.data = std::mem::take(&mut request.data);
        args.previous = previous;
        args.query = request.options.clone();

        for stage in [
            HookStage::BeforeOperation,
            HookStage::Validate,
            HookStage::BeforeDatabase,
        ] {
            if stage == HookStage::Validate && kind != OperationKind::Delete {
                try_result!(input::validate_complete(collection, &args.data, kind));
            }
            let signal = try_outcome!(self.run_hooks(cx, collection, stage, &mut args).await);
            if signal == HookSignal::Skip {
                tracing::debug!(collection = %collection.slug, %stage, "write skipped by hook");
                let mut records = if kind == OperationKind::Create {
                    vec![args.data]
                } else {
                    args.previous
                };
                try_outcome!(self.shape(cx, ctx, collection, &mut records, &request.options, &locale).await);
                return Outcome::Ok(OperationOutput::Records(records));
            }
        }

        request.data = args.data.clone();
        let output = try_outcome!(
            self.run_execute(cx, ctx, collection, &mut request, &args.previous, &locale)
                .await
        );
        args.result = output.into_records();
        try_outcome!(
            self.run_hooks(cx, collection, HookStage::AfterOperation, &mut args)
                .await
        );

        let mut records = args.result;
        try_outcome!(self.shape(cx, ctx, collection, &mut records, &request.options, &locale).await);
        Outcome::Ok(OperationOutput::Records(records))
    }

    // ========================================================================
    // Shared stages
    // ========================================================================

    fn locale_for(&self, ctx: &OperationContext, options: &FindOptions) -> String {
        options
            .locale
            .clone()
            .or_else(|| ctx.locale.clone())
            .unwrap_or_else(|| self.config.default_locale.clone())
    }

    /// Swallow side-effect errors unless the engine is strict.
    fn tolerate(&self, collection: &ResolvedCollection, source: &str, error: Error) -> Result<()> {
        if error.is_side_effect() && !self.config.strict {
            tracing::warn!(
                collection = %collection.slug,
                source,
                error = %error,
                "side effect failed; continuing"
            );
            return Ok(());
        }
        Err(error)
    }

    fn prepare(
        &self,
        collection: &ResolvedCollection,
        ctx: &OperationContext,
        request: &mut OperationRequest,
    ) -> Result<()> {
        let call = MiddlewareCall {
            dispatcher: self,
            collection,
            context: ctx,
            previous: &[],
        };
        for middleware in collection.middlewares_for(request.kind) {
            if let Err(e) = middleware.binding.middleware.prepare(call, request) {
                self.tolerate(collection, &middleware.binding.name, e)?;
            }
        }
        Ok(())
    }

    /// Run every hook of `stage` in order.
    ///
    /// A hook returning [`HookSignal::Skip`] ends the stage. Validation
    /// errors are returned as they are; other errors are wrapped in a
    /// [`HookError`] naming the stage and hook.
    async fn run_hooks(
        &self,
        cx: &Cx,
        collection: &ResolvedCollection,
        stage: HookStage,
        args: &mut HookArgs,
    ) -> Outcome<HookSignal, Error> {
        for hook in collection.hooks_for(stage, args.operation) {
            tracing::debug!(
                collection = %collection.slug,
                %stage,
                hook = %hook.binding.name,
                "running hook"
            );
            match hook.binding.hook.call(cx, args).await {
                Outcome::Ok(HookSignal::Continue) => {}
                Outcome::Ok(HookSignal::Skip) => return Outcome::Ok(HookSignal::Skip),
                Outcome::Err(e) if e.is_side_effect() && !self.config.strict => {
                    tracing::warn!(
                        collection = %collection.slug,
                        %stage,
                        hook = %hook.binding.name,
                        error = %e,
                        "side effect failed in hook; continuing"
                    );
                }
                Outcome::Err(e @ Error::Validation(_)) => return Outcome::Err(e),
                Outcome::Err(e) => {
                    return Outcome::Err(
                        HookError {
                            collection: collection.slug.clone(),
                            stage,
                            hook: hook.binding.name.clone(),
                            source_contributor: hook.source.clone(),
                            source: Box::new(e),
                        }
                        .into(),
                    );
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(HookSignal::Continue)
    }

    /// The execute stage: middleware `before`, persistence, middleware `after`.
    async fn run_execute(
        &self,
        cx: &Cx,
        ctx: &OperationContext,
        collection: &ResolvedCollection,
        request: &mut OperationRequest,
        previous: &[Record],
        locale: &str,
    ) -> Outcome<OperationOutput, Error> {
        let call = MiddlewareCall {
            dispatcher: self,
            collection,
            context: ctx,
            previous,
        };
        let middlewares: Vec<&ResolvedMiddleware> =
            collection.middlewares_for(request.kind).collect();

        let mut entered = Vec::with_capacity(middlewares.len());
        let mut handled = None;
        for middleware in middlewares {
            let name = &middleware.binding.name;
            match middleware.binding.middleware.before(cx, call, request).await {
                Outcome::Ok(Flow::Continue) => entered.push(middleware),
                Outcome::Ok(Flow::Handled(output)) => {
                    tracing::debug!(collection = %collection.slug, middleware = %name, "handled by middleware");
                    handled = Some(output);
                    break;
                }
                Outcome::Err(e) => {
                    try_result!(self.tolerate(collection, name, e));
                    entered.push(middleware);
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let mut output = match handled {
            Some(output) => output,
            None => try_outcome!(self.persist(cx, ctx, collection, request, previous, locale).await),
        };

        for middleware in entered.into_iter().rev() {
            match middleware
                .binding
                .middleware
                .after(cx, call, request, &mut output)
                .await
            {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => try_result!(self.tolerate(collection, &middleware.binding.name, e)),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(output)
    }

    /// The only stage that calls the persistence collaborator.
    async fn persist(
        &self,
        cx: &Cx,
        ctx: &OperationContext,
        collection: &ResolvedCollection,
        request: &OperationRequest,
        previous: &[Record],
        locale: &str,
    ) -> Outcome<OperationOutput, Error> {
        let slug = collection.slug.as_str();
        let tx = ctx.transaction();

        match request.kind {
            OperationKind::FindMany | OperationKind::FindUnique => {
                let mut options = request.options.clone();
                if request.kind == OperationKind::FindUnique {
                    options.limit = Some(1);
                }
                let records = match tx {
                    Some(tx) => try_outcome!(tx.find_many(cx, slug, &options).await),
                    None => try_outcome!(self.store.find_many(cx, slug, &options).await),
                };
                Outcome::Ok(OperationOutput::Records(records))
            }
            OperationKind::Count => {
                let filter = request.options.filter.as_ref();
                let count = match tx {
                    Some(tx) => try_outcome!(tx.count(cx, slug, filter).await),
                    None => try_outcome!(self.store.count(cx, slug, filter).await),
                };
                Outcome::Ok(OperationOutput::Count(count))
            }
            OperationKind::Create | OperationKind::Update | OperationKind::Delete => {
                let Some(tx) = tx else {
                    return Outcome::Err(Error::Persistence(format!(
                        "'{}' on '{slug}' requires a transaction",
                        request.kind
                    )));
                };
                self.persist_write(cx, tx.as_ref(), collection, request, previous, locale)
                    .await
            }
        }
    }

    async fn persist_write(
        &self,
        cx: &Cx,
        tx: &dyn Transaction,
        collection: &ResolvedCollection,
        request: &OperationRequest,
        previous: &[Record],
        locale: &str,
    ) -> Outcome<OperationOutput, Error> {
        let slug = collection.slug.as_str();
        let ids: Vec<Value> = previous.iter().filter_map(record_id).cloned().collect();

        let records = match request.kind {
            OperationKind::Create => {
                try_outcome!(check_unique(cx, tx, collection, &request.data, &[]).await);
                let mut data = request.data.clone();
                shape::localize_for_storage(collection, &mut data, locale, None);
                vec![try_outcome!(tx.insert(cx, slug, data).await)]
            }
            OperationKind::Update => {
                try_outcome!(check_unique(cx, tx, collection, &request.data, previous).await);
                if shape::has_localized(collection, &request.data) {
                    let mut updated = Vec::with_capacity(previous.len());
                    for record in previous {
                        let Some(id) = record_id(record) else {
                            continue;
                        };
                        let mut data = request.data.clone();
                        shape::localize_for_storage(collection, &mut data, locale, Some(record));
                        let filter = Filter::id(id.clone());
                        updated.extend(try_outcome!(tx.update(cx, slug, &filter, data).await));
                    }
                    updated
                } else {
                    let filter = Filter::ids(ids);
                    try_outcome!(tx.update(cx, slug, &filter, request.data.clone()).await)
                }
            }
            OperationKind::Delete => {
                let filter = Filter::ids(ids);
                try_outcome!(tx.delete(cx, slug, &filter).await)
            }
            OperationKind::FindMany | OperationKind::FindUnique | OperationKind::Count => {
                return Outcome::Err(Error::UnknownOperation {
                    collection: slug.to_string(),
                    operation: request.kind.to_string(),
                });
            }
        };
        tracing::debug!(collection = slug, operation = %request.kind, rows = records.len(), "persisted");
        Outcome::Ok(OperationOutput::Records(records))
    }

    async fn shape(
        &self,
        cx: &Cx,
        ctx: &OperationContext,
        collection: &ResolvedCollection,
        records: &mut [Record],
        options: &FindOptions,
        locale: &str,
    ) -> Outcome<(), Error> {
        shape::shape_records(
            cx,
            self,
            ctx,
            collection,
            records,
            options,
            locale,
            &self.config.default_locale,
        )
        .await
    }
}

impl Dispatcher for Engine {
    fn schema(&self) -> &ResolvedSchema {
        &self.schema
    }

    fn dispatch<'a>(
        &'a self,
        cx: &'a Cx,
        ctx: &'a OperationContext,
        slug: &'a str,
        request: OperationRequest,
    ) -> BoxOutcome<'a, OperationOutput> {
        Box::pin(self.execute(cx, ctx, slug, request))
    }
}

fn authorize(
    collection: &ResolvedCollection,
    ctx: &OperationContext,
    operation: OperationKind,
) -> Result<()> {
    if collection.access.allows(operation, ctx) {
        Ok(())
    } else {
        Err(Error::Forbidden {
            collection: collection.slug.clone(),
            operation,
        })
    }
}

fn empty_output(kind: OperationKind) -> OperationOutput {
    if kind == OperationKind::Count {
        OperationOutput::Count(0)
    } else {
        OperationOutput::Records(Vec::new())
    }
}

/// Check unique fields of `data` against the records in the transaction.
///
/// Records in `previous` (the update's own targets) are excluded.
async fn check_unique(
    cx: &Cx,
    tx: &dyn Transaction,
    collection: &ResolvedCollection,
    data: &Record,
    previous: &[Record],
) -> Outcome<(), Error> {
    let own: Vec<Value> = previous.iter().filter_map(record_id).cloned().collect();
    let mut errors = Vec::new();
    // Localized values are locale maps; uniqueness is not checked for them.
    for field in collection
        .stored_fields()
        .filter(|f| f.declaration.unique && !f.declaration.localized)
    {
        let Some(value) = data.get(&field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        if previous.len() > 1 {
            errors.push(FieldError::new(
                &field.name,
                "is unique and cannot be set on several records at once",
            ));
            continue;
        }
        let mut filter = Filter::eq(field.name.clone(), value.clone());
        if !own.is_empty() {
            filter = filter.and(Filter::ids(own.clone()).not());
        }
        let taken = try_outcome!(tx.count(cx, &collection.slug, Some(&filter)).await);
        if taken > 0 {
            errors.push(FieldError::new(&field.name, "must be unique"));
        }
    }
    if errors.is_empty() {
        Outcome::Ok(())
    } else {
        Outcome::Err(ValidationError::new(collection.slug.clone(), errors).into())
    }
}
