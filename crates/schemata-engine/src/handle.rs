//! Per-collection operation API.

use std::fmt;
use std::sync::Arc;

use schemata_core::{
    Actor, Cx, Error, Filter, FindOptions, OperationContext, OperationOutput, OperationRequest,
    Outcome, Record, Result, Value, try_outcome,
};
use schemata_schema::ResolvedCollection;

use crate::executor::Engine;

/// Operations on one resolved collection.
///
/// Cheap to clone. The context set with [`with_locale`](Self::with_locale),
/// [`with_actor`](Self::with_actor) and friends is applied to every call.
#[derive(Clone)]
pub struct CollectionHandle {
    engine: Arc<Engine>,
    collection: Arc<ResolvedCollection>,
    context: OperationContext,
}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("collection", &self.collection.slug)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl CollectionHandle {
    pub fn new(engine: Arc<Engine>, collection: Arc<ResolvedCollection>) -> Self {
        Self {
            engine,
            collection,
            context: OperationContext::new(),
        }
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.context = self.context.with_locale(locale);
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.context = self.context.with_actor(actor);
        self
    }

    /// Note recorded with the versions written by the next calls.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.context = self.context.with_note(note);
        self
    }

    pub fn slug(&self) -> &str {
        &self.collection.slug
    }

    pub fn collection(&self) -> &ResolvedCollection {
        &self.collection
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    /// Handle for another collection, sharing this handle's context.
    pub fn sibling(&self, slug: &str) -> Result<CollectionHandle> {
        Ok(self.engine.handle(slug)?.with_context(self.context.clone()))
    }

    /// Collection label for `locale` (the context's, by default).
    pub fn label(&self, locale: Option<&str>) -> Option<String> {
        let default = self.engine.config().default_locale.as_str();
        let locale = locale.unwrap_or_else(|| self.context.locale_or(default));
        self.collection
            .label
            .resolve(locale, default, self.engine.catalog())
    }

    pub fn field_label(&self, field: &str, locale: Option<&str>) -> Option<String> {
        let default = self.engine.config().default_locale.as_str();
        let locale = locale.unwrap_or_else(|| self.context.locale_or(default));
        self.collection
            .field(field)?
            .declaration
            .label
            .resolve(locale, default, self.engine.catalog())
    }

    /// Run an arbitrary request through the pipeline.
    pub async fn execute(&self, cx: &Cx, request: OperationRequest) -> Outcome<OperationOutput, Error> {
        self.engine
            .execute(cx, &self.context, &self.collection.slug, request)
            .await
    }

    pub async fn find_many(&self, cx: &Cx, options: FindOptions) -> Outcome<Vec<Record>, Error> {
        let output = try_outcome!(self.execute(cx, OperationRequest::find_many(options)).await);
        Outcome::Ok(output.into_records())
    }

    /// The first matching record; `NotFound` when nothing matches.
    pub async fn find_unique(&self, cx: &Cx, options: FindOptions) -> Outcome<Record, Error> {
        let filter = options.filter.clone();
        let output = try_outcome!(self.execute(cx, OperationRequest::find_unique(options)).await);
        match output.into_first() {
            Some(record) => Outcome::Ok(record),
            None => Outcome::Err(Error::not_found(self.slug(), filter.as_ref())),
        }
    }

    pub async fn find_by_id(&self, cx: &Cx, id: impl Into<Value> + Send) -> Outcome<Record, Error> {
        self.find_unique(cx, FindOptions::new().filter(Filter::id(id)))
            .await
    }

    pub async fn count(&self, cx: &Cx, options: FindOptions) -> Outcome<u64, Error> {
        let output = try_outcome!(self.execute(cx, OperationRequest::count(options)).await);
        Outcome::Ok(output.count())
    }

    /// Create one record, returning it as stored (with its id).
    pub async fn create(&self, cx: &Cx, data: Record) -> Outcome<Record, Error> {
        let output = try_outcome!(self.execute(cx, OperationRequest::create(data)).await);
        match output.into_first() {
            Some(record) => Outcome::Ok(record),
            None => Outcome::Err(Error::Persistence(format!(
                "create on '{}' returned no record",
                self.slug()
            ))),
        }
    }

    /// Update every record matching `filter`.
    pub async fn update(&self, cx: &Cx, filter: Filter, data: Record) -> Outcome<Vec<Record>, Error> {
        let output = try_outcome!(self.execute(cx, OperationRequest::update(filter, data)).await);
        Outcome::Ok(output.into_records())
    }

    pub async fn update_by_id(
        &self,
        cx: &Cx,
        id: impl Into<Value> + Send,
        data: Record,
    ) -> Outcome<Record, Error> {
        let filter = Filter::id(id);
        let output = try_outcome!(
            self.execute(cx, OperationRequest::update(filter.clone(), data))
                .await
        );
        match output.into_first() {
            Some(record) => Outcome::Ok(record),
            None => Outcome::Err(Error::not_found(self.slug(), Some(&filter))),
        }
    }

    /// Delete every record matching `filter` (soft when soft-delete is on).
    pub async fn delete(&self, cx: &Cx, filter: Filter) -> Outcome<Vec<Record>, Error> {
        let output = try_outcome!(self.execute(cx, OperationRequest::delete(filter)).await);
        Outcome::Ok(output.into_records())
    }

    /// Physically delete, bypassing soft-delete.
    pub async fn delete_permanently(&self, cx: &Cx, filter: Filter) -> Outcome<Vec<Record>, Error> {
        let request = OperationRequest::delete(filter).permanent(true);
        let output = try_outcome!(self.execute(cx, request).await);
        Outcome::Ok(output.into_records())
    }
}
