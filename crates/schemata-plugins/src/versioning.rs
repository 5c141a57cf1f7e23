//! Append-only version history.
//!
//! Every create and update of a versioned collection writes one record to
//! the auxiliary `{slug}_versions` collection, inside the same transaction
//! as the write itself. Version numbers start at 1 per record and grow by
//! one. History is only removed by [`VersioningExt::prune_versions`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemata_core::value::{record_id, values_equal};
use schemata_core::{
    BoxOutcome, Cx, Error, FieldDeclaration, Filter, FindOptions, ID_FIELD, OperationContext,
    OperationKind, OperationOutput, OperationRequest, Outcome, Record, SortDirection, Value,
    try_outcome, try_result,
};
use schemata_engine::CollectionHandle;
use schemata_schema::{
    CollectionDeclaration, Dispatcher, Extension, MiddlewareBinding, MiddlewareCall,
    OperationMiddleware, Plugin, ResolvedCollection,
};
use serde::{Deserialize, Serialize};

/// Plugin name, also the key of its per-collection state.
pub const VERSIONING: &str = "versioning";

/// Slug of the history collection of `slug`.
pub fn versions_slug(slug: &str) -> String {
    format!("{slug}_versions")
}

/// What each version stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// The whole post-write state of the tracked fields.
    #[default]
    Full,
    /// Only the tracked fields that changed.
    Diff,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersioningConfig {
    pub mode: SnapshotMode,
    /// Fields to track; every stored field when `None`.
    pub tracked: Option<Vec<String>>,
    pub ignored: Vec<String>,
}

impl VersioningConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: SnapshotMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn track<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn ignore(mut self, field: impl Into<String>) -> Self {
        self.ignored.push(field.into());
        self
    }

    /// Stored fields of `collection` this config tracks.
    pub fn tracked_fields(&self, collection: &ResolvedCollection) -> Vec<String> {
        collection
            .stored_fields()
            .map(|f| f.name.clone())
            .filter(|name| name != ID_FIELD && !self.ignored.contains(name))
            .filter(|name| self.tracked.as_ref().is_none_or(|t| t.contains(name)))
            .collect()
    }
}

/// One field's change between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

/// Changed fields, keyed by name.
pub type Diff = BTreeMap<String, FieldChange>;

/// Field-level diff of `fields`, treating a missing field as `null`.
pub fn diff_records(before: Option<&Record>, after: &Record, fields: &[String]) -> Diff {
    fields
        .iter()
        .filter_map(|field| {
            let from = before.and_then(|b| b.get(field));
            let to = after.get(field);
            if values_equal(from, to) {
                return None;
            }
            Some((
                field.clone(),
                FieldChange {
                    from: from.cloned().unwrap_or(Value::Null),
                    to: to.cloned().unwrap_or(Value::Null),
                },
            ))
        })
        .collect()
}

/// A stored version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub id: Value,
    pub record_id: Value,
    pub version: u64,
    #[serde(default)]
    pub snapshot: Option<Record>,
    #[serde(default)]
    pub diff: Diff,
    #[serde(default)]
    pub actor: Value,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl VersionRecord {
    fn from_record(record: Record) -> Result<Self, Error> {
        Ok(serde_json::from_value(Value::Object(record))?)
    }
}

/// Rebuild the tracked state as of the last version in `history`.
///
/// `history` must be ordered by version. Full snapshots reset the state;
/// diffs are replayed on top of it.
pub fn reconstruct(history: &[VersionRecord]) -> Record {
    let mut state = Record::new();
    for version in history {
        match &version.snapshot {
            Some(snapshot) => state.clone_from(snapshot),
            None => {
                for (field, change) in &version.diff {
                    state.insert(field.clone(), change.to.clone());
                }
            }
        }
    }
    state
}

#[derive(Debug)]
struct VersioningState {
    config: Arc<VersioningConfig>,
    versions: String,
}

struct VersionWriter {
    config: Arc<VersioningConfig>,
}

impl VersionWriter {
    async fn latest_version(
        cx: &Cx,
        dispatcher: &dyn Dispatcher,
        ctx: &OperationContext,
        versions: &str,
        id: &Value,
    ) -> Outcome<u64, Error> {
        let options = FindOptions::new()
            .filter(Filter::eq("record_id", id.clone()))
            .order_by("version", SortDirection::Desc)
            .limit(1);
        let found = try_outcome!(
            dispatcher
                .dispatch(cx, ctx, versions, OperationRequest::find_many(options))
                .await
        );
        Outcome::Ok(
            found
                .records()
                .first()
                .and_then(|r| r.get("version"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
        )
    }

    async fn record(
        &self,
        cx: &Cx,
        call: MiddlewareCall<'_>,
        record: &Record,
    ) -> Outcome<(), Error> {
        let Some(id) = record_id(record) else {
            return Outcome::Ok(());
        };
        let collection = call.collection;
        let versions = versions_slug(&collection.slug);
        let ctx = call.context.nested();
        let tracked = self.config.tracked_fields(collection);
        let before = call
            .previous
            .iter()
            .find(|p| values_equal(record_id(p), Some(id)));
        let diff = diff_records(before, record, &tracked);

        let latest = try_outcome!(
            Self::latest_version(cx, call.dispatcher, &ctx, &versions, id).await
        );
        let snapshot = match self.config.mode {
            SnapshotMode::Full => Value::Object(
                tracked
                    .iter()
                    .map(|f| (f.clone(), record.get(f).cloned().unwrap_or(Value::Null)))
                    .collect(),
            ),
            SnapshotMode::Diff => Value::Null,
        };
        let mut data = Record::new();
        data.insert("record_id".into(), id.clone());
        data.insert("version".into(), Value::from(latest + 1));
        data.insert("snapshot".into(), snapshot);
        data.insert("diff".into(), try_result!(serde_json::to_value(&diff)));
        data.insert("actor".into(), ctx.actor_id());
        data.insert(
            "note".into(),
            ctx.note.clone().map_or(Value::Null, Value::String),
        );
        data.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));

        try_outcome!(
            call.dispatcher
                .dispatch(cx, &ctx, &versions, OperationRequest::create(data))
                .await
        );
        tracing::debug!(
            collection = %collection.slug,
            record = %id,
            version = latest + 1,
            changed = diff.len(),
            "recorded version"
        );
        Outcome::Ok(())
    }
}

impl OperationMiddleware for VersionWriter {
    fn after<'a>(
        &'a self,
        cx: &'a Cx,
        call: MiddlewareCall<'a>,
        _request: &'a OperationRequest,
        output: &'a mut OperationOutput,
    ) -> BoxOutcome<'a, ()> {
        Box::pin(async move {
            for record in output.records() {
                match self.record(cx, call, record).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e @ Error::Versioning(_)) => return Outcome::Err(e),
                    Outcome::Err(e) => return Outcome::Err(Error::Versioning(e.to_string())),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            Outcome::Ok(())
        })
    }
}

/// Version every create and update of the collections it is applied to.
pub fn versioning(config: VersioningConfig) -> Plugin {
    let config = Arc::new(config);
    Plugin::new(VERSIONING).extend(move |draft| {
        // History collections are not versioned themselves.
        if draft.is_auxiliary() {
            return Ok(Extension::new());
        }
        let versions = versions_slug(draft.slug());
        let history = CollectionDeclaration::builder(versions.clone())
            .field("record_id", FieldDeclaration::json().required().indexed())
            .field("version", FieldDeclaration::integer().option("min", 1).required())
            .field("snapshot", FieldDeclaration::json())
            .field("diff", FieldDeclaration::json())
            .field("actor", FieldDeclaration::json())
            .field("note", FieldDeclaration::text())
            .field("created_at", FieldDeclaration::timestamp())
            .auxiliary_of(draft.slug())
            .build();
        Ok(Extension::new()
            .collection(history)
            .middleware(MiddlewareBinding::new(
                VERSIONING,
                &[OperationKind::Create, OperationKind::Update],
                Arc::new(VersionWriter {
                    config: Arc::clone(&config),
                }),
            ))
            .state(VersioningState {
                config: Arc::clone(&config),
                versions,
            }))
    })
}

/// Version history operations on a versioned collection.
pub trait VersioningExt {
    /// Every version of record `id`, oldest first.
    fn get_versions(
        &self,
        cx: &Cx,
        id: Value,
    ) -> impl Future<Output = Outcome<Vec<VersionRecord>, Error>> + Send;

    fn get_version(
        &self,
        cx: &Cx,
        id: Value,
        version: u64,
    ) -> impl Future<Output = Outcome<VersionRecord, Error>> + Send;

    /// Write the state of `version` back through a normal update, which
    /// records a new version.
    fn restore_version(
        &self,
        cx: &Cx,
        id: Value,
        version: u64,
    ) -> impl Future<Output = Outcome<Record, Error>> + Send;

    /// Diff between the states of two versions. Reads only.
    fn compare_versions(
        &self,
        cx: &Cx,
        id: Value,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Outcome<Diff, Error>> + Send;

    /// Delete all but the newest `keep_last` versions of `id`; returns how
    /// many were removed. The newest version is always kept, and the oldest
    /// kept version is rewritten as a full snapshot when it was a diff.
    fn prune_versions(
        &self,
        cx: &Cx,
        id: Value,
        keep_last: usize,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}

fn state<'a>(handle: &'a CollectionHandle, operation: &str) -> Result<&'a VersioningState, Error> {
    handle
        .collection()
        .plugin_state::<VersioningState>(VERSIONING)
        .ok_or_else(|| Error::UnknownOperation {
            collection: handle.slug().to_string(),
            operation: operation.to_string(),
        })
}

async fn history(
    handle: &CollectionHandle,
    cx: &Cx,
    state: &VersioningState,
    id: &Value,
    up_to: Option<u64>,
) -> Outcome<Vec<VersionRecord>, Error> {
    let mut filter = Filter::eq("record_id", id.clone());
    if let Some(version) = up_to {
        filter = filter.and(Filter::lte("version", version));
    }
    let versions = try_result!(handle.sibling(&state.versions));
    let records = try_outcome!(
        versions
            .find_many(
                cx,
                FindOptions::new()
                    .filter(filter)
                    .order_by("version", SortDirection::Asc),
            )
            .await
    );
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        out.push(try_result!(VersionRecord::from_record(record)));
    }
    Outcome::Ok(out)
}

async fn state_at(
    handle: &CollectionHandle,
    cx: &Cx,
    state: &VersioningState,
    id: &Value,
    version: u64,
) -> Outcome<Record, Error> {
    let history = try_outcome!(history(handle, cx, state, id, Some(version)).await);
    if history.last().is_none_or(|v| v.version != version) {
        return Outcome::Err(Error::not_found(
            state.versions.clone(),
            Some(&Filter::eq("record_id", id.clone()).and(Filter::eq("version", version))),
        ));
    }
    Outcome::Ok(reconstruct(&history))
}

impl VersioningExt for CollectionHandle {
    fn get_versions(
        &self,
        cx: &Cx,
        id: Value,
    ) -> impl Future<Output = Outcome<Vec<VersionRecord>, Error>> + Send {
        async move {
            let state = try_result!(state(self, "get_versions"));
            history(self, cx, state, &id, None).await
        }
    }

    fn get_version(
        &self,
        cx: &Cx,
        id: Value,
        version: u64,
    ) -> impl Future<Output = Outcome<VersionRecord, Error>> + Send {
        async move {
            let state = try_result!(state(self, "get_version"));
            let history = try_outcome!(history(self, cx, state, &id, Some(version)).await);
            match history.into_iter().last() {
                Some(found) if found.version == version => Outcome::Ok(found),
                _ => Outcome::Err(Error::not_found(
                    state.versions.clone(),
                    Some(&Filter::eq("record_id", id).and(Filter::eq("version", version))),
                )),
            }
        }
    }

    fn restore_version(
        &self,
        cx: &Cx,
        id: Value,
        version: u64,
    ) -> impl Future<Output = Outcome<Record, Error>> + Send {
        async move {
            let state = try_result!(state(self, "restore_version"));
            let target = try_outcome!(state_at(self, cx, state, &id, version).await);
            let data: Record = state
                .config
                .tracked_fields(self.collection())
                .into_iter()
                .map(|field| {
                    let value = target.get(&field).cloned().unwrap_or(Value::Null);
                    (field, value)
                })
                .collect();
            tracing::info!(collection = %self.slug(), record = %id, version, "restoring version");
            self.update_by_id(cx, id, data).await
        }
    }

    fn compare_versions(
        &self,
        cx: &Cx,
        id: Value,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Outcome<Diff, Error>> + Send {
        async move {
            let state = try_result!(state(self, "compare_versions"));
            let before = try_outcome!(state_at(self, cx, state, &id, from).await);
            let after = try_outcome!(state_at(self, cx, state, &id, to).await);
            let fields = state.config.tracked_fields(self.collection());
            Outcome::Ok(diff_records(Some(&before), &after, &fields))
        }
    }

    fn prune_versions(
        &self,
        cx: &Cx,
        id: Value,
        keep_last: usize,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let state = try_result!(state(self, "prune_versions"));
            let history = try_outcome!(history(self, cx, state, &id, None).await);
            // The newest version always stays so numbers are never reused.
            let excess = history.len().saturating_sub(keep_last.max(1));
            if excess == 0 {
                return Outcome::Ok(0);
            }
            let versions = try_result!(self.sibling(&state.versions));
            let base = &history[excess];
            if base.snapshot.is_none() {
                // The pruned diffs may be the only trace of some fields; the
                // oldest kept version becomes a full snapshot.
                let mut patch = Record::new();
                patch.insert(
                    "snapshot".into(),
                    Value::Object(reconstruct(&history[..=excess])),
                );
                try_outcome!(versions.update_by_id(cx, base.id.clone(), patch).await);
            }
            let stale: Vec<Value> = history[..excess].iter().map(|v| v.id.clone()).collect();
            let removed = try_outcome!(versions.delete_permanently(cx, Filter::ids(stale)).await);
            tracing::info!(
                collection = %self.slug(),
                record = %id,
                removed = removed.len(),
                "pruned versions"
            );
            Outcome::Ok(removed.len() as u64)
        }
    }
}
