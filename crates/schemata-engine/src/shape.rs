//! Result shaping (the CoerceTypes stage) and per-locale storage.
//!
//! Localized fields are stored as an object keyed by locale. Reads pick the
//! effective locale, falling back to the default locale. Computed fields are
//! evaluated once their dependencies are present, relations named in
//! `include` are replaced by the related records, and `select` is applied
//! last so computed values may depend on unselected fields.

use std::collections::BTreeMap;

use schemata_core::{
    Cx, Error, FieldKind, Filter, FindOptions, OperationContext, OperationRequest, Outcome, Record,
    Value, try_outcome,
};
use schemata_core::value::{project, record_id};
use schemata_schema::{Dispatcher, ResolvedCollection, ResolvedField};

/// Whether `field` keeps one value per locale.
fn is_localized(field: &ResolvedField) -> bool {
    field.declaration.localized && field.is_stored()
}

/// Whether `value` is a complete locale map for localized `field`.
pub(crate) fn is_locale_map(field: &ResolvedField, value: &Value) -> bool {
    value.is_object() && field.descriptor.as_ref().is_none_or(|d| d.id != "json")
}

pub(crate) fn has_localized(collection: &ResolvedCollection, data: &Record) -> bool {
    collection
        .fields
        .iter()
        .any(|f| is_localized(f) && data.contains_key(&f.name))
}

/// Replace each localized value in `data` with its locale map.
///
/// A plain value is written under `locale`, merged into the map already
/// stored in `previous`. An object is taken to be a full locale map.
pub(crate) fn localize_for_storage(
    collection: &ResolvedCollection,
    data: &mut Record,
    locale: &str,
    previous: Option<&Record>,
) {
    for field in collection.fields.iter().filter(|f| is_localized(f)) {
        let Some(value) = data.remove(&field.name) else {
            continue;
        };
        let stored = if is_locale_map(field, &value) {
            value
        } else {
            let mut map = previous
                .and_then(|p| p.get(&field.name))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            map.insert(locale.to_string(), value);
            Value::Object(map)
        };
        data.insert(field.name.clone(), stored);
    }
}

/// Pick the `locale` (or `default_locale`) value of every localized field.
pub(crate) fn localize_for_read(
    collection: &ResolvedCollection,
    record: &mut Record,
    locale: &str,
    default_locale: &str,
) {
    for field in collection.fields.iter().filter(|f| is_localized(f)) {
        let Some(Value::Object(map)) = record.get(&field.name) else {
            continue;
        };
        let value = map
            .get(locale)
            .or_else(|| map.get(default_locale))
            .cloned()
            .unwrap_or(Value::Null);
        record.insert(field.name.clone(), value);
    }
}

/// Evaluate computed fields in dependency order.
///
/// A field whose dependencies never become available is set to `null`.
pub(crate) fn compute_fields(collection: &ResolvedCollection, record: &mut Record) {
    let mut pending: Vec<&ResolvedField> = collection
        .fields
        .iter()
        .filter(|f| matches!(f.kind(), FieldKind::Computed { .. }))
        .collect();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|field| {
            let FieldKind::Computed {
                depends_on,
                compute,
                ..
            } = field.kind()
            else {
                return false;
            };
            let ready = depends_on.iter().all(|dep| {
                record.contains_key(dep)
                    || !collection
                        .field(dep)
                        .is_some_and(|f| matches!(f.kind(), FieldKind::Computed { .. }))
            });
            if !ready {
                return true;
            }
            let value = compute(record);
            record.insert(field.name.clone(), value);
            false
        });
        if pending.len() == before {
            for field in pending.drain(..) {
                tracing::warn!(
                    collection = %collection.slug,
                    field = %field.name,
                    "computed field has a dependency cycle"
                );
                record.insert(field.name.clone(), Value::Null);
            }
        }
    }
}

fn key(value: &Value) -> String {
    value.to_string()
}

fn id_list(values: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut seen = BTreeMap::new();
    for value in values.filter(|v| !v.is_null()) {
        seen.entry(key(&value)).or_insert(value);
    }
    seen.into_values().collect()
}

/// Replace every relation named in `include` with the related record(s).
///
/// Related records are loaded with one nested `find_many` per relation, so
/// they pass through the related collection's own read pipeline.
pub(crate) async fn include_relations(
    cx: &Cx,
    dispatcher: &dyn Dispatcher,
    ctx: &OperationContext,
    collection: &ResolvedCollection,
    records: &mut [Record],
    include: &[String],
    locale: &str,
) -> Outcome<(), Error> {
    let nested = ctx.nested();
    for name in include {
        let Some(field) = collection.field(name) else {
            continue;
        };
        match field.kind() {
            FieldKind::Relation { target, .. } => {
                let ids = id_list(records.iter().filter_map(|r| r.get(name)).flat_map(|v| {
                    match v {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    }
                }));
                let related = if ids.is_empty() {
                    Vec::new()
                } else {
                    let options = FindOptions::new().filter(Filter::ids(ids)).locale(locale);
                    try_outcome!(
                        dispatcher
                            .dispatch(cx, &nested, target, OperationRequest::find_many(options))
                            .await
                    )
                    .into_records()
                };
                let by_id: BTreeMap<String, Record> = related
                    .into_iter()
                    .filter_map(|r| record_id(&r).map(key).map(|k| (k, r)))
                    .collect();
                let lookup = |v: &Value| by_id.get(&key(v)).cloned().map_or(Value::Null, Value::Object);
                for record in records.iter_mut() {
                    let Some(value) = record.get(name) else {
                        continue;
                    };
                    let replaced = match value {
                        Value::Array(items) => {
                            Value::Array(items.iter().map(lookup).filter(|v| !v.is_null()).collect())
                        }
                        Value::Null => Value::Null,
                        other => lookup(other),
                    };
                    record.insert(name.clone(), replaced);
                }
            }
            FieldKind::ReverseRelation {
                target,
                foreign_key,
            } => {
                let ids = id_list(records.iter().filter_map(|r| record_id(r).cloned()));
                let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                if !ids.is_empty() {
                    let options = FindOptions::new()
                        .filter(Filter::is_in(foreign_key.clone(), ids))
                        .locale(locale);
                    let children = try_outcome!(
                        dispatcher
                            .dispatch(cx, &nested, target, OperationRequest::find_many(options))
                            .await
                    )
                    .into_records();
                    for child in children {
                        if let Some(parent) = child.get(foreign_key).filter(|v| !v.is_null()) {
                            groups
                                .entry(key(parent))
                                .or_default()
                                .push(Value::Object(child));
                        }
                    }
                }
                for record in records.iter_mut() {
                    let children = record_id(record)
                        .and_then(|id| groups.get(&key(id)))
                        .cloned()
                        .unwrap_or_default();
                    record.insert(name.clone(), Value::Array(children));
                }
            }
            FieldKind::Scalar { .. } | FieldKind::Computed { .. } => {}
        }
    }
    Outcome::Ok(())
}

/// Full CoerceTypes stage for records leaving the pipeline.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn shape_records(
    cx: &Cx,
    dispatcher: &dyn Dispatcher,
    ctx: &OperationContext,
    collection: &ResolvedCollection,
    records: &mut [Record],
    options: &FindOptions,
    locale: &str,
    default_locale: &str,
) -> Outcome<(), Error> {
    for record in records.iter_mut() {
        localize_for_read(collection, record, locale, default_locale);
        compute_fields(collection, record);
    }
    if !options.include.is_empty() {
        try_outcome!(
            include_relations(cx, dispatcher, ctx, collection, records, &options.include, locale)
                .await
        );
    }
    if let Some(select) = &options.select {
        let mut keep = select.clone();
        keep.extend(options.include.iter().cloned());
        for record in records.iter_mut() {
            *record = project(record, &keep);
        }
    }
    Outcome::Ok(())
}
