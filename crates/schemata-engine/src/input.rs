//! Query and input validation.

use schemata_core::{
    FieldError, FieldKind, FindOptions, ID_FIELD, OperationKind, Record, Result, ValidationError,
    Value,
};
use schemata_schema::{ResolvedCollection, ResolvedField};

use crate::shape::is_locale_map;

/// Check that every field a query names exists.
pub(crate) fn validate_query(collection: &ResolvedCollection, options: &FindOptions) -> Result<()> {
    let mut errors = Vec::new();
    let stored = |name: &str| {
        name == ID_FIELD || collection.field(name).is_some_and(ResolvedField::is_stored)
    };

    let localized = |name: &str| collection.field(name).is_some_and(|f| f.declaration.localized);

    if let Some(filter) = &options.filter {
        for field in filter.fields() {
            if !stored(field) {
                errors.push(FieldError::new(field, "unknown field in where"));
            } else if localized(field) {
                errors.push(FieldError::new(field, "localized fields cannot be filtered"));
            }
        }
    }
    for term in &options.order_by {
        if !stored(&term.field) {
            errors.push(FieldError::new(&term.field, "unknown field in order_by"));
        } else if localized(&term.field) {
            errors.push(FieldError::new(&term.field, "localized fields cannot be sorted"));
        }
    }
    for field in options.select.iter().flatten() {
        if field != ID_FIELD && !collection.has_field(field) {
            errors.push(FieldError::new(field, "unknown field in select"));
        }
    }
    for name in &options.include {
        let is_relation = collection.field(name).is_some_and(|f| {
            matches!(
                f.kind(),
                FieldKind::Relation { .. } | FieldKind::ReverseRelation { .. }
            )
        });
        if !is_relation {
            errors.push(FieldError::new(name, "is not a relation"));
        }
    }

    finish(collection, errors)
}

/// Fill missing stored fields that declare a default.
pub(crate) fn apply_defaults(collection: &ResolvedCollection, data: &mut Record) {
    for field in collection.stored_fields() {
        if data.get(&field.name).is_none_or(Value::is_null) {
            if let Some(default) = &field.declaration.default {
                data.insert(field.name.clone(), default.produce());
            }
        }
    }
}

/// Validate caller input: known, writable fields with valid values.
pub(crate) fn validate_input(
    collection: &ResolvedCollection,
    data: &Record,
    kind: OperationKind,
) -> Result<()> {
    let mut errors = Vec::new();
    for (name, value) in data {
        if name == ID_FIELD {
            if kind != OperationKind::Create {
                errors.push(FieldError::new(name, "is read-only"));
            }
            continue;
        }
        let Some(field) = collection.field(name) else {
            errors.push(FieldError::new(name, "unknown field"));
            continue;
        };
        if !field.is_stored() {
            errors.push(FieldError::new(name, "is read-only"));
            continue;
        }
        check_value(field, value, &mut errors);
    }
    finish(collection, errors)
}

/// Validate the data about to be written, after hooks have run.
pub(crate) fn validate_complete(
    collection: &ResolvedCollection,
    data: &Record,
    kind: OperationKind,
) -> Result<()> {
    let mut errors = Vec::new();
    for name in data.keys().filter(|k| k.as_str() != ID_FIELD) {
        if !collection.field(name).is_some_and(ResolvedField::is_stored) {
            errors.push(FieldError::new(name, "is not a stored field"));
        }
    }
    for field in collection.stored_fields() {
        let value = data.get(&field.name);
        let missing = value.is_none_or(Value::is_null);
        let required_missing = match kind {
            OperationKind::Create => missing,
            // Updates only touch the fields they carry.
            _ => value.is_some_and(Value::is_null),
        };
        if field.is_required() && required_missing {
            errors.push(FieldError::new(&field.name, "is required"));
            continue;
        }
        if let Some(value) = value {
            check_value(field, value, &mut errors);
        }
    }
    finish(collection, errors)
}

fn check_value(field: &ResolvedField, value: &Value, errors: &mut Vec<FieldError>) {
    if value.is_null() {
        return;
    }
    let Some(rule) = field.validation() else {
        return;
    };
    // A localized field may carry its whole locale map.
    if field.declaration.localized && is_locale_map(field, value) {
        if let Some(per_locale) = value.as_object() {
            for item in per_locale.values().filter(|v| !v.is_null()) {
                for message in rule.check(item) {
                    errors.push(FieldError::new(&field.name, message));
                }
            }
            return;
        }
    }
    let many = matches!(field.kind(), FieldKind::Relation { many: true, .. });
    if many {
        let Some(items) = value.as_array() else {
            errors.push(FieldError::new(&field.name, "expected a list of references"));
            return;
        };
        for item in items {
            for message in rule.check(item) {
                errors.push(FieldError::new(&field.name, message));
            }
        }
        return;
    }
    for message in rule.check(value) {
        errors.push(FieldError::new(&field.name, message));
    }
}

fn finish(collection: &ResolvedCollection, errors: Vec<FieldError>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(collection.slug.clone(), errors).into())
    }
}
