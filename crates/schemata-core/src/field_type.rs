//! Field types and the field-type registry.
//!
//! A field type pairs a validation rule with a storage-column description and
//! a set of named options. Applying options never mutates the registered
//! descriptor; [`FieldTypeDescriptor::resolve_options`] returns a new one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigurationError, Result};
use crate::validate::{Constraint, ValidationRule, ValueKind};
use crate::value::Value;

/// Logical SQL column type of a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Varchar(u32),
    Integer,
    BigInt,
    Double,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    Json,
    Timestamp,
}

impl ColumnType {
    /// SQL spelling, for diagnostics and migration tooling.
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

/// Storage half of a field type.
///
/// `checks` are SQL check expressions with `{column}` standing in for the
/// column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageColumn {
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub indexed: bool,
    pub checks: Vec<String>,
}

impl StorageColumn {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: true,
            unique: false,
            indexed: false,
            checks: Vec::new(),
        }
    }

    /// Check expressions with the column name substituted.
    pub fn checks_for(&self, column: &str) -> Vec<String> {
        self.checks
            .iter()
            .map(|c| c.replace("{column}", column))
            .collect()
    }
}

/// Change an option makes to a validation rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationDelta {
    pub kind: Option<ValueKind>,
    pub constraints: Vec<Constraint>,
}

impl ValidationDelta {
    pub fn constraint(constraint: Constraint) -> Self {
        Self {
            kind: None,
            constraints: vec![constraint],
        }
    }
}

/// Change an option makes to a storage column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageDelta {
    pub column_type: Option<ColumnType>,
    pub checks: Vec<String>,
}

impl StorageDelta {
    pub fn check(expr: impl Into<String>) -> Self {
        Self {
            column_type: None,
            checks: vec![expr.into()],
        }
    }

    pub fn column(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }
}

/// Function implementing a named option: option value in, deltas out.
pub type OptionFn =
    Arc<dyn Fn(&Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> + Send + Sync>;

/// A registered field type.
#[derive(Clone)]
pub struct FieldTypeDescriptor {
    pub id: String,
    pub validation: ValidationRule,
    pub storage: StorageColumn,
    options: BTreeMap<String, OptionFn>,
}

impl fmt::Debug for FieldTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTypeDescriptor")
            .field("id", &self.id)
            .field("validation", &self.validation)
            .field("storage", &self.storage)
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FieldTypeDescriptor {
    pub fn new(id: impl Into<String>, validation: ValidationRule, storage: StorageColumn) -> Self {
        Self {
            id: id.into(),
            validation,
            storage,
            options: BTreeMap::new(),
        }
    }

    /// Add a named option.
    pub fn option<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(ValidationDelta, StorageDelta), String>
            + Send
            + Sync
            + 'static,
    {
        self.options.insert(name.into(), Arc::new(f));
        self
    }

    pub fn option_names(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Apply `options` in order and return the narrowed descriptor.
    ///
    /// Contradictory options are not detected here; see
    /// [`ValidationRule::contradictions`].
    pub fn resolve_options(&self, options: &[(String, Value)]) -> Result<FieldTypeDescriptor> {
        let mut resolved = self.clone();
        for (name, value) in options {
            let apply = self
                .options
                .get(name)
                .ok_or_else(|| ConfigurationError::UnknownFieldOption {
                    field_type: self.id.clone(),
                    option: name.clone(),
                })?;
            let (validation, storage) =
                apply(value).map_err(|message| ConfigurationError::InvalidOption {
                    field_type: self.id.clone(),
                    option: name.clone(),
                    message,
                })?;
            if let Some(kind) = validation.kind {
                resolved.validation.kind = kind;
            }
            resolved.validation.constraints.extend(validation.constraints);
            if let Some(column_type) = storage.column_type {
                resolved.storage.column_type = column_type;
            }
            resolved.storage.checks.extend(storage.checks);
        }
        Ok(resolved)
    }
}

/// Scoped map from field-type id to descriptor.
///
/// The global scope holds builtins and global plugin types; each collection
/// gets a child scope for its local plugins. Lookups fall back to the parent.
#[derive(Debug, Clone, Default)]
pub struct FieldTypeRegistry {
    parent: Option<Arc<FieldTypeRegistry>>,
    types: BTreeMap<String, Arc<FieldTypeDescriptor>>,
}

impl FieldTypeRegistry {
    /// Empty registry with no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin field types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in builtins() {
            registry
                .types
                .insert(descriptor.id.clone(), Arc::new(descriptor));
        }
        registry
    }

    /// Child scope whose lookups fall back to `parent`.
    pub fn child(parent: &Arc<FieldTypeRegistry>) -> Self {
        Self {
            parent: Some(Arc::clone(parent)),
            types: BTreeMap::new(),
        }
    }

    /// Register a field type in this scope.
    ///
    /// Shadowing a parent-scope type is allowed; registering the same id twice
    /// in one scope is not.
    pub fn register(&mut self, descriptor: FieldTypeDescriptor) -> Result<()> {
        if self.types.contains_key(&descriptor.id) {
            return Err(ConfigurationError::DuplicateFieldType(descriptor.id).into());
        }
        tracing::debug!(field_type = %descriptor.id, "Registered field type");
        self.types
            .insert(descriptor.id.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&FieldTypeDescriptor> {
        match self.types.get(id) {
            Some(d) => Some(d.as_ref()),
            None => self.parent.as_ref().and_then(|p| p.get(id)),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Ids visible from this scope, sorted and deduplicated.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.types.keys().map(String::as_str).collect();
        if let Some(parent) = &self.parent {
            ids.extend(parent.ids());
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

fn usize_arg(value: &Value) -> std::result::Result<usize, String> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| format!("expected a non-negative integer, got {value}"))
}

fn f64_arg(value: &Value) -> std::result::Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("expected a number, got {value}"))
}

fn max_length(value: &Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> {
    let n = usize_arg(value)?;
    let width = u32::try_from(n).map_err(|_| format!("max_length {n} is too large"))?;
    Ok((
        ValidationDelta::constraint(Constraint::MaxLength(n)),
        StorageDelta::default().column(ColumnType::Varchar(width)),
    ))
}

fn min_length(value: &Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> {
    let n = usize_arg(value)?;
    Ok((
        ValidationDelta::constraint(Constraint::MinLength(n)),
        StorageDelta::check(format!("length({{column}}) >= {n}")),
    ))
}

fn pattern(value: &Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> {
    let p = value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {value}"))?;
    Ok((
        ValidationDelta::constraint(Constraint::Pattern(p.to_string())),
        StorageDelta::default(),
    ))
}

fn min(value: &Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> {
    let n = f64_arg(value)?;
    Ok((
        ValidationDelta::constraint(Constraint::Min(n)),
        StorageDelta::check(format!("{{column}} >= {n}")),
    ))
}

fn max(value: &Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> {
    let n = f64_arg(value)?;
    Ok((
        ValidationDelta::constraint(Constraint::Max(n)),
        StorageDelta::check(format!("{{column}} <= {n}")),
    ))
}

fn precision(value: &Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> {
    let scale = usize_arg(value)?;
    let scale = u8::try_from(scale)
        .ok()
        .filter(|s| *s <= 18)
        .ok_or_else(|| format!("precision must be between 0 and 18, got {value}"))?;
    Ok((
        ValidationDelta::constraint(Constraint::MaxScale(u32::from(scale))),
        StorageDelta::default().column(ColumnType::Decimal {
            precision: 18,
            scale,
        }),
    ))
}

fn values(value: &Value) -> std::result::Result<(ValidationDelta, StorageDelta), String> {
    let allowed = value
        .as_array()
        .ok_or_else(|| format!("expected a list of values, got {value}"))?;
    let list: Vec<String> = allowed.iter().map(ToString::to_string).collect();
    Ok((
        ValidationDelta::constraint(Constraint::OneOf(allowed.clone())),
        StorageDelta::check(format!("{{column}} IN ({})", list.join(", "))),
    ))
}

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

/// The builtin field types.
pub fn builtins() -> Vec<FieldTypeDescriptor> {
    vec![
        FieldTypeDescriptor::new(
            "text",
            ValidationRule::new(ValueKind::Text),
            StorageColumn::new(ColumnType::Text),
        )
        .option("max_length", max_length)
        .option("min_length", min_length)
        .option("pattern", pattern),
        FieldTypeDescriptor::new(
            "email",
            ValidationRule::new(ValueKind::Text)
                .with(Constraint::Pattern(EMAIL_PATTERN.to_string())),
            StorageColumn::new(ColumnType::Varchar(320)),
        )
        .option("max_length", max_length),
        FieldTypeDescriptor::new(
            "number",
            ValidationRule::new(ValueKind::Number),
            StorageColumn::new(ColumnType::Double),
        )
        .option("min", min)
        .option("max", max)
        .option("precision", precision),
        FieldTypeDescriptor::new(
            "integer",
            ValidationRule::new(ValueKind::Integer),
            StorageColumn::new(ColumnType::BigInt),
        )
        .option("min", min)
        .option("max", max),
        FieldTypeDescriptor::new(
            "boolean",
            ValidationRule::new(ValueKind::Boolean),
            StorageColumn::new(ColumnType::Boolean),
        ),
        FieldTypeDescriptor::new(
            "json",
            ValidationRule::new(ValueKind::Json),
            StorageColumn::new(ColumnType::Json),
        ),
        FieldTypeDescriptor::new(
            "timestamp",
            ValidationRule::new(ValueKind::Timestamp),
            StorageColumn::new(ColumnType::Timestamp),
        ),
        FieldTypeDescriptor::new(
            "select",
            ValidationRule::new(ValueKind::Text),
            StorageColumn::new(ColumnType::Text),
        )
        .option("values", values),
        FieldTypeDescriptor::new(
            "relation",
            ValidationRule::new(ValueKind::Reference),
            StorageColumn::new(ColumnType::BigInt),
        ),
    ]
}
