//! Field declarations.

use std::fmt;
use std::sync::Arc;

use crate::locale::LocalizedText;
use crate::value::{Record, Value};

/// Pure function deriving a computed field from its dependencies.
pub type ComputeFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Function producing a default value at create time.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// What a field is.
#[derive(Clone)]
pub enum FieldKind {
    /// A stored value of a registered field type.
    Scalar { field_type: String },
    /// Stored reference(s) to records of `target`.
    Relation { target: String, many: bool },
    /// Virtual list of `target` records whose `foreign_key` points here.
    ReverseRelation { target: String, foreign_key: String },
    /// Virtual value computed after its dependencies are materialized.
    Computed {
        field_type: String,
        depends_on: Vec<String>,
        compute: ComputeFn,
    },
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar { field_type } => {
                f.debug_struct("Scalar").field("field_type", field_type).finish()
            }
            FieldKind::Relation { target, many } => f
                .debug_struct("Relation")
                .field("target", target)
                .field("many", many)
                .finish(),
            FieldKind::ReverseRelation {
                target,
                foreign_key,
            } => f
                .debug_struct("ReverseRelation")
                .field("target", target)
                .field("foreign_key", foreign_key)
                .finish(),
            FieldKind::Computed {
                field_type,
                depends_on,
                ..
            } => f
                .debug_struct("Computed")
                .field("field_type", field_type)
                .field("depends_on", depends_on)
                .finish_non_exhaustive(),
        }
    }
}

/// Default value for a field missing from create input.
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Provider(DefaultFn),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Static(v) => v.clone(),
            DefaultValue::Provider(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(v) => f.debug_tuple("Static").field(v).finish(),
            DefaultValue::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// One field of a collection declaration.
#[derive(Debug, Clone)]
pub struct FieldDeclaration {
    pub kind: FieldKind,
    /// Field-type options, applied in order.
    pub options: Vec<(String, Value)>,
    pub required: bool,
    pub unique: bool,
    pub indexed: bool,
    /// Stored per locale, read with fallback to the default locale.
    pub localized: bool,
    pub default: Option<DefaultValue>,
    pub label: LocalizedText,
    pub description: LocalizedText,
}

impl FieldDeclaration {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            options: Vec::new(),
            required: false,
            unique: false,
            indexed: false,
            localized: false,
            default: None,
            label: LocalizedText::new(),
            description: LocalizedText::new(),
        }
    }

    /// Scalar field of `field_type`.
    pub fn of(field_type: impl Into<String>) -> Self {
        Self::new(FieldKind::Scalar {
            field_type: field_type.into(),
        })
    }

    pub fn text() -> Self {
        Self::of("text")
    }

    pub fn email() -> Self {
        Self::of("email")
    }

    pub fn number() -> Self {
        Self::of("number")
    }

    pub fn integer() -> Self {
        Self::of("integer")
    }

    pub fn boolean() -> Self {
        Self::of("boolean")
    }

    pub fn json() -> Self {
        Self::of("json")
    }

    pub fn timestamp() -> Self {
        Self::of("timestamp")
    }

    pub fn select<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::of("select").option(
            "values",
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn relation(target: impl Into<String>) -> Self {
        Self::new(FieldKind::Relation {
            target: target.into(),
            many: false,
        })
    }

    pub fn relation_many(target: impl Into<String>) -> Self {
        Self::new(FieldKind::Relation {
            target: target.into(),
            many: true,
        })
    }

    pub fn reverse_relation(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::new(FieldKind::ReverseRelation {
            target: target.into(),
            foreign_key: foreign_key.into(),
        })
    }

    pub fn computed<I, S, F>(field_type: impl Into<String>, depends_on: I, compute: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Self::new(FieldKind::Computed {
            field_type: field_type.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
            compute: Arc::new(compute),
        })
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_with<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Provider(Arc::new(provider)));
        self
    }

    pub fn label(mut self, label: impl Into<LocalizedText>) -> Self {
        self.label = label.into();
        self
    }

    pub fn description(mut self, description: impl Into<LocalizedText>) -> Self {
        self.description = description.into();
        self
    }

    /// Id of the field type validating this field, if it has one.
    pub fn field_type(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Scalar { field_type } | FieldKind::Computed { field_type, .. } => {
                Some(field_type)
            }
            FieldKind::Relation { .. } => Some("relation"),
            FieldKind::ReverseRelation { .. } => None,
        }
    }

    /// Whether the field is persisted (reverse relations and computed
    /// fields are derived on read).
    pub fn is_stored(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Scalar { .. } | FieldKind::Relation { .. }
        )
    }

    /// Target collection of a relation or reverse relation.
    pub fn relation_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation { target, .. } | FieldKind::ReverseRelation { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }
}
