//! Error types for Schemata.
//!
//! Configuration-time problems (`Configuration`, `Conflict`) are raised while
//! resolving the schema and prevent startup. Everything else is raised while
//! an operation runs and is returned to the caller after the operation's
//! transaction has been rolled back.

use std::fmt;

use thiserror::Error;

use crate::filter::Filter;
use crate::hook::{Contributor, HookStage};
use crate::operation::OperationKind;

/// Result type for synchronous Schemata code.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The primary error type for all Schemata operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid declarations or plugin configuration (fatal at resolution).
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Two contributors declared the same field without an override.
    #[error("{0}")]
    Conflict(#[from] ConflictError),

    /// Input or query failed field-level validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A hook failed; the operation was aborted.
    #[error("{0}")]
    Hook(#[from] HookError),

    /// No record matched the filter of an update, delete or unique lookup.
    #[error("no record in '{collection}' matches {filter}")]
    NotFound { collection: String, filter: String },

    /// The collection's access rule rejected the operation.
    #[error("operation '{operation}' on '{collection}' is not permitted")]
    Forbidden {
        collection: String,
        operation: OperationKind,
    },

    /// A cascade with `restrict` behavior found referencing records.
    #[error("cannot delete from '{collection}': {count} record(s) in '{related}' still reference it")]
    Restricted {
        collection: String,
        related: String,
        count: u64,
    },

    /// An operation named a collection that is not in the resolved schema.
    #[error("collection '{0}' does not exist")]
    UnknownCollection(String),

    /// The collection does not support the requested operation.
    #[error("operation '{operation}' is not available on '{collection}'")]
    UnknownOperation {
        collection: String,
        operation: String,
    },

    /// Cache side-effect failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Versioning side-effect failure.
    #[error("versioning error: {0}")]
    Versioning(String),

    /// Failure reported by the persistence collaborator.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Free-form error raised by user hooks.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Create a custom error, typically from inside a hook.
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Create a not-found error for `collection`.
    pub fn not_found(collection: impl Into<String>, filter: Option<&Filter>) -> Self {
        Error::NotFound {
            collection: collection.into(),
            filter: filter.map_or_else(|| "<all>".to_string(), ToString::to_string),
        }
    }

    /// Whether this error was raised while resolving the schema.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Conflict(_))
    }

    /// Whether this error is a (possibly hook-wrapped) side-effect error.
    pub fn is_side_effect(&self) -> bool {
        matches!(self, Error::Cache(_) | Error::Versioning(_))
    }
}

/// Errors detected while resolving declarations into a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("collection '{0}' is declared more than once")]
    DuplicateCollection(String),

    #[error("field type '{0}' is already registered in this scope")]
    DuplicateFieldType(String),

    #[error("plugin '{0}' is applied more than once to collection '{1}'")]
    DuplicatePlugin(String, String),

    #[error("plugin '{plugin}' requires '{requires}', which is not applied before it on '{collection}'")]
    MissingDependency {
        plugin: String,
        requires: String,
        collection: String,
    },

    #[error("field '{collection}.{field}' references unknown collection '{target}'")]
    UnknownCollection {
        collection: String,
        field: String,
        target: String,
    },

    #[error("field '{collection}.{field}' uses unknown field type '{field_type}'")]
    UnknownFieldType {
        collection: String,
        field: String,
        field_type: String,
    },

    #[error("field type '{field_type}' has no option '{option}'")]
    UnknownFieldOption { field_type: String, option: String },

    #[error("invalid value for option '{option}' of field type '{field_type}': {message}")]
    InvalidOption {
        field_type: String,
        option: String,
        message: String,
    },

    #[error("invalid declaration '{subject}': {message}")]
    InvalidDeclaration { subject: String, message: String },
}

/// A field-name collision between two contributors of the same collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}' on '{collection}' is declared by {existing} and {incoming}; mark {incoming} as overriding to replace it")]
pub struct ConflictError {
    pub collection: String,
    pub field: String,
    pub existing: Contributor,
    pub incoming: Contributor,
}

/// A single field-attributed validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Structured validation failure returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub collection: String,
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(collection: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self {
            collection: collection.into(),
            errors,
        }
    }

    /// Single-field convenience constructor.
    pub fn field(
        collection: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(collection, vec![FieldError::new(field, message)])
    }

    /// Messages recorded for `field`.
    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed on '{}'", self.collection)?;
        for (i, err) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// A hook raised an error; identifies where in the pipeline it happened.
#[derive(Debug, Error)]
#[error("hook '{hook}' ({source_contributor}) failed at {stage} on '{collection}': {source}")]
pub struct HookError {
    pub collection: String,
    pub stage: HookStage,
    pub hook: String,
    pub source_contributor: Contributor,
    #[source]
    pub source: Box<Error>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_names_both_contributors() {
        let err = Error::from(ConflictError {
            collection: "posts".into(),
            field: "slug".into(),
            existing: Contributor::Plugin("seo".into()),
            incoming: Contributor::Plugin("permalinks".into()),
        });
        let msg = err.to_string();
        assert!(msg.contains("slug"));
        assert!(msg.contains("plugin 'seo'"));
        assert!(msg.contains("plugin 'permalinks'"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new(
            "users",
            vec![
                FieldError::new("email", "is required"),
                FieldError::new("age", "must be >= 0"),
            ],
        );
        assert_eq!(
            err.to_string(),
            "validation failed on 'users': email: is required; age: must be >= 0"
        );
        assert_eq!(err.messages_for("age"), vec!["must be >= 0"]);
    }

    #[test]
    fn test_not_found_without_filter() {
        let err = Error::not_found("posts", None);
        assert_eq!(err.to_string(), "no record in 'posts' matches <all>");
    }

    #[test]
    fn test_side_effect_classification() {
        assert!(Error::Cache("down".into()).is_side_effect());
        assert!(Error::Versioning("x".into()).is_side_effect());
        assert!(!Error::custom("x").is_side_effect());
    }
}
