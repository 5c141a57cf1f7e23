//! Core types and collaborator traits for Schemata.
//!
//! `schemata-core` is the **foundation layer**. It defines the data model
//! (records, filters, find options), the field-type registry, field
//! declarations, the hook contract, and the persistence and locale
//! collaborator traits every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Declarations**: `FieldDeclaration` and `FieldTypeRegistry` are the
//!   leaf inputs of schema resolution (`schemata-schema`).
//! - **Pipeline contracts**: `Hook`, `HookBinding`, `OperationRequest` and
//!   `OperationContext` are what the executor (`schemata-engine`) drives and
//!   what plugins (`schemata-plugins`) contribute.
//! - **Collaborators**: `Store`/`Transaction` (persistence) and
//!   `LocaleCatalog` (label lookup) are implemented outside the engine;
//!   `schemata-memory` ships an in-process store.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync
//!   so every async operation is cancel-correct.

use std::future::Future;
use std::pin::Pin;

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod context;
pub mod error;
pub mod field;
pub mod field_type;
pub mod filter;
pub mod hook;
pub mod locale;
pub mod operation;
pub mod store;
pub mod validate;
pub mod value;

pub use context::{Actor, OperationContext};
pub use error::{
    ConfigurationError, ConflictError, Error, FieldError, HookError, Result, ValidationError,
};
pub use field::{ComputeFn, DefaultFn, DefaultValue, FieldDeclaration, FieldKind};
pub use field_type::{
    ColumnType, FieldTypeDescriptor, FieldTypeRegistry, OptionFn, StorageColumn, StorageDelta,
    ValidationDelta,
};
pub use filter::{Filter, FindOptions, OrderBy, SortDirection};
pub use hook::{Contributor, FnHook, Hook, HookArgs, HookBinding, HookFuture, HookSignal, HookStage};
pub use locale::{LocaleCatalog, LocalizedText, StaticCatalog};
pub use operation::{OperationKind, OperationOutput, OperationRequest};
pub use store::{Store, Transaction};
pub use validate::{Constraint, ValidationRule, ValueKind};
pub use value::{ID_FIELD, Map, Record, Value, json};

/// Boxed, sendable future resolving to an [`Outcome`].
///
/// Used at every trait-object seam (persistence, hooks, middleware) so the
/// implementations can live in the immutable schema and be re-entered
/// recursively.
pub type BoxOutcome<'a, T> = Pin<Box<dyn Future<Output = Outcome<T, Error>> + Send + 'a>>;

/// Unwrap an `Outcome`, returning early from the enclosing async fn on any
/// non-`Ok` arm.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap a `Result` inside an async fn returning `Outcome`.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return $crate::Outcome::Err(e.into()),
        }
    };
}
