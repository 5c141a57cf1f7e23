//! Operation executor for Schemata.
//!
//! `schemata-engine` drives every operation on a resolved schema through its
//! read or write state machine, running hooks in composition order, calling
//! plugin middlewares around the execute stage, and scoping each write to
//! one transaction of the persistence collaborator.
//!
//! The [`Engine`] implements [`Dispatcher`](schemata_schema::Dispatcher), so
//! middlewares and relation includes re-enter the full pipeline for nested
//! operations. [`CollectionHandle`] is the typed per-collection API callers
//! and plugin extension traits build on.

pub mod config;
pub mod executor;
pub mod handle;
mod input;
mod shape;

pub use config::EngineConfig;
pub use executor::Engine;
pub use handle::CollectionHandle;
