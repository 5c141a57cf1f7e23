//! Plugin composition and schema resolution for Schemata.
//!
//! Declarations (`CollectionDeclaration`, `Plugin`) are pure values. The
//! `SchemaResolver` runs the `PluginComposer` over each of them, then over
//! the auxiliary collections plugins contribute, and checks every relation
//! target. The result is a `ResolvedSchema` that never changes afterwards.
//!
//! The crate also defines the middleware contract (`OperationMiddleware`,
//! `Dispatcher`) since middlewares are contributed by plugins and stored in
//! resolved collections.

pub mod collection;
pub mod composer;
pub mod middleware;
pub mod plugin;
pub mod resolved;
pub mod resolver;

pub use collection::{Access, AccessRule, CollectionBuilder, CollectionDeclaration};
pub use composer::{CollectionDraft, Composition, PluginComposer};
pub use middleware::{Dispatcher, Flow, MiddlewareBinding, MiddlewareCall, OperationMiddleware};
pub use plugin::{ExtendFn, Extension, Plugin, PluginState};
pub use resolved::{
    FieldOverride, ResolvedCollection, ResolvedField, ResolvedHook, ResolvedMiddleware,
    ResolvedSchema,
};
pub use resolver::{SchemaResolver, resolve};
