//! Schemata: declarative collections, composable plugins and a hook pipeline
//! for CRUD.
//!
//! Declare collections and plugins as plain values, hand them to
//! [`define_config`], and work with the resolved collections through the
//! returned [`Client`]:
//!
//! ```rust,ignore
//! use schemata::prelude::*;
//!
//! let posts = CollectionDeclaration::builder("posts")
//!     .field("title", FieldDeclaration::text().required())
//!     .plugin(versioning(VersioningConfig::new()))
//!     .build();
//!
//! let client = define_config(
//!     Config::in_memory()
//!         .collection(posts)
//!         .plugin(soft_delete(SoftDeleteConfig::new())),
//! )?;
//!
//! let posts = client.collection("posts")?;
//! let post = posts.create(&cx, data).await;
//! let history = posts.get_versions(&cx, post["id"].clone()).await;
//! ```
//!
//! The workspace crates are re-exported for code that needs more than the
//! prelude.

pub mod client;
pub mod config;

pub use client::Client;
pub use config::{Config, DatabaseConfig, define_config};

#[cfg(feature = "memory")]
pub use schemata_memory;
pub use {schemata_core, schemata_engine, schemata_plugins, schemata_schema};

pub use schemata_core::{Cx, Error, Outcome, Result};

/// Everything needed to declare, configure and query collections.
pub mod prelude {
    pub use crate::{Client, Config, DatabaseConfig, define_config};

    pub use schemata_core::{
        Actor, Cx, Error, FieldDeclaration, FieldTypeDescriptor, FieldTypeRegistry, Filter,
        FindOptions, HookArgs, HookBinding, HookSignal, HookStage, LocaleCatalog, LocalizedText,
        OperationContext, OperationKind, Outcome, Record, Result, SortDirection, StaticCatalog,
        Value, json,
    };
    pub use schemata_engine::{CollectionHandle, EngineConfig};
    #[cfg(feature = "memory")]
    pub use schemata_memory::MemoryStore;
    pub use schemata_plugins::{
        CacheConfig, CacheExt, CacheStrategy, CascadeRule, InvalidationStrategy, SeoConfig,
        SnapshotMode, SoftDeleteConfig, SoftDeleteExt, VersioningConfig, VersioningExt, cache,
        seo, soft_delete, versioning,
    };
    pub use schemata_schema::{AccessRule, CollectionDeclaration, Plugin};
}
