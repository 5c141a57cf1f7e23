//! Builtin plugins for Schemata.
//!
//! Each plugin is a plain [`Plugin`](schemata_schema::Plugin) value built
//! from a config struct, applied globally or per collection like any other.
//! Operations a plugin adds to collections are extension traits on
//! [`CollectionHandle`](schemata_engine::CollectionHandle):
//!
//! | Plugin | Constructor | Extension trait |
//! |--------|-------------|-----------------|
//! | versioning | [`versioning`] | [`VersioningExt`] |
//! | cache | [`cache`] | [`CacheExt`] |
//! | soft delete | [`soft_delete`] | [`SoftDeleteExt`] |
//! | search metadata | [`seo`] | none |

pub mod backend;
pub mod cache;
pub mod seo;
pub mod soft_delete;
pub mod versioning;

pub use backend::{CacheBackend, CacheStats, CacheStrategy, MemoryCache};
pub use cache::{CACHE, CacheConfig, CacheExt, InvalidationStrategy, cache};
pub use seo::{SEO, SeoConfig, seo};
pub use soft_delete::{
    CascadeBehavior, CascadeRule, SOFT_DELETE, SoftDeleteConfig, SoftDeleteExt, soft_delete,
};
pub use versioning::{
    Diff, FieldChange, SnapshotMode, VERSIONING, VersionRecord, VersioningConfig, VersioningExt,
    versioning, versions_slug,
};
