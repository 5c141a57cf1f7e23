//! Persistence collaborator contracts.
//!
//! The engine never talks to storage directly. Writes go through a
//! [`Transaction`] opened on the [`Store`] for the duration of one write
//! pipeline (and shared with any nested writes it triggers); plain reads go
//! straight to the store.

use std::sync::Arc;

use asupersync::Cx;

use crate::BoxOutcome;
use crate::filter::{Filter, FindOptions};
use crate::value::Record;

/// A unit of work against the persistence collaborator.
///
/// Methods take `&self` so one transaction can be shared by every nested
/// operation of a write pipeline.
pub trait Transaction: Send + Sync {
    /// Records of `collection` matching `options` (filter, order, window).
    fn find_many<'a>(
        &'a self,
        cx: &'a Cx,
        collection: &'a str,
        options: &'a FindOptions,
    ) -> BoxOutcome<'a, Vec<Record>>;

    fn count<'a>(
        &'a self,
        cx: &'a Cx,
        collection: &'a str,
        filter: Option<&'a Filter>,
    ) -> BoxOutcome<'a, u64>;

    /// Insert `record`, returning it with its assigned identity.
    fn insert<'a>(
        &'a self,
        cx: &'a Cx,
        collection: &'a str,
        record: Record,
    ) -> BoxOutcome<'a, Record>;

    /// Merge `patch` into every matching record, returning the updated rows.
    fn update<'a>(
        &'a self,
        cx: &'a Cx,
        collection: &'a str,
        filter: &'a Filter,
        patch: Record,
    ) -> BoxOutcome<'a, Vec<Record>>;

    /// Remove every matching record, returning the removed rows.
    fn delete<'a>(
        &'a self,
        cx: &'a Cx,
        collection: &'a str,
        filter: &'a Filter,
    ) -> BoxOutcome<'a, Vec<Record>>;

    fn commit<'a>(&'a self, cx: &'a Cx) -> BoxOutcome<'a, ()>;

    fn rollback<'a>(&'a self, cx: &'a Cx) -> BoxOutcome<'a, ()>;
}

/// The persistence collaborator.
pub trait Store: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn begin<'a>(&'a self, cx: &'a Cx) -> BoxOutcome<'a, Arc<dyn Transaction>>;

    fn find_many<'a>(
        &'a self,
        cx: &'a Cx,
        collection: &'a str,
        options: &'a FindOptions,
    ) -> BoxOutcome<'a, Vec<Record>>;

    fn count<'a>(
        &'a self,
        cx: &'a Cx,
        collection: &'a str,
        filter: Option<&'a Filter>,
    ) -> BoxOutcome<'a, u64>;
}
