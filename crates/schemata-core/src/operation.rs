//! Operation requests and outputs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filter::{Filter, FindOptions};
use crate::value::{Record, Value};

/// The operations every collection exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    FindMany,
    FindUnique,
    Count,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::FindMany,
        OperationKind::FindUnique,
        OperationKind::Count,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    pub const READS: [OperationKind; 3] = [
        OperationKind::FindMany,
        OperationKind::FindUnique,
        OperationKind::Count,
    ];

    pub const WRITES: [OperationKind; 3] = [
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::FindMany => "find_many",
            OperationKind::FindUnique => "find_unique",
            OperationKind::Count => "count",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub const fn is_read(self) -> bool {
        matches!(
            self,
            OperationKind::FindMany | OperationKind::FindUnique | OperationKind::Count
        )
    }

    pub const fn is_write(self) -> bool {
        !self.is_read()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request flowing through the pipeline.
///
/// Middlewares may rewrite it before the execute stage (soft-delete adds its
/// filter here).
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub kind: OperationKind,
    /// Query options for reads; `filter` is the `where` of updates and deletes.
    pub options: FindOptions,
    /// Input of creates and updates.
    pub data: Record,
    /// Delete physically even when soft-delete is enabled.
    pub permanent: bool,
    /// Caller-declared cache tags.
    pub tags: Vec<String>,
}

impl OperationRequest {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            options: FindOptions::default(),
            data: Record::new(),
            permanent: false,
            tags: Vec::new(),
        }
    }

    pub fn find_many(options: FindOptions) -> Self {
        Self::new(OperationKind::FindMany).with_options(options)
    }

    pub fn find_unique(options: FindOptions) -> Self {
        Self::new(OperationKind::FindUnique).with_options(options)
    }

    pub fn count(options: FindOptions) -> Self {
        Self::new(OperationKind::Count).with_options(options)
    }

    pub fn create(data: Record) -> Self {
        Self::new(OperationKind::Create).with_data(data)
    }

    pub fn update(filter: Filter, data: Record) -> Self {
        Self::new(OperationKind::Update)
            .with_options(FindOptions::new().filter(filter))
            .with_data(data)
    }

    pub fn delete(filter: Filter) -> Self {
        Self::new(OperationKind::Delete).with_options(FindOptions::new().filter(filter))
    }

    pub fn with_options(mut self, options: FindOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_data(mut self, data: Record) -> Self {
        self.data = data;
        self
    }

    pub fn permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn include_deleted(mut self, value: bool) -> Self {
        self.options.include_deleted = value;
        self
    }

    /// Set a single field of `data`.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }
}

/// Result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Records(Vec<Record>),
    Count(u64),
}

impl OperationOutput {
    pub fn records(&self) -> &[Record] {
        match self {
            OperationOutput::Records(records) => records,
            OperationOutput::Count(_) => &[],
        }
    }

    pub fn records_mut(&mut self) -> Option<&mut Vec<Record>> {
        match self {
            OperationOutput::Records(records) => Some(records),
            OperationOutput::Count(_) => None,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            OperationOutput::Records(records) => records,
            OperationOutput::Count(_) => Vec::new(),
        }
    }

    pub fn into_first(self) -> Option<Record> {
        self.into_records().into_iter().next()
    }

    /// Count for `count`, number of records otherwise.
    pub fn count(&self) -> u64 {
        match self {
            OperationOutput::Records(records) => records.len() as u64,
            OperationOutput::Count(n) => *n,
        }
    }
}
