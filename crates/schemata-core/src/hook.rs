//! Lifecycle hooks.
//!
//! Hooks run sequentially within a stage, in composition order: global
//! plugin hooks, then collection plugin hooks, then the collection's own
//! hooks. Each hook sees the mutations of the hooks before it.

use std::fmt;
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};

use crate::BoxOutcome;
use crate::context::{Actor, OperationContext};
use crate::error::Result;
use crate::filter::FindOptions;
use crate::operation::OperationKind;
use crate::value::{Record, Value};

/// Fixed points of the read and write state machines where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    BeforeRead,
    AfterRead,
    BeforeOperation,
    Validate,
    BeforeDatabase,
    AfterOperation,
}

impl HookStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            HookStage::BeforeRead => "before_read",
            HookStage::AfterRead => "after_read",
            HookStage::BeforeOperation => "before_operation",
            HookStage::Validate => "validate",
            HookStage::BeforeDatabase => "before_database",
            HookStage::AfterOperation => "after_operation",
        }
    }

    /// Stages of the read path, in order.
    pub const READ_PATH: [HookStage; 2] = [HookStage::BeforeRead, HookStage::AfterRead];

    /// Stages of the write path, in order.
    pub const WRITE_PATH: [HookStage; 4] = [
        HookStage::BeforeOperation,
        HookStage::Validate,
        HookStage::BeforeDatabase,
        HookStage::AfterOperation,
    ];
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who contributed a field or hook to a resolved collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contributor {
    /// The collection declaration itself.
    Collection(String),
    Plugin(String),
}

impl Contributor {
    pub fn name(&self) -> &str {
        match self {
            Contributor::Collection(name) | Contributor::Plugin(name) => name,
        }
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self, Contributor::Plugin(_))
    }
}

impl fmt::Display for Contributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contributor::Collection(slug) => write!(f, "collection '{slug}'"),
            Contributor::Plugin(name) => write!(f, "plugin '{name}'"),
        }
    }
}

/// Control signal returned by a hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookSignal {
    #[default]
    Continue,
    /// Treat the operation as a no-op: the execute stage is skipped and the
    /// remaining stages see the records as they were before the operation.
    Skip,
}

/// The in-flight state a hook may inspect and mutate.
#[derive(Debug, Clone)]
pub struct HookArgs {
    pub collection: String,
    pub operation: OperationKind,
    pub context: OperationContext,
    /// Input of creates and updates; mutable until the execute stage.
    pub data: Record,
    /// Records matched by an update or delete, as they were before it.
    pub previous: Vec<Record>,
    /// Read options, or the `where` of an update or delete.
    pub query: FindOptions,
    /// Records read (after-read) or written (after-operation).
    pub result: Vec<Record>,
    /// Result of a `count`.
    pub count: Option<u64>,
}

impl HookArgs {
    pub fn new(
        collection: impl Into<String>,
        operation: OperationKind,
        context: OperationContext,
    ) -> Self {
        Self {
            collection: collection.into(),
            operation,
            context,
            data: Record::new(),
            previous: Vec::new(),
            query: FindOptions::default(),
            result: Vec::new(),
            count: None,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.context.locale.as_deref()
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.context.actor.as_ref()
    }

    /// Field of the incoming data, falling back to the first previous record.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data
            .get(field)
            .or_else(|| self.previous.first().and_then(|p| p.get(field)))
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(field.into(), value.into());
    }
}

/// Boxed future returned by [`Hook::call`].
pub type HookFuture<'a> = BoxOutcome<'a, HookSignal>;

/// A lifecycle hook.
///
/// Implement this directly for hooks that suspend; wrap synchronous closures
/// with [`FnHook`].
pub trait Hook: Send + Sync {
    fn call<'a>(&'a self, cx: &'a Cx, args: &'a mut HookArgs) -> HookFuture<'a>;
}

/// Adapter running a synchronous closure as a hook.
pub struct FnHook<F>(pub F);

impl<F> Hook for FnHook<F>
where
    F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync,
{
    fn call<'a>(&'a self, _cx: &'a Cx, args: &'a mut HookArgs) -> HookFuture<'a> {
        let outcome = match (self.0)(args) {
            Ok(signal) => Outcome::Ok(signal),
            Err(e) => Outcome::Err(e),
        };
        Box::pin(std::future::ready(outcome))
    }
}

/// A named hook attached to a stage and (optionally) a subset of operations.
#[derive(Clone)]
pub struct HookBinding {
    pub name: String,
    pub stage: HookStage,
    /// Operations this hook runs for; empty means every operation reaching
    /// the stage.
    pub operations: Vec<OperationKind>,
    pub hook: Arc<dyn Hook>,
}

impl fmt::Debug for HookBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBinding")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

impl HookBinding {
    pub fn with_hook(
        name: impl Into<String>,
        stage: HookStage,
        operations: &[OperationKind],
        hook: Arc<dyn Hook>,
    ) -> Self {
        Self {
            name: name.into(),
            stage,
            operations: operations.to_vec(),
            hook,
        }
    }

    pub fn new<F>(
        name: impl Into<String>,
        stage: HookStage,
        operations: &[OperationKind],
        f: F,
    ) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::with_hook(name, stage, operations, Arc::new(FnHook(f)))
    }

    pub fn before_read<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::BeforeRead, &[], f)
    }

    pub fn after_read<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::AfterRead, &[], f)
    }

    /// Before create and update.
    pub fn before_change<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(
            name,
            HookStage::BeforeOperation,
            &[OperationKind::Create, OperationKind::Update],
            f,
        )
    }

    pub fn before_create<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::BeforeOperation, &[OperationKind::Create], f)
    }

    pub fn before_update<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::BeforeOperation, &[OperationKind::Update], f)
    }

    pub fn before_delete<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::BeforeOperation, &[OperationKind::Delete], f)
    }

    /// Custom validator for create and update.
    pub fn validate<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(
            name,
            HookStage::Validate,
            &[OperationKind::Create, OperationKind::Update],
            f,
        )
    }

    pub fn before_database<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::BeforeDatabase, &[], f)
    }

    /// After create and update.
    pub fn after_change<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(
            name,
            HookStage::AfterOperation,
            &[OperationKind::Create, OperationKind::Update],
            f,
        )
    }

    pub fn after_create<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::AfterOperation, &[OperationKind::Create], f)
    }

    pub fn after_update<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::AfterOperation, &[OperationKind::Update], f)
    }

    pub fn after_delete<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut HookArgs) -> Result<HookSignal> + Send + Sync + 'static,
    {
        Self::new(name, HookStage::AfterOperation, &[OperationKind::Delete], f)
    }

    /// Restrict to `operations`.
    pub fn on(mut self, operations: &[OperationKind]) -> Self {
        self.operations = operations.to_vec();
        self
    }

    pub fn applies_to(&self, stage: HookStage, operation: OperationKind) -> bool {
        self.stage == stage && (self.operations.is_empty() || self.operations.contains(&operation))
    }
}
