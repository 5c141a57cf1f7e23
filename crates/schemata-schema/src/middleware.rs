//! Operation middleware: plugin code wrapped around the execute stage.
//!
//! Hooks transform in-flight data; middlewares control execution. `prepare`
//! rewrites a request before anything else runs. `before` runs after the
//! last before-stage hook and may rewrite the request or answer it outright
//! ([`Flow::Handled`]), skipping persistence. `after` runs once execute (or
//! the handling middleware) has produced an output, in reverse order, for
//! every middleware whose `before` let the request through. Middlewares
//! re-enter the pipeline through the [`Dispatcher`] for nested operations,
//! which share the caller's transaction.

use std::fmt;
use std::future::ready;
use std::sync::Arc;

use schemata_core::{
    BoxOutcome, Cx, OperationContext, OperationKind, OperationOutput, OperationRequest, Outcome,
    Record, Result,
};

use crate::resolved::{ResolvedCollection, ResolvedSchema};

/// Entry point for operations issued from inside the pipeline.
pub trait Dispatcher: Send + Sync {
    fn schema(&self) -> &ResolvedSchema;

    /// Run `request` against `slug` through the full pipeline.
    fn dispatch<'a>(
        &'a self,
        cx: &'a Cx,
        ctx: &'a OperationContext,
        slug: &'a str,
        request: OperationRequest,
    ) -> BoxOutcome<'a, OperationOutput>;
}

/// What a middleware sees about the running operation.
#[derive(Clone, Copy)]
pub struct MiddlewareCall<'a> {
    pub dispatcher: &'a dyn Dispatcher,
    pub collection: &'a ResolvedCollection,
    /// Context of the operation, carrying its open transaction for writes.
    pub context: &'a OperationContext,
    /// Records matched by an update or delete before it ran.
    pub previous: &'a [Record],
}

/// Outcome of a middleware's `before`.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    /// Skip execute (and later middlewares' `before`) with this output.
    Handled(OperationOutput),
}

/// Pre/post logic around the execute stage.
pub trait OperationMiddleware: Send + Sync {
    /// Rewrite the request right after authorization, before the query is
    /// run or the records an update or delete targets are loaded.
    fn prepare(&self, call: MiddlewareCall<'_>, request: &mut OperationRequest) -> Result<()> {
        let _ = (call, request);
        Ok(())
    }

    fn before<'a>(
        &'a self,
        cx: &'a Cx,
        call: MiddlewareCall<'a>,
        request: &'a mut OperationRequest,
    ) -> BoxOutcome<'a, Flow> {
        let _ = (cx, call, request);
        Box::pin(ready(Outcome::Ok(Flow::Continue)))
    }

    fn after<'a>(
        &'a self,
        cx: &'a Cx,
        call: MiddlewareCall<'a>,
        request: &'a OperationRequest,
        output: &'a mut OperationOutput,
    ) -> BoxOutcome<'a, ()> {
        let _ = (cx, call, request, output);
        Box::pin(ready(Outcome::Ok(())))
    }
}

/// A named middleware restricted to some operations (empty means all).
#[derive(Clone)]
pub struct MiddlewareBinding {
    pub name: String,
    pub operations: Vec<OperationKind>,
    pub middleware: Arc<dyn OperationMiddleware>,
}

impl fmt::Debug for MiddlewareBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareBinding")
            .field("name", &self.name)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

impl MiddlewareBinding {
    pub fn new(
        name: impl Into<String>,
        operations: &[OperationKind],
        middleware: Arc<dyn OperationMiddleware>,
    ) -> Self {
        Self {
            name: name.into(),
            operations: operations.to_vec(),
            middleware,
        }
    }

    pub fn applies_to(&self, operation: OperationKind) -> bool {
        self.operations.is_empty() || self.operations.contains(&operation)
    }
}
