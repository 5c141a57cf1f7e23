//! Per-call operation context.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::Transaction;
use crate::value::Value;

/// The user or system performing an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Value,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Created per operation, discarded when it ends.
///
/// Cloning is cheap; nested operations (cascades, auxiliary writes) run with
/// a [`nested`](Self::nested) clone sharing the parent's transaction.
#[derive(Clone, Default)]
pub struct OperationContext {
    pub locale: Option<String>,
    pub actor: Option<Actor>,
    /// Free-form note recorded by audit-style plugins (versioning).
    pub note: Option<String>,
    transaction: Option<Arc<dyn Transaction>>,
    depth: usize,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("locale", &self.locale)
            .field("actor", &self.actor)
            .field("note", &self.note)
            .field("in_transaction", &self.transaction.is_some())
            .field("depth", &self.depth)
            .finish()
    }
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_transaction(mut self, transaction: Arc<dyn Transaction>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// The open transaction, if any.
    pub fn transaction(&self) -> Option<&Arc<dyn Transaction>> {
        self.transaction.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Nesting depth: 0 for caller-issued operations.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Context for an operation issued from inside this one.
    pub fn nested(&self) -> Self {
        let mut child = self.clone();
        child.depth += 1;
        child
    }

    /// Locale of this call, or `default` when none was given.
    pub fn locale_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.locale.as_deref().unwrap_or(default)
    }

    pub fn actor_id(&self) -> Value {
        self.actor.as_ref().map_or(Value::Null, |a| a.id.clone())
    }
}
