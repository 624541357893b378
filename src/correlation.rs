//! Correlation context for top-level operations
//!
//! Every top-level operation (a sync flow, a retry-queue pass, an order
//! transition) runs inside its own correlation scope. The id is carried by a
//! tokio task-local, so nested calls pick it up without threading it through
//! every signature, and it never outlives the scope that created it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// Opaque identifier tying all calls and log records of one operation together
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id of the enclosing scope, if any
    pub fn current() -> Option<CorrelationId> {
        CURRENT.try_with(|id| id.clone()).ok()
    }

    /// The id of the enclosing scope, or a fresh one for calls made outside any scope
    pub fn current_or_new() -> CorrelationId {
        Self::current().unwrap_or_default()
    }

    /// Run `future` with `self` as the ambient correlation id
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, future).await
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run `future` in a new correlation scope unless one is already active.
///
/// Nested top-level operations (a full sync calling individual flows, the
/// retry worker reprocessing items) keep the id of the outermost scope.
pub async fn in_scope<F>(future: F) -> F::Output
where
    F: Future,
{
    match CorrelationId::current() {
        Some(_) => future.await,
        None => CorrelationId::new().scope(future).await,
    }
}

/// Short label for log formatting, `-` outside any scope
pub fn log_label() -> String {
    CURRENT
        .try_with(|id| id.0.clone())
        .unwrap_or_else(|_| "-".to_string())
}
