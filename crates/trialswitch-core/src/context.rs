//! Per-call invocation context

use crate::ids::{ContractId, ScopeId};
use tokio_util::sync::CancellationToken;

/// Transient per-call context
///
/// Carries the contract/method being invoked, the scope whose decision must
/// stay consistent, an optional caller identity (sticky routing) and the
/// cancellation signal propagated into selection and every trial attempt.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    contract: ContractId,
    method: String,
    scope: ScopeId,
    identity: Option<String>,
    cancellation: CancellationToken,
}

impl InvocationContext {
    /// Create a context with a fresh, never-cancelled token
    #[must_use]
    pub fn new(contract: impl Into<ContractId>, method: impl Into<String>, scope: ScopeId) -> Self {
        Self {
            contract: contract.into(),
            method: method.into(),
            scope,
            identity: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach the caller identity used by sticky routing
    #[inline]
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Use an externally owned cancellation token
    #[inline]
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Contract being invoked
    #[inline]
    #[must_use]
    pub fn contract(&self) -> &ContractId {
        &self.contract
    }

    /// Operation name on the contract
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Scope of the invocation
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Caller identity, if supplied
    #[inline]
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Cancellation token for this call
    #[inline]
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the caller has given up on this invocation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
