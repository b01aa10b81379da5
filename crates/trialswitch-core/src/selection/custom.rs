//! Custom selection rules supplied by the caller

use super::{SelectionKind, SelectionStrategy};
use crate::context::InvocationContext;
use crate::error::SelectionError;
use crate::ids::TrialKey;
use std::fmt;
use std::sync::Arc;

/// External selection rule
#[async_trait::async_trait]
pub trait TrialSelector: Send + Sync {
    /// Pick one of `candidates` (all keys, registration order)
    async fn select(
        &self,
        ctx: &InvocationContext,
        candidates: &[TrialKey],
    ) -> Result<TrialKey, SelectionError>;
}

/// [`TrialSelector`] backed by a synchronous closure
pub struct FnSelector<F> {
    f: F,
}

impl<F> FnSelector<F>
where
    F: Fn(&InvocationContext, &[TrialKey]) -> Result<TrialKey, SelectionError> + Send + Sync,
{
    /// Wrap closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F> TrialSelector for FnSelector<F>
where
    F: Fn(&InvocationContext, &[TrialKey]) -> Result<TrialKey, SelectionError> + Send + Sync,
{
    async fn select(
        &self,
        ctx: &InvocationContext,
        candidates: &[TrialKey],
    ) -> Result<TrialKey, SelectionError> {
        (self.f)(ctx, candidates)
    }
}

/// Strategy delegating to a [`TrialSelector`]
pub struct CustomStrategy {
    name: String,
    selector: Arc<dyn TrialSelector>,
    candidates: Vec<TrialKey>,
}

impl CustomStrategy {
    pub(crate) fn new(name: String, selector: Arc<dyn TrialSelector>, candidates: Vec<TrialKey>) -> Self {
        Self {
            name,
            selector,
            candidates,
        }
    }
}

#[async_trait::async_trait]
impl SelectionStrategy for CustomStrategy {
    fn kind(&self) -> SelectionKind {
        SelectionKind::Custom
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn candidates(&self) -> &[TrialKey] {
        &self.candidates
    }

    async fn resolve(&self, ctx: &InvocationContext) -> Result<TrialKey, SelectionError> {
        self.selector.select(ctx, &self.candidates).await
    }
}

impl fmt::Debug for CustomStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomStrategy")
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}
