//! Decorator contracts
//!
//! A decorator wraps one trial *attempt*. Decorators run outer to inner in
//! registration order: the first registered decorator sees the outermost
//! timing and error boundary. A replay re-enters the whole chain.
//!
//! Output and error values cross the chain type-erased so one decorator can
//! wrap every operation of a contract. Decorators observe and forward them;
//! they never choose the trial.
//!
//! ```rust,ignore
//! struct Audit;
//!
//! #[async_trait::async_trait]
//! impl Decorator for Audit {
//!     fn name(&self) -> &str { "audit" }
//!
//!     async fn around(&self, attempt: &Attempt, next: Next<'_>) -> AttemptResult {
//!         tracing::info!("calling {}", attempt.trial);
//!         next.run().await
//!     }
//! }
//! ```

use crate::context::InvocationContext;
use crate::ids::{ContractId, ScopeId, TrialKey};
use futures::future::BoxFuture;
use std::any::Any;

/// Type-erased trial output
pub type ErasedOutput = Box<dyn Any + Send>;

/// Type-erased trial error
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result flowing through the decorator chain
pub type AttemptResult = Result<ErasedOutput, BoxError>;

/// Future produced by a chain link
pub type AttemptFuture<'a> = BoxFuture<'a, AttemptResult>;

/// Innermost link: the actual trial call
pub type Terminal<'a> = dyn Fn() -> AttemptFuture<'a> + Send + Sync + 'a;

/// Description of one attempt against one trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Contract being invoked
    pub contract: ContractId,
    /// Operation name
    pub method: String,
    /// Invocation scope
    pub scope: ScopeId,
    /// Trial this attempt runs
    pub trial: TrialKey,
    /// 1-based attempt number within the invocation
    pub number: usize,
}

impl Attempt {
    /// Describe attempt `number` of `ctx` against `trial`
    #[must_use]
    pub fn new(ctx: &InvocationContext, trial: TrialKey, number: usize) -> Self {
        Self {
            contract: ctx.contract().clone(),
            method: ctx.method().to_string(),
            scope: ctx.scope().clone(),
            trial,
            number,
        }
    }

    /// Whether this attempt is a fallback replay
    #[inline]
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.number > 1
    }
}

/// Cross-cutting wrapper around a trial attempt
#[async_trait::async_trait]
pub trait Decorator: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str;

    /// Run logic around `next`; must call `next.run()` at most once
    async fn around(&self, attempt: &Attempt, next: Next<'_>) -> AttemptResult;
}

/// Builds invocation-local decorators
///
/// Called once per invocation, so decorators may keep per-invocation state
/// without synchronisation.
pub trait DecoratorFactory: Send + Sync {
    /// Name for logs and definition debugging
    fn name(&self) -> &str;

    /// Create the decorator for one invocation
    fn create(&self, ctx: &InvocationContext) -> Box<dyn Decorator>;
}

/// Remainder of the decorator chain
///
/// Consumed by [`Next::run`], so a decorator cannot re-enter the inner chain
/// twice for the same attempt.
pub struct Next<'a> {
    rest: &'a [Box<dyn Decorator>],
    attempt: &'a Attempt,
    terminal: &'a Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Start of a chain
    #[must_use]
    pub fn new(chain: &'a [Box<dyn Decorator>], attempt: &'a Attempt, terminal: &'a Terminal<'a>) -> Self {
        Self {
            rest: chain,
            attempt,
            terminal,
        }
    }

    /// Run the remaining decorators, then the trial
    pub fn run(self) -> AttemptFuture<'a> {
        match self.rest.split_first() {
            Some((head, rest)) => head.around(
                self.attempt,
                Next {
                    rest,
                    attempt: self.attempt,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(),
        }
    }
}
