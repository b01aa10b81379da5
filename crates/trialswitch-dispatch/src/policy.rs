//! Error policy execution
//!
//! [`PolicyExecutor::next_candidate`] is the pure step: given the trial that
//! just failed and every trial attempted so far, it names the next trial to
//! replay on, if any. [`PolicyExecutor::execute`] drives attempts through
//! that step strictly one after another.
//!
//! Only trial errors consult the error policy. Timeouts follow the
//! experiment's [`OnTimeout`]; cancellation, resolver and pipeline failures
//! end the invocation immediately.

use crate::error::{DispatchError, ResolveError};
use crate::kill_switch::KillSwitch;
use crate::telemetry::InvocationTelemetry;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trialswitch_core::{BoxError, ErrorPolicy, ExperimentDefinition, OnTimeout, TrialKey};

/// Outcome of a single failed attempt
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Trial returned its own error
    Failed(E),
    /// Attempt exceeded its time budget
    TimedOut(Duration),
    /// Caller cancelled during the attempt
    Cancelled,
    /// Implementation for the trial could not be obtained
    Unresolvable(ResolveError),
    /// A decorator failed the attempt with a foreign error or output
    Pipeline(BoxError),
}

/// Applies an experiment's error policy to a sequence of attempts
pub struct PolicyExecutor<'a> {
    definition: &'a ExperimentDefinition,
    kill_switch: &'a dyn KillSwitch,
}

impl<'a> PolicyExecutor<'a> {
    /// Create executor for `definition`
    #[must_use]
    pub fn new(definition: &'a ExperimentDefinition, kill_switch: &'a dyn KillSwitch) -> Self {
        Self {
            definition,
            kill_switch,
        }
    }

    /// Next trial to replay on after `failed` returned an error
    ///
    /// `attempted` holds every trial tried so far, `failed` included. Trials
    /// disabled by the kill switch are skipped; the default never is.
    #[must_use]
    pub fn next_candidate(&self, failed: &TrialKey, attempted: &[TrialKey]) -> Option<TrialKey> {
        let trials = self.definition.trials();
        let default = trials.default_key();
        let eligible = |key: &TrialKey| !attempted.contains(key) && self.is_enabled(key);

        match self.definition.error_policy() {
            ErrorPolicy::Throw => None,
            ErrorPolicy::RedirectAndReplayDefault => {
                (failed != default && eligible(default)).then(|| default.clone())
            }
            ErrorPolicy::RedirectAndReplayAny => trials.keys().find(|key| eligible(*key)).cloned(),
            ErrorPolicy::RedirectAndReplay(key) => eligible(key).then(|| key.clone()),
            ErrorPolicy::RedirectAndReplayOrdered(keys) => keys.iter().find(|key| eligible(*key)).cloned(),
        }
    }

    /// Trial to replay on after `timed_out` exceeded its budget
    #[must_use]
    pub fn timeout_candidate(&self, timed_out: &TrialKey, attempted: &[TrialKey]) -> Option<TrialKey> {
        let settings = self.definition.timeout()?;
        let default = self.definition.trials().default_key();
        (settings.on_timeout == OnTimeout::FallbackToDefault && timed_out != default && !attempted.contains(default))
            .then(|| default.clone())
    }

    /// Run `attempt` for `first`, then for each replay the policy allows
    ///
    /// `attempt` receives the trial key and the 1-based attempt number.
    /// Every replay is reported to `telemetry` before it starts.
    ///
    /// # Errors
    /// The terminal [`DispatchError`] once no further replay is allowed.
    pub async fn execute<R, E, F, Fut>(
        &self,
        first: TrialKey,
        telemetry: &mut dyn InvocationTelemetry,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<R, DispatchError<E>>
    where
        F: FnMut(TrialKey, usize) -> Fut,
        Fut: Future<Output = Result<R, AttemptError<E>>>,
    {
        let mut attempted: Vec<TrialKey> = Vec::new();
        let mut current = first;

        loop {
            attempted.push(current.clone());
            let failure = match attempt(current.clone(), attempted.len()).await {
                Ok(output) => return Ok(output),
                Err(failure) => failure,
            };

            let next = match failure {
                AttemptError::Failed(error) => match self.next_candidate(&current, &attempted) {
                    Some(next) => next,
                    None => return Err(self.exhausted(current, attempted, error)),
                },
                AttemptError::TimedOut(after) => match self.timeout_candidate(&current, &attempted) {
                    Some(next) => next,
                    None => return Err(DispatchError::TimedOut { trial: current, after }),
                },
                AttemptError::Cancelled => return Err(DispatchError::Cancelled { trial: Some(current) }),
                AttemptError::Unresolvable(source) => {
                    return Err(DispatchError::ImplementationUnavailable {
                        contract: self.definition.contract().clone(),
                        trial: current,
                        source,
                    })
                }
                AttemptError::Pipeline(source) => {
                    return Err(DispatchError::Pipeline { trial: current, source })
                }
            };

            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled { trial: Some(current) });
            }

            tracing::warn!(
                contract = %self.definition.contract(),
                policy = self.definition.error_policy().name(),
                failed = %current,
                attempt = attempted.len() + 1,
                "trial failed, replaying on '{}'",
                next
            );
            telemetry.record_fallback(&next);
            current = next;
        }
    }

    fn exhausted<E>(&self, trial: TrialKey, attempted: Vec<TrialKey>, error: E) -> DispatchError<E> {
        if self.definition.error_policy().reports_exhaustion() && attempted.len() > 1 {
            DispatchError::FallbackExhausted { attempted, last: error }
        } else {
            DispatchError::Failed { trial, source: error }
        }
    }

    fn is_enabled(&self, key: &TrialKey) -> bool {
        key == self.definition.trials().default_key()
            || !self.kill_switch.trial_disabled(self.definition.contract(), key)
    }
}
