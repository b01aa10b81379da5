//! Trial decisions
//!
//! A decision is what the dispatcher settled on for one `(contract, scope)`.
//! Selection never fails an invocation: when the selection mode cannot answer
//! or answers with a key that does not exist, the decision names the default
//! trial and carries the reason as a [`Substitution`].

use trialswitch_core::{ExperimentDefinition, InvocationContext, SelectionError, TrialKey};

/// Why the default trial replaced the selected one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// Selection mode failed or produced an unregistered key
    Selection(SelectionError),
    /// Kill switch disabled the experiment
    ExperimentDisabled,
    /// Kill switch disabled the selected trial
    TrialDisabled(TrialKey),
}

impl Substitution {
    /// Short label for logs
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Selection(SelectionError::UnknownTrialKey(_)) => "unknown_trial_key",
            Self::Selection(_) => "selection_failed",
            Self::ExperimentDisabled => "experiment_disabled",
            Self::TrialDisabled(_) => "trial_disabled",
        }
    }
}

/// Trial chosen for a `(contract, scope)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDecision {
    /// Trial every invocation in the scope starts with
    pub trial_key: TrialKey,
    /// Keys the selection mode could have produced
    pub candidate_keys: Vec<TrialKey>,
    /// Set when the default trial stands in for the selection
    pub substitution: Option<Substitution>,
}

impl ResolvedDecision {
    /// Decision the selection mode made
    #[must_use]
    pub fn selected(trial_key: TrialKey, candidate_keys: Vec<TrialKey>) -> Self {
        Self {
            trial_key,
            candidate_keys,
            substitution: None,
        }
    }

    /// Decision falling back to `default`
    #[must_use]
    pub fn substituted(default: TrialKey, candidate_keys: Vec<TrialKey>, substitution: Substitution) -> Self {
        Self {
            trial_key: default,
            candidate_keys,
            substitution: Some(substitution),
        }
    }

    /// Whether the default trial replaced the selection
    #[inline]
    #[must_use]
    pub fn is_substituted(&self) -> bool {
        self.substitution.is_some()
    }
}

/// Run the experiment's selection mode for `ctx`
pub(crate) async fn select(definition: &ExperimentDefinition, ctx: &InvocationContext) -> ResolvedDecision {
    let strategy = definition.selection();
    let candidates = strategy.candidates().to_vec();
    let default = definition.trials().default_key().clone();

    let error = match strategy.resolve(ctx).await {
        Ok(key) if definition.trials().contains(key.as_str()) => {
            tracing::debug!(
                contract = %definition.contract(),
                scope = %ctx.scope(),
                trial = %key,
                "trial selected"
            );
            return ResolvedDecision::selected(key, candidates);
        }
        Ok(key) => SelectionError::UnknownTrialKey(key),
        Err(error) => error,
    };

    tracing::warn!(
        contract = %definition.contract(),
        scope = %ctx.scope(),
        selector = %strategy.kind(),
        error = %error,
        "selection failed, using default trial '{}'",
        default
    );
    ResolvedDecision::substituted(default, candidates, Substitution::Selection(error))
}
