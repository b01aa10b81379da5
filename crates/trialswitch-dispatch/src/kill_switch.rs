//! Runtime kill switch
//!
//! Checked on every invocation, outside the decision cache, so disabling a
//! trial takes effect immediately even inside a running scope. The default
//! trial can never be disabled.

use dashmap::{DashMap, DashSet};
use trialswitch_core::{ContractId, TrialKey};

/// Runtime switch for experiments and individual trials
pub trait KillSwitch: Send + Sync {
    /// Whether the whole experiment is forced onto its default trial
    fn experiment_disabled(&self, contract: &ContractId) -> bool;

    /// Whether `trial` must not run
    fn trial_disabled(&self, contract: &ContractId, trial: &TrialKey) -> bool;
}

/// Switch that never disables anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKillSwitch;

impl KillSwitch for NoKillSwitch {
    fn experiment_disabled(&self, _contract: &ContractId) -> bool {
        false
    }

    fn trial_disabled(&self, _contract: &ContractId, _trial: &TrialKey) -> bool {
        false
    }
}

/// In-process switch toggled at runtime
#[derive(Debug, Default)]
pub struct InMemoryKillSwitch {
    experiments: DashSet<ContractId>,
    trials: DashMap<ContractId, Vec<TrialKey>>,
}

impl InMemoryKillSwitch {
    /// Create switch with nothing disabled
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `contract` onto its default trial
    pub fn disable_experiment(&self, contract: impl Into<ContractId>) {
        let contract = contract.into();
        tracing::warn!("Kill switch: experiment '{}' disabled", contract);
        self.experiments.insert(contract);
    }

    /// Undo [`Self::disable_experiment`]
    pub fn enable_experiment(&self, contract: &ContractId) {
        if self.experiments.remove(contract).is_some() {
            tracing::info!("Kill switch: experiment '{}' re-enabled", contract);
        }
    }

    /// Stop routing to `trial`
    pub fn disable_trial(&self, contract: impl Into<ContractId>, trial: impl Into<TrialKey>) {
        let contract = contract.into();
        let trial = trial.into();
        tracing::warn!("Kill switch: trial '{}' of '{}' disabled", trial, contract);
        let mut disabled = self.trials.entry(contract).or_default();
        if !disabled.contains(&trial) {
            disabled.push(trial);
        }
    }

    /// Undo [`Self::disable_trial`]
    pub fn enable_trial(&self, contract: &ContractId, trial: &TrialKey) {
        if let Some(mut disabled) = self.trials.get_mut(contract) {
            disabled.retain(|k| k != trial);
        }
        self.trials.remove_if(contract, |_, disabled| disabled.is_empty());
    }
}

impl KillSwitch for InMemoryKillSwitch {
    fn experiment_disabled(&self, contract: &ContractId) -> bool {
        self.experiments.contains(contract)
    }

    fn trial_disabled(&self, contract: &ContractId, trial: &TrialKey) -> bool {
        self.trials
            .get(contract)
            .is_some_and(|disabled| disabled.contains(trial))
    }
}
