//! Experiment definitions and their builder
//!
//! # Construction
//!
//! ```rust,ignore
//! let definition = ExperimentDefinition::define("pricing")
//!     .default_trial("control", "pricing::Legacy")
//!     .trial("tiered", "pricing::Tiered")
//!     .use_selection_mode(SelectionMode::boolean_flag("pricing.tiered", flags))
//!     .use_error_policy(ErrorPolicy::RedirectAndReplayDefault)
//!     .build()?;
//! ```
//!
//! All validation happens in [`DefinitionBuilder::build`]. A built definition
//! is immutable; a configuration change produces a new definition.

use crate::decorator::DecoratorFactory;
use crate::error::DefinitionError;
use crate::ids::{ContractId, ImplementationRef, TrialKey};
use crate::policy::{ErrorPolicy, OnTimeout, TimeoutSettings};
use crate::selection::{SelectionMode, SelectionStrategy};
use crate::trial::{Trial, TrialSet};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Frozen description of one experiment
pub struct ExperimentDefinition {
    contract: ContractId,
    trials: TrialSet,
    selection: Arc<dyn SelectionStrategy>,
    error_policy: ErrorPolicy,
    timeout: Option<TimeoutSettings>,
    decorators: Vec<Arc<dyn DecoratorFactory>>,
}

impl ExperimentDefinition {
    /// Start defining an experiment for `contract`
    #[must_use]
    pub fn define(contract: impl Into<ContractId>) -> DefinitionBuilder {
        DefinitionBuilder::new(contract)
    }

    /// Contract identity
    #[inline]
    #[must_use]
    pub fn contract(&self) -> &ContractId {
        &self.contract
    }

    /// Registered trials
    #[inline]
    #[must_use]
    pub fn trials(&self) -> &TrialSet {
        &self.trials
    }

    /// Selection strategy bound to the trials
    #[inline]
    #[must_use]
    pub fn selection(&self) -> &Arc<dyn SelectionStrategy> {
        &self.selection
    }

    /// Error policy
    #[inline]
    #[must_use]
    pub fn error_policy(&self) -> &ErrorPolicy {
        &self.error_policy
    }

    /// Per-attempt timeout, if configured
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<TimeoutSettings> {
        self.timeout
    }

    /// Decorator factories, outermost first
    #[inline]
    #[must_use]
    pub fn decorators(&self) -> &[Arc<dyn DecoratorFactory>] {
        &self.decorators
    }
}

impl fmt::Debug for ExperimentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decorators: Vec<&str> = self.decorators.iter().map(|d| d.name()).collect();
        f.debug_struct("ExperimentDefinition")
            .field("contract", &self.contract)
            .field("trials", &self.trials)
            .field("selection", &self.selection)
            .field("error_policy", &self.error_policy)
            .field("timeout", &self.timeout)
            .field("decorators", &decorators)
            .finish()
    }
}

/// Builder for [`ExperimentDefinition`]
pub struct DefinitionBuilder {
    contract: ContractId,
    trials: Vec<Trial>,
    selection: Option<SelectionMode>,
    error_policy: ErrorPolicy,
    timeout: Option<TimeoutSettings>,
    decorators: Vec<Arc<dyn DecoratorFactory>>,
}

impl DefinitionBuilder {
    /// Create builder
    #[must_use]
    pub fn new(contract: impl Into<ContractId>) -> Self {
        Self {
            contract: contract.into(),
            trials: Vec::new(),
            selection: None,
            error_policy: ErrorPolicy::default(),
            timeout: None,
            decorators: Vec::new(),
        }
    }

    /// Register a trial
    #[must_use]
    pub fn add_trial(
        mut self,
        key: impl Into<TrialKey>,
        implementation: impl Into<ImplementationRef>,
        is_default: bool,
    ) -> Self {
        self.trials.push(Trial::new(key, implementation, is_default));
        self
    }

    /// Register the control trial
    #[inline]
    #[must_use]
    pub fn default_trial(self, key: impl Into<TrialKey>, implementation: impl Into<ImplementationRef>) -> Self {
        self.add_trial(key, implementation, true)
    }

    /// Register a non-default trial
    #[inline]
    #[must_use]
    pub fn trial(self, key: impl Into<TrialKey>, implementation: impl Into<ImplementationRef>) -> Self {
        self.add_trial(key, implementation, false)
    }

    /// Set the selection mode (last call wins)
    #[inline]
    #[must_use]
    pub fn use_selection_mode(mut self, mode: SelectionMode) -> Self {
        self.selection = Some(mode);
        self
    }

    /// Set the error policy (default: [`ErrorPolicy::Throw`])
    #[inline]
    #[must_use]
    pub fn use_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Append a decorator; earlier decorators wrap later ones
    #[inline]
    #[must_use]
    pub fn add_decorator(mut self, factory: Arc<dyn DecoratorFactory>) -> Self {
        self.decorators.push(factory);
        self
    }

    /// Bound every attempt by `after`
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, after: Duration, on_timeout: OnTimeout) -> Self {
        self.timeout = Some(TimeoutSettings::new(after, on_timeout));
        self
    }

    /// Validate and freeze
    ///
    /// # Errors
    /// Returns [`DefinitionError`] when the trial list is empty, a key is
    /// duplicated, there is not exactly one default trial, no selection mode
    /// is set or it does not fit the trials, or the error policy references
    /// an unknown trial.
    pub fn build(self) -> Result<ExperimentDefinition, DefinitionError> {
        let contract = self.contract;

        if self.trials.is_empty() {
            return Err(DefinitionError::NoTrials { contract });
        }

        let mut trials: IndexMap<TrialKey, Trial> = IndexMap::with_capacity(self.trials.len());
        for trial in self.trials {
            if trials.contains_key(trial.key()) {
                return Err(DefinitionError::DuplicateTrialKey {
                    key: trial.key().clone(),
                    contract,
                });
            }
            trials.insert(trial.key().clone(), trial);
        }

        let defaults: Vec<usize> = trials
            .values()
            .enumerate()
            .filter(|(_, t)| t.is_default())
            .map(|(i, _)| i)
            .collect();
        let default_index = match defaults.as_slice() {
            [index] => *index,
            [] => return Err(DefinitionError::NoDefaultTrial { contract }),
            many => {
                let keys = many.iter().map(|i| trials[*i].key().clone()).collect();
                return Err(DefinitionError::MultipleDefaultTrials { contract, keys });
            }
        };
        let trials = TrialSet::from_validated(trials, default_index);

        let Some(mode) = self.selection else {
            return Err(DefinitionError::MissingSelectionMode { contract });
        };
        let selection = mode.into_strategy(&contract, &trials)?;

        for key in self.error_policy.referenced_keys() {
            if !trials.contains(key.as_str()) {
                return Err(DefinitionError::UnknownPolicyTrial {
                    contract,
                    key: key.clone(),
                });
            }
        }

        tracing::debug!(
            contract = %contract,
            trials = trials.len(),
            selection = %selection.kind(),
            policy = self.error_policy.name(),
            "experiment definition built"
        );

        Ok(ExperimentDefinition {
            contract,
            trials,
            selection,
            error_policy: self.error_policy,
            timeout: self.timeout,
            decorators: self.decorators,
        })
    }
}
