//! Error types for experiment definitions and trial selection
//!
//! - [`DefinitionError`]: raised while building definitions or the registry.
//!   Always fatal, always at startup.
//! - [`SelectionError`]: raised by selection strategies at dispatch time.
//!   Recoverable; the dispatcher substitutes the default trial.
//! - [`SourceError`]: raised by external flag/config sources.

use crate::ids::{ContractId, TrialKey};

/// Invalid experiment definition (build-time only)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// No trials registered
    #[error("experiment '{contract}' has no trials")]
    NoTrials { contract: ContractId },

    /// Same key registered twice
    #[error("experiment '{contract}' registers trial '{key}' more than once")]
    DuplicateTrialKey { contract: ContractId, key: TrialKey },

    /// No trial marked as default
    #[error("experiment '{contract}' has no default trial")]
    NoDefaultTrial { contract: ContractId },

    /// More than one trial marked as default
    #[error("experiment '{contract}' has several default trials: {keys:?}")]
    MultipleDefaultTrials {
        contract: ContractId,
        keys: Vec<TrialKey>,
    },

    /// `build()` called without a selection mode
    #[error("experiment '{contract}' has no selection mode")]
    MissingSelectionMode { contract: ContractId },

    /// Selection mode cannot be turned into a strategy for these trials
    #[error("experiment '{contract}': invalid selection mode: {reason}")]
    InvalidSelectionMode { contract: ContractId, reason: String },

    /// Error policy names a trial that is not registered
    #[error("experiment '{contract}': error policy references unknown trial '{key}'")]
    UnknownPolicyTrial { contract: ContractId, key: TrialKey },

    /// Two definitions registered for one contract
    #[error("contract '{0}' is already registered")]
    DuplicateContract(ContractId),

    /// Global registry installed twice
    #[error("global experiment registry is already installed")]
    GlobalAlreadyInstalled,
}

impl DefinitionError {
    /// Create invalid selection mode error
    pub fn invalid_selection(contract: &ContractId, reason: impl Into<String>) -> Self {
        Self::InvalidSelectionMode {
            contract: contract.clone(),
            reason: reason.into(),
        }
    }
}

/// Selection failure (recoverable)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    /// The flag/config source could not answer
    #[error("selection source '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    /// Selection produced a key that is not registered
    #[error("selection produced unknown trial key '{0}'")]
    UnknownTrialKey(TrialKey),

    /// Sticky routing needs a caller identity
    #[error("sticky routing '{name}' requires a caller identity")]
    MissingIdentity { name: String },

    /// Custom selector declined to pick a trial
    #[error("selector '{name}' rejected the invocation: {reason}")]
    Rejected { name: String, reason: String },
}

impl SelectionError {
    /// Create unavailable error
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by an external flag or config source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SourceError(pub String);

impl SourceError {
    /// Create source error from message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_error_display() {
        let err = DefinitionError::NoTrials {
            contract: ContractId::new("pricing"),
        };
        assert_eq!(err.to_string(), "experiment 'pricing' has no trials");
    }

    #[test]
    fn selection_error_display() {
        let err = SelectionError::UnknownTrialKey(TrialKey::new("v9"));
        assert!(err.to_string().contains("'v9'"));

        let err = SelectionError::unavailable("checkout.flag", "timeout");
        assert_eq!(
            err.to_string(),
            "selection source 'checkout.flag' unavailable: timeout"
        );
    }
}
