//! Error types for dispatch
//!
//! [`DispatchError`] is generic over the trial's own error type so callers
//! can always get their original failure back through
//! [`DispatchError::into_invocation_error`].

use std::time::Duration;
use trialswitch_core::{BoxError, ContractId, ImplementationRef, TrialKey};

/// Runtime dispatch failure
#[derive(Debug, thiserror::Error)]
pub enum DispatchError<E> {
    /// No experiment registered for the contract
    #[error("no experiment registered for contract '{contract}'")]
    DefinitionNotFound {
        /// Contract that was invoked
        contract: ContractId,
    },

    /// Implementation for the chosen trial could not be constructed (never retried)
    #[error("implementation for trial '{trial}' of '{contract}' is unavailable: {source}")]
    ImplementationUnavailable {
        /// Contract that was invoked
        contract: ContractId,
        /// Trial whose implementation was requested
        trial: TrialKey,
        /// Resolver failure
        #[source]
        source: ResolveError,
    },

    /// Trial failed and the error policy did not replay it
    #[error("trial '{trial}' failed: {source}")]
    Failed {
        /// Trial that produced the error
        trial: TrialKey,
        /// Error returned by the trial
        #[source]
        source: E,
    },

    /// Every candidate the policy allowed has failed
    #[error("all fallback trials failed (attempted {attempted:?}): {last}")]
    FallbackExhausted {
        /// Keys in attempt order
        attempted: Vec<TrialKey>,
        /// Most recent failure
        #[source]
        last: E,
    },

    /// Attempt exceeded its time budget
    #[error("trial '{trial}' timed out after {after:?}")]
    TimedOut {
        /// Trial that timed out
        trial: TrialKey,
        /// Budget that was exceeded
        after: Duration,
    },

    /// Caller cancelled the invocation
    #[error("invocation cancelled")]
    Cancelled {
        /// Trial running when cancellation was observed, if any
        trial: Option<TrialKey>,
    },

    /// A decorator broke the chain with its own error or output
    #[error("decorator pipeline failed on trial '{trial}': {source}")]
    Pipeline {
        /// Trial being attempted
        trial: TrialKey,
        /// Error raised by a decorator
        #[source]
        source: BoxError,
    },
}

impl<E> DispatchError<E> {
    /// The trial's own error, when the failure came from a trial
    #[must_use]
    pub fn invocation_error(&self) -> Option<&E> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::FallbackExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Consume and return the trial's own error
    #[must_use]
    pub fn into_invocation_error(self) -> Option<E> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::FallbackExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Trial the error is attributed to
    #[must_use]
    pub fn trial(&self) -> Option<&TrialKey> {
        match self {
            Self::ImplementationUnavailable { trial, .. }
            | Self::Failed { trial, .. }
            | Self::TimedOut { trial, .. }
            | Self::Pipeline { trial, .. } => Some(trial),
            Self::FallbackExhausted { attempted, .. } => attempted.last(),
            Self::Cancelled { trial } => trial.as_ref(),
            Self::DefinitionNotFound { .. } => None,
        }
    }

    /// Check if the caller cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if an attempt timed out
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Short kind label for logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DefinitionNotFound { .. } => "definition_not_found",
            Self::ImplementationUnavailable { .. } => "implementation_unavailable",
            Self::Failed { .. } => "failed",
            Self::FallbackExhausted { .. } => "fallback_exhausted",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled { .. } => "cancelled",
            Self::Pipeline { .. } => "pipeline",
        }
    }
}

/// Failure to produce an implementation for a trial
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Nothing registered for the trial
    #[error("no implementation registered for '{contract}/{trial}'")]
    NotRegistered {
        /// Contract
        contract: ContractId,
        /// Trial
        trial: TrialKey,
    },

    /// Registered implementation has a different type than the call site expects
    #[error("implementation '{implementation}' is not a {expected}")]
    TypeMismatch {
        /// Implementation reference of the trial
        implementation: ImplementationRef,
        /// Type the call site asked for
        expected: &'static str,
    },

    /// Resolver-specific construction failure
    #[error("failed to construct '{implementation}': {reason}")]
    Factory {
        /// Implementation reference of the trial
        implementation: ImplementationRef,
        /// Failure description
        reason: String,
    },
}

impl ResolveError {
    /// Create factory error
    pub fn factory(implementation: &ImplementationRef, reason: impl Into<String>) -> Self {
        Self::Factory {
            implementation: implementation.clone(),
            reason: reason.into(),
        }
    }
}

/// Configuration loading failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for [`crate::DispatchConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value parsed but out of range
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending key
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn invocation_error_is_recoverable() {
        let err: DispatchError<Boom> = DispatchError::FallbackExhausted {
            attempted: vec![TrialKey::new("a"), TrialKey::new("b")],
            last: Boom,
        };
        assert_eq!(err.invocation_error(), Some(&Boom));
        assert_eq!(err.trial().map(TrialKey::as_str), Some("b"));
        assert_eq!(err.into_invocation_error(), Some(Boom));

        let err: DispatchError<Boom> = DispatchError::Cancelled { trial: None };
        assert!(err.is_cancelled());
        assert!(err.invocation_error().is_none());
    }

    #[test]
    fn display_includes_trial() {
        let err: DispatchError<Boom> = DispatchError::Failed {
            trial: TrialKey::new("fast"),
            source: Boom,
        };
        assert_eq!(err.to_string(), "trial 'fast' failed: boom");
        assert_eq!(err.kind(), "failed");
    }

    #[test]
    fn resolve_error_display() {
        let err = ResolveError::TypeMismatch {
            implementation: ImplementationRef::new("pricing::Tiered"),
            expected: "u32",
        };
        assert_eq!(err.to_string(), "implementation 'pricing::Tiered' is not a u32");
    }
}
