//! Implementation lookup
//!
//! The dispatcher never constructs implementations itself. It asks an
//! [`ImplementationResolver`] for the trial it picked and downcasts the
//! returned handle to the type the call site works with.

use crate::error::ResolveError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trialswitch_core::{ContractId, Trial, TrialKey};

/// Type-erased implementation instance
#[derive(Clone)]
pub struct ImplementationHandle {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ImplementationHandle {
    /// Wrap a value
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Clone out the value if it is a `T`
    #[inline]
    #[must_use]
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.inner.downcast_ref::<T>().cloned()
    }

    /// Name of the wrapped type
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ImplementationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationHandle")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Produces the implementation behind a trial
#[cfg_attr(test, mockall::automock)]
pub trait ImplementationResolver: Send + Sync {
    /// Resolve `trial` of `contract`
    ///
    /// # Errors
    /// [`ResolveError`] when the implementation is unknown or cannot be built.
    fn resolve(&self, contract: &ContractId, trial: &Trial) -> Result<ImplementationHandle, ResolveError>;
}

/// Resolver over a fixed table of instances
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    handles: HashMap<(ContractId, TrialKey), ImplementationHandle>,
}

impl StaticResolver {
    /// Create empty resolver
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` for `trial` of `contract`
    #[must_use]
    pub fn with<T: Any + Send + Sync>(
        mut self,
        contract: impl Into<ContractId>,
        trial: impl Into<TrialKey>,
        value: T,
    ) -> Self {
        self.insert(contract, trial, value);
        self
    }

    /// Register `value` for `trial` of `contract`, replacing any earlier one
    pub fn insert<T: Any + Send + Sync>(
        &mut self,
        contract: impl Into<ContractId>,
        trial: impl Into<TrialKey>,
        value: T,
    ) {
        self.handles
            .insert((contract.into(), trial.into()), ImplementationHandle::new(value));
    }

    /// Number of registered implementations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl ImplementationResolver for StaticResolver {
    fn resolve(&self, contract: &ContractId, trial: &Trial) -> Result<ImplementationHandle, ResolveError> {
        self.handles
            .get(&(contract.clone(), trial.key().clone()))
            .cloned()
            .ok_or_else(|| ResolveError::NotRegistered {
                contract: contract.clone(),
                trial: trial.key().clone(),
            })
    }
}
