//! Experiment registry
//!
//! Built once at startup from validated definitions and read-only afterwards.
//! Lookups are plain map reads with no locking.

use crate::definition::ExperimentDefinition;
use crate::error::DefinitionError;
use crate::ids::ContractId;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

static GLOBAL: OnceCell<Arc<ExperimentRegistry>> = OnceCell::new();

/// Collects definitions before freezing them into a registry
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    definitions: HashMap<ContractId, Arc<ExperimentDefinition>>,
}

impl RegistryBuilder {
    /// Create empty builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition
    ///
    /// # Errors
    /// [`DefinitionError::DuplicateContract`] if the contract already has one.
    pub fn register(&mut self, definition: ExperimentDefinition) -> Result<&mut Self, DefinitionError> {
        let contract = definition.contract().clone();
        if self.definitions.contains_key(&contract) {
            return Err(DefinitionError::DuplicateContract(contract));
        }
        tracing::info!("Registered experiment '{}' with {} trials", contract, definition.trials().len());
        self.definitions.insert(contract, Arc::new(definition));
        Ok(self)
    }

    /// Consuming variant of [`Self::register`] for chained construction
    ///
    /// # Errors
    /// [`DefinitionError::DuplicateContract`] if the contract already has one.
    pub fn with(mut self, definition: ExperimentDefinition) -> Result<Self, DefinitionError> {
        self.register(definition)?;
        Ok(self)
    }

    /// Freeze
    #[must_use]
    pub fn build(self) -> ExperimentRegistry {
        ExperimentRegistry {
            definitions: self.definitions,
        }
    }
}

/// Immutable map from contract to experiment definition
#[derive(Debug, Default)]
pub struct ExperimentRegistry {
    definitions: HashMap<ContractId, Arc<ExperimentDefinition>>,
}

impl ExperimentRegistry {
    /// Start a registry
    #[inline]
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Definition for `contract`
    #[inline]
    #[must_use]
    pub fn get(&self, contract: &str) -> Option<&Arc<ExperimentDefinition>> {
        self.definitions.get(contract)
    }

    /// Whether `contract` has a definition
    #[inline]
    #[must_use]
    pub fn contains(&self, contract: &str) -> bool {
        self.definitions.contains_key(contract)
    }

    /// Registered contracts, sorted
    #[must_use]
    pub fn contracts(&self) -> Vec<&ContractId> {
        let mut contracts: Vec<_> = self.definitions.keys().collect();
        contracts.sort();
        contracts
    }

    /// Number of definitions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Install as the process-wide registry
    ///
    /// # Errors
    /// [`DefinitionError::GlobalAlreadyInstalled`] on a second call.
    pub fn install_global(self) -> Result<Arc<Self>, DefinitionError> {
        let registry = Arc::new(self);
        GLOBAL
            .set(Arc::clone(&registry))
            .map_err(|_| DefinitionError::GlobalAlreadyInstalled)?;
        Ok(registry)
    }

    /// Process-wide registry, if installed
    #[inline]
    #[must_use]
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }
}
