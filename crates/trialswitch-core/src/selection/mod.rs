//! Selection modes
//!
//! A [`SelectionMode`] describes *how* a trial is picked. At build time it is
//! turned into a [`SelectionStrategy`] bound to the experiment's trials, so a
//! definition that builds successfully always has a usable strategy.
//!
//! # Modes
//!
//! - [`SelectionKind::BooleanFlag`]: `true` picks the single non-default trial
//! - [`SelectionKind::ConfigValue`]: the raw config value is the trial key
//! - [`SelectionKind::VariantFlag`]: the variant name is the trial key
//! - [`SelectionKind::StickyRouting`]: stable hash of caller identity
//! - [`SelectionKind::Custom`]: external [`TrialSelector`]

mod custom;
mod flags;
mod sticky;

pub use custom::{CustomStrategy, FnSelector, TrialSelector};
pub use flags::{BooleanFlagStrategy, ConfigValueStrategy, VariantFlagStrategy};
pub use sticky::{sticky_bucket, StickyRoutingStrategy};

use crate::context::InvocationContext;
use crate::error::{DefinitionError, SelectionError, SourceError};
use crate::ids::{ContractId, TrialKey};
use crate::trial::TrialSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Selection mode family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    /// Named boolean flag
    BooleanFlag,
    /// Named string configuration value
    ConfigValue,
    /// Named multi-valued flag
    VariantFlag,
    /// Identity hash
    StickyRouting,
    /// External rule
    Custom,
}

impl SelectionKind {
    /// Stable lowercase name (telemetry "source" label)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BooleanFlag => "boolean_flag",
            Self::ConfigValue => "config_value",
            Self::VariantFlag => "variant_flag",
            Self::StickyRouting => "sticky_routing",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean flag lookup
#[async_trait::async_trait]
pub trait BooleanFlagSource: Send + Sync {
    /// Evaluate the named flag for this invocation
    async fn is_enabled(&self, name: &str, ctx: &InvocationContext) -> Result<bool, SourceError>;
}

/// String configuration lookup
#[async_trait::async_trait]
pub trait ConfigValueSource: Send + Sync {
    /// Read the named value; `None` when unset
    async fn value(&self, name: &str, ctx: &InvocationContext) -> Result<Option<String>, SourceError>;
}

/// Multi-valued flag lookup
#[async_trait::async_trait]
pub trait VariantFlagSource: Send + Sync {
    /// Evaluate the named flag to a variant name; `None` when no variant applies
    async fn variant(&self, name: &str, ctx: &InvocationContext) -> Result<Option<String>, SourceError>;
}

/// Resolved selection strategy bound to one experiment's trials
#[async_trait::async_trait]
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    /// Mode family
    fn kind(&self) -> SelectionKind;

    /// Flag/key name the strategy reads
    fn name(&self) -> &str;

    /// Keys this strategy can produce, in a stable order
    fn candidates(&self) -> &[TrialKey];

    /// Pick a trial key for this invocation
    ///
    /// The returned key is not checked against the trial set; the dispatcher
    /// maps unknown keys to [`SelectionError::UnknownTrialKey`].
    async fn resolve(&self, ctx: &InvocationContext) -> Result<TrialKey, SelectionError>;
}

/// Selection mode descriptor supplied to the definition builder
#[derive(Clone)]
pub enum SelectionMode {
    /// Named boolean flag
    BooleanFlag {
        /// Flag name
        name: String,
        /// Flag source
        source: Arc<dyn BooleanFlagSource>,
    },
    /// Named configuration value
    ConfigValue {
        /// Config key
        name: String,
        /// Config source
        source: Arc<dyn ConfigValueSource>,
    },
    /// Named variant flag
    VariantFlag {
        /// Flag name
        name: String,
        /// Variant source
        source: Arc<dyn VariantFlagSource>,
    },
    /// Stable identity hash; `name` salts the hash
    StickyRouting {
        /// Routing name (hash salt)
        name: String,
    },
    /// External selector
    Custom {
        /// Selector name
        name: String,
        /// Selector
        selector: Arc<dyn TrialSelector>,
    },
}

impl SelectionMode {
    /// Boolean flag mode
    pub fn boolean_flag(name: impl Into<String>, source: Arc<dyn BooleanFlagSource>) -> Self {
        Self::BooleanFlag {
            name: name.into(),
            source,
        }
    }

    /// Config value mode
    pub fn config_value(name: impl Into<String>, source: Arc<dyn ConfigValueSource>) -> Self {
        Self::ConfigValue {
            name: name.into(),
            source,
        }
    }

    /// Variant flag mode
    pub fn variant_flag(name: impl Into<String>, source: Arc<dyn VariantFlagSource>) -> Self {
        Self::VariantFlag {
            name: name.into(),
            source,
        }
    }

    /// Sticky routing mode
    pub fn sticky_routing(name: impl Into<String>) -> Self {
        Self::StickyRouting { name: name.into() }
    }

    /// Custom selector mode
    pub fn custom(name: impl Into<String>, selector: Arc<dyn TrialSelector>) -> Self {
        Self::Custom {
            name: name.into(),
            selector,
        }
    }

    /// Custom mode from a synchronous closure
    pub fn custom_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&InvocationContext, &[TrialKey]) -> Result<TrialKey, SelectionError> + Send + Sync + 'static,
    {
        Self::custom(name, Arc::new(FnSelector::new(f)))
    }

    /// Mode family
    #[must_use]
    pub fn kind(&self) -> SelectionKind {
        match self {
            Self::BooleanFlag { .. } => SelectionKind::BooleanFlag,
            Self::ConfigValue { .. } => SelectionKind::ConfigValue,
            Self::VariantFlag { .. } => SelectionKind::VariantFlag,
            Self::StickyRouting { .. } => SelectionKind::StickyRouting,
            Self::Custom { .. } => SelectionKind::Custom,
        }
    }

    /// Flag/key name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::BooleanFlag { name, .. }
            | Self::ConfigValue { name, .. }
            | Self::VariantFlag { name, .. }
            | Self::StickyRouting { name }
            | Self::Custom { name, .. } => name,
        }
    }

    /// Bind the mode to an experiment's trials
    ///
    /// # Errors
    /// - BooleanFlag without exactly one non-default trial
    /// - StickyRouting without any non-default trial
    pub(crate) fn into_strategy(
        self,
        contract: &ContractId,
        trials: &TrialSet,
    ) -> Result<Arc<dyn SelectionStrategy>, DefinitionError> {
        let all_keys: Vec<TrialKey> = trials.keys().cloned().collect();

        let strategy: Arc<dyn SelectionStrategy> = match self {
            Self::BooleanFlag { name, source } => {
                let mut others = trials.non_default_keys();
                let on = match (others.next(), others.next()) {
                    (Some(on), None) => on.clone(),
                    (None, _) => {
                        return Err(DefinitionError::invalid_selection(
                            contract,
                            format!("boolean flag '{name}' needs one non-default trial, found none"),
                        ))
                    }
                    (Some(_), Some(_)) => {
                        return Err(DefinitionError::invalid_selection(
                            contract,
                            format!(
                                "boolean flag '{name}' is ambiguous with {} non-default trials",
                                trials.len() - 1
                            ),
                        ))
                    }
                };
                Arc::new(BooleanFlagStrategy::new(name, source, on, trials.default_key().clone()))
            }
            Self::ConfigValue { name, source } => {
                Arc::new(ConfigValueStrategy::new(name, source, all_keys))
            }
            Self::VariantFlag { name, source } => {
                Arc::new(VariantFlagStrategy::new(name, source, all_keys))
            }
            Self::StickyRouting { name } => {
                let buckets: Vec<TrialKey> = trials.non_default_keys().cloned().collect();
                if buckets.is_empty() {
                    return Err(DefinitionError::invalid_selection(
                        contract,
                        format!("sticky routing '{name}' needs at least one non-default trial"),
                    ));
                }
                Arc::new(StickyRoutingStrategy::new(contract, name, buckets))
            }
            Self::Custom { name, selector } => Arc::new(CustomStrategy::new(name, selector, all_keys)),
        };

        Ok(strategy)
    }
}

impl fmt::Debug for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionMode")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}
