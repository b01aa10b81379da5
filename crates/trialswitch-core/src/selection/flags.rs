//! Flag- and config-driven strategies

use super::{BooleanFlagSource, ConfigValueSource, SelectionKind, SelectionStrategy, VariantFlagSource};
use crate::context::InvocationContext;
use crate::error::SelectionError;
use crate::ids::TrialKey;
use std::fmt;
use std::sync::Arc;

/// `true` -> the non-default trial, `false` -> the default trial
pub struct BooleanFlagStrategy {
    name: String,
    source: Arc<dyn BooleanFlagSource>,
    /// `[default, non_default]`
    candidates: [TrialKey; 2],
}

impl BooleanFlagStrategy {
    pub(crate) fn new(
        name: String,
        source: Arc<dyn BooleanFlagSource>,
        on: TrialKey,
        off: TrialKey,
    ) -> Self {
        Self {
            name,
            source,
            candidates: [off, on],
        }
    }
}

#[async_trait::async_trait]
impl SelectionStrategy for BooleanFlagStrategy {
    fn kind(&self) -> SelectionKind {
        SelectionKind::BooleanFlag
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn candidates(&self) -> &[TrialKey] {
        &self.candidates
    }

    async fn resolve(&self, ctx: &InvocationContext) -> Result<TrialKey, SelectionError> {
        let enabled = self
            .source
            .is_enabled(&self.name, ctx)
            .await
            .map_err(|e| SelectionError::unavailable(&self.name, e.0))?;

        let [off, on] = &self.candidates;
        Ok(if enabled { on.clone() } else { off.clone() })
    }
}

impl fmt::Debug for BooleanFlagStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BooleanFlagStrategy")
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

/// Raw configuration value is the trial key
pub struct ConfigValueStrategy {
    name: String,
    source: Arc<dyn ConfigValueSource>,
    candidates: Vec<TrialKey>,
}

impl ConfigValueStrategy {
    pub(crate) fn new(name: String, source: Arc<dyn ConfigValueSource>, candidates: Vec<TrialKey>) -> Self {
        Self {
            name,
            source,
            candidates,
        }
    }
}

#[async_trait::async_trait]
impl SelectionStrategy for ConfigValueStrategy {
    fn kind(&self) -> SelectionKind {
        SelectionKind::ConfigValue
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn candidates(&self) -> &[TrialKey] {
        &self.candidates
    }

    async fn resolve(&self, ctx: &InvocationContext) -> Result<TrialKey, SelectionError> {
        match self.source.value(&self.name, ctx).await {
            Ok(Some(value)) => Ok(TrialKey::new(value)),
            Ok(None) => Err(SelectionError::unavailable(&self.name, "value is not set")),
            Err(e) => Err(SelectionError::unavailable(&self.name, e.0)),
        }
    }
}

impl fmt::Debug for ConfigValueStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigValueStrategy")
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

/// Variant name returned by a multi-valued flag is the trial key
pub struct VariantFlagStrategy {
    name: String,
    source: Arc<dyn VariantFlagSource>,
    candidates: Vec<TrialKey>,
}

impl VariantFlagStrategy {
    pub(crate) fn new(name: String, source: Arc<dyn VariantFlagSource>, candidates: Vec<TrialKey>) -> Self {
        Self {
            name,
            source,
            candidates,
        }
    }
}

#[async_trait::async_trait]
impl SelectionStrategy for VariantFlagStrategy {
    fn kind(&self) -> SelectionKind {
        SelectionKind::VariantFlag
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn candidates(&self) -> &[TrialKey] {
        &self.candidates
    }

    async fn resolve(&self, ctx: &InvocationContext) -> Result<TrialKey, SelectionError> {
        match self.source.variant(&self.name, ctx).await {
            Ok(Some(variant)) => Ok(TrialKey::new(variant)),
            Ok(None) => Err(SelectionError::unavailable(&self.name, "no variant assigned")),
            Err(e) => Err(SelectionError::unavailable(&self.name, e.0)),
        }
    }
}

impl fmt::Debug for VariantFlagStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantFlagStrategy")
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::ids::ScopeId;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(AtomicBool);

    #[async_trait::async_trait]
    impl BooleanFlagSource for Flag {
        async fn is_enabled(&self, _name: &str, _ctx: &InvocationContext) -> Result<bool, SourceError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    struct Down;

    #[async_trait::async_trait]
    impl ConfigValueSource for Down {
        async fn value(&self, _name: &str, _ctx: &InvocationContext) -> Result<Option<String>, SourceError> {
            Err(SourceError::new("connection refused"))
        }
    }

    struct Fixed(Option<&'static str>);

    #[async_trait::async_trait]
    impl VariantFlagSource for Fixed {
        async fn variant(&self, _name: &str, _ctx: &InvocationContext) -> Result<Option<String>, SourceError> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("checkout", "pay", ScopeId::generate())
    }

    #[tokio::test]
    async fn boolean_flag_maps_to_trials() {
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let strategy = BooleanFlagStrategy::new(
            "new-checkout".into(),
            flag.clone(),
            TrialKey::new("new"),
            TrialKey::new("old"),
        );

        assert_eq!(strategy.resolve(&ctx()).await.unwrap().as_str(), "old");
        flag.0.store(true, Ordering::SeqCst);
        assert_eq!(strategy.resolve(&ctx()).await.unwrap().as_str(), "new");
        assert_eq!(strategy.candidates().len(), 2);
    }

    #[tokio::test]
    async fn config_source_failure_is_unavailable() {
        let strategy = ConfigValueStrategy::new("checkout.impl".into(), Arc::new(Down), vec![]);
        let err = strategy.resolve(&ctx()).await.unwrap_err();
        assert!(matches!(err, SelectionError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn variant_passes_name_through() {
        let strategy = VariantFlagStrategy::new("checkout".into(), Arc::new(Fixed(Some("v2"))), vec![]);
        assert_eq!(strategy.resolve(&ctx()).await.unwrap().as_str(), "v2");

        let strategy = VariantFlagStrategy::new("checkout".into(), Arc::new(Fixed(None)), vec![]);
        assert!(strategy.resolve(&ctx()).await.is_err());
    }
}
