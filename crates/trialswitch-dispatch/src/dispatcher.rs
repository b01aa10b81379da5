//! Dispatcher: resolve, run, fall back
//!
//! # Invocation flow
//!
//! ```text
//! registry lookup -> kill switch -> decision cache (selection once per scope)
//!     -> telemetry scope -> [resolve implementation -> decorators -> trial]
//!     -> error policy (replays re-enter the bracketed part) -> telemetry dispose
//! ```
//!
//! Call sites pass a closure that receives the resolved implementation:
//!
//! ```rust,ignore
//! let quote = dispatcher
//!     .invoke(&ctx, |pricing: Arc<dyn Pricing>| async move { pricing.quote(&cart).await })
//!     .await?;
//! ```

use crate::cache::{DecisionCache, DecisionCacheStats};
use crate::config::DispatchConfig;
use crate::decision::{self, ResolvedDecision, Substitution};
use crate::error::{DispatchError, ResolveError};
use crate::kill_switch::{KillSwitch, NoKillSwitch};
use crate::pipeline::{self, describe};
use crate::policy::{AttemptError, PolicyExecutor};
use crate::resolver::ImplementationResolver;
use crate::telemetry::{sink_for, InvocationStart, TelemetrySink};
use std::error::Error;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use trialswitch_core::{
    Attempt, ContractId, Decorator, ExperimentDefinition, ExperimentRegistry, InvocationContext,
    ScopeId, TrialKey,
};

/// Routes contract invocations to trials
pub struct Dispatcher {
    registry: Arc<ExperimentRegistry>,
    resolver: Arc<dyn ImplementationResolver>,
    telemetry: Arc<dyn TelemetrySink>,
    kill_switch: Arc<dyn KillSwitch>,
    cache: DecisionCache,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Start building a dispatcher
    #[must_use]
    pub fn builder(
        registry: Arc<ExperimentRegistry>,
        resolver: Arc<dyn ImplementationResolver>,
    ) -> DispatcherBuilder {
        DispatcherBuilder::new(registry, resolver)
    }

    /// Invoke the experiment for `ctx.contract()` with `call`
    ///
    /// `call` receives the implementation of the chosen trial and may be
    /// invoked again for each replay the error policy allows.
    ///
    /// # Errors
    /// [`DispatchError`] describing the terminal failure.
    pub async fn invoke<T, R, E, F, Fut>(&self, ctx: &InvocationContext, call: F) -> Result<R, DispatchError<E>>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        E: Error + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, E>> + Send,
    {
        let Some(definition) = self.registry.get(ctx.contract().as_str()) else {
            tracing::error!("No experiment registered for contract '{}'", ctx.contract());
            return Err(DispatchError::DefinitionNotFound {
                contract: ctx.contract().clone(),
            });
        };
        let definition: &ExperimentDefinition = definition;

        let decision = self.decide::<E>(definition, ctx).await?;
        let selection = definition.selection();

        let mut telemetry = self.telemetry.start_invocation(&InvocationStart {
            contract: definition.contract(),
            method: ctx.method(),
            scope: ctx.scope(),
            selector: selection.kind(),
            trial: &decision.trial_key,
            candidates: &decision.candidate_keys,
        });
        telemetry.record_variant(selection.name(), selection.kind().as_str());
        if decision.is_substituted() {
            telemetry.record_fallback(&decision.trial_key);
        }

        let decorators: Vec<Box<dyn Decorator>> =
            definition.decorators().iter().map(|factory| factory.create(ctx)).collect();
        let decorators = decorators.as_slice();
        let timeout = self.attempt_timeout(definition);
        let call = &call;

        let executor = PolicyExecutor::new(definition, self.kill_switch.as_ref());
        let result = executor
            .execute(
                decision.trial_key.clone(),
                telemetry.as_mut(),
                ctx.cancellation(),
                move |trial, number| {
                    self.attempt::<T, R, E, F, Fut>(definition, ctx, decorators, trial, number, call, timeout)
                },
            )
            .await;

        match &result {
            Ok(_) => telemetry.record_success(),
            Err(error) => {
                tracing::debug!(
                    contract = %definition.contract(),
                    method = %ctx.method(),
                    kind = error.kind(),
                    "invocation failed"
                );
                telemetry.record_failure(error);
            }
        }
        telemetry.dispose();
        result
    }

    /// Typed client for one contract
    #[must_use]
    pub fn client<T>(self: &Arc<Self>, contract: impl Into<ContractId>) -> ContractClient<T> {
        ContractClient {
            dispatcher: Arc::clone(self),
            contract: contract.into(),
            _implementation: PhantomData,
        }
    }

    /// Open a new scope
    #[must_use]
    pub fn begin_scope(&self) -> ScopeId {
        ScopeId::generate()
    }

    /// End `scope`, evicting its cached decisions
    pub async fn end_scope(&self, scope: &ScopeId) {
        self.cache.end_scope(scope).await;
    }

    /// Cached decision for `(contract, scope)`, if one was made
    pub async fn decision(&self, contract: &ContractId, scope: &ScopeId) -> Option<Arc<ResolvedDecision>> {
        self.cache.decision(contract, scope).await
    }

    /// Decision cache statistics
    #[must_use]
    pub fn cache_stats(&self) -> DecisionCacheStats {
        self.cache.stats()
    }

    /// Decision cache backing this dispatcher
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    /// Registry the dispatcher routes through
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ExperimentRegistry> {
        &self.registry
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    async fn decide<E>(
        &self,
        definition: &ExperimentDefinition,
        ctx: &InvocationContext,
    ) -> Result<Arc<ResolvedDecision>, DispatchError<E>> {
        let contract = definition.contract();
        let default = definition.trials().default_key();

        if self.kill_switch.experiment_disabled(contract) {
            tracing::debug!("Experiment '{}' disabled, using default trial '{}'", contract, default);
            return Ok(Arc::new(ResolvedDecision::substituted(
                default.clone(),
                definition.selection().candidates().to_vec(),
                Substitution::ExperimentDisabled,
            )));
        }

        let decision = self
            .cache
            .get_or_resolve(contract, ctx.scope(), ctx.cancellation(), move || {
                decision::select(definition, ctx)
            })
            .await
            .map_err(|_| DispatchError::Cancelled { trial: None })?;

        if &decision.trial_key != default && self.kill_switch.trial_disabled(contract, &decision.trial_key) {
            tracing::warn!(
                "Trial '{}' of '{}' disabled, using default trial '{}'",
                decision.trial_key,
                contract,
                default
            );
            return Ok(Arc::new(ResolvedDecision::substituted(
                default.clone(),
                decision.candidate_keys.clone(),
                Substitution::TrialDisabled(decision.trial_key.clone()),
            )));
        }

        Ok(decision)
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt<T, R, E, F, Fut>(
        &self,
        definition: &ExperimentDefinition,
        ctx: &InvocationContext,
        decorators: &[Box<dyn Decorator>],
        trial: TrialKey,
        number: usize,
        call: &F,
        timeout: Option<Duration>,
    ) -> Result<R, AttemptError<E>>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        E: Error + Send + Sync + 'static,
        F: Fn(T) -> Fut + Sync,
        Fut: Future<Output = Result<R, E>> + Send,
    {
        let implementation = self
            .implementation::<T>(definition, &trial)
            .map_err(AttemptError::Unresolvable)?;

        tracing::debug!("Running {} for '{}'", describe(&trial, number), definition.contract());
        let attempt = Attempt::new(ctx, trial, number);
        pipeline::run_attempt(decorators, &attempt, implementation, call, timeout, ctx.cancellation()).await
    }

    fn implementation<T: Clone + 'static>(
        &self,
        definition: &ExperimentDefinition,
        key: &TrialKey,
    ) -> Result<T, ResolveError> {
        let contract = definition.contract();
        let trial = definition.trials().get(key.as_str()).ok_or_else(|| ResolveError::NotRegistered {
            contract: contract.clone(),
            trial: key.clone(),
        })?;
        let handle = self.resolver.resolve(contract, trial)?;
        handle.downcast::<T>().ok_or_else(|| ResolveError::TypeMismatch {
            implementation: trial.implementation().clone(),
            expected: std::any::type_name::<T>(),
        })
    }

    fn attempt_timeout(&self, definition: &ExperimentDefinition) -> Option<Duration> {
        definition
            .timeout()
            .map(|settings| settings.after)
            .or_else(|| self.config.default_attempt_timeout())
    }
}

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder {
    registry: Arc<ExperimentRegistry>,
    resolver: Arc<dyn ImplementationResolver>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    kill_switch: Arc<dyn KillSwitch>,
    config: DispatchConfig,
}

impl DispatcherBuilder {
    /// Create builder with no-op telemetry and no kill switch
    #[must_use]
    pub fn new(registry: Arc<ExperimentRegistry>, resolver: Arc<dyn ImplementationResolver>) -> Self {
        Self {
            registry,
            resolver,
            telemetry: None,
            kill_switch: Arc::new(NoKillSwitch),
            config: DispatchConfig::default(),
        }
    }

    /// With telemetry sink (overrides the configured kind)
    #[inline]
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// With kill switch
    #[inline]
    #[must_use]
    pub fn with_kill_switch(mut self, kill_switch: Arc<dyn KillSwitch>) -> Self {
        self.kill_switch = kill_switch;
        self
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Build
    #[must_use]
    pub fn build(self) -> Dispatcher {
        let telemetry = self.telemetry.unwrap_or_else(|| sink_for(self.config.telemetry));
        tracing::info!(
            "Dispatcher ready: {} experiments, decision cache {} entries / {}s idle",
            self.registry.len(),
            self.config.decision_cache.max_entries,
            self.config.decision_cache.scope_idle_secs
        );
        Dispatcher {
            registry: self.registry,
            resolver: self.resolver,
            telemetry,
            kill_switch: self.kill_switch,
            cache: DecisionCache::new(&self.config.decision_cache),
            config: self.config,
        }
    }
}

/// Typed facade over one contract
///
/// `T` is the implementation type every trial of the contract resolves to,
/// typically an `Arc<dyn Trait>`.
pub struct ContractClient<T> {
    dispatcher: Arc<Dispatcher>,
    contract: ContractId,
    _implementation: PhantomData<fn() -> T>,
}

impl<T> Clone for ContractClient<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            contract: self.contract.clone(),
            _implementation: PhantomData,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ContractClient<T> {
    /// Contract this client invokes
    #[inline]
    #[must_use]
    pub fn contract(&self) -> &ContractId {
        &self.contract
    }

    /// Context for `method` within `scope`
    #[must_use]
    pub fn context(&self, method: impl Into<String>, scope: ScopeId) -> InvocationContext {
        InvocationContext::new(self.contract.clone(), method, scope)
    }

    /// Invoke with a prepared context
    ///
    /// # Errors
    /// [`DispatchError`] describing the terminal failure.
    pub async fn invoke<R, E, F, Fut>(&self, ctx: &InvocationContext, call: F) -> Result<R, DispatchError<E>>
    where
        R: Send + 'static,
        E: Error + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, E>> + Send,
    {
        debug_assert_eq!(ctx.contract(), &self.contract, "context built for another contract");
        self.dispatcher.invoke(ctx, call).await
    }

    /// Invoke `method` within `scope`
    ///
    /// # Errors
    /// [`DispatchError`] describing the terminal failure.
    pub async fn call<R, E, F, Fut>(&self, method: &str, scope: &ScopeId, call: F) -> Result<R, DispatchError<E>>
    where
        R: Send + 'static,
        E: Error + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, E>> + Send,
    {
        let ctx = self.context(method, scope.clone());
        self.dispatcher.invoke(&ctx, call).await
    }
}
