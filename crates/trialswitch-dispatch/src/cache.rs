//! Scoped decision cache using moka
//!
//! Holds one [`ResolvedDecision`] per `(contract, scope)`. The first caller
//! for a key runs the selection; concurrent callers for the same key wait
//! for it and share the result. Ending a scope evicts all of its decisions.
//! Capacity and idle expiry bound the cache when a scope is never ended.

use crate::config::DecisionCacheConfig;
use crate::decision::ResolvedDecision;
use dashmap::DashMap;
use moka::future::Cache;
use moka::notification::RemovalCause;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trialswitch_core::{ContractId, ScopeId};

type DecisionKey = (ContractId, ScopeId);

/// Resolution abandoned because the caller cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("decision resolution cancelled")]
pub struct DecisionCancelled;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionCacheStats {
    /// Cached decisions (approximate until pending maintenance runs)
    pub entry_count: u64,
    /// Scopes with at least one tracked decision
    pub scope_count: usize,
}

/// Per-scope decision store
#[derive(Debug, Clone)]
pub struct DecisionCache {
    decisions: Cache<DecisionKey, Arc<ResolvedDecision>>,
    scopes: Arc<DashMap<ScopeId, Vec<ContractId>>>,
}

impl DecisionCache {
    /// Create cache with the given bounds
    #[must_use]
    pub fn new(config: &DecisionCacheConfig) -> Self {
        let scopes: Arc<DashMap<ScopeId, Vec<ContractId>>> = Arc::new(DashMap::new());
        let index = Arc::clone(&scopes);
        let decisions = Cache::builder()
            .max_capacity(config.capacity())
            .time_to_idle(config.scope_idle())
            .eviction_listener(move |key: Arc<DecisionKey>, _value, cause| {
                // end_scope maintains the index for explicit invalidations
                if cause == RemovalCause::Explicit {
                    return;
                }
                let (contract, scope) = key.as_ref();
                if let Some(mut contracts) = index.get_mut(scope) {
                    contracts.retain(|c| c != contract);
                }
                index.remove_if(scope, |_, contracts| contracts.is_empty());
            })
            .build();
        Self { decisions, scopes }
    }

    /// Decision for `(contract, scope)`, resolving it on first use
    ///
    /// `resolve` runs at most once per key at a time and only for the caller
    /// that wins the race. A caller whose waited-on resolution was cancelled
    /// by someone else retries with its own `resolve` while `cancel` is live.
    ///
    /// # Errors
    /// [`DecisionCancelled`] once `cancel` fires before a decision exists.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        contract: &ContractId,
        scope: &ScopeId,
        cancel: &CancellationToken,
        resolve: F,
    ) -> Result<Arc<ResolvedDecision>, DecisionCancelled>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ResolvedDecision>,
    {
        let key: DecisionKey = (contract.clone(), scope.clone());
        loop {
            if cancel.is_cancelled() {
                return Err(DecisionCancelled);
            }

            let init = async {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(DecisionCancelled),
                    decision = resolve() => Ok(Arc::new(decision)),
                }
            };

            match self.decisions.try_get_with(key.clone(), init).await {
                Ok(decision) => {
                    self.track(contract, scope);
                    return Ok(decision);
                }
                Err(_) if cancel.is_cancelled() => return Err(DecisionCancelled),
                Err(_) => {
                    tracing::debug!(
                        contract = %contract,
                        scope = %scope,
                        "shared decision resolution was cancelled, retrying"
                    );
                }
            }
        }
    }

    /// Cached decision, if any
    pub async fn decision(&self, contract: &ContractId, scope: &ScopeId) -> Option<Arc<ResolvedDecision>> {
        self.decisions.get(&(contract.clone(), scope.clone())).await
    }

    /// Evict every decision of `scope`
    pub async fn end_scope(&self, scope: &ScopeId) {
        let Some((_, contracts)) = self.scopes.remove(scope) else {
            return;
        };
        for contract in &contracts {
            self.decisions.invalidate(&(contract.clone(), scope.clone())).await;
        }
        tracing::debug!("Ended scope {} ({} decisions evicted)", scope, contracts.len());
    }

    /// Run pending maintenance (expiry, eviction listeners)
    pub async fn run_pending_tasks(&self) {
        self.decisions.run_pending_tasks().await;
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> DecisionCacheStats {
        DecisionCacheStats {
            entry_count: self.decisions.entry_count(),
            scope_count: self.scopes.len(),
        }
    }

    fn track(&self, contract: &ContractId, scope: &ScopeId) {
        let mut contracts = self.scopes.entry(scope.clone()).or_default();
        if !contracts.contains(contract) {
            contracts.push(contract.clone());
        }
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(&DecisionCacheConfig::default())
    }
}
