//! Traffic simulator
//!
//! Drives a `checkout` experiment with three trials through a real
//! [`Dispatcher`]. Trials fail at random with a seeded generator, so a run is
//! reproducible from its seed. The report shows how traffic was split
//! between trials and how often the error policy stepped in.

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Write as _;
use std::sync::Arc;
use trialswitch_core::{
    ErrorPolicy, ExperimentDefinition, ExperimentRegistry, InvocationContext, ScopeId,
    SelectionMode, TrialKey,
};
use trialswitch_dispatch::{
    sink_for, DispatchConfig, DispatchError, Dispatcher, ErrorLoggingDecoratorFactory,
    InvocationStart, InvocationTelemetry, StaticResolver, TelemetrySink, TimingDecoratorFactory,
};

/// Contract every simulated request invokes
pub const CONTRACT: &str = "checkout";

/// Trials of the simulated experiment, default first
pub const TRIALS: [&str; 3] = ["control", "express", "one_click"];

/// How the simulated experiment picks a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionChoice {
    /// Uniform random pick per scope
    Random,
    /// Identity hash, one identity per scope
    Sticky,
}

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Invocations to run
    pub requests: u64,
    /// Scopes the invocations are spread over
    pub scopes: u64,
    /// Probability that a single trial call fails
    pub failure_rate: f64,
    /// Error policy of the simulated experiment
    pub policy: ErrorPolicy,
    /// Selection mode of the simulated experiment
    pub selection: SelectionChoice,
    /// Dispatcher settings (cache bounds, timeout, telemetry backend)
    pub dispatch: DispatchConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            requests: 1000,
            scopes: 100,
            failure_rate: 0.1,
            policy: ErrorPolicy::RedirectAndReplayDefault,
            selection: SelectionChoice::Random,
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulatorReport {
    /// Seed the run was started with
    pub seed: u64,
    /// Invocations issued
    pub requests: u64,
    /// Scopes the invocations were spread over
    pub scopes: u64,
    /// Error policy name
    pub policy: String,
    /// Selection mode name
    pub selection: String,
    /// Invocations that returned a value
    pub succeeded: u64,
    /// Invocations that ended in a [`DispatchError`]
    pub failed: u64,
    /// Terminal failures by error kind
    pub failures: BTreeMap<String, u64>,
    /// First-attempt trial per invocation
    pub selected: BTreeMap<String, u64>,
    /// Trial that produced the successful answer
    pub served: BTreeMap<String, u64>,
    /// Replays and substitutions per target trial
    pub fallbacks: BTreeMap<String, u64>,
    /// Decisions cached before the scopes ended
    pub decisions: u64,
}

impl SimulatorReport {
    /// Share of invocations that succeeded
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 1.0;
        }
        self.succeeded as f64 / self.requests as f64
    }

    /// Total fallbacks recorded
    #[must_use]
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.values().sum()
    }

    /// Human-readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== trialswitch simulation ===\n");
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Requests: {} over {} scopes", self.requests, self.scopes);
        let _ = writeln!(report, "Policy: {}", self.policy);
        let _ = writeln!(report, "Selection: {}", self.selection);
        let _ = writeln!(report, "Decisions cached: {}", self.decisions);
        let _ = writeln!(
            report,
            "Succeeded: {} ({:.1}%)",
            self.succeeded,
            self.success_rate() * 100.0
        );
        let _ = writeln!(report, "Failed: {}", self.failed);
        let _ = writeln!(report, "Fallbacks: {}", self.fallback_count());

        let _ = writeln!(report, "\n{:<12} {:>10} {:>10} {:>10}", "trial", "selected", "served", "fallback");
        for trial in TRIALS {
            let _ = writeln!(
                report,
                "{:<12} {:>10} {:>10} {:>10}",
                trial,
                self.selected.get(trial).copied().unwrap_or(0),
                self.served.get(trial).copied().unwrap_or(0),
                self.fallbacks.get(trial).copied().unwrap_or(0),
            );
        }

        if !self.failures.is_empty() {
            let _ = writeln!(report, "\n=== Failures ===");
            for (kind, count) in &self.failures {
                let _ = writeln!(report, "{kind}: {count}");
            }
        }
        report
    }
}

/// Simulated trial failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{trial} declined the request")]
pub struct SimulatedFailure {
    /// Trial that failed
    pub trial: &'static str,
}

/// Trial implementation failing at a fixed rate
#[derive(Debug)]
pub struct SimulatedTrial {
    key: &'static str,
    failure_rate: f64,
    rng: Arc<Mutex<StdRng>>,
}

impl SimulatedTrial {
    fn handle(&self) -> Result<&'static str, SimulatedFailure> {
        if self.rng.lock().gen_bool(self.failure_rate) {
            Err(SimulatedFailure { trial: self.key })
        } else {
            Ok(self.key)
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    selected: BTreeMap<String, u64>,
    fallbacks: BTreeMap<String, u64>,
}

/// Telemetry sink counting trials, forwarding to the configured backend
struct CountingTelemetry {
    inner: Arc<dyn TelemetrySink>,
    tally: Arc<Mutex<Tally>>,
}

impl TelemetrySink for CountingTelemetry {
    fn start_invocation(&self, start: &InvocationStart<'_>) -> Box<dyn InvocationTelemetry> {
        *self.tally.lock().selected.entry(start.trial.to_string()).or_default() += 1;
        Box::new(CountingScope {
            inner: self.inner.start_invocation(start),
            tally: Arc::clone(&self.tally),
        })
    }
}

struct CountingScope {
    inner: Box<dyn InvocationTelemetry>,
    tally: Arc<Mutex<Tally>>,
}

impl InvocationTelemetry for CountingScope {
    fn record_variant(&mut self, name: &str, source: &str) {
        self.inner.record_variant(name, source);
    }

    fn record_fallback(&mut self, trial: &TrialKey) {
        *self.tally.lock().fallbacks.entry(trial.to_string()).or_default() += 1;
        self.inner.record_fallback(trial);
    }

    fn record_success(&mut self) {
        self.inner.record_success();
    }

    fn record_failure(&mut self, error: &(dyn Error + 'static)) {
        self.inner.record_failure(error);
    }

    fn dispose(self: Box<Self>) {
        self.inner.dispose();
    }
}

fn experiment(config: &SimulatorConfig, rng: &Arc<Mutex<StdRng>>) -> anyhow::Result<ExperimentDefinition> {
    let selection = match config.selection {
        SelectionChoice::Random => {
            let rng = Arc::clone(rng);
            SelectionMode::custom_fn("checkout.random", move |_: &InvocationContext, keys: &[TrialKey]| {
                let index = rng.lock().gen_range(0..keys.len());
                Ok(keys[index].clone())
            })
        }
        SelectionChoice::Sticky => SelectionMode::sticky_routing("checkout.sticky"),
    };

    let mut builder = ExperimentDefinition::define(CONTRACT);
    for (i, key) in TRIALS.iter().enumerate() {
        builder = builder.add_trial(*key, format!("checkout::{key}"), i == 0);
    }
    Ok(builder
        .use_selection_mode(selection)
        .use_error_policy(config.policy.clone())
        .add_decorator(Arc::new(TimingDecoratorFactory::new()))
        .add_decorator(Arc::new(ErrorLoggingDecoratorFactory))
        .build()?)
}

/// Run the simulation
///
/// # Errors
/// Fails when the experiment definition is rejected.
pub async fn run_simulator(config: SimulatorConfig) -> anyhow::Result<SimulatorReport> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&config.failure_rate),
        "failure rate must be within 0..=1, got {}",
        config.failure_rate
    );
    let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(config.seed)));
    let definition = experiment(&config, &rng)?;
    let registry = Arc::new(ExperimentRegistry::builder().with(definition)?.build());

    let mut resolver = StaticResolver::new();
    for key in TRIALS {
        resolver.insert(
            CONTRACT,
            key,
            Arc::new(SimulatedTrial {
                key,
                failure_rate: config.failure_rate,
                rng: Arc::clone(&rng),
            }),
        );
    }

    let tally = Arc::new(Mutex::new(Tally::default()));
    let telemetry = CountingTelemetry {
        inner: sink_for(config.dispatch.telemetry),
        tally: Arc::clone(&tally),
    };
    let dispatcher = Dispatcher::builder(registry, Arc::new(resolver))
        .with_config(config.dispatch.clone())
        .with_telemetry(Arc::new(telemetry))
        .build();

    let scopes: Vec<ScopeId> = (0..config.scopes.max(1)).map(|_| dispatcher.begin_scope()).collect();
    let mut report = SimulatorReport {
        seed: config.seed,
        requests: config.requests,
        scopes: scopes.len() as u64,
        policy: config.policy.name().to_string(),
        selection: match config.selection {
            SelectionChoice::Random => "random".into(),
            SelectionChoice::Sticky => "sticky".into(),
        },
        ..SimulatorReport::default()
    };

    tracing::info!(
        "Simulating {} requests over {} scopes (seed {})",
        config.requests,
        scopes.len(),
        config.seed
    );
    for request in 0..config.requests {
        let index = usize::try_from(request % scopes.len() as u64)?;
        let ctx = InvocationContext::new(CONTRACT, "place_order", scopes[index].clone())
            .with_identity(format!("customer-{index}"));
        let outcome: Result<&'static str, DispatchError<SimulatedFailure>> = dispatcher
            .invoke(&ctx, |trial: Arc<SimulatedTrial>| async move { trial.handle() })
            .await;
        match outcome {
            Ok(trial) => {
                report.succeeded += 1;
                *report.served.entry(trial.to_string()).or_default() += 1;
            }
            Err(error) => {
                report.failed += 1;
                *report.failures.entry(error.kind().to_string()).or_default() += 1;
            }
        }
    }

    dispatcher.cache().run_pending_tasks().await;
    report.decisions = dispatcher.cache_stats().entry_count;
    for scope in &scopes {
        dispatcher.end_scope(scope).await;
    }

    let tally = std::mem::take(&mut *tally.lock());
    report.selected = tally.selected;
    report.fallbacks = tally.fallbacks;
    Ok(report)
}

/// Sticky routing distribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StickyReport {
    /// Identities routed per pass
    pub identities: u64,
    /// Identities per variant
    pub counts: BTreeMap<String, u64>,
    /// Largest deviation from an even share, as a fraction
    pub max_skew: f64,
    /// Whether every identity got the same variant on a second pass
    pub stable: bool,
    /// Scopes still tracked by the decision cache after both passes
    pub open_scopes: usize,
}

/// Route `identities` callers over `variants` sticky variants
///
/// # Errors
/// Fails when `variants` is zero.
pub async fn run_sticky(identities: u64, variants: usize) -> anyhow::Result<StickyReport> {
    anyhow::ensure!(variants > 0, "sticky routing needs at least one variant");

    let keys: Vec<String> = (1..=variants).map(|i| format!("variant-{i}")).collect();
    let mut builder = ExperimentDefinition::define("sticky").default_trial("baseline", "Baseline");
    let mut resolver = StaticResolver::new().with("sticky", "baseline", String::from("baseline"));
    for key in &keys {
        builder = builder.trial(key.as_str(), key.as_str());
        resolver.insert("sticky", key.as_str(), key.clone());
    }
    let definition = builder.use_selection_mode(SelectionMode::sticky_routing("sticky.route")).build()?;
    let registry = Arc::new(ExperimentRegistry::builder().with(definition)?.build());
    let dispatcher = Dispatcher::builder(registry, Arc::new(resolver)).build();

    // one scope per routing call, ended right after so each pass re-resolves
    let route = |identity: String| {
        let dispatcher = &dispatcher;
        async move {
            let scope = dispatcher.begin_scope();
            let ctx = InvocationContext::new("sticky", "route", scope.clone()).with_identity(identity);
            let routed: Result<String, DispatchError<std::convert::Infallible>> =
                dispatcher.invoke(&ctx, |variant: String| async move { Ok(variant) }).await;
            dispatcher.end_scope(&scope).await;
            routed
        }
    };

    let mut assignments = Vec::new();
    let mut counts: BTreeMap<String, u64> = keys.iter().map(|k| (k.clone(), 0)).collect();
    for i in 0..identities {
        let variant = route(format!("identity-{i}")).await?;
        *counts.entry(variant.clone()).or_default() += 1;
        assignments.push(variant);
    }

    let mut stable = true;
    for (i, expected) in assignments.iter().enumerate() {
        if &route(format!("identity-{i}")).await? != expected {
            stable = false;
            break;
        }
    }

    let even = identities as f64 / variants as f64;
    let max_skew = if identities == 0 {
        0.0
    } else {
        counts
            .values()
            .map(|&count| (count as f64 - even).abs() / even)
            .fold(0.0, f64::max)
    };

    Ok(StickyReport {
        identities,
        counts,
        max_skew,
        stable,
        open_scopes: dispatcher.cache_stats().scope_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn same_seed_same_report() {
        let config = SimulatorConfig {
            requests: 300,
            scopes: 30,
            failure_rate: 0.3,
            ..SimulatorConfig::default()
        };
        let first = run_simulator(config.clone()).await.unwrap();
        let second = run_simulator(config).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.succeeded + first.failed, 300);
        assert_eq!(first.selected.values().sum::<u64>(), 300);
    }

    #[tokio::test]
    async fn no_failures_means_no_fallbacks() {
        let report = run_simulator(SimulatorConfig {
            requests: 200,
            failure_rate: 0.0,
            ..SimulatorConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(report.succeeded, 200);
        assert_eq!(report.fallback_count(), 0);
        assert_eq!(report.served, report.selected);
        assert_eq!(report.decisions, 100);
    }

    #[tokio::test]
    async fn throw_policy_never_replays() {
        let report = run_simulator(SimulatorConfig {
            requests: 200,
            failure_rate: 0.5,
            policy: ErrorPolicy::Throw,
            ..SimulatorConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(report.fallback_count(), 0);
        assert!(report.failed > 0);
        assert_eq!(report.failures.keys().collect::<Vec<_>>(), vec!["failed"]);
    }

    #[tokio::test]
    async fn replay_any_recovers_more_than_throw() {
        let base = SimulatorConfig {
            requests: 500,
            failure_rate: 0.4,
            ..SimulatorConfig::default()
        };
        let throw = run_simulator(SimulatorConfig {
            policy: ErrorPolicy::Throw,
            ..base.clone()
        })
        .await
        .unwrap();
        let any = run_simulator(SimulatorConfig {
            policy: ErrorPolicy::RedirectAndReplayAny,
            ..base
        })
        .await
        .unwrap();
        assert!(any.success_rate() > throw.success_rate());
        assert!(any.fallback_count() > 0);
    }

    #[tokio::test]
    async fn sticky_selection_skips_default() {
        let report = run_simulator(SimulatorConfig {
            requests: 200,
            failure_rate: 0.0,
            selection: SelectionChoice::Sticky,
            ..SimulatorConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(report.selected.get("control"), None);
        assert_eq!(report.selected.values().sum::<u64>(), 200);
    }

    #[tokio::test]
    async fn rejects_bad_failure_rate() {
        let result = run_simulator(SimulatorConfig {
            failure_rate: 1.5,
            ..SimulatorConfig::default()
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sticky_split_is_even_and_stable() {
        let report = run_sticky(3000, 3).await.unwrap();
        assert!(report.stable);
        assert_eq!(report.open_scopes, 0);
        assert_eq!(report.counts.values().sum::<u64>(), 3000);
        assert_eq!(report.counts.get("baseline"), None);
        assert!(report.max_skew < 0.1, "skew {}", report.max_skew);
    }

    #[tokio::test]
    async fn sticky_needs_variants() {
        assert!(run_sticky(10, 0).await.is_err());
    }
}
