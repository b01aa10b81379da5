//! Testing utilities for trialswitch workspace
//!
//! Shared fixtures: scripted trials, mutable flag sources, recording
//! telemetry and decorators.

#![allow(missing_docs)]

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trialswitch_core::{
    Attempt, AttemptResult, BooleanFlagSource, ConfigValueSource, ContractId, Decorator,
    DecoratorFactory, ErrorPolicy, ExperimentDefinition, ExperimentRegistry, InvocationContext,
    Next, SelectionMode, SourceError, TrialKey, VariantFlagSource,
};
use trialswitch_dispatch::{InvocationStart, InvocationTelemetry, StaticResolver, TelemetrySink};

// ---------------------------------------------------------------------------
// Trials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trial '{trial}' failed")]
pub struct TrialFailure {
    pub trial: String,
}

/// Trial whose outcome is scripted by the test
#[derive(Debug)]
pub struct ScriptedTrial {
    key: String,
    failing: AtomicBool,
    calls: AtomicUsize,
    delay: RwLock<Option<Duration>>,
}

pub type Scripted = Arc<ScriptedTrial>;

impl ScriptedTrial {
    pub fn new(key: &str) -> Scripted {
        Arc::new(Self {
            key: key.to_string(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay: RwLock::new(None),
        })
    }

    pub fn failing(key: &str) -> Scripted {
        let trial = Self::new(key);
        trial.set_failing(true);
        trial
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Answer with the trial key, or fail
    pub async fn run(&self) -> Result<String, TrialFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(TrialFailure {
                trial: self.key.clone(),
            })
        } else {
            Ok(self.key.clone())
        }
    }
}

/// Scripted trials of one contract
#[derive(Debug, Clone)]
pub struct ScriptedTrials {
    contract: ContractId,
    trials: BTreeMap<String, Scripted>,
}

impl ScriptedTrials {
    pub fn new(contract: &str, keys: &[&str]) -> Self {
        Self {
            contract: ContractId::new(contract),
            trials: keys.iter().map(|k| ((*k).to_string(), ScriptedTrial::new(k))).collect(),
        }
    }

    pub fn get(&self, key: &str) -> &Scripted {
        &self.trials[key]
    }

    pub fn fail(&self, key: &str) -> &Self {
        self.get(key).set_failing(true);
        self
    }

    pub fn calls(&self, key: &str) -> usize {
        self.get(key).calls()
    }

    pub fn total_calls(&self) -> usize {
        self.trials.values().map(|t| t.calls()).sum()
    }

    pub fn resolver(&self) -> StaticResolver {
        let mut resolver = StaticResolver::new();
        for (key, trial) in &self.trials {
            resolver.insert(self.contract.clone(), key.as_str(), Arc::clone(trial));
        }
        resolver
    }
}

/// Experiment over `keys` (first key is the default)
pub fn definition(contract: &str, keys: &[&str], mode: SelectionMode, policy: ErrorPolicy) -> ExperimentDefinition {
    let mut builder = ExperimentDefinition::define(contract);
    for (i, key) in keys.iter().enumerate() {
        builder = builder.add_trial(*key, format!("{contract}::{key}"), i == 0);
    }
    builder
        .use_selection_mode(mode)
        .use_error_policy(policy)
        .build()
        .unwrap()
}

pub fn registry(definitions: impl IntoIterator<Item = ExperimentDefinition>) -> Arc<ExperimentRegistry> {
    let mut builder = ExperimentRegistry::builder();
    for definition in definitions {
        builder.register(definition).unwrap();
    }
    Arc::new(builder.build())
}

/// Custom selection mode always answering `key`
pub fn fixed(key: &'static str) -> SelectionMode {
    SelectionMode::custom_fn("fixed", move |_: &InvocationContext, _: &[TrialKey]| Ok(TrialKey::new(key)))
}

// ---------------------------------------------------------------------------
// Flag sources
// ---------------------------------------------------------------------------

/// Boolean flag flipped by the test
#[derive(Debug, Default)]
pub struct MutableFlag {
    enabled: AtomicBool,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

impl MutableFlag {
    pub fn new(enabled: bool) -> Arc<Self> {
        let flag = Self::default();
        flag.enabled.store(enabled, Ordering::SeqCst);
        Arc::new(flag)
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BooleanFlagSource for MutableFlag {
    async fn is_enabled(&self, name: &str, _ctx: &InvocationContext) -> Result<bool, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::new(format!("flag '{name}' unavailable")));
        }
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}

/// String value (config or variant) set by the test
#[derive(Debug, Default)]
pub struct MutableValue {
    value: RwLock<Option<String>>,
}

impl MutableValue {
    pub fn new(value: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            value: RwLock::new(value.map(str::to_string)),
        })
    }

    pub fn set(&self, value: Option<&str>) {
        *self.value.write() = value.map(str::to_string);
    }
}

#[async_trait::async_trait]
impl ConfigValueSource for MutableValue {
    async fn value(&self, _name: &str, _ctx: &InvocationContext) -> Result<Option<String>, SourceError> {
        Ok(self.value.read().clone())
    }
}

#[async_trait::async_trait]
impl VariantFlagSource for MutableValue {
    async fn variant(&self, _name: &str, _ctx: &InvocationContext) -> Result<Option<String>, SourceError> {
        Ok(self.value.read().clone())
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    Started { contract: String, trial: String },
    Variant { name: String, source: String },
    Fallback(String),
    Success,
    Failure(String),
    Disposed,
}

/// Sink keeping every event in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn fallbacks(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::Fallback(trial) => Some(trial.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &TelemetryEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn start_invocation(&self, start: &InvocationStart<'_>) -> Box<dyn InvocationTelemetry> {
        self.events.lock().push(TelemetryEvent::Started {
            contract: start.contract.to_string(),
            trial: start.trial.to_string(),
        });
        Box::new(RecordingScope {
            events: Arc::clone(&self.events),
        })
    }
}

struct RecordingScope {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl InvocationTelemetry for RecordingScope {
    fn record_variant(&mut self, name: &str, source: &str) {
        self.events.lock().push(TelemetryEvent::Variant {
            name: name.to_string(),
            source: source.to_string(),
        });
    }

    fn record_fallback(&mut self, trial: &TrialKey) {
        self.events.lock().push(TelemetryEvent::Fallback(trial.to_string()));
    }

    fn record_success(&mut self) {
        self.events.lock().push(TelemetryEvent::Success);
    }

    fn record_failure(&mut self, error: &(dyn Error + 'static)) {
        self.events.lock().push(TelemetryEvent::Failure(error.to_string()));
    }

    fn dispose(self: Box<Self>) {
        self.events.lock().push(TelemetryEvent::Disposed);
    }
}

// ---------------------------------------------------------------------------
// Decorators
// ---------------------------------------------------------------------------

/// Decorator factory logging `label:before/after:trial` lines
#[derive(Debug, Clone)]
pub struct RecordingDecoratorFactory {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    created: Arc<AtomicUsize>,
}

impl RecordingDecoratorFactory {
    pub fn new(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            created: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DecoratorFactory for RecordingDecoratorFactory {
    fn name(&self) -> &str {
        self.label
    }

    fn create(&self, _ctx: &InvocationContext) -> Box<dyn Decorator> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingDecorator {
            label: self.label,
            log: Arc::clone(&self.log),
        })
    }
}

struct RecordingDecorator {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Decorator for RecordingDecorator {
    fn name(&self) -> &str {
        self.label
    }

    async fn around(&self, attempt: &Attempt, next: Next<'_>) -> AttemptResult {
        self.log.lock().push(format!("{}:before:{}", self.label, attempt.trial));
        let result = next.run().await;
        self.log.lock().push(format!("{}:after:{}", self.label, attempt.trial));
        result
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Route `tracing` output to the test harness (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
