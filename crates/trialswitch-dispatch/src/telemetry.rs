//! Invocation telemetry
//!
//! Every invocation opens one [`InvocationTelemetry`] scope from the
//! configured [`TelemetrySink`], records what happened and disposes it. The
//! scope is owned by the invocation, so implementations need no locking for
//! per-call state.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Instant;
use trialswitch_core::{ContractId, ScopeId, SelectionKind, TrialKey};

/// What an invocation starts with
#[derive(Debug, Clone, Copy)]
pub struct InvocationStart<'a> {
    /// Contract being invoked
    pub contract: &'a ContractId,
    /// Operation name
    pub method: &'a str,
    /// Invocation scope
    pub scope: &'a ScopeId,
    /// Selection mode family of the experiment
    pub selector: SelectionKind,
    /// Trial chosen for the first attempt
    pub trial: &'a TrialKey,
    /// Keys the selection mode could have produced
    pub candidates: &'a [TrialKey],
}

/// Per-invocation telemetry scope
pub trait InvocationTelemetry: Send + Sync {
    /// Selection source that produced the trial
    fn record_variant(&mut self, name: &str, source: &str);

    /// Invocation is replayed (or substituted) on `trial`
    fn record_fallback(&mut self, trial: &TrialKey);

    /// Invocation succeeded
    fn record_success(&mut self);

    /// Invocation failed terminally
    fn record_failure(&mut self, error: &(dyn Error + 'static));

    /// Close the scope
    fn dispose(self: Box<Self>);
}

/// Opens telemetry scopes
pub trait TelemetrySink: Send + Sync {
    /// Open a scope for one invocation
    fn start_invocation(&self, start: &InvocationStart<'_>) -> Box<dyn InvocationTelemetry>;
}

/// Telemetry backend selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    /// Discard everything
    #[default]
    None,
    /// One structured `tracing` event per invocation
    Tracing,
    /// Counters and histograms through the `metrics` facade
    Metrics,
}

/// Sink that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn start_invocation(&self, _start: &InvocationStart<'_>) -> Box<dyn InvocationTelemetry> {
        Box::new(NoopTelemetry)
    }
}

impl InvocationTelemetry for NoopTelemetry {
    fn record_variant(&mut self, _name: &str, _source: &str) {}
    fn record_fallback(&mut self, _trial: &TrialKey) {}
    fn record_success(&mut self) {}
    fn record_failure(&mut self, _error: &(dyn Error + 'static)) {}
    fn dispose(self: Box<Self>) {}
}

/// Outcome shared by the built-in sinks
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Pending,
    Success,
    Failure(String),
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "unknown",
            Self::Success => "success",
            Self::Failure(_) => "failure",
        }
    }
}

/// Sink writing one `tracing` event per invocation
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn start_invocation(&self, start: &InvocationStart<'_>) -> Box<dyn InvocationTelemetry> {
        Box::new(TracingScope {
            contract: start.contract.clone(),
            method: start.method.to_string(),
            scope: start.scope.clone(),
            trial: start.trial.clone(),
            variant: None,
            fallbacks: Vec::new(),
            outcome: Outcome::Pending,
            started: Instant::now(),
        })
    }
}

struct TracingScope {
    contract: ContractId,
    method: String,
    scope: ScopeId,
    trial: TrialKey,
    variant: Option<(String, String)>,
    fallbacks: Vec<TrialKey>,
    outcome: Outcome,
    started: Instant,
}

impl InvocationTelemetry for TracingScope {
    fn record_variant(&mut self, name: &str, source: &str) {
        self.variant = Some((name.to_string(), source.to_string()));
    }

    fn record_fallback(&mut self, trial: &TrialKey) {
        self.fallbacks.push(trial.clone());
    }

    fn record_success(&mut self) {
        self.outcome = Outcome::Success;
    }

    fn record_failure(&mut self, error: &(dyn Error + 'static)) {
        self.outcome = Outcome::Failure(error.to_string());
    }

    fn dispose(self: Box<Self>) {
        let this = *self;
        let (variant, source) = this.variant.unwrap_or_default();
        let elapsed_ms = this.started.elapsed().as_secs_f64() * 1000.0;
        match &this.outcome {
            Outcome::Failure(error) => tracing::warn!(
                contract = %this.contract,
                method = %this.method,
                scope = %this.scope,
                trial = %this.trial,
                variant = %variant,
                source = %source,
                fallbacks = ?this.fallbacks,
                elapsed_ms,
                error = %error,
                "invocation failed"
            ),
            outcome => tracing::info!(
                contract = %this.contract,
                method = %this.method,
                scope = %this.scope,
                trial = %this.trial,
                variant = %variant,
                source = %source,
                fallbacks = ?this.fallbacks,
                elapsed_ms,
                outcome = outcome.label(),
                "invocation finished"
            ),
        }
    }
}

/// Metric names emitted by [`MetricsTelemetry`]
pub mod metric_names {
    /// Counter: invocations by contract, trial and outcome
    pub const INVOCATIONS: &str = "trialswitch_invocations_total";
    /// Counter: fallbacks by contract and target trial
    pub const FALLBACKS: &str = "trialswitch_fallbacks_total";
    /// Counter: terminal failures by contract and trial
    pub const FAILURES: &str = "trialswitch_failures_total";
    /// Histogram: invocation latency in seconds
    pub const INVOCATION_SECONDS: &str = "trialswitch_invocation_seconds";
}

/// Sink emitting counters and histograms via the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTelemetry;

impl TelemetrySink for MetricsTelemetry {
    fn start_invocation(&self, start: &InvocationStart<'_>) -> Box<dyn InvocationTelemetry> {
        Box::new(MetricsScope {
            contract: start.contract.to_string(),
            trial: start.trial.to_string(),
            outcome: Outcome::Pending,
            started: Instant::now(),
        })
    }
}

struct MetricsScope {
    contract: String,
    trial: String,
    outcome: Outcome,
    started: Instant,
}

impl InvocationTelemetry for MetricsScope {
    fn record_variant(&mut self, _name: &str, _source: &str) {}

    fn record_fallback(&mut self, trial: &TrialKey) {
        metrics::counter!(
            metric_names::FALLBACKS,
            "contract" => self.contract.clone(),
            "trial" => trial.to_string()
        )
        .increment(1);
    }

    fn record_success(&mut self) {
        self.outcome = Outcome::Success;
    }

    fn record_failure(&mut self, error: &(dyn Error + 'static)) {
        self.outcome = Outcome::Failure(error.to_string());
        metrics::counter!(
            metric_names::FAILURES,
            "contract" => self.contract.clone(),
            "trial" => self.trial.clone()
        )
        .increment(1);
    }

    fn dispose(self: Box<Self>) {
        let this = *self;
        let elapsed = this.started.elapsed().as_secs_f64();
        metrics::counter!(
            metric_names::INVOCATIONS,
            "contract" => this.contract.clone(),
            "trial" => this.trial.clone(),
            "outcome" => this.outcome.label()
        )
        .increment(1);
        metrics::histogram!(
            metric_names::INVOCATION_SECONDS,
            "contract" => this.contract,
            "trial" => this.trial
        )
        .record(elapsed);
    }
}

/// Build the sink for a configured kind
#[must_use]
pub fn sink_for(kind: TelemetryKind) -> std::sync::Arc<dyn TelemetrySink> {
    match kind {
        TelemetryKind::None => std::sync::Arc::new(NoopTelemetry),
        TelemetryKind::Tracing => std::sync::Arc::new(TracingTelemetry),
        TelemetryKind::Metrics => std::sync::Arc::new(MetricsTelemetry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("down")]
    struct Down;

    fn start<'a>(contract: &'a ContractId, scope: &'a ScopeId, trial: &'a TrialKey) -> InvocationStart<'a> {
        InvocationStart {
            contract,
            method: "quote",
            scope,
            selector: SelectionKind::BooleanFlag,
            trial,
            candidates: std::slice::from_ref(trial),
        }
    }

    #[test]
    fn builtin_sinks_accept_full_lifecycle() {
        let contract = ContractId::new("pricing");
        let scope = ScopeId::new("req-1");
        let trial = TrialKey::new("tiered");

        for kind in [TelemetryKind::None, TelemetryKind::Tracing, TelemetryKind::Metrics] {
            let mut scope_telemetry = sink_for(kind).start_invocation(&start(&contract, &scope, &trial));
            scope_telemetry.record_variant("pricing.tiered", "boolean_flag");
            scope_telemetry.record_fallback(&TrialKey::new("control"));
            scope_telemetry.record_failure(&Down);
            scope_telemetry.dispose();
        }
    }

    #[test]
    fn telemetry_kind_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: TelemetryKind,
        }
        let parsed: Wrapper = toml::from_str("kind = \"metrics\"").unwrap();
        assert_eq!(parsed.kind, TelemetryKind::Metrics);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::Pending.label(), "unknown");
        assert_eq!(Outcome::Failure("x".into()).label(), "failure");
    }
}
