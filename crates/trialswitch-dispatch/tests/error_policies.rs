//! Fallback behaviour per error policy

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use trialswitch_core::{ErrorPolicy, ExperimentDefinition, InvocationContext, ScopeId, TrialKey};
use trialswitch_dispatch::{DispatchError, Dispatcher};
use trialswitch_test_utils::{
    definition, fixed, registry, RecordingDecoratorFactory, RecordingTelemetry, Scripted,
    ScriptedTrials, TelemetryEvent, TrialFailure,
};

struct Harness {
    trials: ScriptedTrials,
    telemetry: Arc<RecordingTelemetry>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new(keys: &[&str], selected: &'static str, policy: ErrorPolicy) -> Self {
        Self::from_definition(keys, definition("pricing", keys, fixed(selected), policy))
    }

    fn from_definition(keys: &[&str], definition: ExperimentDefinition) -> Self {
        let trials = ScriptedTrials::new("pricing", keys);
        let telemetry = RecordingTelemetry::new();
        let dispatcher = Dispatcher::builder(registry([definition]), Arc::new(trials.resolver()))
            .with_telemetry(telemetry.clone())
            .build();
        Self {
            trials,
            telemetry,
            dispatcher,
        }
    }

    async fn run(&self) -> Result<String, DispatchError<TrialFailure>> {
        let ctx = InvocationContext::new("pricing", "quote", ScopeId::generate());
        self.dispatcher
            .invoke(&ctx, |trial: Scripted| async move { trial.run().await })
            .await
    }
}

fn failure(trial: &str) -> TrialFailure {
    TrialFailure {
        trial: trial.to_string(),
    }
}

fn keys(keys: &[&str]) -> Vec<TrialKey> {
    keys.iter().map(|k| TrialKey::new(*k)).collect()
}

#[tokio::test]
async fn replay_default_recovers_with_one_fallback() {
    let h = Harness::new(&["control", "tiered"], "tiered", ErrorPolicy::RedirectAndReplayDefault);
    h.trials.fail("tiered");

    assert_eq!(h.run().await.unwrap(), "control");
    assert_eq!(h.telemetry.fallbacks(), vec!["control".to_string()]);
    assert_eq!(h.trials.calls("tiered"), 1);
    assert_eq!(h.trials.calls("control"), 1);
    assert_eq!(h.telemetry.count(&TelemetryEvent::Success), 1);
    assert_eq!(h.telemetry.count(&TelemetryEvent::Disposed), 1);
}

#[tokio::test]
async fn replay_default_double_failure_surfaces_default_error() {
    let h = Harness::new(&["control", "tiered"], "tiered", ErrorPolicy::RedirectAndReplayDefault);
    h.trials.fail("tiered").fail("control");

    let err = h.run().await.unwrap_err();
    assert!(matches!(err, DispatchError::Failed { ref trial, .. } if trial.as_str() == "control"));
    assert_eq!(err.into_invocation_error(), Some(failure("control")));
    assert_eq!(h.trials.total_calls(), 2);
}

#[tokio::test]
async fn replay_default_does_not_retry_the_default() {
    let h = Harness::new(&["control", "tiered"], "control", ErrorPolicy::RedirectAndReplayDefault);
    h.trials.fail("control");

    let err = h.run().await.unwrap_err();
    assert_eq!(err.invocation_error(), Some(&failure("control")));
    assert_eq!(h.trials.calls("control"), 1);
    assert!(h.telemetry.fallbacks().is_empty());
}

#[tokio::test]
async fn replay_any_exhaustion_reports_last_failure() {
    let h = Harness::new(&["a", "b", "c"], "a", ErrorPolicy::RedirectAndReplayAny);
    h.trials.fail("a").fail("b").fail("c");

    match h.run().await.unwrap_err() {
        DispatchError::FallbackExhausted { attempted, last } => {
            assert_eq!(attempted, keys(&["a", "b", "c"]));
            assert_eq!(last, failure("c"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.telemetry.fallbacks(), vec!["b".to_string(), "c".to_string()]);
    assert_eq!(h.trials.total_calls(), 3);
}

#[tokio::test]
async fn replay_any_stops_at_first_success() {
    let h = Harness::new(&["a", "b", "c"], "b", ErrorPolicy::RedirectAndReplayAny);
    h.trials.fail("b");

    assert_eq!(h.run().await.unwrap(), "a");
    assert_eq!(h.trials.calls("c"), 0);
}

#[tokio::test]
async fn throw_propagates_without_reentry() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory = RecordingDecoratorFactory::new("audit", log.clone());
    let definition = ExperimentDefinition::define("pricing")
        .default_trial("control", "Control")
        .trial("tiered", "Tiered")
        .use_selection_mode(fixed("tiered"))
        .use_error_policy(ErrorPolicy::Throw)
        .add_decorator(factory.clone())
        .build()
        .unwrap();
    let h = Harness::from_definition(&["control", "tiered"], definition);
    h.trials.fail("tiered");

    let err = h.run().await.unwrap_err();
    assert!(matches!(err, DispatchError::Failed { ref source, .. } if *source == failure("tiered")));
    assert_eq!(h.trials.total_calls(), 1);
    assert!(h.telemetry.fallbacks().is_empty());
    assert_eq!(*log.lock(), vec!["audit:before:tiered", "audit:after:tiered"]);
    assert_eq!(h.telemetry.count(&TelemetryEvent::Failure(err.to_string())), 1);
}

#[tokio::test]
async fn named_redirect_replays_exactly_that_trial() {
    let h = Harness::new(
        &["control", "fast", "safe"],
        "fast",
        ErrorPolicy::RedirectAndReplay(TrialKey::new("safe")),
    );
    h.trials.fail("fast").fail("safe");

    let err = h.run().await.unwrap_err();
    assert_eq!(err.invocation_error(), Some(&failure("safe")));
    assert_eq!(h.trials.calls("control"), 0);
    assert_eq!(h.telemetry.fallbacks(), vec!["safe".to_string()]);
}

#[tokio::test]
async fn ordered_redirect_walks_the_list() {
    let h = Harness::new(
        &["control", "a", "b", "c"],
        "c",
        ErrorPolicy::RedirectAndReplayOrdered(keys(&["b", "control"])),
    );
    h.trials.fail("c").fail("b");

    assert_eq!(h.run().await.unwrap(), "control");
    assert_eq!(h.telemetry.fallbacks(), vec!["b".to_string(), "control".to_string()]);
    assert_eq!(h.trials.calls("a"), 0);
}

#[tokio::test]
async fn ordered_redirect_exhaustion() {
    let h = Harness::new(
        &["control", "a", "b"],
        "a",
        ErrorPolicy::RedirectAndReplayOrdered(keys(&["b"])),
    );
    h.trials.fail("a").fail("b");

    match h.run().await.unwrap_err() {
        DispatchError::FallbackExhausted { attempted, last } => {
            assert_eq!(attempted, keys(&["a", "b"]));
            assert_eq!(last, failure("b"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn replays_reenter_the_whole_decorator_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let outer = RecordingDecoratorFactory::new("outer", log.clone());
    let inner = RecordingDecoratorFactory::new("inner", log.clone());
    let definition = ExperimentDefinition::define("pricing")
        .default_trial("control", "Control")
        .trial("tiered", "Tiered")
        .use_selection_mode(fixed("tiered"))
        .use_error_policy(ErrorPolicy::RedirectAndReplayDefault)
        .add_decorator(outer.clone())
        .add_decorator(inner.clone())
        .build()
        .unwrap();
    let h = Harness::from_definition(&["control", "tiered"], definition);
    h.trials.fail("tiered");

    assert_eq!(h.run().await.unwrap(), "control");
    assert_eq!(
        *log.lock(),
        vec![
            "outer:before:tiered",
            "inner:before:tiered",
            "inner:after:tiered",
            "outer:after:tiered",
            "outer:before:control",
            "inner:before:control",
            "inner:after:control",
            "outer:after:control",
        ]
    );
    assert_eq!(outer.created(), 1);
    assert_eq!(inner.created(), 1);
}

#[tokio::test]
async fn missing_contract_is_reported() {
    let h = Harness::new(&["control"], "control", ErrorPolicy::Throw);
    let ctx = InvocationContext::new("billing", "charge", ScopeId::generate());
    let result = h
        .dispatcher
        .invoke(&ctx, |trial: Scripted| async move { trial.run().await })
        .await;
    assert!(matches!(result, Err(DispatchError::DefinitionNotFound { .. })));
    assert!(h.telemetry.events().is_empty());
}
