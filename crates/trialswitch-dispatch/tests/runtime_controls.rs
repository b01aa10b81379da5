//! Cancellation, timeouts, kill switch and configuration

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use trialswitch_core::{
    CancellationToken, ContractId, ErrorPolicy, ExperimentDefinition, InvocationContext, OnTimeout,
    ScopeId, TrialKey,
};
use trialswitch_dispatch::{
    DispatchConfig, DispatchError, Dispatcher, InMemoryKillSwitch, Substitution, TelemetryKind,
};
use trialswitch_test_utils::{
    definition, fixed, registry, RecordingTelemetry, Scripted, ScriptedTrials, TelemetryEvent,
    TrialFailure,
};

async fn run(dispatcher: &Dispatcher, ctx: &InvocationContext) -> Result<String, DispatchError<TrialFailure>> {
    dispatcher.invoke(ctx, |trial: Scripted| async move { trial.run().await }).await
}

fn slow_definition(on_timeout: OnTimeout) -> ExperimentDefinition {
    ExperimentDefinition::define("search")
        .default_trial("bm25", "Bm25")
        .trial("vector", "Vector")
        .use_selection_mode(fixed("vector"))
        .with_timeout(Duration::from_millis(50), on_timeout)
        .build()
        .unwrap()
}

#[tokio::test]
async fn cancelled_before_selection() {
    let trials = ScriptedTrials::new("search", &["bm25", "vector"]);
    let telemetry = RecordingTelemetry::new();
    let dispatcher = Dispatcher::builder(
        registry([definition("search", &["bm25", "vector"], fixed("vector"), ErrorPolicy::RedirectAndReplayAny)]),
        Arc::new(trials.resolver()),
    )
    .with_telemetry(telemetry.clone())
    .build();

    let token = CancellationToken::new();
    token.cancel();
    let ctx = InvocationContext::new("search", "query", ScopeId::generate()).with_cancellation(token);

    let err = run(&dispatcher, &ctx).await.unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled { trial: None }));
    assert!(err.is_cancelled());
    assert_eq!(trials.total_calls(), 0);
    assert!(telemetry.events().is_empty());
    assert!(dispatcher.decision(&ContractId::new("search"), ctx.scope()).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancelled_during_attempt_skips_fallback() {
    let trials = ScriptedTrials::new("search", &["bm25", "vector"]);
    trials.get("vector").set_delay(Some(Duration::from_secs(5)));
    let telemetry = RecordingTelemetry::new();
    let dispatcher = Dispatcher::builder(
        registry([definition("search", &["bm25", "vector"], fixed("vector"), ErrorPolicy::RedirectAndReplayDefault)]),
        Arc::new(trials.resolver()),
    )
    .with_telemetry(telemetry.clone())
    .build();

    let token = CancellationToken::new();
    let ctx = InvocationContext::new("search", "query", ScopeId::generate()).with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = run(&dispatcher, &ctx).await.unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled { trial: Some(ref t) } if t.as_str() == "vector"));
    assert_eq!(trials.calls("bm25"), 0);
    assert!(telemetry.fallbacks().is_empty());
    assert_eq!(telemetry.count(&TelemetryEvent::Disposed), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_the_invocation() {
    let trials = ScriptedTrials::new("search", &["bm25", "vector"]);
    trials.get("vector").set_delay(Some(Duration::from_secs(1)));
    let dispatcher =
        Dispatcher::builder(registry([slow_definition(OnTimeout::Fail)]), Arc::new(trials.resolver())).build();

    let err = run(&dispatcher, &InvocationContext::new("search", "query", ScopeId::generate()))
        .await
        .unwrap_err();
    match err {
        DispatchError::TimedOut { trial, after } => {
            assert_eq!(trial, TrialKey::new("vector"));
            assert_eq!(after, Duration::from_millis(50));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(trials.calls("bm25"), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_falls_back_to_default() {
    let trials = ScriptedTrials::new("search", &["bm25", "vector"]);
    trials.get("vector").set_delay(Some(Duration::from_secs(1)));
    let telemetry = RecordingTelemetry::new();
    let dispatcher = Dispatcher::builder(
        registry([slow_definition(OnTimeout::FallbackToDefault)]),
        Arc::new(trials.resolver()),
    )
    .with_telemetry(telemetry.clone())
    .build();

    let answer = run(&dispatcher, &InvocationContext::new("search", "query", ScopeId::generate()))
        .await
        .unwrap();
    assert_eq!(answer, "bm25");
    assert_eq!(telemetry.fallbacks(), vec!["bm25".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn configured_default_timeout_applies() {
    let trials = ScriptedTrials::new("search", &["bm25", "vector"]);
    trials.get("vector").set_delay(Some(Duration::from_secs(10)));
    let config = DispatchConfig::from_toml_str(
        r#"
            default_attempt_timeout_ms = 250
            telemetry = "none"
        "#,
    )
    .unwrap();
    let dispatcher = Dispatcher::builder(
        registry([definition("search", &["bm25", "vector"], fixed("vector"), ErrorPolicy::Throw)]),
        Arc::new(trials.resolver()),
    )
    .with_config(config)
    .build();

    let err = run(&dispatcher, &InvocationContext::new("search", "query", ScopeId::generate()))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(dispatcher.config().default_attempt_timeout(), Some(Duration::from_millis(250)));
}

#[tokio::test]
async fn kill_switch_applies_mid_scope() {
    let trials = ScriptedTrials::new("checkout", &["legacy", "streamlined"]);
    let telemetry = RecordingTelemetry::new();
    let switch = Arc::new(InMemoryKillSwitch::new());
    let dispatcher = Dispatcher::builder(
        registry([definition("checkout", &["legacy", "streamlined"], fixed("streamlined"), ErrorPolicy::Throw)]),
        Arc::new(trials.resolver()),
    )
    .with_telemetry(telemetry.clone())
    .with_kill_switch(switch.clone())
    .build();
    let scope = dispatcher.begin_scope();
    let ctx = InvocationContext::new("checkout", "pay", scope.clone());

    assert_eq!(run(&dispatcher, &ctx).await.unwrap(), "streamlined");

    switch.disable_trial("checkout", "streamlined");
    assert_eq!(run(&dispatcher, &ctx).await.unwrap(), "legacy");
    assert_eq!(telemetry.fallbacks(), vec!["legacy".to_string()]);

    // the cached decision is untouched
    let cached = dispatcher.decision(&ContractId::new("checkout"), &scope).await.unwrap();
    assert_eq!(cached.trial_key.as_str(), "streamlined");

    switch.enable_trial(&ContractId::new("checkout"), &TrialKey::new("streamlined"));
    assert_eq!(run(&dispatcher, &ctx).await.unwrap(), "streamlined");
}

#[tokio::test]
async fn disabled_experiment_runs_default_only() {
    let trials = ScriptedTrials::new("checkout", &["legacy", "streamlined"]);
    let switch = Arc::new(InMemoryKillSwitch::new());
    switch.disable_experiment("checkout");
    let dispatcher = Dispatcher::builder(
        registry([definition(
            "checkout",
            &["legacy", "streamlined"],
            fixed("streamlined"),
            ErrorPolicy::RedirectAndReplayAny,
        )]),
        Arc::new(trials.resolver()),
    )
    .with_kill_switch(switch.clone())
    .build();
    let scope = dispatcher.begin_scope();

    let answer = run(&dispatcher, &InvocationContext::new("checkout", "pay", scope.clone())).await.unwrap();
    assert_eq!(answer, "legacy");
    assert_eq!(trials.calls("streamlined"), 0);
    assert!(dispatcher.decision(&ContractId::new("checkout"), &scope).await.is_none());

    switch.enable_experiment(&ContractId::new("checkout"));
    let answer = run(&dispatcher, &InvocationContext::new("checkout", "pay", scope.clone())).await.unwrap();
    assert_eq!(answer, "streamlined");
}

#[tokio::test]
async fn replays_skip_disabled_trials() {
    let trials = ScriptedTrials::new("pricing", &["control", "a", "b"]);
    trials.fail("b");
    let switch = Arc::new(InMemoryKillSwitch::new());
    switch.disable_trial("pricing", "a");
    let telemetry = RecordingTelemetry::new();
    let dispatcher = Dispatcher::builder(
        registry([definition("pricing", &["control", "a", "b"], fixed("b"), ErrorPolicy::RedirectAndReplayAny)]),
        Arc::new(trials.resolver()),
    )
    .with_telemetry(telemetry.clone())
    .with_kill_switch(switch)
    .build();

    let answer = run(&dispatcher, &InvocationContext::new("pricing", "quote", ScopeId::generate()))
        .await
        .unwrap();
    assert_eq!(answer, "control");
    assert_eq!(trials.calls("a"), 0);
    assert_eq!(telemetry.fallbacks(), vec!["control".to_string()]);
}

#[tokio::test]
async fn substitution_reason_is_exposed() {
    let trials = ScriptedTrials::new("checkout", &["legacy", "streamlined"]);
    let switch = Arc::new(InMemoryKillSwitch::new());
    switch.disable_trial("checkout", "streamlined");
    let telemetry = RecordingTelemetry::new();
    let dispatcher = Dispatcher::builder(
        registry([definition("checkout", &["legacy", "streamlined"], fixed("streamlined"), ErrorPolicy::Throw)]),
        Arc::new(trials.resolver()),
    )
    .with_kill_switch(switch)
    .with_telemetry(telemetry.clone())
    .build();

    run(&dispatcher, &InvocationContext::new("checkout", "pay", ScopeId::generate()))
        .await
        .unwrap();
    let started = telemetry.events().into_iter().next().unwrap();
    assert_eq!(
        started,
        TelemetryEvent::Started {
            contract: "checkout".into(),
            trial: "legacy".into(),
        }
    );
    assert_eq!(
        Substitution::TrialDisabled(TrialKey::new("streamlined")).reason(),
        "trial_disabled"
    );
}

#[tokio::test]
async fn typed_client_with_tracing_telemetry() {
    trialswitch_test_utils::init_tracing();
    let trials = ScriptedTrials::new("pricing", &["control", "tiered"]);
    trials.fail("tiered");
    let dispatcher = Arc::new(
        Dispatcher::builder(
            registry([definition(
                "pricing",
                &["control", "tiered"],
                fixed("tiered"),
                ErrorPolicy::RedirectAndReplayDefault,
            )]),
            Arc::new(trials.resolver()),
        )
        .with_config(DispatchConfig::new().with_telemetry(TelemetryKind::Tracing))
        .build(),
    );
    let client = dispatcher.client::<Scripted>("pricing");
    let scope = dispatcher.begin_scope();

    let answer: Result<String, DispatchError<TrialFailure>> =
        client.call("quote", &scope, |trial| async move { trial.run().await }).await;
    assert_eq!(answer.unwrap(), "control");
    assert_eq!(dispatcher.cache_stats().scope_count, 1);

    dispatcher.end_scope(&scope).await;
    assert_eq!(dispatcher.cache_stats().scope_count, 0);
}
