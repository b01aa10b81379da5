//! Decorator pipeline runner and built-in decorators
//!
//! [`run_attempt`] erases the trial's output and error, runs the decorator
//! chain around the call under the attempt's timeout and the caller's
//! cancellation token, then restores the typed result.

use crate::policy::AttemptError;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use trialswitch_core::{
    Attempt, AttemptFuture, AttemptResult, BoxError, Decorator, DecoratorFactory, ErasedOutput,
    InvocationContext, Next, TrialKey,
};

fn erase<'a, R, E, Fut>(call: Fut) -> AttemptFuture<'a>
where
    R: Send + 'static,
    E: Error + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'a,
{
    Box::pin(async move {
        match call.await {
            Ok(output) => Ok(Box::new(output) as ErasedOutput),
            Err(error) => Err(Box::new(error) as BoxError),
        }
    })
}

fn restore<R, E>(result: AttemptResult) -> Result<R, AttemptError<E>>
where
    R: 'static,
    E: Error + 'static,
{
    match result {
        Ok(output) => output.downcast::<R>().map(|output| *output).map_err(|_| {
            AttemptError::Pipeline("decorator replaced the trial output with a value of another type".into())
        }),
        Err(error) => match error.downcast::<E>() {
            Ok(error) => Err(AttemptError::Failed(*error)),
            Err(foreign) => Err(AttemptError::Pipeline(foreign)),
        },
    }
}

/// Run one attempt of `implementation` through `decorators`
///
/// # Errors
/// [`AttemptError`] when the trial fails, times out, is cancelled, or a
/// decorator breaks the chain.
pub async fn run_attempt<T, R, E, F, Fut>(
    decorators: &[Box<dyn Decorator>],
    attempt: &Attempt,
    implementation: T,
    call: &F,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<R, AttemptError<E>>
where
    T: Clone + Send + Sync,
    R: Send + 'static,
    E: Error + Send + Sync + 'static,
    F: Fn(T) -> Fut + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
{
    let terminal = move || erase(call(implementation.clone()));
    let chain = Next::new(decorators, attempt, &terminal).run();

    let bounded = async {
        match timeout {
            Some(after) => tokio::time::timeout(after, chain)
                .await
                .map_err(|_| AttemptError::TimedOut(after)),
            None => Ok(chain.await),
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AttemptError::Cancelled),
        result = bounded => result.and_then(restore),
    }
}

/// Receives attempt durations from [`TimingDecorator`]
pub trait TimingObserver: Send + Sync {
    /// One attempt finished
    fn observe(&self, attempt: &Attempt, elapsed: Duration, succeeded: bool);
}

/// Measures every attempt
pub struct TimingDecorator {
    observer: Option<Arc<dyn TimingObserver>>,
}

#[async_trait::async_trait]
impl Decorator for TimingDecorator {
    fn name(&self) -> &str {
        "timing"
    }

    async fn around(&self, attempt: &Attempt, next: Next<'_>) -> AttemptResult {
        let started = Instant::now();
        let result = next.run().await;
        let elapsed = started.elapsed();

        tracing::debug!(
            contract = %attempt.contract,
            method = %attempt.method,
            trial = %attempt.trial,
            attempt = attempt.number,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            ok = result.is_ok(),
            "attempt timed"
        );
        if let Some(observer) = &self.observer {
            observer.observe(attempt, elapsed, result.is_ok());
        }
        result
    }
}

/// Factory for [`TimingDecorator`]
#[derive(Default, Clone)]
pub struct TimingDecoratorFactory {
    observer: Option<Arc<dyn TimingObserver>>,
}

impl TimingDecoratorFactory {
    /// Timing to `tracing` only
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report to `observer`
    #[inline]
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TimingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl DecoratorFactory for TimingDecoratorFactory {
    fn name(&self) -> &str {
        "timing"
    }

    fn create(&self, _ctx: &InvocationContext) -> Box<dyn Decorator> {
        Box::new(TimingDecorator {
            observer: self.observer.clone(),
        })
    }
}

/// Logs failed attempts with their invocation context
pub struct ErrorLoggingDecorator {
    identity: Option<String>,
}

#[async_trait::async_trait]
impl Decorator for ErrorLoggingDecorator {
    fn name(&self) -> &str {
        "error_logging"
    }

    async fn around(&self, attempt: &Attempt, next: Next<'_>) -> AttemptResult {
        let result = next.run().await;
        if let Err(error) = &result {
            tracing::error!(
                contract = %attempt.contract,
                method = %attempt.method,
                scope = %attempt.scope,
                trial = %attempt.trial,
                attempt = attempt.number,
                identity = self.identity.as_deref().unwrap_or("-"),
                error = %error,
                "trial attempt failed"
            );
        }
        result
    }
}

/// Factory for [`ErrorLoggingDecorator`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorLoggingDecoratorFactory;

impl DecoratorFactory for ErrorLoggingDecoratorFactory {
    fn name(&self) -> &str {
        "error_logging"
    }

    fn create(&self, ctx: &InvocationContext) -> Box<dyn Decorator> {
        Box::new(ErrorLoggingDecorator {
            identity: ctx.identity().map(str::to_string),
        })
    }
}

/// Attempt label used in logs
pub(crate) fn describe(trial: &TrialKey, number: usize) -> String {
    if number > 1 {
        format!("{trial} (replay {})", number - 1)
    } else {
        trial.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use trialswitch_core::ScopeId;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("declined")]
    struct Declined;

    struct Recorder(Mutex<Vec<(String, bool)>>);

    impl TimingObserver for Recorder {
        fn observe(&self, attempt: &Attempt, _elapsed: Duration, succeeded: bool) {
            self.0.lock().push((attempt.trial.to_string(), succeeded));
        }
    }

    struct Replace;

    #[async_trait::async_trait]
    impl Decorator for Replace {
        fn name(&self) -> &str {
            "replace"
        }

        async fn around(&self, _attempt: &Attempt, next: Next<'_>) -> AttemptResult {
            let _ = next.run().await;
            Err("decorator veto".into())
        }
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("pricing", "quote", ScopeId::new("s"))
    }

    fn attempt() -> Attempt {
        Attempt::new(&ctx(), TrialKey::new("tiered"), 1)
    }

    async fn quote(base: u32) -> Result<u32, Declined> {
        if base == 0 {
            Err(Declined)
        } else {
            Ok(base * 2)
        }
    }

    #[tokio::test]
    async fn typed_result_survives_the_chain() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let decorators = vec![
            TimingDecoratorFactory::new().with_observer(recorder.clone()).create(&ctx()),
            ErrorLoggingDecoratorFactory.create(&ctx()),
        ];
        let token = CancellationToken::new();

        let ok: Result<u32, AttemptError<Declined>> =
            run_attempt(&decorators, &attempt(), 21_u32, &quote, None, &token).await;
        assert_eq!(ok.unwrap(), 42);

        let err = run_attempt(&decorators, &attempt(), 0_u32, &quote, None, &token).await;
        assert!(matches!(err, Err(AttemptError::Failed(Declined))));

        assert_eq!(
            *recorder.0.lock(),
            vec![("tiered".to_string(), true), ("tiered".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn foreign_decorator_error_is_pipeline_failure() {
        let decorators: Vec<Box<dyn Decorator>> = vec![Box::new(Replace)];
        let result = run_attempt(&decorators, &attempt(), 1_u32, &quote, None, &CancellationToken::new()).await;
        match result {
            Err(AttemptError::Pipeline(error)) => assert_eq!(error.to_string(), "decorator veto"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let slow = |_: ()| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Declined>(())
        };
        let result = run_attempt(&[], &attempt(), (), &slow, Some(Duration::from_millis(50)), &CancellationToken::new()).await;
        assert!(matches!(result, Err(AttemptError::TimedOut(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let pending = |_: ()| std::future::pending::<Result<(), Declined>>();
        let result = run_attempt(&[], &attempt(), (), &pending, None, &token).await;
        assert!(matches!(result, Err(AttemptError::Cancelled)));
    }

    #[test]
    fn replay_labels() {
        assert_eq!(describe(&TrialKey::new("a"), 1), "a");
        assert_eq!(describe(&TrialKey::new("a"), 3), "a (replay 2)");
    }
}
