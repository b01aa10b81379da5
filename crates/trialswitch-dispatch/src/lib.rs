//! trialswitch dispatch - run experiments at call time
//!
//! Given an [`ExperimentRegistry`](trialswitch_core::ExperimentRegistry) and
//! an [`ImplementationResolver`], the [`Dispatcher`] picks a trial for every
//! invocation, runs it through the experiment's decorators and applies the
//! error policy when it fails.
//!
//! # Core Operations
//!
//! - **Decide**: one selection per `(contract, scope)`, shared by concurrent
//!   callers ([`DecisionCache`])
//! - **Run**: decorator chain around the trial, bounded by timeout and
//!   cancellation ([`pipeline`])
//! - **Recover**: replay on other trials per [`ErrorPolicy`](trialswitch_core::ErrorPolicy)
//!   ([`PolicyExecutor`])
//! - **Report**: one telemetry scope per invocation ([`TelemetrySink`])
//!
//! # Example
//!
//! ```rust,ignore
//! use trialswitch_dispatch::{Dispatcher, StaticResolver};
//!
//! let resolver = StaticResolver::new()
//!     .with("pricing", "control", Arc::new(Legacy) as Arc<dyn Pricing>)
//!     .with("pricing", "tiered", Arc::new(Tiered) as Arc<dyn Pricing>);
//! let dispatcher = Dispatcher::builder(registry, Arc::new(resolver)).build();
//!
//! let scope = dispatcher.begin_scope();
//! let ctx = InvocationContext::new("pricing", "quote", scope.clone());
//! let quote = dispatcher
//!     .invoke(&ctx, |p: Arc<dyn Pricing>| async move { p.quote(&cart).await })
//!     .await?;
//! dispatcher.end_scope(&scope).await;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod kill_switch;
pub mod pipeline;
pub mod policy;
pub mod resolver;
pub mod telemetry;

pub use cache::{DecisionCache, DecisionCacheStats, DecisionCancelled};
pub use config::{DecisionCacheConfig, DispatchConfig};
pub use decision::{ResolvedDecision, Substitution};
pub use dispatcher::{ContractClient, Dispatcher, DispatcherBuilder};
pub use error::{ConfigError, DispatchError, ResolveError};
pub use kill_switch::{InMemoryKillSwitch, KillSwitch, NoKillSwitch};
pub use pipeline::{
    ErrorLoggingDecorator, ErrorLoggingDecoratorFactory, TimingDecorator, TimingDecoratorFactory,
    TimingObserver,
};
pub use policy::{AttemptError, PolicyExecutor};
pub use resolver::{ImplementationHandle, ImplementationResolver, StaticResolver};
pub use telemetry::{
    sink_for, InvocationStart, InvocationTelemetry, MetricsTelemetry, NoopTelemetry,
    TelemetryKind, TelemetrySink, TracingTelemetry,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
