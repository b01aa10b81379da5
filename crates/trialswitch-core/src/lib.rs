//! trialswitch core - experiment definitions for trial dispatch
//!
//! An *experiment* binds one service contract to several interchangeable
//! implementations (*trials*). This crate holds everything that is decided
//! before the first call is made:
//!
//! - Identifiers and the per-invocation [`InvocationContext`]
//! - [`ExperimentDefinition`] and its validating [`DefinitionBuilder`]
//! - Selection modes and the strategies they resolve to
//! - Error and timeout policy declarations
//! - Decorator contracts wrapping every attempt
//! - The immutable [`ExperimentRegistry`]
//!
//! Execution (caching, fallback, telemetry) lives in `trialswitch-dispatch`.
//!
//! # Example
//!
//! ```rust,ignore
//! use trialswitch_core::prelude::*;
//!
//! let definition = ExperimentDefinition::define("search")
//!     .default_trial("bm25", "search::Bm25")
//!     .trial("vector", "search::Vector")
//!     .use_selection_mode(SelectionMode::sticky_routing("search.ranker"))
//!     .use_error_policy(ErrorPolicy::RedirectAndReplayDefault)
//!     .build()?;
//!
//! let registry = ExperimentRegistry::builder().with(definition)?.build();
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod context;
pub mod decorator;
pub mod definition;
pub mod error;
pub mod ids;
pub mod policy;
pub mod registry;
pub mod selection;
pub mod trial;

pub use context::InvocationContext;
pub use decorator::{
    Attempt, AttemptFuture, AttemptResult, BoxError, Decorator, DecoratorFactory, ErasedOutput,
    Next, Terminal,
};
pub use definition::{DefinitionBuilder, ExperimentDefinition};
pub use error::{DefinitionError, SelectionError, SourceError};
pub use ids::{ContractId, ImplementationRef, ScopeId, TrialKey};
pub use policy::{ErrorPolicy, OnTimeout, TimeoutSettings};
pub use registry::{ExperimentRegistry, RegistryBuilder};
pub use selection::{
    sticky_bucket, BooleanFlagSource, ConfigValueSource, SelectionKind, SelectionMode,
    SelectionStrategy, TrialSelector, VariantFlagSource,
};
pub use trial::{Trial, TrialSet};

pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for defining experiments
    pub use crate::{
        BooleanFlagSource, ConfigValueSource, ContractId, Decorator, DecoratorFactory,
        ErrorPolicy, ExperimentDefinition, ExperimentRegistry, InvocationContext, OnTimeout,
        ScopeId, SelectionError, SelectionMode, SelectionStrategy, SourceError, TrialKey,
        TrialSelector, VariantFlagSource,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
