//! Error and timeout policy declarations
//!
//! Execution of these policies lives in the dispatch crate; this module only
//! describes them so definitions can be validated at build time.

use crate::ids::TrialKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when a trial invocation fails
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Propagate the failure unchanged
    #[default]
    Throw,

    /// Replay once on the default trial (unless the default itself failed)
    RedirectAndReplayDefault,

    /// Replay every other trial in registration order until one succeeds
    RedirectAndReplayAny,

    /// Replay once on the named trial
    RedirectAndReplay(TrialKey),

    /// Replay the named trials in the given order until one succeeds
    RedirectAndReplayOrdered(Vec<TrialKey>),
}

impl ErrorPolicy {
    /// Trial keys the policy refers to explicitly
    #[must_use]
    pub fn referenced_keys(&self) -> &[TrialKey] {
        match self {
            Self::RedirectAndReplay(key) => std::slice::from_ref(key),
            Self::RedirectAndReplayOrdered(keys) => keys,
            _ => &[],
        }
    }

    /// Whether exhausting the policy reports every attempted key
    #[inline]
    #[must_use]
    pub fn reports_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::RedirectAndReplayAny | Self::RedirectAndReplayOrdered(_)
        )
    }

    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Throw => "throw",
            Self::RedirectAndReplayDefault => "redirect_and_replay_default",
            Self::RedirectAndReplayAny => "redirect_and_replay_any",
            Self::RedirectAndReplay(_) => "redirect_and_replay",
            Self::RedirectAndReplayOrdered(_) => "redirect_and_replay_ordered",
        }
    }
}

/// Reaction to an attempt exceeding its time budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnTimeout {
    /// Surface a timeout error
    #[default]
    Fail,
    /// Replay once on the default trial
    FallbackToDefault,
}

/// Per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Budget for a single attempt
    pub after: Duration,
    /// Reaction when exceeded
    pub on_timeout: OnTimeout,
}

impl TimeoutSettings {
    /// Create settings
    #[inline]
    #[must_use]
    pub fn new(after: Duration, on_timeout: OnTimeout) -> Self {
        Self { after, on_timeout }
    }
}
