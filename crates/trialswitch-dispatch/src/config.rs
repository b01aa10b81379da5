//! Dispatcher configuration
//!
//! ```toml
//! default_attempt_timeout_ms = 2000
//! telemetry = "tracing"
//!
//! [decision_cache]
//! max_entries = 50000
//! scope_idle_secs = 120
//! ```

use crate::error::ConfigError;
use crate::telemetry::TelemetryKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime settings for a [`crate::Dispatcher`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Decision cache bounds
    pub decision_cache: DecisionCacheConfig,
    /// Attempt timeout for experiments that do not set their own
    pub default_attempt_timeout_ms: Option<u64>,
    /// Telemetry backend used when none is injected
    pub telemetry: TelemetryKind,
}

impl DispatchConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on malformed input, [`ConfigError::Invalid`]
    /// when a value is out of range.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decision_cache.max_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "decision_cache.max_entries",
                reason: "must be at least 1",
            });
        }
        if self.decision_cache.scope_idle_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "decision_cache.scope_idle_secs",
                reason: "must be at least 1",
            });
        }
        if self.default_attempt_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "default_attempt_timeout_ms",
                reason: "must be at least 1 when set",
            });
        }
        Ok(())
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// [`ConfigError`] when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&input)?;
        tracing::info!("Loaded dispatch config from {}", path.display());
        Ok(config)
    }

    /// With decision cache capacity
    #[inline]
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.decision_cache.max_entries = max_entries;
        self
    }

    /// With scope idle expiry
    #[inline]
    #[must_use]
    pub fn with_scope_idle(mut self, idle: Duration) -> Self {
        self.decision_cache.scope_idle_secs = idle.as_secs().max(1);
        self
    }

    /// With default attempt timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_attempt_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// With telemetry backend
    #[inline]
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryKind) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Default attempt timeout as a duration
    #[inline]
    #[must_use]
    pub fn default_attempt_timeout(&self) -> Option<Duration> {
        self.default_attempt_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            decision_cache: DecisionCacheConfig::default(),
            default_attempt_timeout_ms: None,
            telemetry: TelemetryKind::None,
        }
    }
}

/// Bounds for the scoped decision cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionCacheConfig {
    /// Maximum cached `(contract, scope)` decisions
    pub max_entries: u64,
    /// Seconds an unused decision survives without an end-of-scope signal
    pub scope_idle_secs: u64,
}

impl DecisionCacheConfig {
    /// Idle expiry as a duration, never below one second
    #[inline]
    #[must_use]
    pub fn scope_idle(&self) -> Duration {
        Duration::from_secs(self.scope_idle_secs.max(1))
    }

    /// Capacity, never below one entry
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.max_entries.max(1)
    }
}

impl Default for DecisionCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            scope_idle_secs: 300,
        }
    }
}
