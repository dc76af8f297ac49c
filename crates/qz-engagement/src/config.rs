//! Engine configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Accepted reconciliation settle window, in milliseconds
pub const RECONCILE_DELAY_RANGE_MS: std::ops::RangeInclusive<u64> = 500..=800;

/// Engagement engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    /// Lifetime of a cached unique-view count
    pub unique_view_ttl_secs: u64,
    /// Settle window before an authoritative stats refetch
    pub reconcile_delay_ms: u64,
    /// Maximum cached unique-view entries
    pub unique_cache_capacity: u64,
}

impl EngagementConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With unique-view cache TTL
    #[inline]
    #[must_use]
    pub fn with_unique_view_ttl_secs(mut self, secs: u64) -> Self {
        self.unique_view_ttl_secs = secs;
        self
    }

    /// With reconciliation delay
    #[inline]
    #[must_use]
    pub fn with_reconcile_delay_ms(mut self, ms: u64) -> Self {
        self.reconcile_delay_ms = ms;
        self
    }

    /// With unique-view cache capacity
    #[inline]
    #[must_use]
    pub fn with_unique_cache_capacity(mut self, capacity: u64) -> Self {
        self.unique_cache_capacity = capacity;
        self
    }

    /// Unique-view TTL as a duration
    #[inline]
    #[must_use]
    pub fn unique_view_ttl(&self) -> Duration {
        Duration::from_secs(self.unique_view_ttl_secs)
    }

    /// Reconciliation delay as a duration
    #[inline]
    #[must_use]
    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// - `ConfigError::OutOfRange` for a zero TTL or a delay outside 500–800 ms
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unique_view_ttl_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "unique_view_ttl_secs",
                value: 0,
                expected: ">= 1",
            });
        }
        if !RECONCILE_DELAY_RANGE_MS.contains(&self.reconcile_delay_ms) {
            return Err(ConfigError::OutOfRange {
                field: "reconcile_delay_ms",
                value: self.reconcile_delay_ms,
                expected: "500..=800",
            });
        }
        Ok(())
    }

    /// Parse and validate configuration from TOML; missing keys keep defaults
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML
    /// - `ConfigError::OutOfRange` when validation fails
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            unique_view_ttl_secs: 60,
            reconcile_delay_ms: 600,
            unique_cache_capacity: 10_000,
        }
    }
}
