//! Engine configuration
//!
//! Tunables that the dashboard historically hardcoded: the wear time each
//! reading stands for, the per-user sample floor for population averages, and
//! how empty hour-of-day buckets are filled. Stored as TOML so operators can
//! edit it by hand.

use crate::error::ComputeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Minutes of wear time each reading is assumed to represent
pub const DEFAULT_MINUTES_PER_READING: f64 = 15.0;

/// Minimum valid observations before a user contributes to a cohort average
pub const DEFAULT_MIN_OBSERVATIONS: usize = 10;

/// Upper bound on users processed concurrently in a population request
pub const DEFAULT_MAX_PARALLEL_USERS: usize = 8;

/// How an hour-of-day bucket with no observations is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PercentileFallback {
    /// Every percentile in the empty bucket is `null`
    #[default]
    Null,
    /// Percentiles become `mean × {0.7, 0.85, 1.0, 1.15, 1.3}`
    MeanScaled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub minutes_per_reading: f64,
    pub min_observations: usize,
    pub max_parallel_users: usize,
    pub percentile_fallback: PercentileFallback,
    /// Offset applied to UTC timestamps before taking the hour of day
    pub utc_offset_minutes: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            minutes_per_reading: DEFAULT_MINUTES_PER_READING,
            min_observations: DEFAULT_MIN_OBSERVATIONS,
            max_parallel_users: DEFAULT_MAX_PARALLEL_USERS,
            percentile_fallback: PercentileFallback::Null,
            utc_offset_minutes: 0,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ComputeError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, or return the defaults if it doesn't exist
    pub fn load(path: &Path) -> Result<Self, ComputeError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ComputeError::InvalidConfig(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Serialize to pretty TOML
    pub fn to_toml_string(&self) -> Result<String, ComputeError> {
        toml::to_string_pretty(self).map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    fn validate(&self) -> Result<(), ComputeError> {
        if !(self.minutes_per_reading.is_finite() && self.minutes_per_reading > 0.0) {
            return Err(ComputeError::InvalidConfig(
                "minutes_per_reading must be a positive number".to_string(),
            ));
        }
        if self.max_parallel_users == 0 {
            return Err(ComputeError::InvalidConfig(
                "max_parallel_users must be at least 1".to_string(),
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ComputeError::InvalidConfig(
                "utc_offset_minutes must be within one day".to_string(),
            ));
        }
        Ok(())
    }
}
