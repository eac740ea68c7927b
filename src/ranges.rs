//! Reference-range resolution
//!
//! Picks the clinical bands that apply to one user: the configured ranges of
//! every condition the user matches, averaged boundary by boundary when more
//! than one applies. Falls back to the biomarker's hardcoded defaults when
//! nothing is configured.

use crate::attributes::AttributeProfile;
use crate::error::ComputeError;
use crate::profile::BiomarkerProfile;
use crate::schema::{DeviceAttributes, PersonalAttributes};
use crate::types::{Biomarker, Condition, ConditionSet, RangeConfig, RangeThresholds};
use serde::{Deserialize, Serialize};

/// Configuration store lookup for condition-specific ranges.
///
/// `Ok(None)` means the pair is simply not configured. `Err` is an outage and
/// is propagated to the caller.
pub trait RangeConfigLookup: Send + Sync {
    fn lookup(
        &self,
        biomarker: Biomarker,
        condition: Condition,
    ) -> Result<Option<RangeConfig>, ComputeError>;
}

/// Where the thresholds in a [`ResolvedRanges`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSource {
    Default,
    Condition,
    Averaged,
}

/// Resolved thresholds plus what produced them, for display and audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRanges {
    pub biomarker: Biomarker,
    pub thresholds: RangeThresholds,
    /// Conditions whose configured ranges contributed
    pub conditions: Vec<Condition>,
    pub source: RangeSource,
}

/// Resolves applicable ranges through an injected configuration lookup
pub struct RangeResolver<'a> {
    lookup: &'a dyn RangeConfigLookup,
}

impl<'a> RangeResolver<'a> {
    pub fn new(lookup: &'a dyn RangeConfigLookup) -> Self {
        Self { lookup }
    }

    /// Resolve ranges from raw attributes.
    ///
    /// `Ok(None)` when no matched condition has configured ranges; the
    /// statistics engine then uses the biomarker default.
    pub fn resolve(
        &self,
        personal: &PersonalAttributes,
        device: &DeviceAttributes,
        biomarker: Biomarker,
    ) -> Result<Option<RangeThresholds>, ComputeError> {
        let profile = AttributeProfile::derive(personal, device);
        Ok(self
            .resolve_conditions(&profile.conditions, biomarker)?
            .map(|r| r.thresholds))
    }

    /// Resolve ranges for an already canonical condition set.
    pub fn resolve_conditions(
        &self,
        conditions: &ConditionSet,
        biomarker: Biomarker,
    ) -> Result<Option<ResolvedRanges>, ComputeError> {
        let mut matched: Vec<(Condition, RangeConfig)> = Vec::new();
        for condition in conditions {
            match self.lookup.lookup(biomarker, *condition)? {
                Some(config) => matched.push((*condition, config)),
                None => log::debug!("no {} ranges configured for {}", biomarker, condition),
            }
        }

        let defaults = BiomarkerProfile::for_biomarker(biomarker).default_thresholds;
        let configs: Vec<RangeConfig> = matched.iter().map(|(_, c)| *c).collect();

        let source = match matched.len() {
            0 => return Ok(None),
            1 => RangeSource::Condition,
            _ => RangeSource::Averaged,
        };

        Ok(Some(ResolvedRanges {
            biomarker,
            thresholds: combine_configs(&configs, &defaults),
            conditions: matched.into_iter().map(|(c, _)| c).collect(),
            source,
        }))
    }

    /// Resolved ranges with the default substituted, for display.
    pub fn resolve_or_default(
        &self,
        conditions: &ConditionSet,
        biomarker: Biomarker,
    ) -> Result<ResolvedRanges, ComputeError> {
        Ok(self
            .resolve_conditions(conditions, biomarker)?
            .unwrap_or_else(|| ResolvedRanges {
                biomarker,
                thresholds: BiomarkerProfile::for_biomarker(biomarker).default_thresholds,
                conditions: Vec::new(),
                source: RangeSource::Default,
            }))
    }
}

/// Combine matched configurations into one threshold set.
///
/// A single configuration is used as-is. Several are averaged per boundary
/// and rounded to the nearest integer, skipping missing or non-positive
/// values. A boundary with no usable value anywhere takes the default.
pub fn combine_configs(configs: &[RangeConfig], defaults: &RangeThresholds) -> RangeThresholds {
    let fallback = defaults.as_array();
    let columns: Vec<[Option<f64>; 5]> = configs.iter().map(RangeConfig::as_array).collect();

    let mut combined = [0.0; 5];
    for (idx, slot) in combined.iter_mut().enumerate() {
        let valid: Vec<f64> = columns
            .iter()
            .filter_map(|c| c[idx])
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();

        *slot = match valid.as_slice() {
            [] => fallback[idx],
            [only] if configs.len() == 1 => *only,
            values => (values.iter().sum::<f64>() / values.len() as f64).round(),
        };
    }

    RangeThresholds::from_array(combined)
}
