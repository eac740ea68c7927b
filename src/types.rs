//! Core types for the Biomarker Flux engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: observations, resolved thresholds, statistics, and hourly profiles.
//! Everything here is built fresh per request and dropped with the response.

use crate::error::ComputeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Biomarker measured by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Biomarker {
    Glucose,
    Cortisol,
}

impl Biomarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Biomarker::Glucose => "glucose",
            Biomarker::Cortisol => "cortisol",
        }
    }
}

impl fmt::Display for Biomarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Biomarker {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glucose" => Ok(Biomarker::Glucose),
            "cortisol" => Ok(Biomarker::Cortisol),
            other => Err(ComputeError::UnknownBiomarker(other.to_string())),
        }
    }
}

/// Physical sensor channel an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    /// First sensor
    #[serde(rename = "sensor_1")]
    One,
    /// Second sensor
    #[serde(rename = "sensor_2")]
    Two,
    /// Mean of both channels (or the only one present), used by individual views
    Averaged,
}

/// One timestamped biomarker reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub sensor: SensorChannel,
}

/// Clinical condition that can select condition-specific reference ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Pregnancy,
    #[serde(rename = "type2_diabetes")]
    Type2Diabetes,
    Smoking,
    Drinking,
    Hypertension,
    /// Age below 18
    Pediatric,
}

impl Condition {
    pub const ALL: [Condition; 6] = [
        Condition::Pregnancy,
        Condition::Type2Diabetes,
        Condition::Smoking,
        Condition::Drinking,
        Condition::Hypertension,
        Condition::Pediatric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Pregnancy => "pregnancy",
            Condition::Type2Diabetes => "type2_diabetes",
            Condition::Smoking => "smoking",
            Condition::Drinking => "drinking",
            Condition::Hypertension => "hypertension",
            Condition::Pediatric => "pediatric",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical set of conditions derived from a user's attributes
pub type ConditionSet = BTreeSet<Condition>;

/// Five increasing band boundaries for one biomarker.
///
/// Bands: very low `< very_low_max`, low `< low_max`, target
/// `[target_min, target_max]`, high `> target_max`, very high `> high_max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeThresholds {
    pub very_low_max: f64,
    pub low_max: f64,
    pub target_min: f64,
    pub target_max: f64,
    pub high_max: f64,
}

impl RangeThresholds {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.very_low_max,
            self.low_max,
            self.target_min,
            self.target_max,
            self.high_max,
        ]
    }

    pub fn from_array(values: [f64; 5]) -> Self {
        Self {
            very_low_max: values[0],
            low_max: values[1],
            target_min: values[2],
            target_max: values[3],
            high_max: values[4],
        }
    }
}

/// Configured ranges for one (biomarker, condition) pair as stored upstream.
///
/// Boundaries may be missing or zeroed in the configuration store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeConfig {
    #[serde(default)]
    pub very_low_max: Option<f64>,
    #[serde(default)]
    pub low_max: Option<f64>,
    #[serde(default)]
    pub target_min: Option<f64>,
    #[serde(default)]
    pub target_max: Option<f64>,
    #[serde(default)]
    pub high_max: Option<f64>,
}

impl RangeConfig {
    pub fn as_array(&self) -> [Option<f64>; 5] {
        [
            self.very_low_max,
            self.low_max,
            self.target_min,
            self.target_max,
            self.high_max,
        ]
    }
}

impl From<RangeThresholds> for RangeConfig {
    fn from(t: RangeThresholds) -> Self {
        Self {
            very_low_max: Some(t.very_low_max),
            low_max: Some(t.low_max),
            target_min: Some(t.target_min),
            target_max: Some(t.target_max),
            high_max: Some(t.high_max),
        }
    }
}

/// Percentage of wear time spent in each band
///
/// `percent_low` and `percent_high` are cumulative: they include the very-low
/// and very-high readings respectively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandPercentages {
    pub percent_very_low: u32,
    pub percent_low: u32,
    pub percent_in_target: u32,
    pub percent_high: u32,
    pub percent_very_high: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Summary statistics for one user's readings of one biomarker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiomarkerStatistics {
    pub biomarker: Biomarker,
    pub reading_count: usize,
    pub wear_minutes: f64,
    /// Rounded to the biomarker's display precision
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    #[serde(flatten)]
    pub bands: BandPercentages,
    pub coefficient_of_variation: f64,
    /// Glucose management indicator (glucose only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gmi: Option<f64>,
    /// Estimated A1C (glucose only, equal to GMI)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a1c: Option<f64>,
    pub date_range: Option<DateRange>,
}

impl BiomarkerStatistics {
    /// All-zero block returned for an empty observation list.
    ///
    /// Glucose keeps zero GMI and A1C so the payload shape doesn't change.
    pub fn empty(biomarker: Biomarker) -> Self {
        let glycemic = (biomarker == Biomarker::Glucose).then_some(0.0);
        Self {
            biomarker,
            reading_count: 0,
            wear_minutes: 0.0,
            mean: 0.0,
            min: 0.0,
            max: 0.0,
            bands: BandPercentages::default(),
            coefficient_of_variation: 0.0,
            gmi: glycemic,
            a1c: glycemic,
            date_range: None,
        }
    }
}

/// p5/p25/p50/p75/p95 for one hour-of-day bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl PercentileBand {
    pub fn as_array(&self) -> [f64; 5] {
        [self.p5, self.p25, self.p50, self.p75, self.p95]
    }
}

/// Percentile bands for each local hour of day, all days collapsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyPercentileProfile {
    pub hours: [Option<PercentileBand>; 24],
}

impl Default for HourlyPercentileProfile {
    fn default() -> Self {
        Self { hours: [None; 24] }
    }
}

impl HourlyPercentileProfile {
    /// One percentile across all 24 hours, in chart order
    pub fn series(&self, select: fn(&PercentileBand) -> f64) -> Vec<Option<f64>> {
        self.hours.iter().map(|h| h.as_ref().map(select)).collect()
    }

    pub fn populated_hours(&self) -> usize {
        self.hours.iter().filter(|h| h.is_some()).count()
    }
}

/// Full per-user result: statistics, hourly profile, and the thresholds used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerReport {
    pub statistics: BiomarkerStatistics,
    pub hourly: HourlyPercentileProfile,
    pub thresholds: RangeThresholds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biomarker_from_str() {
        assert_eq!("Glucose".parse::<Biomarker>().unwrap(), Biomarker::Glucose);
        assert_eq!(" cortisol ".parse::<Biomarker>().unwrap(), Biomarker::Cortisol);
        assert!(matches!(
            "lactate".parse::<Biomarker>(),
            Err(ComputeError::UnknownBiomarker(_))
        ));
    }

    #[test]
    fn test_condition_serde_names() {
        let json = serde_json::to_string(&Condition::Type2Diabetes).unwrap();
        assert_eq!(json, "\"type2_diabetes\"");
        let parsed: Condition = serde_json::from_str("\"pediatric\"").unwrap();
        assert_eq!(parsed, Condition::Pediatric);
    }

    #[test]
    fn test_range_config_accepts_sparse_json() {
        let config: RangeConfig = serde_json::from_str(r#"{"lowMax": 63, "targetMax": 140}"#).unwrap();
        assert_eq!(config.low_max, Some(63.0));
        assert_eq!(config.target_max, Some(140.0));
        assert_eq!(config.very_low_max, None);
    }

    #[test]
    fn test_statistics_flattens_bands() {
        let mut stats = BiomarkerStatistics::empty(Biomarker::Glucose);
        stats.bands.percent_in_target = 70;
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["percentInTarget"], 70);
        assert_eq!(value["gmi"], 0.0);
        assert_eq!(value["a1c"], 0.0);

        let cortisol = serde_json::to_value(BiomarkerStatistics::empty(Biomarker::Cortisol)).unwrap();
        assert!(cortisol.get("gmi").is_none());
    }

    #[test]
    fn test_profile_series() {
        let mut profile = HourlyPercentileProfile::default();
        profile.hours[3] = Some(PercentileBand {
            p5: 1.0,
            p25: 2.0,
            p50: 3.0,
            p75: 4.0,
            p95: 5.0,
        });
        let medians = profile.series(|b| b.p50);
        assert_eq!(medians.len(), 24);
        assert_eq!(medians[3], Some(3.0));
        assert_eq!(medians[0], None);
        assert_eq!(profile.populated_hours(), 1);
    }
}
