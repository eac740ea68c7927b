//! Chart payload encoding
//!
//! This module encodes reports into the JSON payloads the dashboard charts
//! consume. Hourly profiles are flattened into one 24-slot array per
//! percentile, and every payload carries producer metadata.

use crate::error::ComputeError;
use crate::population::PopulationReport;
use crate::profile::BiomarkerProfile;
use crate::ranges::ResolvedRanges;
use crate::types::{BiomarkerReport, BiomarkerStatistics, RangeThresholds};
use crate::{FLUX_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload schema version
pub const PAYLOAD_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
    pub computed_at_utc: String,
}

/// One labelled band boundary set, lowest band first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandLimit {
    pub band: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// AGP percentile series, 24 hourly slots each
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgpSeries {
    pub percentile5: Vec<Option<f64>>,
    pub percentile25: Vec<Option<f64>>,
    pub percentile50: Vec<Option<f64>>,
    pub percentile75: Vec<Option<f64>>,
    pub percentile95: Vec<Option<f64>>,
}

/// Per-user chart payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgpPayload {
    pub payload_version: String,
    pub producer: Producer,
    pub username: String,
    pub statistics: BiomarkerStatistics,
    pub agp: AgpSeries,
    pub ranges: Vec<BandLimit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_audit: Option<ResolvedRanges>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationPayload {
    pub payload_version: String,
    pub producer: Producer,
    #[serde(flatten)]
    pub report: PopulationReport,
}

/// Encoder for chart payloads
pub struct PayloadEncoder {
    instance_id: String,
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    fn producer(&self) -> Producer {
        Producer {
            name: PRODUCER_NAME.to_string(),
            version: FLUX_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
            computed_at_utc: Utc::now().to_rfc3339(),
        }
    }

    pub fn encode_report(
        &self,
        username: &str,
        report: &BiomarkerReport,
        range_audit: Option<ResolvedRanges>,
    ) -> AgpPayload {
        let profile = BiomarkerProfile::for_biomarker(report.statistics.biomarker);
        let hourly = &report.hourly;

        AgpPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: self.producer(),
            username: username.to_string(),
            statistics: report.statistics.clone(),
            agp: AgpSeries {
                percentile5: hourly.series(|b| b.p5),
                percentile25: hourly.series(|b| b.p25),
                percentile50: hourly.series(|b| b.p50),
                percentile75: hourly.series(|b| b.p75),
                percentile95: hourly.series(|b| b.p95),
            },
            ranges: band_limits(profile, &report.thresholds),
            range_audit,
        }
    }

    pub fn encode_population(&self, report: PopulationReport) -> PopulationPayload {
        PopulationPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: self.producer(),
            report,
        }
    }

    /// Encode any payload to pretty JSON
    pub fn to_json<T: Serialize>(&self, payload: &T) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(payload).map_err(ComputeError::JsonError)
    }
}

/// Band boundaries labelled with the biomarker's band names
pub fn band_limits(profile: &BiomarkerProfile, t: &RangeThresholds) -> Vec<BandLimit> {
    let [very_low, low, target, high, very_high] = profile.band_labels;
    let limit = |band: &str, min: Option<f64>, max: Option<f64>| BandLimit {
        band: band.to_string(),
        min,
        max,
    };
    vec![
        limit(very_low, None, Some(t.very_low_max)),
        limit(low, Some(t.very_low_max), Some(t.low_max)),
        limit(target, Some(t.target_min), Some(t.target_max)),
        limit(high, Some(t.target_max), Some(t.high_max)),
        limit(very_high, Some(t.high_max), None),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CORTISOL_PROFILE, GLUCOSE_PROFILE};
    use crate::statistics::StatisticsEngine;
    use crate::types::{Observation, SensorChannel};
    use chrono::TimeZone;

    fn sample_report() -> BiomarkerReport {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap();
        let observations: Vec<Observation> = (0..4)
            .map(|i| Observation {
                timestamp: start + chrono::Duration::minutes(15 * i),
                value: 100.0 + i as f64 * 10.0,
                sensor: SensorChannel::Averaged,
            })
            .collect();
        StatisticsEngine::default().compute(&observations, None, &GLUCOSE_PROFILE)
    }

    #[test]
    fn test_agp_payload_shape() {
        let encoder = PayloadEncoder::with_instance_id("test-instance".to_string());
        let payload = encoder.encode_report("p-1", &sample_report(), None);
        let json = encoder.to_json(&payload).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["payloadVersion"], "1.0.0");
        assert_eq!(value["producer"]["name"], "biomarker-flux");
        assert_eq!(value["producer"]["instanceId"], "test-instance");
        assert_eq!(value["agp"]["percentile50"].as_array().unwrap().len(), 24);
        assert_eq!(value["agp"]["percentile50"][6], 115.0);
        assert!(value["agp"]["percentile50"][0].is_null());
        assert_eq!(value["statistics"]["mean"], 115.0);
        assert_eq!(value["statistics"]["percentInTarget"], 100);
        assert!(value.get("rangeAudit").is_none());
    }

    #[test]
    fn test_band_limits_use_profile_labels() {
        let limits = band_limits(&CORTISOL_PROFILE, &CORTISOL_PROFILE.default_thresholds);
        let labels: Vec<&str> = limits.iter().map(|l| l.band.as_str()).collect();
        assert_eq!(labels, vec!["veryLow", "low", "normal", "high", "veryHigh"]);
        assert_eq!(limits[0].min, None);
        assert_eq!(limits[4].max, None);
        assert_eq!(limits[2].max, Some(23.0));
    }
}
