//! Reading normalization
//!
//! This module turns raw sensor records into uniform observations:
//! - Data points found under either record layout
//! - Timestamps decoded from any of the historical encodings
//! - Sensor channels read under both field-name conventions
//! - Non-numeric readings dropped, never reported as errors

use crate::profile::BiomarkerProfile;
use crate::schema::{decode_number, extract_timestamp, RawSensorRecord};
use crate::types::{Observation, SensorChannel};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// How the two physical sensor channels are turned into observations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorView {
    /// One observation per present channel (population views)
    Separate,
    /// One observation per data point, averaging both channels (individual views)
    Merged,
}

/// Normalizer for one biomarker
#[derive(Debug, Clone)]
pub struct ReadingNormalizer {
    profile: &'static BiomarkerProfile,
    view: SensorView,
    fallback_time: Option<DateTime<Utc>>,
}

impl ReadingNormalizer {
    pub fn new(profile: &'static BiomarkerProfile, view: SensorView) -> Self {
        Self {
            profile,
            view,
            fallback_time: None,
        }
    }

    /// Pin the timestamp used for points whose own timestamp can't be decoded.
    ///
    /// Defaults to the wall clock at normalization time.
    pub fn with_fallback_time(mut self, fallback: DateTime<Utc>) -> Self {
        self.fallback_time = Some(fallback);
        self
    }

    /// Normalize one record. Output is in data-point order, not sorted.
    pub fn normalize(&self, record: &RawSensorRecord) -> Vec<Observation> {
        let mut observations = Vec::new();

        for point in record.data_points() {
            let [first, second] = self.channel_values(point);
            if first.is_none() && second.is_none() {
                continue;
            }

            let timestamp = self.point_timestamp(point);

            match self.view {
                SensorView::Separate => {
                    observations.extend(first.map(|value| Observation {
                        timestamp,
                        value,
                        sensor: SensorChannel::One,
                    }));
                    observations.extend(second.map(|value| Observation {
                        timestamp,
                        value,
                        sensor: SensorChannel::Two,
                    }));
                }
                SensorView::Merged => {
                    let value = match (first, second) {
                        (Some(a), Some(b)) => (a + b) / 2.0,
                        (Some(v), None) | (None, Some(v)) => v,
                        (None, None) => continue,
                    };
                    observations.push(Observation {
                        timestamp,
                        value,
                        sensor: SensorChannel::Averaged,
                    });
                }
            }
        }

        observations
    }

    /// Normalize every record and sort the combined result by timestamp.
    pub fn normalize_all(&self, records: &[RawSensorRecord]) -> Vec<Observation> {
        let mut observations: Vec<Observation> =
            records.iter().flat_map(|r| self.normalize(r)).collect();
        observations.sort_by_key(|o| o.timestamp);
        observations
    }

    fn channel_values(&self, point: &Value) -> [Option<f64>; 2] {
        [0, 1].map(|idx| {
            [self.profile.new_fields[idx], self.profile.old_fields[idx]]
                .iter()
                .filter_map(|field| point.get(*field))
                .find_map(decode_number)
        })
    }

    fn point_timestamp(&self, point: &Value) -> DateTime<Utc> {
        match extract_timestamp(point) {
            Some((ts, _)) => ts,
            None => {
                let now = self.fallback_time.unwrap_or_else(Utc::now);
                log::warn!(
                    "{} data point has no decodable timestamp, using {}",
                    self.profile.biomarker,
                    now.to_rfc3339()
                );
                now
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CORTISOL_PROFILE, GLUCOSE_PROFILE};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn points() -> Value {
        json!([
            {"timestamp": {"$date": {"$numberLong": "1705305600000"}}, "glucose_1": 100, "glucose_2": 110},
            {"timestamp": {"$date": "2024-01-15T08:15:00Z"}, "glucose1": {"$numberDouble": "120.5"}},
            {"timestamp": "2024-01-15T08:30:00Z", "glucose_2": "130"},
            {"timestamp": 1705308300, "glucose_1": "bad", "glucose_2": null},
            {"timestamp": 1705309200, "cortisol_1": 12.5}
        ])
    }

    #[test]
    fn test_separate_view_keeps_channels() {
        let record = RawSensorRecord::new(json!({"data": {"data_points": points()}}));
        let obs = ReadingNormalizer::new(&GLUCOSE_PROFILE, SensorView::Separate).normalize(&record);

        let summary: Vec<(f64, SensorChannel)> = obs.iter().map(|o| (o.value, o.sensor)).collect();
        assert_eq!(
            summary,
            vec![
                (100.0, SensorChannel::One),
                (110.0, SensorChannel::Two),
                (120.5, SensorChannel::One),
                (130.0, SensorChannel::Two),
            ]
        );
    }

    #[test]
    fn test_merged_view_averages() {
        let record = RawSensorRecord::new(json!({"data": {"data_points": points()}}));
        let obs = ReadingNormalizer::new(&GLUCOSE_PROFILE, SensorView::Merged).normalize(&record);

        let values: Vec<f64> = obs.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![105.0, 120.5, 130.0]);
        assert!(obs.iter().all(|o| o.sensor == SensorChannel::Averaged));
    }

    #[test]
    fn test_cortisol_fields() {
        let record = RawSensorRecord::new(json!({"data": {"data_points": points()}}));
        let obs = ReadingNormalizer::new(&CORTISOL_PROFILE, SensorView::Merged).normalize(&record);
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].value, 12.5);
    }

    #[test]
    fn test_new_and_old_layout_match() {
        let new = RawSensorRecord::new(json!({"data": {"data_points": points()}}));
        let old = RawSensorRecord::new(json!({"data_snapshot": {"data_points": points()}}));
        let normalizer = ReadingNormalizer::new(&GLUCOSE_PROFILE, SensorView::Separate);

        assert_eq!(normalizer.normalize(&new), normalizer.normalize(&old));
    }

    #[test]
    fn test_missing_points_is_empty() {
        let record = RawSensorRecord::new(json!({"metadata": {}}));
        let obs = ReadingNormalizer::new(&GLUCOSE_PROFILE, SensorView::Merged).normalize(&record);
        assert!(obs.is_empty());
    }

    #[test]
    fn test_undecodable_timestamp_uses_fallback() {
        let fallback = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        let record = RawSensorRecord::new(json!({
            "data": {"data_points": [{"timestamp": "not a date", "glucose_1": 90}]}
        }));
        let obs = ReadingNormalizer::new(&GLUCOSE_PROFILE, SensorView::Merged)
            .with_fallback_time(fallback)
            .normalize(&record);
        assert_eq!(obs[0].timestamp, fallback);
    }

    #[test]
    fn test_loose_timestamps_keep_their_time() {
        let fallback = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let normalizer =
            ReadingNormalizer::new(&GLUCOSE_PROFILE, SensorView::Merged).with_fallback_time(fallback);

        for ts in ["2024-01-15", "2024-01-15T08:00:00+0000", "1705305600", "2024-01-15T08:00"] {
            let record = RawSensorRecord::new(json!({
                "data": {"data_points": [{"timestamp": ts, "glucose_1": 90}]}
            }));
            let obs = normalizer.normalize(&record);
            assert_eq!(obs.len(), 1);
            assert_ne!(obs[0].timestamp, fallback, "{ts}");
            assert_eq!(obs[0].timestamp.date_naive().to_string(), "2024-01-15", "{ts}");
        }
    }

    #[test]
    fn test_normalize_all_sorts() {
        let late = RawSensorRecord::new(json!({
            "data": {"data_points": [{"timestamp": 1705309200, "glucose_1": 2}]}
        }));
        let early = RawSensorRecord::new(json!({
            "data_snapshot": {"data_points": [{"timestamp": 1705305600, "glucose1": 1}]}
        }));
        let obs = ReadingNormalizer::new(&GLUCOSE_PROFILE, SensorView::Merged)
            .normalize_all(&[late, early]);
        let values: Vec<f64> = obs.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }
}
