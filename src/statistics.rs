//! Statistics engine
//!
//! This module derives the AGP-style summary from normalized observations:
//! - Mean at the biomarker's display precision
//! - Time-in-band percentages, weighting each reading by a fixed wear time
//! - Coefficient of variation
//! - GMI / estimated A1C for glucose
//! - Per-hour-of-day percentile bands
//!
//! One engine serves every biomarker; the differences come from the
//! [`BiomarkerProfile`] passed in.

use crate::config::{EngineConfig, PercentileFallback};
use crate::profile::BiomarkerProfile;
use crate::types::{
    BandPercentages, BiomarkerReport, BiomarkerStatistics, DateRange, HourlyPercentileProfile,
    Observation, PercentileBand, RangeThresholds,
};
use chrono::{FixedOffset, Offset, Timelike, Utc};

/// Percentiles reported for each hour bucket
pub const HOURLY_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

/// Multipliers of the overall mean used to fill empty hours in the
/// mean-scaled path
pub const MEAN_SCALE_FACTORS: [f64; 5] = [0.7, 0.85, 1.0, 1.15, 1.3];

/// Stateless statistics calculator
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    minutes_per_reading: f64,
    offset: FixedOffset,
    fallback: PercentileFallback,
}

impl Default for StatisticsEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl StatisticsEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let offset = config
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                log::warn!(
                    "utc_offset_minutes {} is out of range, using UTC",
                    config.utc_offset_minutes
                );
                Utc.fix()
            });
        Self {
            minutes_per_reading: config.minutes_per_reading,
            offset,
            fallback: config.percentile_fallback,
        }
    }

    /// Same engine with a different empty-hour policy
    pub fn with_fallback(mut self, fallback: PercentileFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> PercentileFallback {
        self.fallback
    }

    /// Compute statistics and hourly profile.
    ///
    /// `thresholds` of `None` means no user-specific ranges apply and the
    /// profile's default is used.
    pub fn compute(
        &self,
        observations: &[Observation],
        thresholds: Option<RangeThresholds>,
        profile: &BiomarkerProfile,
    ) -> BiomarkerReport {
        let thresholds = thresholds.unwrap_or(profile.default_thresholds);
        let statistics = self.statistics(observations, &thresholds, profile);
        let hourly = self.hourly_profile(observations, raw_mean(observations).unwrap_or(0.0));

        BiomarkerReport {
            statistics,
            hourly,
            thresholds,
        }
    }

    /// Aggregate statistics; an all-zero block for empty input
    pub fn statistics(
        &self,
        observations: &[Observation],
        thresholds: &RangeThresholds,
        profile: &BiomarkerProfile,
    ) -> BiomarkerStatistics {
        let Some(mean) = raw_mean(observations) else {
            return BiomarkerStatistics::empty(profile.biomarker);
        };

        let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let coefficient_of_variation = if mean != 0.0 {
            (variance.sqrt() / mean * 100.0).round()
        } else {
            0.0
        };

        let (gmi, a1c) = match profile.glycemic_indicators(mean) {
            Some((gmi, a1c)) => (Some(gmi), Some(a1c)),
            None => (None, None),
        };

        BiomarkerStatistics {
            biomarker: profile.biomarker,
            reading_count: values.len(),
            wear_minutes: values.len() as f64 * self.minutes_per_reading,
            mean: profile.round_mean(mean),
            min,
            max,
            bands: self.band_percentages(&values, thresholds),
            coefficient_of_variation,
            gmi,
            a1c,
            date_range: date_range(observations),
        }
    }

    /// Percent of wear time per band, each reading standing for a fixed
    /// number of minutes.
    pub fn band_percentages(&self, values: &[f64], t: &RangeThresholds) -> BandPercentages {
        let total_minutes = values.len() as f64 * self.minutes_per_reading;
        if total_minutes <= 0.0 {
            return BandPercentages::default();
        }

        let percent = |pred: &dyn Fn(f64) -> bool| -> u32 {
            let count = values.iter().filter(|v| pred(**v)).count();
            (count as f64 * self.minutes_per_reading / total_minutes * 100.0).round() as u32
        };

        BandPercentages {
            percent_very_low: percent(&|v: f64| v < t.very_low_max),
            percent_low: percent(&|v: f64| v < t.low_max),
            percent_in_target: percent(&|v: f64| v >= t.target_min && v <= t.target_max),
            percent_high: percent(&|v: f64| v > t.target_max),
            percent_very_high: percent(&|v: f64| v > t.high_max),
        }
    }

    /// Percentile bands per local hour of day.
    ///
    /// Empty hours follow the engine's [`PercentileFallback`]; `mean` is only
    /// used by the mean-scaled policy.
    pub fn hourly_profile(&self, observations: &[Observation], mean: f64) -> HourlyPercentileProfile {
        let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); 24];
        for obs in observations {
            let hour = obs.timestamp.with_timezone(&self.offset).hour() as usize;
            buckets[hour].push(obs.value);
        }

        let mut profile = HourlyPercentileProfile::default();
        for (slot, bucket) in profile.hours.iter_mut().zip(buckets.iter_mut()) {
            *slot = if bucket.is_empty() {
                match self.fallback {
                    PercentileFallback::Null => None,
                    PercentileFallback::MeanScaled => Some(band_from(MEAN_SCALE_FACTORS.map(|f| mean * f))),
                }
            } else {
                bucket.sort_by(f64::total_cmp);
                let sorted: &[f64] = bucket;
                Some(band_from(HOURLY_PERCENTILES.map(|p| interpolate(sorted, p))))
            };
        }
        profile
    }
}

fn band_from(values: [f64; 5]) -> PercentileBand {
    PercentileBand {
        p5: values[0],
        p25: values[1],
        p50: values[2],
        p75: values[3],
        p95: values[4],
    }
}

/// Unrounded arithmetic mean, `None` for empty input
pub fn raw_mean(observations: &[Observation]) -> Option<f64> {
    if observations.is_empty() {
        return None;
    }
    Some(observations.iter().map(|o| o.value).sum::<f64>() / observations.len() as f64)
}

/// Earliest and latest timestamp
pub fn date_range(observations: &[Observation]) -> Option<DateRange> {
    let start = observations.iter().map(|o| o.timestamp).min()?;
    let end = observations.iter().map(|o| o.timestamp).max()?;
    Some(DateRange { start, end })
}

/// Percentile of ascending-sorted values by linear interpolation between the
/// two nearest ranks: `index = p/100 × (n − 1)`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    Some(interpolate(sorted, p))
}

fn interpolate(sorted: &[f64], p: f64) -> f64 {
    let index = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    let weight = index - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
