//! Per-biomarker profiles
//!
//! Glucose and cortisol share one statistics engine. What differs between
//! them lives here: sensor field names, band labels, hardcoded default
//! thresholds, display precision of the mean, and derived metrics.

use crate::types::{Biomarker, RangeThresholds};

/// Default glucose bands in mg/dL (international consensus CGM targets)
pub const GLUCOSE_DEFAULT_THRESHOLDS: RangeThresholds = RangeThresholds {
    very_low_max: 54.0,
    low_max: 70.0,
    target_min: 70.0,
    target_max: 180.0,
    high_max: 250.0,
};

/// Default cortisol bands in µg/dL
pub const CORTISOL_DEFAULT_THRESHOLDS: RangeThresholds = RangeThresholds {
    very_low_max: 3.0,
    low_max: 5.0,
    target_min: 5.0,
    target_max: 23.0,
    high_max: 30.0,
};

/// Labels for the five bands, lowest first
pub type BandLabels = [&'static str; 5];

/// Strategy object describing one biomarker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiomarkerProfile {
    pub biomarker: Biomarker,
    pub band_labels: BandLabels,
    pub default_thresholds: RangeThresholds,
    /// Decimal places kept on the mean
    pub mean_precision: u32,
    /// Field names for sensor 1 and 2 in the current record layout
    pub new_fields: [&'static str; 2],
    /// Field names for sensor 1 and 2 in the legacy record layout
    pub old_fields: [&'static str; 2],
    pub derived: DerivedMetrics,
}

/// Extra metrics derived from the mean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedMetrics {
    None,
    /// GMI and estimated A1C
    GlycemicIndicators,
}

pub const GLUCOSE_PROFILE: BiomarkerProfile = BiomarkerProfile {
    biomarker: Biomarker::Glucose,
    band_labels: ["veryLow", "low", "target", "high", "veryHigh"],
    default_thresholds: GLUCOSE_DEFAULT_THRESHOLDS,
    mean_precision: 0,
    new_fields: ["glucose_1", "glucose_2"],
    old_fields: ["glucose1", "glucose2"],
    derived: DerivedMetrics::GlycemicIndicators,
};

pub const CORTISOL_PROFILE: BiomarkerProfile = BiomarkerProfile {
    biomarker: Biomarker::Cortisol,
    band_labels: ["veryLow", "low", "normal", "high", "veryHigh"],
    default_thresholds: CORTISOL_DEFAULT_THRESHOLDS,
    mean_precision: 3,
    new_fields: ["cortisol_1", "cortisol_2"],
    old_fields: ["cortisol1", "cortisol2"],
    derived: DerivedMetrics::None,
};

impl BiomarkerProfile {
    pub fn for_biomarker(biomarker: Biomarker) -> &'static BiomarkerProfile {
        match biomarker {
            Biomarker::Glucose => &GLUCOSE_PROFILE,
            Biomarker::Cortisol => &CORTISOL_PROFILE,
        }
    }

    /// Round the mean to this biomarker's display precision
    pub fn round_mean(&self, mean: f64) -> f64 {
        round_to(mean, self.mean_precision)
    }

    /// Glucose management indicator from the unrounded mean.
    ///
    /// `(mean + 46.7) / 28.7`, one decimal. A1C is reported as the same value.
    pub fn glycemic_indicators(&self, mean: f64) -> Option<(f64, f64)> {
        match self.derived {
            DerivedMetrics::GlycemicIndicators => {
                let gmi = ((mean + 46.7) / 28.7 * 10.0).round() / 10.0;
                Some((gmi, gmi))
            }
            DerivedMetrics::None => None,
        }
    }
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_monotonic() {
        for profile in [GLUCOSE_PROFILE, CORTISOL_PROFILE] {
            let t = profile.default_thresholds.as_array();
            assert!(t.windows(2).all(|w| w[0] <= w[1]), "{:?}", profile.biomarker);
        }
    }

    #[test]
    fn test_mean_precision() {
        assert_eq!(GLUCOSE_PROFILE.round_mean(139.1667), 139.0);
        assert_eq!(CORTISOL_PROFILE.round_mean(12.34567), 12.346);
    }

    #[test]
    fn test_glycemic_indicators() {
        let (gmi, a1c) = GLUCOSE_PROFILE.glycemic_indicators(154.0).unwrap();
        // (154 + 46.7) / 28.7 = 6.993
        assert_eq!(gmi, 7.0);
        assert_eq!(a1c, gmi);
        assert!(CORTISOL_PROFILE.glycemic_indicators(10.0).is_none());
    }

    #[test]
    fn test_lookup_by_biomarker() {
        assert_eq!(
            BiomarkerProfile::for_biomarker(Biomarker::Cortisol).band_labels[2],
            "normal"
        );
    }
}
