//! Pipeline orchestration
//!
//! This module provides the public API for biomarker-flux.
//! It wires the injected collaborators through the stages that turn raw
//! sensor records into chart payloads.

use crate::attributes::AttributeProfile;
use crate::config::{EngineConfig, PercentileFallback};
use crate::encoder::PayloadEncoder;
use crate::error::ComputeError;
use crate::normalizer::{ReadingNormalizer, SensorView};
use crate::population::{CohortFilter, PopulationAggregator, PopulationReport};
use crate::profile::BiomarkerProfile;
use crate::ranges::{RangeConfigLookup, RangeResolver, ResolvedRanges};
use crate::schema::{RawSensorRecord, UserRecord};
use crate::statistics::StatisticsEngine;
use crate::store::{AccessPolicy, Identity, RecordStore};
use crate::types::{Biomarker, BiomarkerReport, RangeThresholds};

/// Compute an AGP payload from a JSON array of raw records using default
/// ranges.
///
/// # Arguments
/// * `raw_json` - JSON array of raw sensor records
/// * `biomarker` - Biomarker name (e.g., "glucose")
///
/// # Example
/// ```ignore
/// let payload = records_to_agp(records_json, "glucose".to_string())?;
/// ```
pub fn records_to_agp(raw_json: String, biomarker: String) -> Result<String, ComputeError> {
    let biomarker: Biomarker = biomarker.parse()?;
    let records: Vec<RawSensorRecord> = serde_json::from_str(&raw_json)?;

    let processor = BiomarkerProcessor::default();
    let report = processor.compute_user_report(&records, None, biomarker, PercentileFallback::Null);
    processor
        .encoder
        .to_json(&processor.encoder.encode_report("", &report, None))
}

/// Processor holding engine configuration and a payload encoder.
///
/// Stages for one user:
/// 1. RecordStore - Fetch the user and raw records
/// 2. ReadingNormalizer - Merged-sensor observations, sorted
/// 3. RangeResolver - Condition-specific thresholds
/// 4. StatisticsEngine - Statistics and hourly profile
/// 5. PayloadEncoder - Chart JSON
pub struct BiomarkerProcessor {
    config: EngineConfig,
    encoder: PayloadEncoder,
}

impl Default for BiomarkerProcessor {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl BiomarkerProcessor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            encoder: PayloadEncoder::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn encoder(&self) -> &PayloadEncoder {
        &self.encoder
    }

    /// Individual report with interpolated percentiles; empty hours follow
    /// the configured fallback (null unless overridden).
    pub fn user_report(
        &self,
        store: &dyn RecordStore,
        ranges: &dyn RangeConfigLookup,
        username: &str,
        biomarker: Biomarker,
    ) -> Result<BiomarkerReport, ComputeError> {
        self.user_report_with(store, ranges, username, biomarker, self.config.percentile_fallback)
    }

    /// Individual report whose empty hours are filled from the overall mean
    pub fn default_scaled_report(
        &self,
        store: &dyn RecordStore,
        ranges: &dyn RangeConfigLookup,
        username: &str,
        biomarker: Biomarker,
    ) -> Result<BiomarkerReport, ComputeError> {
        self.user_report_with(store, ranges, username, biomarker, PercentileFallback::MeanScaled)
    }

    fn user_report_with(
        &self,
        store: &dyn RecordStore,
        ranges: &dyn RangeConfigLookup,
        username: &str,
        biomarker: Biomarker,
        fallback: PercentileFallback,
    ) -> Result<BiomarkerReport, ComputeError> {
        Ok(self
            .report_with_ranges(store, ranges, username, biomarker, fallback)?
            .0)
    }

    /// Individual report together with the ranges it was classified
    /// against. The user is fetched and ranges resolved once.
    pub fn report_with_ranges(
        &self,
        store: &dyn RecordStore,
        ranges: &dyn RangeConfigLookup,
        username: &str,
        biomarker: Biomarker,
        fallback: PercentileFallback,
    ) -> Result<(BiomarkerReport, ResolvedRanges), ComputeError> {
        // Stage 1: fetch; an unknown user is treated as one with no attributes
        let user = store.fetch_user(username)?.unwrap_or_else(|| {
            log::debug!("no user record for {}, using defaults", username);
            UserRecord::new(username)
        });
        let records = store.fetch_records(username, biomarker)?;

        // Stage 3: thresholds for the user's conditions
        let attributes = AttributeProfile::derive(&user.personal_attributes, &user.device_attributes);
        let resolved = RangeResolver::new(ranges).resolve_or_default(&attributes.conditions, biomarker)?;

        let report = self.compute_user_report(&records, Some(resolved.thresholds), biomarker, fallback);
        Ok((report, resolved))
    }

    /// Run the pure stages over already fetched records
    pub fn compute_user_report(
        &self,
        records: &[RawSensorRecord],
        thresholds: Option<RangeThresholds>,
        biomarker: Biomarker,
        fallback: PercentileFallback,
    ) -> BiomarkerReport {
        let profile = BiomarkerProfile::for_biomarker(biomarker);

        // Stage 2: merged observations, sorted ascending
        let observations = ReadingNormalizer::new(profile, SensorView::Merged).normalize_all(records);

        // Stage 4: statistics
        StatisticsEngine::new(&self.config)
            .with_fallback(fallback)
            .compute(&observations, thresholds, profile)
    }

    /// Ranges that apply to a user, with the default substituted, for display
    pub fn resolve_ranges(
        &self,
        store: &dyn RecordStore,
        ranges: &dyn RangeConfigLookup,
        username: &str,
        biomarker: Biomarker,
    ) -> Result<ResolvedRanges, ComputeError> {
        let conditions = match store.fetch_user(username)? {
            Some(user) => {
                AttributeProfile::derive(&user.personal_attributes, &user.device_attributes).conditions
            }
            None => Default::default(),
        };
        RangeResolver::new(ranges).resolve_or_default(&conditions, biomarker)
    }

    /// Cohort time-in-range comparison
    pub fn population(
        &self,
        store: &dyn RecordStore,
        ranges: &dyn RangeConfigLookup,
        access: &dyn AccessPolicy,
        identity: &Identity,
        biomarker: Biomarker,
        filters: &CohortFilter,
    ) -> Result<PopulationReport, ComputeError> {
        PopulationAggregator::new(store, ranges, access, self.config.clone())
            .aggregate(identity, biomarker, filters)
    }

    /// Stage 5: user report encoded as chart JSON, with the range audit
    pub fn user_report_json(
        &self,
        store: &dyn RecordStore,
        ranges: &dyn RangeConfigLookup,
        username: &str,
        biomarker: Biomarker,
    ) -> Result<String, ComputeError> {
        let (report, audit) = self.report_with_ranges(
            store,
            ranges,
            username,
            biomarker,
            self.config.percentile_fallback,
        )?;
        self.encoder
            .to_json(&self.encoder.encode_report(username, &report, Some(audit)))
    }
}
