//! Population aggregation
//!
//! Runs the per-user pipeline (normalize → resolve ranges → statistics) over
//! every user the caller may see, filters the cohort, and reduces the result
//! to per-group time-in-range averages for cross-population comparison.
//!
//! Users are independent, so with the `parallel` feature they are processed
//! on a bounded rayon pool.

use crate::attributes::AttributeProfile;
use crate::config::EngineConfig;
use crate::error::ComputeError;
use crate::normalizer::{ReadingNormalizer, SensorView};
use crate::profile::{round_to, BiomarkerProfile};
use crate::ranges::{RangeConfigLookup, RangeResolver};
use crate::statistics::{percentile, StatisticsEngine};
use crate::store::{AccessPolicy, Identity, RecordStore};
use crate::types::{Biomarker, BiomarkerStatistics, Condition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cohort bucket name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupName {
    Pregnancy,
    Diabetes,
    General,
}

impl GroupName {
    pub const ALL: [GroupName; 3] = [GroupName::Pregnancy, GroupName::Diabetes, GroupName::General];

    /// Mutually exclusive bucket: pregnancy first, then diabetes, else general
    pub fn for_profile(profile: &AttributeProfile) -> Self {
        if profile.has(Condition::Pregnancy) {
            GroupName::Pregnancy
        } else if profile.has(Condition::Type2Diabetes) {
            GroupName::Diabetes
        } else {
            GroupName::General
        }
    }
}

/// Demographic and medical predicates narrowing a cohort
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Required presence (`true`) or absence (`false`) of each condition
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<Condition, bool>,
}

impl CohortFilter {
    /// No predicate supplied
    pub fn is_empty(&self) -> bool {
        self.min_age.is_none()
            && self.max_age.is_none()
            && self.gender.is_none()
            && self.conditions.is_empty()
    }

    /// Age bounds are inclusive; a bound excludes users with no parsable age.
    pub fn matches(&self, profile: &AttributeProfile) -> bool {
        if let Some(min) = self.min_age {
            if !profile.age.is_some_and(|a| a >= min) {
                return false;
            }
        }
        if let Some(max) = self.max_age {
            if !profile.age.is_some_and(|a| a <= max) {
                return false;
            }
        }
        if let Some(gender) = &self.gender {
            let wanted = gender.trim().to_lowercase();
            if profile.gender.as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }
        self.conditions
            .iter()
            .all(|(condition, required)| profile.has(*condition) == *required)
    }
}

/// Band-exclusive time-in-range of one included user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTimeInRange {
    pub username: String,
    pub group: GroupName,
    pub mean: f64,
    pub time_in_target: f64,
    pub time_high: f64,
    pub time_very_high: f64,
    pub time_low: f64,
    pub time_very_low: f64,
}

impl UserTimeInRange {
    fn from_statistics(username: &str, group: GroupName, stats: &BiomarkerStatistics) -> Self {
        let b = &stats.bands;
        Self {
            username: username.to_string(),
            group,
            mean: stats.mean,
            time_in_target: b.percent_in_target as f64,
            time_high: b.percent_high as f64 - b.percent_very_high as f64,
            time_very_high: b.percent_very_high as f64,
            time_low: b.percent_low as f64 - b.percent_very_low as f64,
            time_very_low: b.percent_very_low as f64,
        }
    }
}

/// Five-number summary of member means, feeding the violin chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    /// Sorted member means
    pub values: Vec<f64>,
}

impl DistributionSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Self {
            min: *sorted.first()?,
            q1: percentile(&sorted, 25.0)?,
            median: percentile(&sorted, 50.0)?,
            q3: percentile(&sorted, 75.0)?,
            max: *sorted.last()?,
            values: sorted,
        })
    }
}

/// Averages for one cohort bucket, rounded to one decimal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationSummary {
    pub user_count: usize,
    pub average_time_in_target: f64,
    pub average_time_high: f64,
    pub average_time_very_high: f64,
    pub average_time_low: f64,
    pub average_time_very_low: f64,
    pub distribution: Option<DistributionSummary>,
}

impl PopulationSummary {
    pub fn from_members(members: &[&UserTimeInRange]) -> Self {
        let n = members.len();
        let average = |field: fn(&UserTimeInRange) -> f64| -> f64 {
            if n == 0 {
                return 0.0;
            }
            round_to(members.iter().map(|m| field(m)).sum::<f64>() / n as f64, 1)
        };
        let means: Vec<f64> = members.iter().map(|m| m.mean).collect();

        Self {
            user_count: n,
            average_time_in_target: average(|m| m.time_in_target),
            average_time_high: average(|m| m.time_high),
            average_time_very_high: average(|m| m.time_very_high),
            average_time_low: average(|m| m.time_low),
            average_time_very_low: average(|m| m.time_very_low),
            distribution: DistributionSummary::from_values(&means),
        }
    }
}

/// Result of a population request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationReport {
    pub biomarker: Biomarker,
    pub group_stats: BTreeMap<GroupName, PopulationSummary>,
    pub overall: PopulationSummary,
    /// Cohort members left out for having too few valid observations
    pub skipped_users: usize,
    pub members: Vec<UserTimeInRange>,
}

/// What happened to one accessible user
#[derive(Debug, Clone, PartialEq)]
enum UserOutcome {
    Included(UserTimeInRange),
    /// Fewer observations than the configured floor
    Skipped,
    /// Unknown user or filtered out
    Excluded,
}

/// Aggregates statistics across a cohort through injected collaborators
pub struct PopulationAggregator<'a> {
    store: &'a dyn RecordStore,
    ranges: &'a dyn RangeConfigLookup,
    access: &'a dyn AccessPolicy,
    engine: StatisticsEngine,
    config: EngineConfig,
}

impl<'a> PopulationAggregator<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        ranges: &'a dyn RangeConfigLookup,
        access: &'a dyn AccessPolicy,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ranges,
            access,
            engine: StatisticsEngine::new(&config),
            config,
        }
    }

    /// Aggregate time-in-range across every user `identity` may see that
    /// matches `filters`.
    ///
    /// Without filters users are bucketed into pregnancy / diabetes / general;
    /// with filters everyone lands in general.
    pub fn aggregate(
        &self,
        identity: &Identity,
        biomarker: Biomarker,
        filters: &CohortFilter,
    ) -> Result<PopulationReport, ComputeError> {
        let usernames = self.access.accessible_users(identity)?;
        let outcomes = self
            .evaluate_all(&usernames, biomarker, filters)
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let mut members = Vec::new();
        let mut skipped_users = 0;
        for outcome in outcomes {
            match outcome {
                UserOutcome::Included(member) => members.push(member),
                UserOutcome::Skipped => skipped_users += 1,
                UserOutcome::Excluded => {}
            }
        }

        let groups: &[GroupName] = if filters.is_empty() {
            &GroupName::ALL
        } else {
            &[GroupName::General]
        };
        let group_stats: BTreeMap<GroupName, PopulationSummary> = groups
            .iter()
            .map(|group| {
                let in_group: Vec<&UserTimeInRange> =
                    members.iter().filter(|m| m.group == *group).collect();
                (*group, PopulationSummary::from_members(&in_group))
            })
            .collect();
        let overall = PopulationSummary::from_members(&members.iter().collect::<Vec<_>>());

        log::info!(
            "{} population for {}: {} included, {} skipped of {} accessible",
            biomarker,
            identity.username,
            members.len(),
            skipped_users,
            usernames.len()
        );

        Ok(PopulationReport {
            biomarker,
            group_stats,
            overall,
            skipped_users,
            members,
        })
    }

    #[cfg(feature = "parallel")]
    fn evaluate_all(
        &self,
        usernames: &[String],
        biomarker: Biomarker,
        filters: &CohortFilter,
    ) -> Vec<Result<UserOutcome, ComputeError>> {
        use rayon::prelude::*;

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_parallel_users)
            .build()
        {
            Ok(pool) => pool.install(|| {
                usernames
                    .par_iter()
                    .map(|username| self.evaluate_user(username, biomarker, filters))
                    .collect()
            }),
            Err(e) => {
                log::warn!("cannot build worker pool ({}), processing sequentially", e);
                self.evaluate_sequential(usernames, biomarker, filters)
            }
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn evaluate_all(
        &self,
        usernames: &[String],
        biomarker: Biomarker,
        filters: &CohortFilter,
    ) -> Vec<Result<UserOutcome, ComputeError>> {
        self.evaluate_sequential(usernames, biomarker, filters)
    }

    fn evaluate_sequential(
        &self,
        usernames: &[String],
        biomarker: Biomarker,
        filters: &CohortFilter,
    ) -> Vec<Result<UserOutcome, ComputeError>> {
        usernames
            .iter()
            .map(|username| self.evaluate_user(username, biomarker, filters))
            .collect()
    }

    fn evaluate_user(
        &self,
        username: &str,
        biomarker: Biomarker,
        filters: &CohortFilter,
    ) -> Result<UserOutcome, ComputeError> {
        let Some(user) = self.store.fetch_user(username)? else {
            log::debug!("accessible user {} has no record", username);
            return Ok(UserOutcome::Excluded);
        };

        let attributes = AttributeProfile::derive(&user.personal_attributes, &user.device_attributes);
        if !filters.matches(&attributes) {
            return Ok(UserOutcome::Excluded);
        }

        let profile = BiomarkerProfile::for_biomarker(biomarker);
        let records = self.store.fetch_records(username, biomarker)?;
        let observations = ReadingNormalizer::new(profile, SensorView::Separate).normalize_all(&records);
        if observations.len() < self.config.min_observations {
            log::debug!(
                "skipping {}: {} valid {} observations",
                username,
                observations.len(),
                biomarker
            );
            return Ok(UserOutcome::Skipped);
        }

        let thresholds = RangeResolver::new(self.ranges)
            .resolve_conditions(&attributes.conditions, biomarker)?
            .map(|r| r.thresholds);
        let stats = self
            .engine
            .statistics(&observations, &thresholds.unwrap_or(profile.default_thresholds), profile);

        let group = if filters.is_empty() {
            GroupName::for_profile(&attributes)
        } else {
            GroupName::General
        };
        Ok(UserOutcome::Included(UserTimeInRange::from_statistics(
            username, group, &stats,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawSensorRecord, UserRecord};
    use crate::store::{MemoryStore, Role};
    use crate::types::RangeConfig;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn record(values: &[f64]) -> RawSensorRecord {
        let points: Vec<Value> = values
            .iter()
            .enumerate()
            .map(|(i, v)| json!({"timestamp": 1_705_305_600 + i as i64 * 900, "glucose_1": v}))
            .collect();
        RawSensorRecord::new(json!({"data": {"data_points": points}}))
    }

    fn user(name: &str, attrs: Value) -> UserRecord {
        let mut user = UserRecord::new(name);
        user.personal_attributes = serde_json::from_value(attrs).unwrap();
        user
    }

    /// 10 readings: `in_target` of them at 120, the rest at 200
    fn readings(in_target: usize) -> Vec<f64> {
        (0..10).map(|i| if i < in_target { 120.0 } else { 200.0 }).collect()
    }

    fn three_user_store() -> MemoryStore {
        let mut store = MemoryStore::default();
        store.add_user(user("pregnant", json!({"pregnancy": true})), vec![record(&readings(9))]);
        store.add_user(user("diabetic", json!({"Diabete": true})), vec![record(&readings(6))]);
        store.add_user(user("general", json!({})), vec![record(&readings(3))]);
        store
    }

    fn admin() -> Identity {
        Identity::new("admin", Role::Admin)
    }

    #[test]
    fn test_three_groups_one_user_each() {
        let store = three_user_store();
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();

        assert_eq!(report.group_stats.len(), 3);
        for group in GroupName::ALL {
            assert_eq!(report.group_stats[&group].user_count, 1, "{group:?}");
        }
        assert_eq!(report.group_stats[&GroupName::Pregnancy].average_time_in_target, 90.0);
        assert_eq!(report.group_stats[&GroupName::Diabetes].average_time_in_target, 60.0);
        assert_eq!(report.group_stats[&GroupName::General].average_time_high, 70.0);

        // (90 + 60 + 30) / 3
        assert_eq!(report.overall.average_time_in_target, 60.0);
        assert_eq!(report.overall.user_count, 3);
        assert_eq!(report.skipped_users, 0);
    }

    #[test]
    fn test_pregnancy_takes_precedence_over_diabetes() {
        let mut store = MemoryStore::default();
        store.add_user(
            user("both", json!({"pregnancy": true, "diabetes": true})),
            vec![record(&readings(10))],
        );
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();
        assert_eq!(report.group_stats[&GroupName::Pregnancy].user_count, 1);
        assert_eq!(report.group_stats[&GroupName::Diabetes].user_count, 0);
    }

    #[test]
    fn test_users_below_floor_are_skipped() {
        let mut store = three_user_store();
        store.add_user(user("sparse", json!({})), vec![record(&[100.0; 9])]);
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();
        assert_eq!(report.skipped_users, 1);
        assert_eq!(report.group_stats[&GroupName::General].user_count, 1);
    }

    #[test]
    fn test_filters_collapse_to_general() {
        let store = three_user_store();
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let mut filters = CohortFilter::default();
        filters.conditions.insert(Condition::Pregnancy, false);

        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &filters)
            .unwrap();
        assert_eq!(report.group_stats.len(), 1);
        let general = &report.group_stats[&GroupName::General];
        assert_eq!(general.user_count, 2);
        // (60 + 30) / 2
        assert_eq!(general.average_time_in_target, 45.0);
    }

    #[test]
    fn test_band_exclusive_times() {
        let mut store = MemoryStore::default();
        let values = [50.0, 60.0, 100.0, 100.0, 100.0, 100.0, 200.0, 200.0, 300.0, 300.0];
        store.add_user(user("mixed", json!({})), vec![record(&values)]);
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();

        let member = &report.members[0];
        assert_eq!(member.time_very_low, 10.0);
        assert_eq!(member.time_low, 10.0);
        assert_eq!(member.time_in_target, 40.0);
        assert_eq!(member.time_high, 20.0);
        assert_eq!(member.time_very_high, 20.0);
    }

    #[test]
    fn test_condition_ranges_apply_per_user() {
        let mut store = three_user_store();
        store.set_range(
            Biomarker::Glucose,
            Condition::Pregnancy,
            RangeConfig {
                target_max: Some(110.0),
                ..Default::default()
            },
        );
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();
        // 120 is above the pregnancy target ceiling of 110
        assert_eq!(report.group_stats[&GroupName::Pregnancy].average_time_in_target, 0.0);
    }

    #[test]
    fn test_access_limits_cohort() {
        let mut store = three_user_store();
        store
            .assignments
            .insert("dr-1".to_string(), vec!["diabetic".to_string(), "ghost".to_string()]);
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&Identity::new("dr-1", Role::Doctor), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();
        assert_eq!(report.overall.user_count, 1);
        assert_eq!(report.members[0].username, "diabetic");
    }

    #[test]
    fn test_age_and_gender_filters() {
        let mut a = user("young", json!({}));
        a.device_attributes.age = Some(json!(25));
        a.device_attributes.gender = Some("Female".to_string());
        let mut b = user("old", json!({}));
        b.device_attributes.age = Some(json!("70"));
        b.device_attributes.gender = Some("female".to_string());

        let mut store = MemoryStore::default();
        store.add_user(a, vec![record(&readings(10))]);
        store.add_user(b, vec![record(&readings(10))]);

        let filters = CohortFilter {
            min_age: Some(18),
            max_age: Some(40),
            gender: Some("female".to_string()),
            ..Default::default()
        };
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &filters)
            .unwrap();
        assert_eq!(report.overall.user_count, 1);
        assert_eq!(report.members[0].username, "young");
    }

    #[test]
    fn test_distribution_of_means() {
        let store = three_user_store();
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();
        let dist = report.overall.distribution.unwrap();
        // means: 128, 152, 176
        assert_eq!(dist.values, vec![128.0, 152.0, 176.0]);
        assert_eq!(dist.median, 152.0);
        assert_eq!(dist.q1, 140.0);
        assert!(report.group_stats[&GroupName::General].distribution.is_some());
    }

    #[test]
    fn test_empty_cohort_has_zero_summaries() {
        let store = MemoryStore::default();
        let aggregator = PopulationAggregator::new(&store, &store, &store, EngineConfig::default());
        let report = aggregator
            .aggregate(&admin(), Biomarker::Cortisol, &CohortFilter::default())
            .unwrap();
        assert_eq!(report.overall.user_count, 0);
        assert_eq!(report.overall.average_time_in_target, 0.0);
        assert!(report.overall.distribution.is_none());
    }

    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn fetch_user(&self, username: &str) -> Result<Option<UserRecord>, ComputeError> {
            Ok(Some(UserRecord::new(username)))
        }

        fn fetch_records(
            &self,
            _username: &str,
            _biomarker: Biomarker,
        ) -> Result<Vec<RawSensorRecord>, ComputeError> {
            Err(ComputeError::upstream("connection reset"))
        }
    }

    #[test]
    fn test_store_outage_propagates() {
        let access = three_user_store();
        let aggregator = PopulationAggregator::new(&BrokenStore, &access, &access, EngineConfig::default());
        let result = aggregator.aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default());
        assert!(matches!(result, Err(ComputeError::Upstream(_))));
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let store = three_user_store();
        let single = EngineConfig {
            max_parallel_users: 1,
            ..Default::default()
        };
        let a = PopulationAggregator::new(&store, &store, &store, single)
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();
        let b = PopulationAggregator::new(&store, &store, &store, EngineConfig::default())
            .aggregate(&admin(), Biomarker::Glucose, &CohortFilter::default())
            .unwrap();
        assert_eq!(a, b);
    }
}
