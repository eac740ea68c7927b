//! Data-access collaborators
//!
//! The engine never talks to the document store directly. Callers inject
//! implementations of these traits; errors they return are upstream outages
//! and are propagated unchanged.
//!
//! [`MemoryStore`] implements all of them over a JSON fixture and backs the
//! CLI and tests.

use crate::error::ComputeError;
use crate::ranges::RangeConfigLookup;
use crate::schema::{RawSensorRecord, UserRecord};
use crate::types::{Biomarker, Condition, RangeConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dashboard role of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

/// Authenticated identity supplied by the request layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }
}

/// Users and sensor records
pub trait RecordStore: Send + Sync {
    fn fetch_user(&self, username: &str) -> Result<Option<UserRecord>, ComputeError>;

    fn fetch_records(
        &self,
        username: &str,
        biomarker: Biomarker,
    ) -> Result<Vec<RawSensorRecord>, ComputeError>;
}

/// Which users an identity may see
pub trait AccessPolicy: Send + Sync {
    fn accessible_users(&self, identity: &Identity) -> Result<Vec<String>, ComputeError>;
}

/// One configured range entry in a fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub biomarker: Biomarker,
    pub condition: Condition,
    pub ranges: RangeConfig,
}

/// In-memory store loaded from a JSON fixture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    /// Raw records keyed by username
    #[serde(default)]
    pub records: HashMap<String, Vec<RawSensorRecord>>,
    #[serde(default)]
    pub ranges: Vec<RangeEntry>,
    /// Patients assigned to each doctor
    #[serde(default)]
    pub assignments: HashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn add_user(&mut self, user: UserRecord, records: Vec<RawSensorRecord>) {
        self.records.insert(user.username.clone(), records);
        self.users.push(user);
    }

    pub fn set_range(&mut self, biomarker: Biomarker, condition: Condition, ranges: RangeConfig) {
        self.ranges
            .retain(|e| !(e.biomarker == biomarker && e.condition == condition));
        self.ranges.push(RangeEntry {
            biomarker,
            condition,
            ranges,
        });
    }
}

impl RecordStore for MemoryStore {
    fn fetch_user(&self, username: &str) -> Result<Option<UserRecord>, ComputeError> {
        Ok(self.users.iter().find(|u| u.username == username).cloned())
    }

    fn fetch_records(
        &self,
        username: &str,
        _biomarker: Biomarker,
    ) -> Result<Vec<RawSensorRecord>, ComputeError> {
        Ok(self.records.get(username).cloned().unwrap_or_default())
    }
}

impl RangeConfigLookup for MemoryStore {
    fn lookup(
        &self,
        biomarker: Biomarker,
        condition: Condition,
    ) -> Result<Option<RangeConfig>, ComputeError> {
        Ok(self
            .ranges
            .iter()
            .find(|e| e.biomarker == biomarker && e.condition == condition)
            .map(|e| e.ranges))
    }
}

impl AccessPolicy for MemoryStore {
    fn accessible_users(&self, identity: &Identity) -> Result<Vec<String>, ComputeError> {
        let users = match identity.role {
            Role::Admin => self.users.iter().map(|u| u.username.clone()).collect(),
            Role::Doctor => self
                .assignments
                .get(&identity.username)
                .cloned()
                .unwrap_or_default(),
            Role::Patient => self
                .users
                .iter()
                .filter(|u| u.username == identity.username)
                .map(|u| u.username.clone())
                .collect(),
        };
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> MemoryStore {
        MemoryStore::from_json(
            &json!({
                "users": [
                    {"username": "p-1", "personalAttributes": {"pregnancy": true}},
                    {"username": "p-2"}
                ],
                "records": {
                    "p-1": [{"data": {"data_points": [{"timestamp": 1705305600, "glucose_1": 99}]}}]
                },
                "ranges": [
                    {"biomarker": "glucose", "condition": "pregnancy", "ranges": {"targetMin": 63, "targetMax": 140}}
                ],
                "assignments": {"dr-1": ["p-2"]}
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_fetch_user_and_records() {
        let store = fixture();
        assert!(store.fetch_user("p-1").unwrap().is_some());
        assert!(store.fetch_user("nobody").unwrap().is_none());
        assert_eq!(store.fetch_records("p-1", Biomarker::Glucose).unwrap().len(), 1);
        assert!(store.fetch_records("p-2", Biomarker::Glucose).unwrap().is_empty());
    }

    #[test]
    fn test_range_lookup() {
        let store = fixture();
        let ranges = store
            .lookup(Biomarker::Glucose, Condition::Pregnancy)
            .unwrap()
            .unwrap();
        assert_eq!(ranges.target_max, Some(140.0));
        assert!(store
            .lookup(Biomarker::Cortisol, Condition::Pregnancy)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_set_range_replaces() {
        let mut store = fixture();
        store.set_range(
            Biomarker::Glucose,
            Condition::Pregnancy,
            RangeConfig {
                target_max: Some(150.0),
                ..Default::default()
            },
        );
        assert_eq!(store.ranges.len(), 1);
        assert_eq!(store.ranges[0].ranges.target_max, Some(150.0));
    }

    #[test]
    fn test_access_by_role() {
        let store = fixture();
        let admin = store
            .accessible_users(&Identity::new("root", Role::Admin))
            .unwrap();
        assert_eq!(admin, vec!["p-1".to_string(), "p-2".to_string()]);

        let doctor = store
            .accessible_users(&Identity::new("dr-1", Role::Doctor))
            .unwrap();
        assert_eq!(doctor, vec!["p-2".to_string()]);

        let patient = store
            .accessible_users(&Identity::new("p-1", Role::Patient))
            .unwrap();
        assert_eq!(patient, vec!["p-1".to_string()]);

        let stranger = store
            .accessible_users(&Identity::new("dr-9", Role::Doctor))
            .unwrap();
        assert!(stranger.is_empty());
    }
}
