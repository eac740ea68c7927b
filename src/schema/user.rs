//! User record shape
//!
//! Personal attributes are a free-form map written by several generations of
//! the intake form, so keys are kept raw here and canonicalized by
//! [`crate::attributes`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sparse free-form personal/medical attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonalAttributes(pub Map<String, Value>);

impl PersonalAttributes {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }
}

impl FromIterator<(String, Value)> for PersonalAttributes {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Device and demographic metadata attached to a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAttributes {
    /// Stored as a number or a string depending on the writer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm: Option<String>,
    #[serde(default, rename = "deviceID", alias = "device_id", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// One user as returned by the data-access layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    #[serde(default)]
    pub personal_attributes: PersonalAttributes,
    #[serde(default)]
    pub device_attributes: DeviceAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            personal_attributes: PersonalAttributes::default(),
            device_attributes: DeviceAttributes::default(),
            etag: None,
        }
    }
}
