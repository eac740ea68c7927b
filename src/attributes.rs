//! Attribute canonicalization
//!
//! Turns a user's free-form personal attributes and device metadata into a
//! canonical [`ConditionSet`], parsed age and gender. Spelling variants are
//! resolved once here so nothing downstream re-checks raw keys.

use crate::schema::{DeviceAttributes, PersonalAttributes};
use crate::types::{Condition, ConditionSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Users younger than this match [`Condition::Pediatric`]
pub const PEDIATRIC_AGE_LIMIT: i64 = 18;

/// Key spellings that have been used for each flag condition
fn condition_keys(condition: Condition) -> &'static [&'static str] {
    match condition {
        Condition::Pregnancy => &["pregnancy", "Pregnancy", "pregnant", "Pregnant"],
        Condition::Type2Diabetes => &[
            "diabetes",
            "Diabetes",
            "diabete",
            "Diabete",
            "type2_diabetes",
            "diabetic",
        ],
        Condition::Smoking => &["smoking", "Smoking", "smoker", "Smoker"],
        Condition::Drinking => &["drinking", "Drinking", "drinker", "alcohol"],
        Condition::Hypertension => &["hypertension", "Hypertension", "high_blood_pressure"],
        Condition::Pediatric => &[],
    }
}

const AGE_KEYS: [&str; 2] = ["age", "Age"];
const GENDER_KEYS: [&str; 3] = ["gender", "Gender", "sex"];

/// Canonical view of one user's attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeProfile {
    pub conditions: ConditionSet,
    pub age: Option<i64>,
    /// Lowercased
    pub gender: Option<String>,
}

impl AttributeProfile {
    /// Build the canonical profile from raw personal and device attributes.
    pub fn derive(personal: &PersonalAttributes, device: &DeviceAttributes) -> Self {
        let age = AGE_KEYS
            .iter()
            .filter_map(|k| personal.get(k))
            .chain(device.age.iter())
            .find_map(parse_age);

        let gender = device
            .gender
            .as_deref()
            .map(str::to_string)
            .or_else(|| {
                GENDER_KEYS
                    .iter()
                    .filter_map(|k| personal.get(k))
                    .find_map(|v| v.as_str().map(str::to_string))
            })
            .map(|g| g.trim().to_lowercase())
            .filter(|g| !g.is_empty());

        let mut conditions: ConditionSet = Condition::ALL
            .iter()
            .copied()
            .filter(|c| {
                condition_keys(*c)
                    .iter()
                    .filter_map(|k| personal.get(k))
                    .any(is_truthy)
            })
            .collect();

        if age.is_some_and(|a| a < PEDIATRIC_AGE_LIMIT) {
            conditions.insert(Condition::Pediatric);
        }

        Self {
            conditions,
            age,
            gender,
        }
    }

    pub fn has(&self, condition: Condition) -> bool {
        self.conditions.contains(&condition)
    }
}

/// Loose truthiness for attribute flags: `true`, non-zero numbers, and
/// yes-like strings.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1"
        ),
        _ => false,
    }
}

/// Best-effort integer age: numbers are truncated, strings contribute their
/// leading digits (`"34 years"` is 34). Anything else is no age at all.
pub fn parse_age(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}
