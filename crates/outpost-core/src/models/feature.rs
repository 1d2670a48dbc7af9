//! Feature identity, attribute values, and dataset schemas

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a feature within a dataset
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a new unique identifier using UUID v7 (time-sortable)
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Declared type of a dataset attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Integer,
    Real,
    Boolean,
    Text,
    Timestamp,
    /// Geometry carried as WKT text
    Geometry,
}

impl AttributeType {
    /// Convert a raw wire value to this declared type.
    ///
    /// Returns `None` when no conversion exists. Callers comparing values
    /// for clean-merge detection must treat a failed conversion as "not
    /// equal" - a failed coercion can hide a real conflict, never excuse
    /// one.
    #[must_use]
    pub fn coerce(self, raw: &serde_json::Value) -> Option<AttrValue> {
        use serde_json::Value;

        if raw.is_null() {
            return Some(AttrValue::Null);
        }
        match self {
            Self::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(AttrValue::Integer),
                Value::String(s) => s.trim().parse().ok().map(AttrValue::Integer),
                _ => None,
            },
            Self::Real => match raw {
                Value::Number(n) => n.as_f64().map(AttrValue::Real),
                Value::String(s) => s.trim().parse().ok().map(AttrValue::Real),
                _ => None,
            },
            Self::Boolean => match raw {
                Value::Bool(b) => Some(AttrValue::Boolean(*b)),
                Value::String(s) => match s.trim() {
                    "true" => Some(AttrValue::Boolean(true)),
                    "false" => Some(AttrValue::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            Self::Text => match raw {
                Value::String(s) => Some(AttrValue::Text(s.clone())),
                Value::Number(n) => Some(AttrValue::Text(n.to_string())),
                Value::Bool(b) => Some(AttrValue::Text(b.to_string())),
                _ => None,
            },
            Self::Timestamp => match raw {
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|dt| AttrValue::Timestamp(dt.with_timezone(&Utc))),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .map(AttrValue::Timestamp),
                _ => None,
            },
            Self::Geometry => match raw {
                Value::String(s) => Some(AttrValue::Geometry(s.clone())),
                _ => None,
            },
        }
    }
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum AttrValue {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
    Timestamp(DateTime<Utc>),
    Geometry(String),
}

impl AttrValue {
    /// Raw JSON representation for the wire
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Real(v) => serde_json::Value::from(*v),
            Self::Boolean(v) => serde_json::Value::from(*v),
            Self::Text(v) | Self::Geometry(v) => serde_json::Value::from(v.clone()),
            Self::Timestamp(v) => serde_json::Value::from(v.to_rfc3339()),
        }
    }
}

/// Maps attribute names to their declared types
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub attributes: BTreeMap<String, AttributeType>,
}

impl DatasetSchema {
    /// Declared type of an attribute, if it exists
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<AttributeType> {
        self.attributes.get(name).copied()
    }
}

impl FromIterator<(String, AttributeType)> for DatasetSchema {
    fn from_iter<T: IntoIterator<Item = (String, AttributeType)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// The full attribute state of a feature at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSnapshot {
    values: BTreeMap<String, AttrValue>,
}

impl FeatureSnapshot {
    #[must_use]
    pub fn new(values: BTreeMap<String, AttrValue>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        self.values.insert(name.into(), value);
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.values.iter()
    }

    /// A copy of this snapshot with the given attribute changes applied
    #[must_use]
    pub fn with_changes(&self, changes: &BTreeMap<String, AttrValue>) -> Self {
        let mut values = self.values.clone();
        for (name, value) in changes {
            values.insert(name.clone(), value.clone());
        }
        Self { values }
    }

    /// Names of attributes whose values differ between the two snapshots
    #[must_use]
    pub fn changed_attributes(&self, other: &Self) -> BTreeSet<String> {
        self.values
            .keys()
            .chain(other.values.keys())
            .filter(|name| self.values.get(*name) != other.values.get(*name))
            .cloned()
            .collect()
    }
}

impl FromIterator<(String, AttrValue)> for FeatureSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
