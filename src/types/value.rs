//! Property values
//!
//! `PropertyValue` is the closed set of value kinds an event or profile
//! property may hold. Anything outside that set is refused when the value is
//! built (`TryFrom`, [`PropertyValue::float`], [`PropertyValue::url`],
//! [`Properties::from_json`]); nothing is ever stringified behind the
//! caller's back.
//!
//! The serde representation is tagged so persisted values reload exactly
//! (a `Date` stays a `Date`, a `Url` stays a `Url`). The backend sees the
//! untagged JSON produced by [`PropertyValue::to_wire`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{TelemetryError, TelemetryResult};
use crate::utils::time::format_wire_date;

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Url(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Build a float value; NaN and infinities are refused
    pub fn float(value: f64) -> TelemetryResult<Self> {
        if value.is_finite() {
            Ok(PropertyValue::Float(value))
        } else {
            Err(TelemetryError::invalid_property(
                "<float>",
                format!("{} is not a finite number", value),
            ))
        }
    }

    /// Build a URL value; requires `scheme://rest`
    pub fn url(value: &str) -> TelemetryResult<Self> {
        if is_valid_url(value) {
            Ok(PropertyValue::Url(value.to_string()))
        } else {
            Err(TelemetryError::invalid_property(
                "<url>",
                format!("'{}' is not an absolute URL", value),
            ))
        }
    }

    /// Whether the value is a number (`Int` or `Float`)
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyValue::Int(_) | PropertyValue::Float(_))
    }

    /// Short name of the variant, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::String(_) => "string",
            PropertyValue::Date(_) => "date",
            PropertyValue::Url(_) => "url",
            PropertyValue::List(_) => "list",
            PropertyValue::Map(_) => "map",
        }
    }

    /// Check the value (recursively) against the accepted set
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PropertyValue::Float(f) if !f.is_finite() => {
                Err(format!("{} is not a finite number", f))
            }
            PropertyValue::Url(u) if !is_valid_url(u) => {
                Err(format!("'{}' is not an absolute URL", u))
            }
            PropertyValue::List(items) => items.iter().try_for_each(PropertyValue::validate),
            PropertyValue::Map(map) => map.values().try_for_each(PropertyValue::validate),
            _ => Ok(()),
        }
    }

    /// Untagged JSON sent to the backend
    pub fn to_wire(&self) -> TelemetryResult<Value> {
        Ok(match self {
            PropertyValue::Null => Value::Null,
            PropertyValue::Bool(b) => Value::Bool(*b),
            PropertyValue::Int(i) => Value::Number((*i).into()),
            PropertyValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| {
                    TelemetryError::Serialization(format!("{} has no JSON representation", f))
                })?,
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Date(d) => Value::String(format_wire_date(d)),
            PropertyValue::Url(u) => Value::String(u.clone()),
            PropertyValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(PropertyValue::to_wire)
                    .collect::<TelemetryResult<Vec<_>>>()?,
            ),
            PropertyValue::Map(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_wire()?);
                }
                Value::Object(out)
            }
        })
    }
}

fn is_valid_url(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && !rest.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::Date(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(value: Vec<PropertyValue>) -> Self {
        PropertyValue::List(value)
    }
}

impl From<Properties> for PropertyValue {
    fn from(value: Properties) -> Self {
        PropertyValue::Map(value.0)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}

impl TryFrom<f64> for PropertyValue {
    type Error = TelemetryError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        PropertyValue::float(value)
    }
}

impl TryFrom<u64> for PropertyValue {
    type Error = TelemetryError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value).map(PropertyValue::Int).map_err(|_| {
            TelemetryError::invalid_property("<int>", format!("{} exceeds i64 range", value))
        })
    }
}

impl TryFrom<Value> for PropertyValue {
    type Error = TelemetryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropertyValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    PropertyValue::try_from(u)?
                } else {
                    // as_f64 cannot fail for a non-integer Number
                    PropertyValue::float(n.as_f64().unwrap_or(f64::NAN))?
                }
            }
            Value::String(s) => PropertyValue::String(s),
            Value::Array(items) => PropertyValue::List(
                items
                    .into_iter()
                    .map(PropertyValue::try_from)
                    .collect::<TelemetryResult<Vec<_>>>()?,
            ),
            Value::Object(map) => PropertyValue::Map(Properties::from_json_map(map)?.0),
        })
    }
}

/// Ordered string-keyed property mapping
///
/// Keys are unique; ordering is by key, so the same set of properties always
/// serializes identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert without validation, returning the previous value
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Insert after checking the value against the accepted set
    pub fn try_insert(
        &mut self,
        key: impl Into<String>,
        value: PropertyValue,
    ) -> TelemetryResult<Option<PropertyValue>> {
        let key = key.into();
        if let Err(reason) = value.validate() {
            return Err(TelemetryError::invalid_property(key, reason));
        }
        Ok(self.0.insert(key, value))
    }

    /// Parse a JSON object into properties
    pub fn from_json(value: Value) -> TelemetryResult<Self> {
        match value {
            Value::Object(map) => Self::from_json_map(map),
            other => Err(TelemetryError::invalid_property(
                "<root>",
                format!("expected a JSON object, got {}", json_kind(&other)),
            )),
        }
    }

    fn from_json_map(map: Map<String, Value>) -> TelemetryResult<Self> {
        let mut props = Properties::new();
        for (key, value) in map {
            let converted = PropertyValue::try_from(value).map_err(|e| match e {
                TelemetryError::InvalidProperty { reason, .. } => {
                    TelemetryError::invalid_property(key.clone(), reason)
                }
                other => other,
            })?;
            props.0.insert(key, converted);
        }
        Ok(props)
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    /// Overwrite-merge `other` into `self`
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Keep only entries for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &PropertyValue) -> bool) {
        self.0.retain(|k, v| keep(k, v));
    }

    /// Drop entries that fail [`PropertyValue::validate`]
    ///
    /// Returns each removed key with the reason it was refused.
    pub fn remove_invalid(&mut self) -> Vec<(String, String)> {
        let mut removed = Vec::new();
        self.0.retain(|key, value| match value.validate() {
            Ok(()) => true,
            Err(reason) => {
                removed.push((key.clone(), reason));
                false
            }
        });
        removed
    }

    /// Untagged JSON object sent to the backend
    pub fn to_wire(&self) -> TelemetryResult<Map<String, Value>> {
        let mut out = Map::new();
        for (k, v) in &self.0 {
            let wire = v.to_wire().map_err(|e| {
                TelemetryError::Serialization(format!("property '{}': {}", k, e))
            })?;
            out.insert(k.clone(), wire);
        }
        Ok(out)
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Properties(iter.into_iter().collect())
    }
}

impl IntoIterator for Properties {
    type Item = (String, PropertyValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
