//! Structured values for configuration, plan and state data.
//!
//! [`Value`] is a tagged union that keeps "unknown" as a first class state
//! next to null and known values. Lists carry both list and set elements and
//! maps carry map, object and block contents; the schema decides how a
//! position is interpreted.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FrameworkError;
use crate::path::{AttributePath, PathStep};

/// JSON stand-in for an unknown value.
pub const UNKNOWN_VALUE_SENTINEL: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// A structured value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// A value that will only be known after apply.
    Unknown,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(serde_json::Number),
    /// A string.
    String(String),
    /// List or set elements.
    List(Vec<Value>),
    /// Map entries, object attributes or block contents.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this is an unknown value.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    /// Whether this value is neither null nor unknown.
    pub fn is_known(&self) -> bool {
        !self.is_null() && !self.is_unknown()
    }

    /// Whether no unknown value appears anywhere in this value.
    pub fn is_fully_known(&self) -> bool {
        match self {
            Value::Unknown => false,
            Value::List(items) => items.iter().all(Value::is_fully_known),
            Value::Map(entries) => entries.values().all(Value::is_fully_known),
            _ => true,
        }
    }

    /// The string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean content, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number content, if this is a number.
    pub fn as_number(&self) -> Option<&serde_json::Number> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// The elements, if this is a list.
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a map entry; null for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// A short name of the variant, used in messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Unknown => "unknown",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Resolve `path` within this value.
    ///
    /// Stepping into null or unknown values, missing keys, or indexes out of
    /// range fails with [`FrameworkError::InvalidStep`].
    pub fn at_path(&self, path: &AttributePath) -> Result<&Value, FrameworkError> {
        let mut current = self;
        let mut walked = AttributePath::empty();

        for step in path.steps() {
            let next = match (step, current) {
                (PathStep::AttributeName(name), Value::Map(entries))
                | (PathStep::ElementKeyString(name), Value::Map(entries)) => entries.get(name),
                (PathStep::ElementKeyInt(index), Value::List(items)) => items.get(*index),
                (PathStep::ElementKeyValue(element), Value::List(items)) => {
                    items.iter().find(|item| *item == element)
                },
                _ => None,
            };

            current = next.ok_or_else(|| FrameworkError::InvalidStep {
                path: walked.clone(),
                step: step.to_string(),
            })?;
            walked = walked.step(step.clone());
        }

        Ok(current)
    }

    /// Replace the value at `path`, creating missing object entries along the way.
    pub fn set_at_path(&mut self, path: &AttributePath, value: Value) -> Result<(), FrameworkError> {
        let mut current = self;
        let mut walked = AttributePath::empty();

        for step in path.steps() {
            let invalid = || FrameworkError::InvalidStep {
                path: walked.clone(),
                step: step.to_string(),
            };

            if current.is_null() && matches!(step, PathStep::AttributeName(_)) {
                *current = Value::Map(BTreeMap::new());
            }

            current = match (step, current) {
                (PathStep::AttributeName(name), Value::Map(entries))
                | (PathStep::ElementKeyString(name), Value::Map(entries)) => {
                    entries.entry(name.clone()).or_insert(Value::Null)
                },
                (PathStep::ElementKeyInt(index), Value::List(items)) => {
                    items.get_mut(*index).ok_or_else(invalid)?
                },
                (PathStep::ElementKeyValue(element), Value::List(items)) => items
                    .iter_mut()
                    .find(|item| **item == *element)
                    .ok_or_else(invalid)?,
                _ => return Err(invalid()),
            };
            walked = walked.step(step.clone());
        }

        *current = value;
        Ok(())
    }

    /// Convert into JSON, failing on unknown values.
    pub fn to_json(&self) -> Result<serde_json::Value, FrameworkError> {
        self.to_json_at(&AttributePath::empty())
    }

    fn to_json_at(&self, path: &AttributePath) -> Result<serde_json::Value, FrameworkError> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Unknown => return Err(FrameworkError::UnknownValue(path.clone())),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| item.to_json_at(&path.clone().index(i)))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json_at(&path.clone().attribute(k))?)))
                    .collect::<Result<_, FrameworkError>>()?,
            ),
        })
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) if s == UNKNOWN_VALUE_SENTINEL => Value::Unknown,
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            },
            serde_json::Value::Object(entries) => {
                Value::Map(entries.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Unknown => serializer.serialize_str(UNKNOWN_VALUE_SENTINEL),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Map(entries) => entries.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<invalid>"),
        }
    }
}
