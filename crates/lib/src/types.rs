//! Value types shared by plans and layer records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A scalar or array value in module-defined metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
  Bool(bool),
  Integer(i64),
  Float(f64),
  String(String),
  Array(Vec<MetadataValue>),
}

impl MetadataValue {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      MetadataValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      MetadataValue::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      MetadataValue::Integer(i) => Some(*i),
      _ => None,
    }
  }
}

impl From<&str> for MetadataValue {
  fn from(value: &str) -> Self {
    MetadataValue::String(value.to_string())
  }
}

impl From<String> for MetadataValue {
  fn from(value: String) -> Self {
    MetadataValue::String(value)
  }
}

impl From<bool> for MetadataValue {
  fn from(value: bool) -> Self {
    MetadataValue::Bool(value)
  }
}

impl From<i64> for MetadataValue {
  fn from(value: i64) -> Self {
    MetadataValue::Integer(value)
  }
}

impl From<f64> for MetadataValue {
  fn from(value: f64) -> Self {
    MetadataValue::Float(value)
  }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
  fn from(values: Vec<T>) -> Self {
    MetadataValue::Array(values.into_iter().map(Into::into).collect())
  }
}

/// Ordered key/value metadata. Ordering keeps serialized records stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Build a [`Metadata`] map from `(key, value)` pairs.
pub fn metadata<K, V, I>(pairs: I) -> Metadata
where
  K: Into<String>,
  V: Into<MetadataValue>,
  I: IntoIterator<Item = (K, V)>,
{
  pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
