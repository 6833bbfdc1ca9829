//! Environment overlays.
//!
//! An [`EnvOverlay`] is an ordered list of variable mutations. Modules export
//! overlays from their build step; the lifecycle merges them in build order
//! into the context (so later modules see them) and into the final manifest.
//!
//! Applying an overlay walks the entries in registration order:
//!
//! | op         | effect                                                  |
//! |------------|---------------------------------------------------------|
//! | `override` | set the variable, replacing any current value           |
//! | `prepend`  | `value + delimiter + current` (just `value` if unset)   |
//! | `append`   | `current + delimiter + value` (just `value` if unset)   |
//! | `default`  | set only if the variable is unset at apply time         |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Delimiter used by the `*_path` helpers.
#[cfg(unix)]
pub const PATH_DELIMITER: &str = ":";

#[cfg(windows)]
pub const PATH_DELIMITER: &str = ";";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvOp {
  Override,
  Prepend,
  Append,
  Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
  pub name: String,
  pub op: EnvOp,
  pub value: String,
  /// Joins the new value to an existing one for prepend/append. `None`
  /// concatenates directly.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvOverlay {
  entries: Vec<EnvEntry>,
}

impl EnvOverlay {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> &[EnvEntry] {
    &self.entries
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn push(&mut self, entry: EnvEntry) {
    self.entries.push(entry);
  }

  fn push_op(&mut self, name: &str, op: EnvOp, value: &str, delimiter: Option<&str>) -> &mut Self {
    self.entries.push(EnvEntry {
      name: name.to_string(),
      op,
      value: value.to_string(),
      delimiter: delimiter.map(str::to_string),
    });
    self
  }

  pub fn override_var(&mut self, name: &str, value: &str) -> &mut Self {
    self.push_op(name, EnvOp::Override, value, None)
  }

  pub fn default_var(&mut self, name: &str, value: &str) -> &mut Self {
    self.push_op(name, EnvOp::Default, value, None)
  }

  pub fn prepend(&mut self, name: &str, value: &str, delimiter: Option<&str>) -> &mut Self {
    self.push_op(name, EnvOp::Prepend, value, delimiter)
  }

  pub fn append(&mut self, name: &str, value: &str, delimiter: Option<&str>) -> &mut Self {
    self.push_op(name, EnvOp::Append, value, delimiter)
  }

  /// Prepend a directory to a search-path variable such as `PATH`.
  pub fn prepend_path(&mut self, name: &str, dir: &str) -> &mut Self {
    self.prepend(name, dir, Some(PATH_DELIMITER))
  }

  /// Append a directory to a search-path variable.
  pub fn append_path(&mut self, name: &str, dir: &str) -> &mut Self {
    self.append(name, dir, Some(PATH_DELIMITER))
  }

  /// Append all entries of `other` after this overlay's entries.
  pub fn extend(&mut self, other: &EnvOverlay) {
    self.entries.extend(other.entries.iter().cloned());
  }

  /// Apply every entry, in order, to `env`.
  pub fn apply(&self, env: &mut BTreeMap<String, String>) {
    for entry in &self.entries {
      let delimiter = entry.delimiter.as_deref().unwrap_or("");
      match entry.op {
        EnvOp::Override => {
          env.insert(entry.name.clone(), entry.value.clone());
        }
        EnvOp::Default => {
          env.entry(entry.name.clone()).or_insert_with(|| entry.value.clone());
        }
        EnvOp::Prepend => {
          let value = match env.get(&entry.name) {
            Some(current) if !current.is_empty() => format!("{}{}{}", entry.value, delimiter, current),
            _ => entry.value.clone(),
          };
          env.insert(entry.name.clone(), value);
        }
        EnvOp::Append => {
          let value = match env.get(&entry.name) {
            Some(current) if !current.is_empty() => format!("{}{}{}", current, delimiter, entry.value),
            _ => entry.value.clone(),
          };
          env.insert(entry.name.clone(), value);
        }
      }
    }
  }

  /// Apply the overlay to a copy of `base`.
  pub fn applied_to(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = base.clone();
    self.apply(&mut env);
    env
  }
}
