//! Layer flags, persisted records and handles.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::LAYER_SCHEMA_VERSION;
use crate::types::Metadata;

/// Where a layer's content is visible: to later build steps, to the next
/// build (cache), and/or in the final image (launch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerFlags {
  #[serde(default)]
  pub build: bool,
  #[serde(default)]
  pub cache: bool,
  #[serde(default)]
  pub launch: bool,
}

impl LayerFlags {
  pub const BUILD: LayerFlags = LayerFlags {
    build: true,
    cache: false,
    launch: false,
  };
  pub const CACHE: LayerFlags = LayerFlags {
    build: false,
    cache: true,
    launch: false,
  };
  pub const LAUNCH: LayerFlags = LayerFlags {
    build: false,
    cache: false,
    launch: true,
  };

  pub fn is_empty(self) -> bool {
    !(self.build || self.cache || self.launch)
  }

  pub fn union(self, other: LayerFlags) -> LayerFlags {
    LayerFlags {
      build: self.build || other.build,
      cache: self.cache || other.cache,
      launch: self.launch || other.launch,
    }
  }
}

impl std::ops::BitOr for LayerFlags {
  type Output = LayerFlags;

  fn bitor(self, rhs: LayerFlags) -> LayerFlags {
    self.union(rhs)
  }
}

impl std::fmt::Display for LayerFlags {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let names: Vec<&str> = [(self.build, "build"), (self.cache, "cache"), (self.launch, "launch")]
      .into_iter()
      .filter_map(|(set, name)| set.then_some(name))
      .collect();
    write!(f, "{}", names.join(","))
  }
}

/// The on-disk record stored next to each layer's content directory.
///
/// The field set is the cache-validity contract between builds: any change
/// must bump [`LAYER_SCHEMA_VERSION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerRecord {
  pub schema: u32,
  pub cache_key: Option<String>,
  pub flags: LayerFlags,
  #[serde(default)]
  pub metadata: Metadata,
}

impl LayerRecord {
  pub fn new(cache_key: Option<String>, flags: LayerFlags, metadata: Metadata) -> Self {
    Self {
      schema: LAYER_SCHEMA_VERSION,
      cache_key,
      flags,
      metadata,
    }
  }
}

/// Handle to a layer obtained from the layer manager.
///
/// The handle only identifies the layer; key, metadata and hit state live in
/// the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
  pub(crate) module: String,
  pub(crate) name: String,
  pub(crate) path: PathBuf,
  pub(crate) flags: LayerFlags,
}

impl Layer {
  pub fn module(&self) -> &str {
    &self.module
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Content directory the module populates.
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn flags(&self) -> LayerFlags {
    self.flags
  }
}

/// A layer left on disk after a build, as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedLayer {
  pub module: String,
  pub name: String,
  pub flags: LayerFlags,
  /// Whether the layer was obtained by its module during this build.
  pub touched: bool,
}

#[derive(Debug, Error)]
pub enum LayerError {
  #[error("invalid layer name {0:?}")]
  InvalidName(String),

  #[error("layer {0} has no flags: at least one of build, cache, launch is required")]
  NoFlags(String),

  #[error("layer {0} was not obtained from this layer manager")]
  UnknownLayer(String),

  #[error("no module is active; layers can only be requested during a build step")]
  NoActiveModule,

  #[error("layer io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Unreadable or schema-mismatched record. Callers turn this into a
  /// forced cache miss.
  #[error("corrupt layer record at {path}: {reason}")]
  Corrupt { path: PathBuf, reason: String },
}

impl LayerError {
  pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> LayerError + '_ {
    move |source| LayerError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}
