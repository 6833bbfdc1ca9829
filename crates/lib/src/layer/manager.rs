//! Layer storage and cache decisions.
//!
//! # Storage Layout
//!
//! ```text
//! <layers_root>/
//! ├── manifest.json            # written by the lifecycle after a build
//! └── <module>/
//!     ├── <layer>/             # content populated by the module
//!     └── <layer>.json         # LayerRecord: schema, cache key, flags, metadata
//! ```
//!
//! A record is only ever replaced atomically, and it is removed before content
//! is cleared, so an interrupted build can leave content without a record
//! (which the next build treats as a miss) but never a record describing
//! content that is not there.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::consts::LAYER_SCHEMA_VERSION;
use crate::types::Metadata;
use crate::util::fs::{clear_dir, remove_dir_if_exists, remove_file_if_exists, write_json_atomic};

use super::types::{Layer, LayerError, LayerFlags, LayerRecord, RetainedLayer};

const RECORD_EXTENSION: &str = "json";

#[derive(Debug)]
struct LayerState {
  flags: LayerFlags,
  /// Record persisted by a previous build, if it was valid.
  previous: Option<LayerRecord>,
  cache_key: Option<String>,
  metadata: Metadata,
}

type LayerId = (String, String);

/// Owns the physical layer storage for one lifecycle invocation.
#[derive(Debug)]
pub struct LayerManager {
  root: PathBuf,
  layers: BTreeMap<LayerId, LayerState>,
}

impl LayerManager {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      layers: BTreeMap::new(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn content_dir(&self, module: &str, name: &str) -> PathBuf {
    self.root.join(module).join(name)
  }

  fn record_path(&self, module: &str, name: &str) -> PathBuf {
    self.root.join(module).join(format!("{}.{}", name, RECORD_EXTENSION))
  }

  /// Create (or reopen) a layer for `module` and load its previous record.
  ///
  /// A corrupt previous record is discarded with a warning and the layer
  /// starts empty. Layers without the `cache` flag, and layers whose previous
  /// record carries no cache key, always start empty.
  pub fn get_layer(&mut self, module: &str, name: &str, flags: LayerFlags) -> Result<Layer, LayerError> {
    validate_name(module)?;
    validate_name(name)?;
    if flags.is_empty() {
      return Err(LayerError::NoFlags(name.to_string()));
    }

    let path = self.content_dir(module, name);
    let id: LayerId = (module.to_string(), name.to_string());

    if let Some(state) = self.layers.get_mut(&id) {
      state.flags = flags;
      return Ok(Layer {
        module: module.to_string(),
        name: name.to_string(),
        path,
        flags,
      });
    }

    fs::create_dir_all(&path).map_err(LayerError::io(&path))?;

    let record_path = self.record_path(module, name);
    let previous = match load_record(&record_path) {
      Ok(previous) => previous,
      Err(LayerError::Corrupt { path, reason }) => {
        warn!(module, layer = name, path = %path.display(), reason = %reason, "discarding corrupt layer record");
        remove_file_if_exists(&record_path).map_err(LayerError::io(&record_path))?;
        None
      }
      Err(e) => return Err(e),
    };

    // Only a keyed record can ever be a hit.
    let previous = previous.filter(|record| record.cache_key.is_some());

    if previous.is_none() || !flags.cache {
      debug!(module, layer = name, "starting layer empty");
      clear_dir(&path).map_err(LayerError::io(&path))?;
    }

    let metadata = previous.as_ref().map(|r| r.metadata.clone()).unwrap_or_default();
    self.layers.insert(
      id,
      LayerState {
        flags,
        previous,
        cache_key: None,
        metadata,
      },
    );

    Ok(Layer {
      module: module.to_string(),
      name: name.to_string(),
      path,
      flags,
    })
  }

  fn state(&self, layer: &Layer) -> Result<&LayerState, LayerError> {
    self
      .layers
      .get(&(layer.module.clone(), layer.name.clone()))
      .ok_or_else(|| LayerError::UnknownLayer(layer.name.clone()))
  }

  fn state_mut(&mut self, layer: &Layer) -> Result<&mut LayerState, LayerError> {
    self
      .layers
      .get_mut(&(layer.module.clone(), layer.name.clone()))
      .ok_or_else(|| LayerError::UnknownLayer(layer.name.clone()))
  }

  /// Record the key that decides reuse of this layer.
  ///
  /// If the key differs from the one persisted by the previous build, the old
  /// record and content are removed so the module repopulates from scratch.
  pub fn set_cache_key(&mut self, layer: &Layer, key: &str) -> Result<(), LayerError> {
    let record_path = self.record_path(&layer.module, &layer.name);
    let state = self.state_mut(layer)?;
    state.cache_key = Some(key.to_string());

    let previous_key = state.previous.as_ref().and_then(|r| r.cache_key.as_deref());
    if state.flags.cache && previous_key == Some(key) {
      info!(module = %layer.module, layer = %layer.name, key, "layer cache hit");
      return Ok(());
    }

    info!(
      module = %layer.module,
      layer = %layer.name,
      key,
      previous = previous_key.unwrap_or("<none>"),
      "layer cache miss"
    );
    state.previous = None;
    state.metadata.clear();

    remove_file_if_exists(&record_path).map_err(LayerError::io(&record_path))?;
    clear_dir(&layer.path).map_err(LayerError::io(&layer.path))?;
    Ok(())
  }

  /// True iff a prior build persisted this layer with the key set for this
  /// build and the layer is still flagged `cache`.
  pub fn is_cache_hit(&self, layer: &Layer) -> bool {
    let Ok(state) = self.state(layer) else {
      return false;
    };
    match (&state.previous, &state.cache_key) {
      (Some(previous), Some(key)) => state.flags.cache && previous.cache_key.as_deref() == Some(key.as_str()),
      _ => false,
    }
  }

  /// Metadata currently associated with the layer: the previous build's
  /// metadata until the module writes new data.
  pub fn metadata(&self, layer: &Layer) -> Result<&Metadata, LayerError> {
    Ok(&self.state(layer)?.metadata)
  }

  /// Replace the layer's metadata and persist its record atomically.
  pub fn write_metadata(&mut self, layer: &Layer, data: Metadata) -> Result<(), LayerError> {
    self.state_mut(layer)?.metadata = data;
    self.persist(&layer.module, &layer.name)
  }

  fn persist(&self, module: &str, name: &str) -> Result<(), LayerError> {
    let state = self
      .layers
      .get(&(module.to_string(), name.to_string()))
      .ok_or_else(|| LayerError::UnknownLayer(name.to_string()))?;

    let record = LayerRecord::new(state.cache_key.clone(), state.flags, state.metadata.clone());
    let path = self.record_path(module, name);
    write_json_atomic(&path, &record).map_err(LayerError::io(&path))?;
    debug!(module, layer = name, path = %path.display(), "layer record written");
    Ok(())
  }

  /// Persist a record for every layer `module` touched during this build.
  pub fn commit_module(&mut self, module: &str) -> Result<(), LayerError> {
    let names: Vec<String> = self
      .layers
      .keys()
      .filter(|(m, _)| m == module)
      .map(|(_, n)| n.clone())
      .collect();

    for name in names {
      self.persist(module, &name)?;
    }
    Ok(())
  }

  /// Names of the layers touched by `module` during this build.
  pub fn touched(&self, module: &str) -> Vec<String> {
    self
      .layers
      .keys()
      .filter(|(m, _)| m == module)
      .map(|(_, n)| n.clone())
      .collect()
  }

  /// Remove layers that must not outlive this build and list the rest.
  ///
  /// Removed: every layer of a module not in `active_modules`, and layers not
  /// touched this build whose record is missing, corrupt or lacks `cache`.
  pub fn finalize(&mut self, active_modules: &BTreeSet<String>) -> Result<Vec<RetainedLayer>, LayerError> {
    let mut retained = Vec::new();

    let entries = match fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(retained),
      Err(e) => return Err(LayerError::io(&self.root)(e)),
    };

    let mut module_dirs = Vec::new();
    for entry in entries {
      let entry = entry.map_err(LayerError::io(&self.root))?;
      if entry.file_type().map_err(LayerError::io(&entry.path()))?.is_dir() {
        module_dirs.push(entry.file_name().to_string_lossy().to_string());
      }
    }
    module_dirs.sort();

    for module in module_dirs {
      let module_dir = self.root.join(&module);
      if !active_modules.contains(&module) {
        info!(module = %module, "removing layers of module not in plan");
        remove_dir_if_exists(&module_dir).map_err(LayerError::io(&module_dir))?;
        continue;
      }

      for name in layer_names(&module_dir)? {
        if let Some(state) = self.layers.get(&(module.clone(), name.clone())) {
          retained.push(RetainedLayer {
            module: module.clone(),
            name,
            flags: state.flags,
            touched: true,
          });
          continue;
        }

        let record_path = self.record_path(&module, &name);
        match load_record(&record_path) {
          Ok(Some(record)) if record.flags.cache => {
            debug!(module = %module, layer = %name, "keeping untouched cache layer");
            retained.push(RetainedLayer {
              module: module.clone(),
              name,
              flags: record.flags,
              touched: false,
            });
          }
          _ => {
            info!(module = %module, layer = %name, "removing untouched layer");
            remove_file_if_exists(&record_path).map_err(LayerError::io(&record_path))?;
            let content = self.content_dir(&module, &name);
            remove_dir_if_exists(&content).map_err(LayerError::io(&content))?;
          }
        }
      }
    }

    Ok(retained)
  }
}

/// Load a layer record.
///
/// Returns `Ok(None)` if no record exists and `LayerError::Corrupt` if the
/// record cannot be parsed or has a different schema version.
pub fn load_record(path: &Path) -> Result<Option<LayerRecord>, LayerError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
      return Err(LayerError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
      });
    }
    Err(e) => return Err(LayerError::io(path)(e)),
  };

  let record: LayerRecord = serde_json::from_str(&content).map_err(|e| LayerError::Corrupt {
    path: path.to_path_buf(),
    reason: e.to_string(),
  })?;

  if record.schema != LAYER_SCHEMA_VERSION {
    return Err(LayerError::Corrupt {
      path: path.to_path_buf(),
      reason: format!("schema {} (expected {})", record.schema, LAYER_SCHEMA_VERSION),
    });
  }

  Ok(Some(record))
}

/// Layer names present in a module directory, from content dirs and records.
fn layer_names(module_dir: &Path) -> Result<BTreeSet<String>, LayerError> {
  let mut names = BTreeSet::new();
  for entry in fs::read_dir(module_dir).map_err(LayerError::io(module_dir))? {
    let entry = entry.map_err(LayerError::io(module_dir))?;
    let path = entry.path();
    let file_name = entry.file_name().to_string_lossy().to_string();

    if path.is_dir() {
      names.insert(file_name);
    } else if let Some(stem) = file_name.strip_suffix(&format!(".{}", RECORD_EXTENSION)) {
      names.insert(stem.to_string());
    }
    // anything else is a leftover temp file from an interrupted write
  }
  Ok(names)
}

fn validate_name(name: &str) -> Result<(), LayerError> {
  let invalid = name.is_empty()
    || name == "."
    || name == ".."
    || name.contains(['/', '\\'])
    || name.ends_with(&format!(".{}", RECORD_EXTENSION));
  if invalid {
    return Err(LayerError::InvalidName(name.to_string()));
  }
  Ok(())
}
