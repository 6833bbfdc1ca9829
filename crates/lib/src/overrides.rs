//! Operator overrides read from the environment snapshot.
//!
//! Overrides are how an operator steers a build without changing the
//! application: an explicit buildable target, the target platform, and
//! module lists that are disabled or forced (see
//! [`crate::plan::PlatformConfig::from_env`]).

use std::io;

use thiserror::Error;

use crate::consts::{ENV_BUILDABLE, ENV_TARGET_PLATFORM, MAIN_PATH_FILENAME};
use crate::context::BuildContext;

#[derive(Debug, Error)]
pub enum OverrideError {
  #[error("invalid path {path:?}: {reason}")]
  InvalidPath { path: String, reason: &'static str },

  #[error("failed to read main package path file: {0}")]
  Io(#[from] io::Error),
}

/// Split a comma separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|item| !item.is_empty())
    .map(str::to_string)
    .collect()
}

/// Normalise a path relative to the application root.
///
/// Surrounding whitespace, `.` components and repeated separators are
/// dropped and `..` is resolved lexically. Absolute paths and paths that
/// leave the application root are rejected. The root itself is `"."`.
pub fn clean_main_path(path: &str) -> Result<String, OverrideError> {
  let trimmed = path.trim();
  let invalid = |reason| OverrideError::InvalidPath {
    path: path.to_string(),
    reason,
  };

  if trimmed.starts_with('/') {
    return Err(invalid("path must be relative to the application root"));
  }

  let mut parts: Vec<&str> = Vec::new();
  for component in trimmed.split('/') {
    match component {
      "" | "." => {}
      ".." => {
        if parts.pop().is_none() {
          return Err(invalid("path escapes the application root"));
        }
      }
      part => parts.push(part),
    }
  }

  if parts.is_empty() {
    return Ok(".".to_string());
  }
  Ok(parts.join("/"))
}

/// The explicit buildable target, cleaned, if the operator set one.
///
/// Modules check this before any file heuristic: when it is set it decides
/// detection on its own.
pub fn buildable(ctx: &BuildContext) -> Result<Option<String>, OverrideError> {
  match ctx.env_var(ENV_BUILDABLE) {
    Some(value) if !value.trim().is_empty() => clean_main_path(&value).map(Some),
    _ => Ok(None),
  }
}

/// Main package directory named by the stager file, or `""` without one.
pub fn main_path(ctx: &BuildContext) -> Result<String, OverrideError> {
  let content = match ctx.read_app_file(MAIN_PATH_FILENAME) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
    Err(e) => return Err(e.into()),
  };

  if content.trim().is_empty() {
    return Ok(String::new());
  }
  clean_main_path(&content)
}

/// Platform the image is built for, if set.
pub fn target_platform(ctx: &BuildContext) -> Option<String> {
  ctx
    .env_var(ENV_TARGET_PLATFORM)
    .map(|p| p.trim().to_string())
    .filter(|p| !p.is_empty())
}
