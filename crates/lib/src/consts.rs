//! Well-known names shared across the lifecycle.

/// Schema version of persisted layer records. Records with any other version
/// are treated as a cache miss.
pub const LAYER_SCHEMA_VERSION: u32 = 1;

/// File name of the final build manifest inside the layers root.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Name the platform requires unless configured otherwise.
pub const DEFAULT_ROOT_REQUIREMENT: &str = "web-process";

/// Number of stderr lines kept in execution errors and build diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// Explicit buildable target; short-circuits file-based detection.
pub const ENV_BUILDABLE: &str = "STACKPACK_BUILDABLE";

/// Platform the image is being built for (e.g. `flex`, `gcf`).
pub const ENV_TARGET_PLATFORM: &str = "STACKPACK_TARGET_PLATFORM";

/// Comma separated module names that are skipped without running detect.
pub const ENV_DISABLE_MODULES: &str = "STACKPACK_DISABLE_MODULES";

/// Comma separated module names that are unconditionally required.
pub const ENV_FORCE_MODULES: &str = "STACKPACK_FORCE_MODULES";

/// Stager file naming the main package directory relative to the app root.
pub const MAIN_PATH_FILENAME: &str = "_main-package-path";
