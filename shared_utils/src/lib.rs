//! Shared Utilities for the upload shrinker tools
//!
//! Common functionality used by `img_shrink` and its tests:
//! - Logging setup and external tool invocation (`logging`)
//! - Directory walking for batch jobs (`batch`)
//! - Path key helpers (`common_utils`)
//! - Validation of file names read from metadata (`path_validator`)
//! - Modification times and ownership preservation (`file_metadata`)
//! - Type-safe byte counts (`types`)

pub mod batch;
pub mod common_utils;
pub mod file_metadata;
pub mod logging;
pub mod path_validator;
pub mod types;

pub use batch::{collect_files, RASTER_EXTENSIONS};
pub use common_utils::{get_extension_lowercase, has_extension, join_key, relative_key, split_key};
pub use file_metadata::{mtime_seconds, FileOwnership};
pub use logging::{
    execute_external_command, init_logging, log_external_tool, ExternalCommandResult, LogConfig,
};
pub use path_validator::{validate_leaf_name, PathValidationError};
pub use types::FileSize;
