//! Batch Processing Module
//!
//! File collection for batch jobs over a directory tree.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Collect regular files under `dir` whose extension is in `extensions`.
///
/// Entries that cannot be read while walking (permission denied, vanished
/// mid-walk) are skipped with a warning rather than aborting the walk.
/// The result is sorted so callers get a stable processing order.
pub fn collect_files(dir: &Path, extensions: &[&str], recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(dir).follow_links(true)
    } else {
        WalkDir::new(dir).max_depth(1)
    };

    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| crate::common_utils::has_extension(e.path(), extensions))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// The two raster formats the shrinker manages.
pub const RASTER_EXTENSIONS: &[&str] = &["png", "webp"];
