//! ScanSnapshot: the on-disk state of the managed tree for one run.

use crate::error::Result;
use shared_utils::{collect_files, join_key, mtime_seconds, relative_key, RASTER_EXTENSIONS};
use std::collections::BTreeMap;
use std::path::Path;

/// Directory key → leaf file name → modification time (float seconds).
///
/// Directory keys are `/`-joined and relative to the managed root; files at
/// the root live under the empty key.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanSnapshot {
    pub dirs: BTreeMap<String, BTreeMap<String, f64>>,
}

impl ScanSnapshot {
    /// Walk `root` recursively, recording every png and webp file.
    ///
    /// A file that disappears between listing and stat is dropped from the
    /// snapshot; it has nothing left to process.
    pub fn scan(root: &Path) -> Result<Self> {
        let mut snapshot = Self::default();
        for path in collect_files(root, RASTER_EXTENSIONS, true) {
            let Some(key) = relative_key(&path, root) else {
                continue;
            };
            let mtime = match mtime_seconds(&path) {
                Ok(mtime) => mtime,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "File vanished during scan");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            snapshot.insert(&key, mtime);
        }
        tracing::info!(
            root = %root.display(),
            directories = snapshot.dirs.len(),
            files = snapshot.file_count(),
            "Scanned managed tree"
        );
        Ok(snapshot)
    }

    pub fn insert(&mut self, relative_path: &str, mtime: f64) {
        let (dir, leaf) = shared_utils::split_key(relative_path);
        self.dirs
            .entry(dir.to_string())
            .or_default()
            .insert(leaf.to_string(), mtime);
    }

    pub fn file_count(&self) -> usize {
        self.dirs.values().map(BTreeMap::len).sum()
    }

    /// Every file as `(directory, relative path, mtime)`, sorted by path.
    pub fn files(&self) -> impl Iterator<Item = (&str, String, f64)> + '_ {
        self.dirs.iter().flat_map(|(dir, files)| {
            files
                .iter()
                .map(move |(leaf, mtime)| (dir.as_str(), join_key(dir, leaf), *mtime))
        })
    }

    pub fn mtime(&self, relative_path: &str) -> Option<f64> {
        let (dir, leaf) = shared_utils::split_key(relative_path);
        self.dirs.get(dir).and_then(|files| files.get(leaf)).copied()
    }
}
