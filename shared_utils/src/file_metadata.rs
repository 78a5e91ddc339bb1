//! File Metadata Module
//!
//! Timestamps and ownership for files that get replaced in place.
//! Replacing a file by rename hands the destination the staged file's owner
//! and mode, so callers capture both before promotion and restore them after.

use std::fs;
use std::io;
use std::path::Path;

/// Modification time in fractional seconds since the Unix epoch.
///
/// Same value a `stat` based tool would report as `st_mtime`, so ledgers
/// written by either stay comparable.
pub fn mtime_seconds(path: &Path) -> io::Result<f64> {
    let metadata = fs::metadata(path)?;
    Ok(filetime_to_seconds(
        filetime::FileTime::from_last_modification_time(&metadata),
    ))
}

pub fn filetime_to_seconds(time: filetime::FileTime) -> f64 {
    time.unix_seconds() as f64 + f64::from(time.nanoseconds()) / 1e9
}

/// Owner, group and permission bits of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwnership {
    #[cfg(unix)]
    pub uid: u32,
    #[cfg(unix)]
    pub gid: u32,
    #[cfg(unix)]
    pub mode: u32,
    pub readonly: bool,
}

impl FileOwnership {
    pub fn capture(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            Ok(Self {
                uid: metadata.uid(),
                gid: metadata.gid(),
                mode: metadata.permissions().mode(),
                readonly: metadata.permissions().readonly(),
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {
                readonly: metadata.permissions().readonly(),
            })
        }
    }

    /// Re-apply mode, then owner/group.
    ///
    /// Mode failures are errors. A failing chown is reported separately via
    /// the returned `Ok(false)`, since changing owners needs privileges the
    /// process may legitimately lack when it already runs as the owner.
    pub fn restore(&self, path: &Path) -> io::Result<bool> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(self.mode))?;

            let current = fs::metadata(path)?;
            {
                use std::os::unix::fs::MetadataExt;
                if current.uid() == self.uid && current.gid() == self.gid {
                    return Ok(true);
                }
            }
            match std::os::unix::fs::chown(path, Some(self.uid), Some(self.gid)) {
                Ok(()) => Ok(true),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        uid = self.uid,
                        gid = self.gid,
                        error = %e,
                        "⚠️ Failed to restore file ownership"
                    );
                    Ok(false)
                }
            }
        }
        #[cfg(not(unix))]
        {
            let mut permissions = fs::metadata(path)?.permissions();
            permissions.set_readonly(self.readonly);
            fs::set_permissions(path, permissions)?;
            Ok(true)
        }
    }
}
