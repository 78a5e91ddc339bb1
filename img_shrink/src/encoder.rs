//! Re-encode invocation and staged promotion.
//!
//! Every attempt encodes into a staging file first. The destination is only
//! replaced when the staged output is strictly smaller; otherwise the staged
//! file is discarded and the destination is left exactly as it was.

use crate::error::{Result, ShrinkError};
use crate::quality::RasterFormat;
use crate::scaler::Dims;
use serde::Serialize;
use shared_utils::{mtime_seconds, FileOwnership, FileSize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// One encode attempt. Built fresh for each attempt and returned alongside
/// its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeRequest {
    pub format: RasterFormat,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Target size; `None` re-compresses without resizing.
    pub resize: Option<Dims>,
    pub quality: u32,
}

impl EncodeRequest {
    /// Re-compress `path` in place.
    pub fn recompress(format: RasterFormat, path: PathBuf, quality: u32) -> Self {
        Self {
            format,
            source: path.clone(),
            destination: path,
            resize: None,
            quality,
        }
    }

    /// Regenerate `destination` from `source` at `dims`.
    pub fn derivative(
        format: RasterFormat,
        source: PathBuf,
        destination: PathBuf,
        dims: Dims,
        quality: u32,
    ) -> Self {
        Self {
            format,
            source,
            destination,
            resize: Some(dims),
            quality,
        }
    }
}

pub trait Encoder {
    /// Encode `request.source` into `staged`. Any failure, including the
    /// external program exiting non-zero, is an error.
    fn encode(&self, request: &EncodeRequest, staged: &Path) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════
// ImageMagick
// ═══════════════════════════════════════════════════════════════

/// Encoder backed by an ImageMagick-compatible `convert`.
#[derive(Debug, Clone)]
pub struct MagickEncoder {
    program: PathBuf,
}

impl MagickEncoder {
    /// Resolve `program` on `PATH`; a missing executable is fatal up front
    /// rather than on the first candidate.
    pub fn new(program: &str) -> Result<Self> {
        let program = which::which(program)
            .map_err(|e| ShrinkError::ToolNotFound(format!("{}: {}", program, e)))?;
        tracing::debug!(program = %program.display(), "Using encoder");
        Ok(Self { program })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for `request`, writing to `staged`.
    ///
    /// png: `-strip [-resize WxH] -colors Q <src> <dest>`
    /// webp: `-strip [-resize WxH] -define webp:method=6 -quality Q <src> <dest>`
    pub fn arguments(request: &EncodeRequest, staged: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-strip".into()];
        if let Some((w, h)) = request.resize {
            args.push("-resize".into());
            args.push(format!("{}x{}", w, h).into());
        }
        match request.format {
            RasterFormat::Png => {
                args.push("-colors".into());
            }
            RasterFormat::Webp => {
                args.push("-define".into());
                args.push("webp:method=6".into());
                args.push("-quality".into());
            }
        }
        args.push(request.quality.to_string().into());
        args.push(request.source.clone().into_os_string());
        args.push(staged.as_os_str().to_os_string());
        args
    }
}

impl Encoder for MagickEncoder {
    fn encode(&self, request: &EncodeRequest, staged: &Path) -> Result<()> {
        let program = self.program.to_string_lossy();
        let args = Self::arguments(request, staged);
        let result = shared_utils::execute_external_command(&program, &args).map_err(|e| {
            ShrinkError::EncodeFailed {
                path: request.source.clone(),
                reason: e.to_string(),
            }
        })?;
        if !result.success() {
            return Err(ShrinkError::EncodeFailed {
                path: request.source.clone(),
                reason: format!(
                    "{} exited with {:?}: {}",
                    program,
                    result.exit_code,
                    result.stderr.trim()
                ),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
// Staged shrink
// ═══════════════════════════════════════════════════════════════

/// A destination that was replaced by a smaller encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShrinkOutcome {
    pub request: EncodeRequest,
    pub old_size: u64,
    pub new_size: u64,
    /// Modification time of the destination after promotion.
    pub mtime: f64,
}

/// Encode `request` into a staging file and promote it over the destination
/// if strictly smaller. `Ok(None)` means no improvement.
pub fn try_shrink(
    encoder: &dyn Encoder,
    request: EncodeRequest,
    staging_dir: &Path,
) -> Result<Option<ShrinkOutcome>> {
    let unreadable = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ShrinkError::SourceUnreadable { path, source }
    };
    fs::metadata(&request.source).map_err(unreadable(&request.source))?;
    let old_size = FileSize::new(
        fs::metadata(&request.destination)
            .map_err(unreadable(&request.destination))?
            .len(),
    );

    let staged = tempfile::Builder::new()
        .prefix("staged_")
        .suffix(&format!(".{}", request.format.extension()))
        .tempfile_in(staging_dir)?;
    encoder.encode(&request, staged.path())?;

    let new_size = match fs::metadata(staged.path()) {
        Ok(meta) if meta.len() > 0 => FileSize::new(meta.len()),
        Ok(_) => {
            return Err(ShrinkError::EncodeFailed {
                path: request.source.clone(),
                reason: "encoder produced an empty file".into(),
            })
        }
        Err(e) => {
            return Err(ShrinkError::EncodeFailed {
                path: request.source.clone(),
                reason: format!("encoder produced no output: {}", e),
            })
        }
    };

    if new_size.savings_against(old_size).is_none() {
        tracing::debug!(
            path = %request.destination.display(),
            old = %old_size,
            new = %new_size,
            "No improvement, keeping original"
        );
        return Ok(None);
    }

    let ownership = FileOwnership::capture(&request.destination)?;
    if let Err(persist) = staged.persist(&request.destination) {
        // Rename fails across filesystems; fall back to copying the bytes.
        fs::copy(persist.file.path(), &request.destination)?;
    }
    ownership.restore(&request.destination)?;
    let mtime = mtime_seconds(&request.destination)?;

    tracing::info!(
        path = %request.destination.display(),
        old = %old_size,
        new = %new_size,
        "✅ Shrunk"
    );
    Ok(Some(ShrinkOutcome {
        request,
        old_size: old_size.bytes(),
        new_size: new_size.bytes(),
        mtime,
    }))
}
