//! Typed view of attachment metadata.
//!
//! The shrinker reads `file`, `width`, `height`, `filesize` and `sizes`, and
//! only ever writes file sizes. Everything else the CMS stored (`image_meta`,
//! `mime-type`, plugin keys) stays in the raw value untouched, so writing a
//! record back never drops data and an unmodified record re-serializes to
//! the exact bytes it was read from.

use crate::error::{Result, ShrinkError};
use crate::php_serialize::{self, PhpKey, PhpValue};
use crate::scaler::Dims;
use shared_utils::{split_key, validate_leaf_name};

/// Label of the cropped thumbnail; it is produced by a different transform
/// and is never re-encoded.
pub const THUMBNAIL_LABEL: &str = "thumbnail";

const FILESIZE_KEY: &str = "filesize";

#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    pub label: String,
    /// Leaf file name, in the same directory as the base file. Never
    /// contains a separator or `..`.
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

impl Derivative {
    pub fn dims(&self) -> Dims {
        (self.width, self.height)
    }

    pub fn is_thumbnail(&self) -> bool {
        self.label == THUMBNAIL_LABEL
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Store row id (`meta_id`); only used to address the write-back.
    pub id: i64,
    pub relative_path: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
    pub sizes: Vec<Derivative>,
    raw: PhpValue,
}

impl ImageRecord {
    /// Decode a serialized metadata blob.
    ///
    /// Non-image attachments (no `file`/`width`/`height`) are a `Record`
    /// error; callers skip those rows.
    pub fn from_serialized(id: i64, serialized: &str) -> Result<Self> {
        let raw = php_serialize::unserialize(serialized)?;
        Self::from_php(id, raw)
    }

    pub fn from_php(id: i64, raw: PhpValue) -> Result<Self> {
        let bad = |reason: String| ShrinkError::Record { id, reason };
        if raw.entries().is_none() {
            return Err(bad("metadata is not an array".into()));
        }

        let relative_path = raw
            .get("file")
            .and_then(PhpValue::as_str)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| bad("missing \"file\"".into()))?
            .to_string();
        let width = dimension(&raw, "width").ok_or_else(|| bad("missing or invalid \"width\"".into()))?;
        let height =
            dimension(&raw, "height").ok_or_else(|| bad("missing or invalid \"height\"".into()))?;
        let file_size = byte_count(&raw);

        let mut sizes = Vec::new();
        if let Some(entries) = raw.get("sizes").and_then(PhpValue::entries) {
            for (key, value) in entries {
                let label = match key {
                    PhpKey::Str(s) => s.clone(),
                    PhpKey::Int(i) => i.to_string(),
                };
                let file = value
                    .get("file")
                    .and_then(PhpValue::as_str)
                    .ok_or_else(|| bad(format!("size {:?} has no \"file\"", label)))?
                    .to_string();
                // Derivatives live next to the base file; anything else would
                // send re-encoded output outside the managed tree.
                if let Err(e) = validate_leaf_name(&file) {
                    tracing::warn!(
                        meta_id = id,
                        label = %label,
                        error = %e,
                        "⚠️ Ignoring size with unsafe file name"
                    );
                    continue;
                }
                let (Some(width), Some(height)) = (dimension(value, "width"), dimension(value, "height"))
                else {
                    return Err(bad(format!("size {:?} has invalid dimensions", label)));
                };
                sizes.push(Derivative {
                    label,
                    file,
                    width,
                    height,
                    file_size: byte_count(value),
                });
            }
        }

        Ok(Self {
            id,
            relative_path,
            width,
            height,
            file_size,
            sizes,
            raw,
        })
    }

    pub fn to_serialized(&self) -> String {
        php_serialize::serialize(&self.raw)
    }

    pub fn raw(&self) -> &PhpValue {
        &self.raw
    }

    pub fn dims(&self) -> Dims {
        (self.width, self.height)
    }

    pub fn megapixels(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height) / 1_000_000.0
    }

    /// Directory key of the base file (`2022/08`), empty at the root.
    pub fn directory(&self) -> &str {
        split_key(&self.relative_path).0
    }

    /// Relative path of a derivative's file.
    pub fn derivative_path(&self, derivative: &Derivative) -> String {
        shared_utils::join_key(self.directory(), &derivative.file)
    }

    /// Set the base file's size; appended as a new key if absent.
    pub fn set_file_size(&mut self, bytes: u64) {
        self.file_size = Some(bytes);
        if let Some(entries) = entries_mut(&mut self.raw) {
            set_entry(entries, FILESIZE_KEY, PhpValue::Int(to_php_int(bytes)));
        }
    }

    /// Set the size of the derivative labelled `label`. Returns false when
    /// the record has no such label; labels are never added.
    pub fn set_derivative_size(&mut self, label: &str, bytes: u64) -> bool {
        let Some(derivative) = self.sizes.iter_mut().find(|d| d.label == label) else {
            return false;
        };
        derivative.file_size = Some(bytes);

        let size_entry = entries_mut(&mut self.raw)
            .and_then(|top| top.iter_mut().find(|(k, _)| k.as_str() == Some("sizes")))
            .and_then(|(_, sizes)| entries_mut(sizes))
            .and_then(|sizes| {
                sizes.iter_mut().find(|(k, _)| match k {
                    PhpKey::Str(s) => s == label,
                    PhpKey::Int(i) => i.to_string() == label,
                })
            })
            .and_then(|(_, entry)| entries_mut(entry));
        match size_entry {
            Some(entries) => {
                set_entry(entries, FILESIZE_KEY, PhpValue::Int(to_php_int(bytes)));
                true
            }
            None => false,
        }
    }
}

fn dimension(value: &PhpValue, key: &str) -> Option<u32> {
    value
        .get(key)
        .and_then(PhpValue::as_i64)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

fn byte_count(value: &PhpValue) -> Option<u64> {
    value
        .get(FILESIZE_KEY)
        .and_then(PhpValue::as_i64)
        .and_then(|v| u64::try_from(v).ok())
}

fn to_php_int(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

fn entries_mut(value: &mut PhpValue) -> Option<&mut Vec<(PhpKey, PhpValue)>> {
    match value {
        PhpValue::Array(entries) | PhpValue::Object { props: entries, .. } => Some(entries),
        _ => None,
    }
}

fn set_entry(entries: &mut Vec<(PhpKey, PhpValue)>, key: &str, value: PhpValue) {
    match entries.iter_mut().find(|(k, _)| k.as_str() == Some(key)) {
        Some((_, existing)) => *existing = value,
        None => entries.push((PhpKey::from(key), value)),
    }
}
