//! Common Utilities Module
//!
//! Small path helpers shared by the scanner and the tools.

use std::path::{Component, Path};

// ═══════════════════════════════════════════════════════════════
// File Operations
// ═══════════════════════════════════════════════════════════════

/// Lower-cased extension of `path`, empty when there is none.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::get_extension_lowercase;
///
/// assert_eq!(get_extension_lowercase(Path::new("test.PNG")), "png");
/// assert_eq!(get_extension_lowercase(Path::new("noext")), "");
/// ```
pub fn get_extension_lowercase(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Case-insensitive extension membership test (extensions given without dot).
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::has_extension;
///
/// assert!(has_extension(Path::new("photo.WEBP"), &["png", "webp"]));
/// assert!(!has_extension(Path::new("photo.jpg"), &["png", "webp"]));
/// ```
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let ext = get_extension_lowercase(path);
    extensions.contains(&ext.as_str())
}

// ═══════════════════════════════════════════════════════════════
// Path Keys
// ═══════════════════════════════════════════════════════════════

/// Relative path of `path` under `base`, joined with `/` regardless of
/// platform. Returns `None` when `path` is not below `base`.
///
/// This is the form the CMS stores attachment paths in
/// (`2022/08/photo.png`), so it doubles as the join key between a disk scan
/// and metadata rows.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::relative_key;
///
/// let base = Path::new("/var/www/uploads");
/// let path = Path::new("/var/www/uploads/2022/08/photo.png");
/// assert_eq!(relative_key(path, base).as_deref(), Some("2022/08/photo.png"));
/// ```
pub fn relative_key(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Split a `/`-joined key into `(directory, leaf)`; the directory is empty
/// for top-level files.
///
/// # Examples
/// ```
/// use shared_utils::common_utils::split_key;
///
/// assert_eq!(split_key("2022/08/photo.png"), ("2022/08", "photo.png"));
/// assert_eq!(split_key("photo.png"), ("", "photo.png"));
/// ```
pub fn split_key(key: &str) -> (&str, &str) {
    match key.rfind('/') {
        Some(idx) => (&key[..idx], &key[idx + 1..]),
        None => ("", key),
    }
}

/// Join a directory key and a leaf name with `/`.
pub fn join_key(dir: &str, leaf: &str) -> String {
    if dir.is_empty() {
        leaf.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_get_extension_lowercase() {
        assert_eq!(get_extension_lowercase(Path::new("a/b/c.WebP")), "webp");
        assert_eq!(get_extension_lowercase(Path::new(".hidden")), "");
        assert_eq!(get_extension_lowercase(Path::new("archive.tar.gz")), "gz");
    }

    #[test]
    fn test_has_extension() {
        let exts = &["png", "webp"];
        assert!(has_extension(Path::new("x.png"), exts));
        assert!(has_extension(Path::new("x.PNG"), exts));
        assert!(!has_extension(Path::new("x.png.bak"), exts));
        assert!(!has_extension(Path::new("png"), exts));
    }

    #[test]
    fn test_relative_key_nested_and_top_level() {
        let base = PathBuf::from("/srv/uploads");
        assert_eq!(
            relative_key(&base.join("2021/03/a b.webp"), &base).as_deref(),
            Some("2021/03/a b.webp")
        );
        assert_eq!(relative_key(&base.join("top.png"), &base).as_deref(), Some("top.png"));
        assert_eq!(relative_key(Path::new("/elsewhere/x.png"), &base), None);
    }

    #[test]
    fn test_split_and_join_key() {
        let (dir, leaf) = split_key("2022/08/testing.png");
        assert_eq!(join_key(dir, leaf), "2022/08/testing.png");
        let (dir, leaf) = split_key("testing.png");
        assert_eq!(dir, "");
        assert_eq!(join_key(dir, leaf), "testing.png");
        assert_eq!(join_key("2022/08/", "x.png"), "2022/08/x.png");
    }
}
