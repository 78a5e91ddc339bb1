//! Path Validation Module
//!
//! File names read from stored metadata are joined onto a managed root and
//! then overwritten, so they must not be able to point anywhere else.

use std::fmt;
use std::path::{Component, Path};

/// Path validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathValidationError {
    /// Name is empty
    EmptyName,
    /// Name contains a path separator
    Separator { name: String },
    /// Name is `.` or `..`
    Traversal { name: String },
    /// Name is absolute or carries a drive/root prefix
    Absolute { name: String },
    /// Name contains a null byte
    NullByte(String),
}

impl fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathValidationError::EmptyName => {
                write!(f, "❌ PATH SECURITY ERROR: Empty file name")
            }
            PathValidationError::Separator { name } => {
                write!(f, "❌ PATH SECURITY ERROR: Path separator in file name: {}", name)
            }
            PathValidationError::Traversal { name } => {
                write!(f, "❌ PATH SECURITY ERROR: Directory traversal in file name: {}", name)
            }
            PathValidationError::Absolute { name } => {
                write!(f, "❌ PATH SECURITY ERROR: Absolute path given as file name: {}", name)
            }
            PathValidationError::NullByte(name) => {
                write!(f, "❌ PATH SECURITY ERROR: Null byte in file name: {}", name)
            }
        }
    }
}

impl std::error::Error for PathValidationError {}

/// Check that `name` is a single plain file name (`photo-300x200.png`).
///
/// Both `/` and `\` are rejected on every platform since stored names may
/// come from a server running a different OS.
///
/// # Examples
/// ```
/// use shared_utils::path_validator::validate_leaf_name;
///
/// assert!(validate_leaf_name("photo-300x200.png").is_ok());
/// assert!(validate_leaf_name("../photo.png").is_err());
/// assert!(validate_leaf_name("/etc/passwd").is_err());
/// ```
pub fn validate_leaf_name(name: &str) -> Result<(), PathValidationError> {
    if name.is_empty() {
        return Err(PathValidationError::EmptyName);
    }
    if name.contains('\0') {
        return Err(PathValidationError::NullByte(name.to_string()));
    }
    if name == "." || name == ".." {
        return Err(PathValidationError::Traversal {
            name: name.to_string(),
        });
    }
    if Path::new(name).is_absolute() || name.starts_with('/') || name.starts_with('\\') {
        return Err(PathValidationError::Absolute {
            name: name.to_string(),
        });
    }
    if name.contains('/') || name.contains('\\') {
        return Err(PathValidationError::Separator {
            name: name.to_string(),
        });
    }
    // Catches drive prefixes such as `C:x.png` on Windows.
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(PathValidationError::Absolute {
            name: name.to_string(),
        }),
    }
}
