//! FileSize Type-Safe Wrapper
//!
//! Byte counts that cannot underflow, with the display format used in
//! summaries and logs.

use std::fmt;

// ============================================================================
// FileSize Newtype
// ============================================================================

/// File size in bytes.
///
/// # Examples
/// ```
/// use shared_utils::types::file_size::FileSize;
///
/// let size = FileSize::new(1024 * 1024);
/// assert_eq!(size.display(), "1.00 MB");
///
/// let smaller = FileSize::new(500);
/// assert_eq!(smaller.saturating_sub(size).bytes(), 0);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileSize(u64);

impl FileSize {
    pub const ZERO: FileSize = FileSize(0);

    pub const KB: u64 = 1024;
    pub const MB: u64 = 1024 * 1024;
    pub const GB: u64 = 1024 * 1024 * 1024;

    #[inline]
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn saturating_sub(&self, other: FileSize) -> FileSize {
        FileSize(self.0.saturating_sub(other.0))
    }

    #[inline]
    pub fn saturating_add(&self, other: FileSize) -> FileSize {
        FileSize(self.0.saturating_add(other.0))
    }

    /// Bytes saved by replacing `original` with `self`.
    ///
    /// `None` unless `self` is strictly smaller: an equal-size output saves
    /// nothing and is not worth the replacement.
    pub fn savings_against(&self, original: FileSize) -> Option<FileSize> {
        if self.0 < original.0 {
            Some(FileSize(original.0 - self.0))
        } else {
            None
        }
    }

    pub fn display(&self) -> String {
        if self.0 >= Self::GB {
            format!("{:.2} GB", self.0 as f64 / Self::GB as f64)
        } else if self.0 >= Self::MB {
            format!("{:.2} MB", self.0 as f64 / Self::MB as f64)
        } else if self.0 >= Self::KB {
            format!("{:.2} KB", self.0 as f64 / Self::KB as f64)
        } else {
            format!("{} B", self.0)
        }
    }
}

// ============================================================================
// Trait Implementations
// ============================================================================

impl fmt::Debug for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSize({} = {})", self.0, self.display())
    }
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl Default for FileSize {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::iter::Sum for FileSize {
    fn sum<I: Iterator<Item = FileSize>>(iter: I) -> Self {
        iter.fold(FileSize::ZERO, |acc, s| acc.saturating_add(s))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_sub() {
        let a = FileSize::new(100);
        let b = FileSize::new(30);
        assert_eq!(a.saturating_sub(b).bytes(), 70);
        assert_eq!(b.saturating_sub(a).bytes(), 0);
        assert_eq!(a.saturating_sub(a).bytes(), 0);
    }

    #[test]
    fn test_savings_against_requires_strictly_smaller() {
        let old = FileSize::new(7345);
        assert_eq!(FileSize::new(7000).savings_against(old), Some(FileSize::new(345)));
        assert_eq!(FileSize::new(7345).savings_against(old), None);
        assert_eq!(FileSize::new(8000).savings_against(old), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(FileSize::new(500).display(), "500 B");
        assert_eq!(FileSize::new(1024).display(), "1.00 KB");
        assert_eq!(FileSize::new(1024 * 1024).display(), "1.00 MB");
        assert_eq!(FileSize::new(1024 * 1024 * 1024).display(), "1.00 GB");
    }

    #[test]
    fn test_sum() {
        let total: FileSize = [10u64, 20, 30].iter().map(|b| FileSize::new(*b)).sum();
        assert_eq!(total.bytes(), 60);
    }
}
