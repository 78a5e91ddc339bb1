//! Type-Safe Wrappers Module
//!
//! - `file_size`: byte counts with saturating arithmetic and human display

pub mod file_size;

pub use file_size::FileSize;

// ============================================================================
// Property-Based Tests
// ============================================================================
