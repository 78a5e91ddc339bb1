//! img_shrink: re-optimizes images already uploaded to a CMS.
//!
//! Finds uploads that have not been processed yet, re-encodes their scaled
//! derivatives and the original, keeps whatever got smaller, and writes the
//! new file sizes back into the attachment metadata. A ledger of processed
//! modification times keeps repeated runs from redoing work.

pub mod attachment;
pub mod audit;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ledger;
pub mod php_serialize;
pub mod quality;
pub mod reconcile;
#[cfg(test)]
mod reconcile_tests;
pub mod report;
pub mod scaler;
pub mod scan;
pub mod store;

pub use attachment::{Derivative, ImageRecord, THUMBNAIL_LABEL};
pub use config::Config;
pub use encoder::{try_shrink, EncodeRequest, Encoder, MagickEncoder, ShrinkOutcome};
pub use error::{Result, ShrinkError};
pub use ledger::Ledger;
pub use quality::{QualityPolicy, RasterFormat};
pub use reconcile::{EngineSettings, Reconciler, RunOptions, RunReport, RunState};
pub use scaler::{round_half_up, Dims, ImgScaler, ResolutionPlan, SizeCaps};
pub use scan::ScanSnapshot;
pub use store::{MetadataStore, SqliteStore};
