//! Read-only consistency check of stored attachment metadata.
//!
//! Every derivative a record lists should be one the planner produces for
//! the record's own dimensions. Mismatches point at metadata edited or
//! corrupted outside the CMS; they are reported and never repaired.

use crate::attachment::ImageRecord;
use crate::error::Result;
use crate::scaler::{Dims, ImgScaler, SizeCaps};
use crate::store::MetadataStore;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionMismatch {
    pub path: String,
    pub label: String,
    pub stored: Dims,
    /// The planner's thumbnail for thumbnails, otherwise every planned size.
    pub expected: Vec<Dims>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub records_checked: usize,
    pub derivatives_checked: usize,
    pub rows_skipped: usize,
    pub mismatches: Vec<DimensionMismatch>,
    /// Attached files with no decodable image metadata.
    pub missing_metadata: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.missing_metadata.is_empty()
    }
}

pub fn audit<S: MetadataStore>(store: &S, caps: SizeCaps) -> Result<AuditReport> {
    let mut report = AuditReport::default();
    let mut known_paths = BTreeSet::new();

    for (meta_id, serialized) in store.attachment_metadata()? {
        let record = match ImageRecord::from_serialized(meta_id, &serialized) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(meta_id, error = %e, "Not an image record");
                report.rows_skipped += 1;
                continue;
            }
        };
        report.records_checked += 1;
        check_record(&record, caps, &mut report);
        known_paths.insert(record.relative_path);
    }

    report.missing_metadata = store
        .attached_files()?
        .into_keys()
        .filter(|path| {
            crate::quality::RasterFormat::from_path(std::path::Path::new(path)).is_some()
                && !known_paths.contains(path)
        })
        .collect();

    tracing::info!(
        records = report.records_checked,
        mismatches = report.mismatches.len(),
        missing = report.missing_metadata.len(),
        "Audit finished"
    );
    Ok(report)
}

fn check_record(record: &ImageRecord, caps: SizeCaps, report: &mut AuditReport) {
    let plan = ImgScaler::with_caps(record.width, record.height, caps).plan();
    for derivative in &record.sizes {
        report.derivatives_checked += 1;
        let (ok, expected) = if derivative.is_thumbnail() {
            (
                plan.thumbnail == Some(derivative.dims()),
                plan.thumbnail.into_iter().collect(),
            )
        } else {
            (
                plan.derivatives.contains(&derivative.dims()),
                plan.derivatives.clone(),
            )
        };
        if !ok {
            tracing::warn!(
                path = %record.relative_path,
                label = %derivative.label,
                width = derivative.width,
                height = derivative.height,
                "⚠️ Derivative dimensions do not match the planner"
            );
            report.mismatches.push(DimensionMismatch {
                path: record.relative_path.clone(),
                label: derivative.label.clone(),
                stored: derivative.dims(),
                expected,
            });
        }
    }
}
