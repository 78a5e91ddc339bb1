//! Reconciliation Engine
//!
//! One run walks these steps in order:
//!
//! 1. scan the managed tree (png/webp only)
//! 2. load every attachment record, keyed by its relative path
//! 3. load the ledger
//! 4. select candidates: files with a record whose ledger entry is missing
//!    or older than the file
//! 5. re-encode each candidate's derivatives (thumbnail excluded) and then
//!    the base file, keeping only strictly smaller results
//! 6. commit: if anything improved, write the store first and the ledger
//!    second; otherwise touch neither
//!
//! Derivative files have no record of their own, so step 4 never selects
//! the files this engine writes. Any fatal error before step 6 aborts the run
//! with nothing persisted.

use crate::attachment::{Derivative, ImageRecord};
use crate::config::{ensure_root_exists, Config};
use crate::encoder::{try_shrink, EncodeRequest, Encoder};
use crate::error::{Result, ShrinkError};
use crate::ledger::Ledger;
use crate::quality::{QualityPolicy, RasterFormat};
use crate::scan::ScanSnapshot;
use crate::store::MetadataStore;
use serde::Serialize;
use shared_utils::FileSize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub root: PathBuf,
    pub ledger_path: PathBuf,
    pub staging_dir: PathBuf,
    pub policy: QualityPolicy,
    /// Named in the error when the root has gone missing.
    pub config_path: PathBuf,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            root: config.wp_server.wp_uploads.clone(),
            ledger_path: config.ledger_path.clone(),
            staging_dir: config.encoder.staging_dir(),
            policy: config.quality_policy()?,
            config_path: config.source.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after selection: report candidates, encode and write nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing improved; no persisted state was touched.
    Clean,
    /// Store updates and ledger were written.
    Committed,
    /// Selection only.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImprovedFile {
    pub path: String,
    pub old_size: u64,
    pub new_size: u64,
}

impl ImprovedFile {
    pub fn saved(&self) -> FileSize {
        FileSize::new(self.old_size).saturating_sub(FileSize::new(self.new_size))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub files_scanned: usize,
    pub records_loaded: usize,
    pub records_skipped: usize,
    pub candidates: Vec<String>,
    pub encode_attempts: usize,
    pub improved: Vec<ImprovedFile>,
    pub records_updated: usize,
    pub state: RunState,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl RunReport {
    pub fn bytes_saved(&self) -> FileSize {
        self.improved.iter().map(ImprovedFile::saved).sum()
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

pub struct Reconciler<S: MetadataStore, E: Encoder> {
    settings: EngineSettings,
    store: S,
    encoder: E,
}

/// Per-candidate result before commit.
struct CandidateResult {
    latest_mtime: f64,
    attempts: usize,
    improved: Vec<ImprovedFile>,
}

impl<S: MetadataStore, E: Encoder> Reconciler<S, E> {
    pub fn new(settings: EngineSettings, store: S, encoder: E) -> Self {
        Self {
            settings,
            store,
            encoder,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn run(&mut self, options: RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        let root = self.settings.root.clone();
        ensure_root_exists(&root, &self.settings.config_path)?;

        let snapshot = ScanSnapshot::scan(&root)?;
        let (mut records, records_skipped) = self.load_records()?;
        let mut ledger = Ledger::load(&self.settings.ledger_path)?;
        tracing::info!(
            files = snapshot.file_count(),
            records = records.len(),
            ledger_entries = ledger.len(),
            "Loaded run inputs"
        );

        let candidates: Vec<String> = snapshot
            .files()
            .filter(|(_, path, mtime)| {
                records.contains_key(path) && ledger.needs_processing(path, *mtime)
            })
            .map(|(_, path, _)| path)
            .collect();
        for path in &candidates {
            tracing::debug!(path = %path, "Candidate");
        }

        let mut report = RunReport {
            files_scanned: snapshot.file_count(),
            records_loaded: records.len(),
            records_skipped,
            candidates: candidates.clone(),
            encode_attempts: 0,
            improved: Vec::new(),
            records_updated: 0,
            state: RunState::DryRun,
            duration: Duration::ZERO,
        };
        if options.dry_run {
            tracing::info!(candidates = candidates.len(), "Dry run, nothing encoded");
            report.duration = started.elapsed();
            return Ok(report);
        }

        let mut dirty: Vec<(i64, String)> = Vec::new();
        for path in &candidates {
            let Some(record) = records.get_mut(path) else {
                continue;
            };
            let result = self.process_candidate(path, record)?;
            report.encode_attempts += result.attempts;
            report.improved.extend(result.improved);
            if result.latest_mtime > 0.0 {
                ledger.record(path, result.latest_mtime);
                dirty.push((record.id, record.to_serialized()));
            }
        }

        if dirty.is_empty() {
            tracing::info!("No improvements, ledger and store left untouched");
            report.state = RunState::Clean;
        } else {
            // Store first: a failed store write must not advance the ledger.
            self.store.update_attachment_metadata(&dirty)?;
            ledger.save(&self.settings.ledger_path)?;
            tracing::info!(
                records = dirty.len(),
                files = report.improved.len(),
                "Committed run"
            );
            report.records_updated = dirty.len();
            report.state = RunState::Committed;
        }
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Decode every metadata row; rows that are not image records are
    /// skipped with a warning.
    fn load_records(&self) -> Result<(BTreeMap<String, ImageRecord>, usize)> {
        let mut records = BTreeMap::new();
        let mut skipped = 0;
        for (meta_id, serialized) in self.store.attachment_metadata()? {
            match ImageRecord::from_serialized(meta_id, &serialized) {
                Ok(record) => {
                    records.insert(record.relative_path.clone(), record);
                }
                Err(e) => {
                    tracing::warn!(meta_id, error = %e, "⚠️ Skipping attachment metadata");
                    skipped += 1;
                }
            }
        }
        Ok((records, skipped))
    }

    fn process_candidate(&self, path: &str, record: &mut ImageRecord) -> Result<CandidateResult> {
        let format = RasterFormat::from_path(std::path::Path::new(path)).ok_or_else(|| {
            ShrinkError::Record {
                id: record.id,
                reason: format!("unsupported file type {}", path),
            }
        })?;
        let quality = self.settings.policy.quality_for(format, record.megapixels());
        let base = self.settings.root.join(path);
        tracing::debug!(
            path = %path,
            megapixels = record.megapixels(),
            quality,
            "Processing candidate"
        );

        let mut result = CandidateResult {
            latest_mtime: 0.0,
            attempts: 0,
            improved: Vec::new(),
        };

        // Labels sharing one file are encoded once and all get the new size.
        let mut targets: Vec<(String, Vec<Derivative>)> = Vec::new();
        for derivative in record.sizes.iter().filter(|d| !d.is_thumbnail()) {
            let relative = record.derivative_path(derivative);
            match targets.iter_mut().find(|(existing, _)| *existing == relative) {
                Some((_, labels)) => labels.push(derivative.clone()),
                None => targets.push((relative, vec![derivative.clone()])),
            }
        }

        for (relative, labels) in targets {
            let destination = self.settings.root.join(&relative);
            let first = &labels[0];
            if !destination.is_file() {
                tracing::warn!(
                    path = %relative,
                    label = %first.label,
                    "⚠️ Derivative listed in metadata is missing on disk"
                );
                continue;
            }
            let request =
                EncodeRequest::derivative(format, base.clone(), destination, first.dims(), quality);
            result.attempts += 1;
            if let Some(outcome) = try_shrink(&self.encoder, request, &self.settings.staging_dir)? {
                for derivative in &labels {
                    record.set_derivative_size(&derivative.label, outcome.new_size);
                }
                result.latest_mtime = result.latest_mtime.max(outcome.mtime);
                result.improved.push(ImprovedFile {
                    path: relative,
                    old_size: outcome.old_size,
                    new_size: outcome.new_size,
                });
            }
        }

        let request = EncodeRequest::recompress(format, base, quality);
        result.attempts += 1;
        if let Some(outcome) = try_shrink(&self.encoder, request, &self.settings.staging_dir)? {
            record.set_file_size(outcome.new_size);
            result.latest_mtime = result.latest_mtime.max(outcome.mtime);
            result.improved.push(ImprovedFile {
                path: path.to_string(),
                old_size: outcome.old_size,
                new_size: outcome.new_size,
            });
        }
        Ok(result)
    }
}
