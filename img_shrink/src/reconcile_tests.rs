//! Engine tests against an in-memory store and a scripted encoder.

use crate::attachment::ImageRecord;
use crate::encoder::{EncodeRequest, Encoder};
use crate::error::{Result, ShrinkError};
use crate::ledger::Ledger;
use crate::php_serialize::fixtures::{PHP_IMG_META, PHP_META_NEST};
use crate::quality::{QualityPolicy, RasterFormat};
use crate::reconcile::{EngineSettings, Reconciler, RunOptions, RunState};
use crate::store::{MetadataStore, SqliteStore, ATTACHED_FILE_KEY, ATTACHMENT_METADATA_KEY};
use filetime::FileTime;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BASE: &str = "2022/08/testing-how-it-looked-installed.png";
const PINNED_MTIME: i64 = 1_600_000_000;

// ═══════════════════════════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════════════════════════

type Script = Box<dyn Fn(&EncodeRequest, u64) -> Option<u64>>;

/// Writes an output whose size is decided by a script from the request and
/// the destination's current size. `None` from the script is an encoder
/// failure.
struct ScriptedEncoder {
    script: Script,
    calls: RefCell<Vec<EncodeRequest>>,
}

impl ScriptedEncoder {
    fn new(script: impl Fn(&EncodeRequest, u64) -> Option<u64> + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: RefCell::new(Vec::new()),
        }
    }

    fn halving() -> Self {
        Self::new(|_, size| Some(size / 2))
    }

    fn growing() -> Self {
        Self::new(|_, size| Some(size + 10))
    }

    fn calls(&self) -> Vec<EncodeRequest> {
        self.calls.borrow().clone()
    }
}

impl Encoder for ScriptedEncoder {
    fn encode(&self, request: &EncodeRequest, staged: &Path) -> Result<()> {
        self.calls.borrow_mut().push(request.clone());
        let current = fs::metadata(&request.destination)?.len();
        match (self.script)(request, current) {
            Some(len) => {
                fs::write(staged, vec![b'z'; len as usize])?;
                Ok(())
            }
            None => Err(ShrinkError::EncodeFailed {
                path: request.source.clone(),
                reason: "scripted failure".into(),
            }),
        }
    }
}

struct Site {
    _temp: TempDir,
    root: PathBuf,
    ledger_path: PathBuf,
    staging: PathBuf,
    config_path: PathBuf,
}

impl Site {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("uploads");
        let staging = temp.path().join("staging");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&staging).unwrap();
        let ledger_path = temp.path().join("latest_mods.csv");
        let config_path = temp.path().join("config.json");
        Self {
            _temp: temp,
            root,
            ledger_path,
            staging,
            config_path,
        }
    }

    fn write(&self, relative: &str, len: usize) {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![b'o'; len]).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(PINNED_MTIME, 0)).unwrap();
    }

    fn size(&self, relative: &str) -> u64 {
        fs::metadata(self.root.join(relative)).unwrap().len()
    }

    /// The nested fixture record with its base and all four derivatives.
    fn with_nested_record(&self) {
        self.write(BASE, 8000);
        self.write("2022/08/testing-how-it-looked-installed-300x118.png", 2000);
        self.write("2022/08/testing-how-it-looked-installed-1024x402.png", 6000);
        self.write("2022/08/testing-how-it-looked-installed-150x150.png", 1000);
        self.write("2022/08/testing-how-it-looked-installed-768x302.png", 4000);
    }

    fn settings(&self) -> EngineSettings {
        let bands: BTreeMap<String, u32> = [("0", 70), ("1", 60), ("2", 50), ("4", 50)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        EngineSettings {
            root: self.root.clone(),
            ledger_path: self.ledger_path.clone(),
            staging_dir: self.staging.clone(),
            policy: QualityPolicy::from_config(32, &bands).unwrap(),
            config_path: self.config_path.clone(),
        }
    }
}

fn store_with(rows: &[(i64, &str, &str)]) -> (SqliteStore, Vec<i64>) {
    let store = SqliteStore::open_in_memory("wp_").unwrap();
    store.initialize().unwrap();
    let mut meta_ids = Vec::new();
    for (post_id, file, metadata) in rows {
        store.insert_meta(*post_id, ATTACHED_FILE_KEY, file).unwrap();
        meta_ids.push(
            store
                .insert_meta(*post_id, ATTACHMENT_METADATA_KEY, metadata)
                .unwrap(),
        );
    }
    (store, meta_ids)
}

fn nested_store() -> (SqliteStore, i64) {
    let (store, ids) = store_with(&[(42, BASE, PHP_META_NEST)]);
    (store, ids[0])
}

fn stored_record<S: MetadataStore>(store: &S, meta_id: i64) -> ImageRecord {
    let (_, serialized) = store
        .attachment_metadata()
        .unwrap()
        .into_iter()
        .find(|(id, _)| *id == meta_id)
        .unwrap();
    ImageRecord::from_serialized(meta_id, &serialized).unwrap()
}

// ═══════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_first_run_shrinks_and_commits() {
    let site = Site::new();
    site.with_nested_record();
    let (store, meta_id) = nested_store();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    let report = engine.run(RunOptions::default()).unwrap();

    assert_eq!(report.state, RunState::Committed);
    assert_eq!(report.candidates, vec![BASE.to_string()]);
    assert_eq!(report.files_scanned, 5);
    // Three derivatives plus the base; the thumbnail is never attempted.
    assert_eq!(report.encode_attempts, 4);
    assert_eq!(report.improved.len(), 4);
    assert_eq!(report.records_updated, 1);
    assert_eq!(report.bytes_saved().bytes(), (8000 + 2000 + 6000 + 4000) / 2);

    assert_eq!(site.size(BASE), 4000);
    assert_eq!(site.size("2022/08/testing-how-it-looked-installed-150x150.png"), 1000);

    let record = stored_record(engine.store(), meta_id);
    assert_eq!(record.file_size, Some(4000));
    let sizes: Vec<(&str, Option<u64>)> = record
        .sizes
        .iter()
        .map(|d| (d.label.as_str(), d.file_size))
        .collect();
    assert_eq!(
        sizes,
        vec![
            ("medium", Some(1000)),
            ("large", Some(3000)),
            ("thumbnail", Some(7168)),
            ("medium_large", Some(2000)),
        ]
    );

    let ledger = Ledger::load(&site.ledger_path).unwrap();
    assert_eq!(ledger.len(), 1);
    let recorded = ledger.get(BASE).unwrap();
    assert!(recorded > PINNED_MTIME as f64);
    assert!(recorded >= shared_utils::mtime_seconds(&site.root.join(BASE)).unwrap());
}

#[test]
fn test_encode_requests_use_base_as_source() {
    let site = Site::new();
    site.with_nested_record();
    let (store, _) = nested_store();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());
    engine.run(RunOptions::default()).unwrap();

    let base = site.root.join(BASE);
    let calls = engine.encoder().calls();
    let resizes: Vec<Option<(u32, u32)>> = calls.iter().map(|c| c.resize).collect();
    assert_eq!(
        resizes,
        vec![Some((300, 118)), Some((1024, 402)), Some((768, 302)), None]
    );
    assert!(calls.iter().all(|c| c.source == base));
    assert!(calls.iter().all(|c| c.quality == 32 && c.format == RasterFormat::Png));
    assert_eq!(calls[3].destination, base);
    assert_eq!(
        calls[0].destination,
        site.root.join("2022/08/testing-how-it-looked-installed-300x118.png")
    );
}

#[test]
fn test_second_run_is_a_no_op() {
    let site = Site::new();
    site.with_nested_record();
    let (store, meta_id) = nested_store();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());
    engine.run(RunOptions::default()).unwrap();
    let ledger_text = fs::read_to_string(&site.ledger_path).unwrap();
    let stored = stored_record(engine.store(), meta_id).to_serialized();
    let attempts_after_first = engine.encoder().calls().len();

    let report = engine.run(RunOptions::default()).unwrap();

    assert_eq!(report.state, RunState::Clean);
    assert!(report.candidates.is_empty());
    assert_eq!(report.encode_attempts, 0);
    assert_eq!(engine.encoder().calls().len(), attempts_after_first);
    assert_eq!(fs::read_to_string(&site.ledger_path).unwrap(), ledger_text);
    assert_eq!(stored_record(engine.store(), meta_id).to_serialized(), stored);
}

#[test]
fn test_no_improvement_touches_nothing() {
    let site = Site::new();
    site.with_nested_record();
    let (store, meta_id) = nested_store();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::growing());

    let report = engine.run(RunOptions::default()).unwrap();

    assert_eq!(report.state, RunState::Clean);
    assert_eq!(report.encode_attempts, 4);
    assert!(report.improved.is_empty());
    assert!(!site.ledger_path.exists());
    assert_eq!(site.size(BASE), 8000);
    assert_eq!(
        shared_utils::mtime_seconds(&site.root.join(BASE)).unwrap(),
        PINNED_MTIME as f64
    );
    assert_eq!(stored_record(engine.store(), meta_id).to_serialized(), PHP_META_NEST);
    assert!(fs::read_dir(&site.staging).unwrap().next().is_none());
}

#[test]
fn test_only_derivative_improves() {
    let site = Site::new();
    site.with_nested_record();
    let (store, meta_id) = nested_store();
    let encoder = ScriptedEncoder::new(|req, size| {
        if req.resize == Some((1024, 402)) {
            Some(size - 1)
        } else {
            Some(size)
        }
    });
    let mut engine = Reconciler::new(site.settings(), store, encoder);

    let report = engine.run(RunOptions::default()).unwrap();
    assert_eq!(report.state, RunState::Committed);
    assert_eq!(report.improved.len(), 1);

    let record = stored_record(engine.store(), meta_id);
    assert_eq!(record.file_size, Some(7345));
    assert_eq!(record.sizes[1].file_size, Some(5999));

    // Base untouched but still recorded, so it is not selected again.
    let again = engine.run(RunOptions::default()).unwrap();
    assert!(again.candidates.is_empty());
}

#[test]
fn test_encoder_failure_aborts_without_commit() {
    let site = Site::new();
    site.with_nested_record();
    let (store, meta_id) = nested_store();
    let encoder = ScriptedEncoder::new(|req, size| req.resize.map(|_| size / 2));
    let mut engine = Reconciler::new(site.settings(), store, encoder);

    let err = engine.run(RunOptions::default()).unwrap_err();

    assert!(matches!(err, ShrinkError::EncodeFailed { .. }));
    assert!(!site.ledger_path.exists());
    assert_eq!(stored_record(engine.store(), meta_id).to_serialized(), PHP_META_NEST);
}

#[test]
fn test_files_without_records_are_never_candidates() {
    let site = Site::new();
    site.with_nested_record();
    site.write("2022/08/orphan.png", 500);
    site.write("2022/09/elsewhere.webp", 500);
    let (store, _) = nested_store();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    let report = engine.run(RunOptions { dry_run: true }).unwrap();

    assert_eq!(report.files_scanned, 7);
    assert_eq!(report.candidates, vec![BASE.to_string()]);
}

#[test]
fn test_ledger_gates_selection() {
    let site = Site::new();
    site.with_nested_record();
    let (store, _) = nested_store();

    let mut ledger = Ledger::new();
    ledger.record(BASE, PINNED_MTIME as f64);
    ledger.save(&site.ledger_path).unwrap();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());
    let report = engine.run(RunOptions::default()).unwrap();
    assert!(report.candidates.is_empty());
    assert_eq!(report.state, RunState::Clean);

    // Touch the base as if it were re-uploaded.
    filetime::set_file_mtime(
        site.root.join(BASE),
        FileTime::from_unix_time(PINNED_MTIME + 60, 0),
    )
    .unwrap();
    let report = engine.run(RunOptions::default()).unwrap();
    assert_eq!(report.candidates, vec![BASE.to_string()]);
    assert_eq!(report.state, RunState::Committed);
}

#[test]
fn test_dry_run_encodes_and_writes_nothing() {
    let site = Site::new();
    site.with_nested_record();
    let (store, meta_id) = nested_store();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    let report = engine.run(RunOptions { dry_run: true }).unwrap();

    assert_eq!(report.state, RunState::DryRun);
    assert_eq!(report.candidates.len(), 1);
    assert!(engine.encoder().calls().is_empty());
    assert!(!site.ledger_path.exists());
    assert_eq!(stored_record(engine.store(), meta_id).to_serialized(), PHP_META_NEST);
}

#[test]
fn test_undecodable_rows_are_skipped() {
    let site = Site::new();
    site.with_nested_record();
    let (store, _) = store_with(&[
        (42, BASE, PHP_META_NEST),
        (43, "2022/08/doc.pdf", PHP_IMG_META),
        (44, "2022/08/broken.png", "a:3:{"),
    ]);
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    let report = engine.run(RunOptions { dry_run: true }).unwrap();
    assert_eq!(report.records_loaded, 1);
    assert_eq!(report.records_skipped, 2);
}

#[test]
fn test_missing_derivative_is_skipped() {
    let site = Site::new();
    site.with_nested_record();
    fs::remove_file(site.root.join("2022/08/testing-how-it-looked-installed-1024x402.png")).unwrap();
    let (store, meta_id) = nested_store();
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    let report = engine.run(RunOptions::default()).unwrap();
    assert_eq!(report.encode_attempts, 3);
    assert_eq!(report.state, RunState::Committed);
    let record = stored_record(engine.store(), meta_id);
    assert_eq!(record.sizes[1].file_size, Some(53945));
}

#[test]
fn test_webp_quality_follows_megapixels() {
    let site = Site::new();
    let meta = r#"a:4:{s:5:"width";i:2560;s:6:"height";i:1440;s:4:"file";s:16:"2023/01/big.webp";s:5:"sizes";a:0:{}}"#;
    site.write("2023/01/big.webp", 9000);
    let (store, _) = store_with(&[(7, "2023/01/big.webp", meta)]);
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    engine.run(RunOptions::default()).unwrap();

    let calls = engine.encoder().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].format, RasterFormat::Webp);
    // 3.69 MP falls in the "2" band.
    assert_eq!(calls[0].quality, 50);
}

/// Reads from SQLite, refuses every write.
struct ReadOnlyStore(SqliteStore);

impl MetadataStore for ReadOnlyStore {
    fn attached_files(&self) -> Result<BTreeMap<String, i64>> {
        self.0.attached_files()
    }

    fn attachment_metadata(&self) -> Result<Vec<(i64, String)>> {
        self.0.attachment_metadata()
    }

    fn update_attachment_metadata(&mut self, _updates: &[(i64, String)]) -> Result<()> {
        Err(ShrinkError::StoreUnavailable("database is read-only".into()))
    }
}

#[test]
fn test_store_failure_leaves_ledger_unsaved() {
    let site = Site::new();
    site.with_nested_record();
    let (store, _) = nested_store();
    let mut engine = Reconciler::new(site.settings(), ReadOnlyStore(store), ScriptedEncoder::halving());

    let err = engine.run(RunOptions::default()).unwrap_err();
    assert!(matches!(err, ShrinkError::StoreUnavailable(_)));
    assert!(!site.ledger_path.exists());
}

#[test]
fn test_missing_root_names_root_and_config() {
    let site = Site::new();
    let mut settings = site.settings();
    let gone = site.root.join("gone");
    settings.root = gone.clone();
    let (store, _) = nested_store();
    let mut engine = Reconciler::new(settings, store, ScriptedEncoder::halving());

    match engine.run(RunOptions::default()) {
        Err(ShrinkError::RootNotFound { root, config }) => {
            assert_eq!(root, gone);
            assert_eq!(config, site.config_path);
        }
        other => panic!("expected RootNotFound, got {:?}", other),
    }
    assert!(engine.encoder().calls().is_empty());
}

/// The nested fixture with the `large` entry's file name replaced.
fn nested_with_large_file(file: &str) -> String {
    PHP_META_NEST.replace(
        r#"s:44:"testing-how-it-looked-installed-1024x402.png""#,
        &format!("s:{}:\"{}\"", file.len(), file),
    )
}

#[test]
fn test_derivative_names_cannot_escape_root() {
    let site = Site::new();
    site.with_nested_record();
    let outside = site.root.parent().unwrap().join("victim.png");
    fs::write(&outside, vec![b'v'; 5000]).unwrap();
    let tampered = nested_with_large_file("../../../victim.png");
    let (store, ids) = store_with(&[(42, BASE, &tampered)]);
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    let report = engine.run(RunOptions::default()).unwrap();

    assert_eq!(fs::metadata(&outside).unwrap().len(), 5000);
    assert!(engine
        .encoder()
        .calls()
        .iter()
        .all(|c| c.destination.starts_with(&site.root)));
    assert!(report.improved.iter().all(|f| !f.path.contains("..")));
    // medium, medium_large and the base; the tampered size is left alone.
    assert_eq!(report.encode_attempts, 3);
    assert_eq!(report.state, RunState::Committed);
    let stored = stored_record(engine.store(), ids[0]).to_serialized();
    assert!(stored.contains(r#"s:19:"../../../victim.png";s:5:"width";i:1024;s:6:"height";i:402;s:9:"mime-type";s:9:"image/png";s:8:"filesize";i:53945;"#));
}

#[test]
fn test_shared_derivative_file_updates_every_label() {
    let site = Site::new();
    site.with_nested_record();
    // A theme size with the same dimensions as medium_large, same file.
    let shared = PHP_META_NEST.replace(
        r#"s:5:"large";a:5:{s:4:"file";s:44:"testing-how-it-looked-installed-1024x402.png";s:5:"width";i:1024;s:6:"height";i:402;"#,
        r#"s:10:"theme_wide";a:5:{s:4:"file";s:43:"testing-how-it-looked-installed-768x302.png";s:5:"width";i:768;s:6:"height";i:302;"#,
    );
    let (store, ids) = store_with(&[(42, BASE, &shared)]);
    let mut engine = Reconciler::new(site.settings(), store, ScriptedEncoder::halving());

    let report = engine.run(RunOptions::default()).unwrap();

    let shared_file = "2022/08/testing-how-it-looked-installed-768x302.png";
    assert_eq!(site.size(shared_file), 2000);
    // medium, the shared file once, and the base.
    assert_eq!(report.encode_attempts, 3);
    assert_eq!(
        report.improved.iter().filter(|f| f.path == shared_file).count(),
        1
    );

    let record = stored_record(engine.store(), ids[0]);
    let sizes: Vec<(&str, Option<u64>)> = record
        .sizes
        .iter()
        .map(|d| (d.label.as_str(), d.file_size))
        .collect();
    assert_eq!(
        sizes,
        vec![
            ("medium", Some(1000)),
            ("theme_wide", Some(2000)),
            ("thumbnail", Some(7168)),
            ("medium_large", Some(2000)),
        ]
    );
}
