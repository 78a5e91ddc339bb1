//! Change Ledger
//!
//! Persisted map of relative path → modification time of the last
//! processed state. This is what stops a run from mistaking the tool's own
//! freshly written files for new uploads.
//!
//! On disk: one `path,mtime` record per line, no header, CSV quoting for
//! paths containing `,` `"` or line breaks. Rewritten wholesale on save.

use crate::error::{Result, ShrinkError};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Ledger {
    entries: BTreeMap<String, f64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No ledger yet, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (line, record) in parse_records(contents)? {
            match record.as_slice() {
                [] => continue,
                [path, mtime, ..] => {
                    let mtime: f64 = mtime.trim().parse().map_err(|_| ShrinkError::Ledger {
                        line,
                        reason: format!("invalid timestamp {:?}", mtime),
                    })?;
                    entries.insert(path.clone(), mtime);
                }
                [only] => {
                    return Err(ShrinkError::Ledger {
                        line,
                        reason: format!("missing timestamp for {:?}", only),
                    })
                }
            }
        }
        Ok(Self { entries })
    }

    /// Overwrite `path` with every entry.
    ///
    /// Written to a sibling temp file and renamed into place, so an
    /// interrupted save leaves the previous ledger intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(self.render().as_bytes())?;
        staged.flush()?;
        staged.persist(path).map_err(|e| ShrinkError::Io(e.error))?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "Ledger saved");
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (path, mtime) in &self.entries {
            out.push_str(&quote_field(path));
            out.push(',');
            out.push_str(&format!("{:?}", mtime));
            out.push_str("\r\n");
        }
        out
    }

    pub fn get(&self, path: &str) -> Option<f64> {
        self.entries.get(path).copied()
    }

    /// True when `path` has never been processed or changed since.
    pub fn needs_processing(&self, path: &str, current_mtime: f64) -> bool {
        match self.get(path) {
            None => true,
            Some(last) => last < current_mtime,
        }
    }

    /// Record `mtime` for `path`. Entries only move forward: returns false and
    /// leaves the entry alone unless `mtime` is strictly newer.
    pub fn record(&mut self, path: &str, mtime: f64) -> bool {
        match self.entries.get_mut(path) {
            Some(existing) if *existing >= mtime => false,
            Some(existing) => {
                *existing = mtime;
                true
            }
            None => {
                self.entries.insert(path.to_string(), mtime);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

// ═══════════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════════

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into records, each tagged with its 1-based starting line.
fn parse_records(contents: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = contents.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                if !field.is_empty() || !fields.is_empty() {
                    fields.push(std::mem::take(&mut field));
                }
                records.push((record_line, std::mem::take(&mut fields)));
                line += 1;
                record_line = line;
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(ShrinkError::Ledger {
            line: record_line,
            reason: "unterminated quoted field".into(),
        });
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push((record_line, fields));
    }
    Ok(records)
}
