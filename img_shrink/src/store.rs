//! Metadata store.
//!
//! Attachment metadata lives in the CMS's `<prefix>postmeta` key/value table:
//! `_wp_attached_file` rows map a post to its relative upload path and
//! `_wp_attachment_metadata` rows hold the serialized metadata blob.

use crate::config::StoreConfig;
use crate::error::{Result, ShrinkError};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;

pub const ATTACHED_FILE_KEY: &str = "_wp_attached_file";
pub const ATTACHMENT_METADATA_KEY: &str = "_wp_attachment_metadata";

pub trait MetadataStore {
    /// Relative upload path → post id.
    fn attached_files(&self) -> Result<BTreeMap<String, i64>>;

    /// `(meta_id, serialized metadata)` for every attachment.
    fn attachment_metadata(&self) -> Result<Vec<(i64, String)>>;

    /// Write back serialized metadata keyed by `meta_id`. All rows land or
    /// none do.
    fn update_attachment_metadata(&mut self, updates: &[(i64, String)]) -> Result<()>;
}

pub struct SqliteStore {
    conn: Connection,
    table: String,
}

impl SqliteStore {
    /// Open an existing database read-write. The database is never created:
    /// a missing file means the configuration points at the wrong place.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if !config.database.is_file() {
            return Err(ShrinkError::StoreUnavailable(format!(
                "database {} does not exist",
                config.database.display()
            )));
        }
        let conn = Connection::open_with_flags(
            &config.database,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| {
            ShrinkError::StoreUnavailable(format!("{}: {}", config.database.display(), e))
        })?;
        let store = Self::with_connection(conn, &config.table_prefix)?;
        let has_table = store.table_exists().map_err(|e| {
            ShrinkError::StoreUnavailable(format!("{}: {}", config.database.display(), e))
        })?;
        if !has_table {
            return Err(ShrinkError::StoreUnavailable(format!(
                "table {} not found in {}",
                store.table,
                config.database.display()
            )));
        }
        tracing::debug!(database = %config.database.display(), table = %store.table, "Opened metadata store");
        Ok(store)
    }

    pub fn open_in_memory(table_prefix: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table_prefix)
    }

    fn with_connection(conn: Connection, table_prefix: &str) -> Result<Self> {
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ShrinkError::Config(format!(
                "invalid table prefix {:?}",
                table_prefix
            )));
        }
        Ok(Self {
            conn,
            table: format!("{}postmeta", table_prefix),
        })
    }

    /// Create the postmeta table if missing.
    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                meta_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id    INTEGER NOT NULL DEFAULT 0,
                meta_key   TEXT,
                meta_value TEXT
            );
            CREATE INDEX IF NOT EXISTS {table}_meta_key ON {table} (meta_key);
            "#,
            table = self.table
        ))?;
        Ok(())
    }

    fn table_exists(&self) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                [&self.table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_meta(&self, post_id: i64, key: &str, value: &str) -> Result<i64> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (post_id, meta_key, meta_value) VALUES (?, ?, ?)",
                self.table
            ),
            rusqlite::params![post_id, key, value],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn meta_value(&self, meta_id: i64) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                &format!("SELECT meta_value FROM {} WHERE meta_id = ?", self.table),
                [meta_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn rows_for_key(&self, key: &str) -> Result<Vec<(i64, i64, String)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT meta_id, post_id, meta_value FROM {} WHERE meta_key = ? ORDER BY meta_id",
            self.table
        ))?;
        let rows = stmt
            .query_map([key], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl MetadataStore for SqliteStore {
    fn attached_files(&self) -> Result<BTreeMap<String, i64>> {
        Ok(self
            .rows_for_key(ATTACHED_FILE_KEY)?
            .into_iter()
            .map(|(_, post_id, path)| (path, post_id))
            .collect())
    }

    fn attachment_metadata(&self) -> Result<Vec<(i64, String)>> {
        Ok(self
            .rows_for_key(ATTACHMENT_METADATA_KEY)?
            .into_iter()
            .map(|(meta_id, _, value)| (meta_id, value))
            .collect())
    }

    fn update_attachment_metadata(&mut self, updates: &[(i64, String)]) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET meta_value = ? WHERE meta_id = ? AND meta_key = ?",
            self.table
        );
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for (meta_id, serialized) in updates {
                let changed =
                    stmt.execute(rusqlite::params![serialized, meta_id, ATTACHMENT_METADATA_KEY])?;
                if changed != 1 {
                    // Dropping the transaction rolls back earlier rows.
                    return Err(ShrinkError::Record {
                        id: *meta_id,
                        reason: "metadata row no longer exists".into(),
                    });
                }
            }
        }
        tx.commit()?;
        tracing::info!(rows = updates.len(), "Committed attachment metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn seeded() -> (SqliteStore, i64, i64) {
        let store = SqliteStore::open_in_memory("wp_").unwrap();
        store.initialize().unwrap();
        store.insert_meta(10, ATTACHED_FILE_KEY, "2022/08/a.png").unwrap();
        let a = store.insert_meta(10, ATTACHMENT_METADATA_KEY, "a:0:{}").unwrap();
        store.insert_meta(11, ATTACHED_FILE_KEY, "2022/09/b.webp").unwrap();
        let b = store.insert_meta(11, ATTACHMENT_METADATA_KEY, "a:1:{i:0;N;}").unwrap();
        store.insert_meta(11, "_edit_lock", "1660000000:1").unwrap();
        (store, a, b)
    }

    #[test]
    fn test_queries_by_marker() {
        let (store, a, b) = seeded();
        let files = store.attached_files().unwrap();
        assert_eq!(files.get("2022/08/a.png"), Some(&10));
        assert_eq!(files.get("2022/09/b.webp"), Some(&11));
        assert_eq!(files.len(), 2);

        let meta = store.attachment_metadata().unwrap();
        assert_eq!(
            meta,
            vec![(a, "a:0:{}".to_string()), (b, "a:1:{i:0;N;}".to_string())]
        );
    }

    #[test]
    fn test_update_commits_all_rows() {
        let (mut store, a, b) = seeded();
        store
            .update_attachment_metadata(&[(a, "N;".into()), (b, "b:1;".into())])
            .unwrap();
        assert_eq!(store.meta_value(a).unwrap().as_deref(), Some("N;"));
        assert_eq!(store.meta_value(b).unwrap().as_deref(), Some("b:1;"));
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let (mut store, a, _) = seeded();
        let err = store
            .update_attachment_metadata(&[(a, "N;".into()), (9999, "N;".into())])
            .unwrap_err();
        assert!(matches!(err, ShrinkError::Record { id: 9999, .. }));
        assert_eq!(store.meta_value(a).unwrap().as_deref(), Some("a:0:{}"));
    }

    #[test]
    fn test_custom_prefix() {
        let store = SqliteStore::open_in_memory("site2_").unwrap();
        store.initialize().unwrap();
        store.insert_meta(1, ATTACHED_FILE_KEY, "x.png").unwrap();
        assert_eq!(store.attached_files().unwrap().len(), 1);
        assert!(SqliteStore::open_in_memory("bad prefix").is_err());
    }

    #[test]
    fn test_open_missing_database_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig {
            database: temp.path().join("absent.sqlite"),
            table_prefix: "wp_".into(),
        };
        let err = SqliteStore::open(&config).err().unwrap();
        assert!(matches!(err, ShrinkError::StoreUnavailable(_)));
        assert!(err.is_fatal_at_startup());
        assert!(!config.database.exists(), "open must not create the database");
    }

    #[test]
    fn test_open_existing_database() {
        let temp = TempDir::new().unwrap();
        let database: PathBuf = temp.path().join("wp.sqlite");
        {
            let conn = Connection::open(&database).unwrap();
            let store = SqliteStore::with_connection(conn, "wp_").unwrap();
            store.initialize().unwrap();
            store.insert_meta(5, ATTACHED_FILE_KEY, "c.png").unwrap();
        }
        let config = StoreConfig {
            database: database.clone(),
            table_prefix: "wp_".into(),
        };
        let store = SqliteStore::open(&config).unwrap();
        assert_eq!(store.attached_files().unwrap().get("c.png"), Some(&5));

        let other = StoreConfig {
            database,
            table_prefix: "other_".into(),
        };
        assert!(matches!(
            SqliteStore::open(&other).err().unwrap(),
            ShrinkError::StoreUnavailable(_)
        ));
    }
}
