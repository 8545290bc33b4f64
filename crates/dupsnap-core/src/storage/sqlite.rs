use crate::error::Error;
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, warn};

/// One forward-only schema step. Steps run in order inside a transaction
/// that also bumps `PRAGMA user_version`.
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "files table and fingerprint prefix index",
        sql: "CREATE TABLE IF NOT EXISTS files (
                  path                   TEXT PRIMARY KEY,
                  size                   INTEGER NOT NULL,
                  modified_time          REAL NOT NULL,
                  content_hash           TEXT NOT NULL DEFAULT '',
                  perceptual_fingerprint TEXT NOT NULL DEFAULT '',
                  width                  INTEGER NOT NULL DEFAULT 0,
                  height                 INTEGER NOT NULL DEFAULT 0,
                  kind                   TEXT NOT NULL DEFAULT 'other'
              );
              CREATE INDEX IF NOT EXISTS idx_files_fingerprint_prefix
                  ON files (substr(perceptual_fingerprint, 1, 4));",
    },
    Migration {
        version: 2,
        description: "noise column",
        sql: "ALTER TABLE files ADD COLUMN noise REAL;",
    },
    Migration {
        version: 3,
        description: "generic quality metric, backfilled from noise",
        sql: "ALTER TABLE files ADD COLUMN quality_metric REAL;
              ALTER TABLE files ADD COLUMN quality_kind TEXT;
              UPDATE files
                 SET quality_metric = noise, quality_kind = 'noise'
               WHERE quality_metric IS NULL AND noise IS NOT NULL;",
    },
    Migration {
        version: 4,
        description: "secondary quality metric and texture",
        sql: "ALTER TABLE files ADD COLUMN quality_aux REAL;
              ALTER TABLE files ADD COLUMN quality_texture REAL;",
    },
];

pub const SCHEMA_VERSION: i64 = 4;

/// Where an unversioned `files` table is moved before migration 1 runs.
pub const LEGACY_TABLE: &str = "files_legacy";

/// Persistent per-file memo of hashes, dimensions and quality metrics.
///
/// Writes are batched: the first write after a commit opens a
/// transaction and [`MetadataCache::commit`] closes it. Dropping the cache
/// without committing discards the open batch.
pub struct MetadataCache {
    conn: Connection,
}

impl MetadataCache {
    pub fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Cache(format!(
                        "cannot create cache directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            Error::Cache(format!("cannot open cache {}: {}", path.display(), e))
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, Error> {
        let cache = MetadataCache { conn };
        cache
            .configure_pragmas()
            .map_err(|e| Error::Cache(format!("cannot configure cache: {}", e)))?;
        cache.migrate_schema()?;
        Ok(cache)
    }

    fn configure_pragmas(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode)");
        Ok(())
    }

    /// Apply every migration newer than the stored `user_version`.
    fn migrate_schema(&self) -> Result<(), Error> {
        let version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(Error::Cache(format!(
                "cache schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        if version == 0 {
            self.set_aside_unversioned_table()?;
        }

        for step in MIGRATIONS.iter().filter(|m| m.version > version) {
            debug!("Applying cache migration {}: {}", step.version, step.description);
            let batch = format!(
                "BEGIN;\n{}\nPRAGMA user_version = {};\nCOMMIT;",
                step.sql, step.version
            );
            if let Err(e) = self.conn.execute_batch(&batch) {
                let _ = self.conn.execute_batch("ROLLBACK;");
                return Err(Error::Cache(format!(
                    "migration {} ({}) failed: {}",
                    step.version, step.description, e
                )));
            }
        }
        Ok(())
    }

    /// An unversioned store with its own `files` layout (`mtime`, `sha256`,
    /// `phash`) holds hashes from other algorithms, so nothing in it can be
    /// reused. The table is renamed to [`LEGACY_TABLE`] and left untouched.
    fn set_aside_unversioned_table(&self) -> Result<(), Error> {
        let columns = self.table_columns("files")?;
        if columns.is_empty() || columns.iter().any(|c| c == "perceptual_fingerprint") {
            return Ok(());
        }
        warn!(
            "Cache has an unversioned files table ({}); moving it to {}",
            columns.join(", "),
            LEGACY_TABLE
        );
        let batch = format!(
            "BEGIN;\nDROP TABLE IF EXISTS {legacy};\nALTER TABLE files RENAME TO {legacy};\nCOMMIT;",
            legacy = LEGACY_TABLE
        );
        if let Err(e) = self.conn.execute_batch(&batch) {
            let _ = self.conn.execute_batch("ROLLBACK;");
            return Err(Error::Cache(format!(
                "cannot set aside unversioned files table: {}",
                e
            )));
        }
        Ok(())
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, Error> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(columns)
    }

    pub fn schema_version(&self) -> Result<i64, Error> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn begin_batch(&self) -> rusqlite::Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN;")?;
        }
        Ok(())
    }

    /// Flush the current write batch.
    pub fn commit(&self) -> Result<(), Error> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT;")?;
        }
        Ok(())
    }

    /// Commit and release the store.
    pub fn close(self) -> Result<(), Error> {
        self.commit()?;
        self.conn.close().map_err(|(_, e)| Error::Database(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_is_at_latest_version() {
        let cache = MetadataCache::open_in_memory().unwrap();
        assert_eq!(cache.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_ordered_and_end_at_latest() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
        assert_eq!(versions.last().copied(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_versioned_table_is_not_set_aside() {
        let cache = MetadataCache::open_in_memory().unwrap();
        cache.set_aside_unversioned_table().unwrap();
        assert!(cache.table_columns(LEGACY_TABLE).unwrap().is_empty());
        assert!(cache
            .table_columns("files")
            .unwrap()
            .contains(&"quality_texture".to_string()));
    }

    #[test]
    fn test_commit_without_writes_is_noop() {
        let cache = MetadataCache::open_in_memory().unwrap();
        cache.commit().unwrap();
        cache.begin_batch().unwrap();
        assert!(!cache.connection().is_autocommit());
        cache.commit().unwrap();
        assert!(cache.connection().is_autocommit());
    }
}
