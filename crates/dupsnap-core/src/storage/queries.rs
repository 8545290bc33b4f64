use super::models::FileRecord;
use super::sqlite::MetadataCache;
use crate::quality::QualityKind;
use crate::scanner::MediaKind;
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

const SELECT_COLUMNS: &str = "path, size, modified_time, content_hash, perceptual_fingerprint, \
     width, height, kind, quality_metric, quality_kind, quality_aux, quality_texture";

fn record_from_row(row: &Row<'_>) -> Result<FileRecord> {
    let kind: String = row.get(7)?;
    let quality_kind: Option<String> = row.get(9)?;
    Ok(FileRecord {
        path: row.get(0)?,
        size: row.get::<_, i64>(1)? as u64,
        modified_time: row.get(2)?,
        content_hash: row.get(3)?,
        perceptual_fingerprint: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
        kind: kind.parse().unwrap_or(MediaKind::Other),
        quality_metric: row.get(8)?,
        quality_kind: quality_kind.and_then(|k| k.parse::<QualityKind>().ok()),
        quality_aux: row.get(10)?,
        quality_texture: row.get(11)?,
    })
}

impl MetadataCache {
    /// Cached row for `path`, only if it was stored for exactly this
    /// `(size, modified_time)`.
    pub fn get(&self, path: &str, size: u64, modified_time: f64) -> Result<Option<FileRecord>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM files \
                     WHERE path = ?1 AND size = ?2 AND modified_time = ?3",
                    SELECT_COLUMNS
                ),
                params![path, size as i64, modified_time],
                record_from_row,
            )
            .optional()
    }

    /// Insert or replace the row for `record.path` inside the current batch.
    ///
    /// Identity and hash columns always take the new values. A missing
    /// quality metric keeps the stored reading, but only while the file's
    /// `(size, modified_time)` is unchanged; otherwise it is cleared. The
    /// quality columns always move together.
    pub fn upsert(&self, record: &FileRecord) -> Result<()> {
        self.begin_batch()?;
        self.connection().execute(
            "INSERT INTO files (path, size, modified_time, content_hash, perceptual_fingerprint, \
                                width, height, kind, quality_metric, quality_kind, \
                                quality_aux, quality_texture) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(path) DO UPDATE SET \
                 content_hash = excluded.content_hash, \
                 perceptual_fingerprint = excluded.perceptual_fingerprint, \
                 width = excluded.width, \
                 height = excluded.height, \
                 kind = excluded.kind, \
                 quality_metric = CASE \
                     WHEN excluded.quality_metric IS NOT NULL THEN excluded.quality_metric \
                     WHEN files.size = excluded.size AND files.modified_time = excluded.modified_time \
                         THEN files.quality_metric \
                     ELSE NULL END, \
                 quality_kind = CASE \
                     WHEN excluded.quality_metric IS NOT NULL THEN excluded.quality_kind \
                     WHEN files.size = excluded.size AND files.modified_time = excluded.modified_time \
                         THEN files.quality_kind \
                     ELSE NULL END, \
                 quality_aux = CASE \
                     WHEN excluded.quality_metric IS NOT NULL THEN excluded.quality_aux \
                     WHEN files.size = excluded.size AND files.modified_time = excluded.modified_time \
                         THEN files.quality_aux \
                     ELSE NULL END, \
                 quality_texture = CASE \
                     WHEN excluded.quality_metric IS NOT NULL THEN excluded.quality_texture \
                     WHEN files.size = excluded.size AND files.modified_time = excluded.modified_time \
                         THEN files.quality_texture \
                     ELSE NULL END, \
                 size = excluded.size, \
                 modified_time = excluded.modified_time",
            params![
                record.path,
                record.size as i64,
                record.modified_time,
                record.content_hash,
                record.perceptual_fingerprint,
                record.width,
                record.height,
                record.kind.as_str(),
                record.quality_metric,
                record.quality_kind.map(QualityKind::as_str),
                record.quality_aux,
                record.quality_texture,
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Drop every cached row. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.connection().execute("DELETE FROM files", [])?;
        debug!("Cleared {} cached file rows", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn record(path: &str) -> FileRecord {
        let mut rec = FileRecord::new(Path::new(path), 1000, 1_700_000_000.5, MediaKind::Image);
        rec.content_hash = "ab".repeat(32);
        rec.perceptual_fingerprint = "0123456789abcdef".to_string();
        rec.width = 64;
        rec.height = 48;
        rec
    }

    #[test]
    fn test_upsert_then_get() {
        let cache = MetadataCache::open_in_memory().unwrap();
        let rec = record("/photos/a.png");
        cache.upsert(&rec).unwrap();
        let got = cache.get("/photos/a.png", 1000, 1_700_000_000.5).unwrap();
        assert_eq!(got, Some(rec));
    }

    #[test]
    fn test_get_requires_matching_identity() {
        let cache = MetadataCache::open_in_memory().unwrap();
        cache.upsert(&record("/photos/a.png")).unwrap();
        assert!(cache.get("/photos/a.png", 1001, 1_700_000_000.5).unwrap().is_none());
        assert!(cache.get("/photos/a.png", 1000, 1_700_000_001.0).unwrap().is_none());
        assert!(cache.get("/photos/b.png", 1000, 1_700_000_000.5).unwrap().is_none());
    }

    #[test]
    fn test_count_and_clear() {
        let cache = MetadataCache::open_in_memory().unwrap();
        cache.upsert(&record("/a.png")).unwrap();
        cache.upsert(&record("/b.png")).unwrap();
        cache.commit().unwrap();
        assert_eq!(cache.count().unwrap(), 2);
        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.count().unwrap(), 0);
    }
}
