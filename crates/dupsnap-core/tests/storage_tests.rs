use dupsnap_core::quality::{QualityKind, QualityReading};
use dupsnap_core::scanner::MediaKind;
use dupsnap_core::storage::{FileRecord, MetadataCache, LEGACY_TABLE, SCHEMA_VERSION};
use dupsnap_core::Error;
use rusqlite::{params, Connection};
use std::path::Path;
use tempfile::tempdir;

fn make_record(path: &str, size: u64, mtime: f64) -> FileRecord {
    let mut record = FileRecord::new(Path::new(path), size, mtime, MediaKind::Image);
    record.content_hash = format!("{:064x}", size);
    record.perceptual_fingerprint = "f0f0f0f00f0f0f0f".to_string();
    record.width = 640;
    record.height = 480;
    record
}

#[test]
fn test_round_trip_returns_written_fields() {
    let cache = MetadataCache::open_in_memory().unwrap();
    let record = make_record("/pics/a.jpg", 2048, 1_700_000_123.25);
    cache.upsert(&record).unwrap();

    let got = cache.get("/pics/a.jpg", 2048, 1_700_000_123.25).unwrap().unwrap();
    assert_eq!(got.content_hash, record.content_hash);
    assert_eq!(got.perceptual_fingerprint, "f0f0f0f00f0f0f0f");
    assert_eq!((got.width, got.height), (640, 480));
    assert_eq!(got.kind, MediaKind::Image);
}

#[test]
fn test_changed_size_or_mtime_is_a_miss() {
    let cache = MetadataCache::open_in_memory().unwrap();
    cache.upsert(&make_record("/pics/a.jpg", 2048, 100.0)).unwrap();

    assert!(cache.get("/pics/a.jpg", 2049, 100.0).unwrap().is_none());
    assert!(cache.get("/pics/a.jpg", 2048, 100.5).unwrap().is_none());
    assert!(cache.get("/pics/a.jpg", 2048, 100.0).unwrap().is_some());
}

#[test]
fn test_null_metric_does_not_erase_stored_metric() {
    let cache = MetadataCache::open_in_memory().unwrap();
    let scored = make_record("/pics/a.jpg", 2048, 100.0).with_quality(QualityKind::Blur, 87.5);
    cache.upsert(&scored).unwrap();

    let mut refreshed = make_record("/pics/a.jpg", 2048, 100.0);
    refreshed.perceptual_fingerprint = "0000ffff0000ffff".to_string();
    assert!(refreshed.quality_metric.is_none());
    cache.upsert(&refreshed).unwrap();

    let got = cache.get("/pics/a.jpg", 2048, 100.0).unwrap().unwrap();
    assert_eq!(got.perceptual_fingerprint, "0000ffff0000ffff");
    assert_eq!(got.quality_metric, Some(87.5));
    assert_eq!(got.quality_kind, Some(QualityKind::Blur));
}

#[test]
fn test_new_metric_overwrites_stored_metric() {
    let cache = MetadataCache::open_in_memory().unwrap();
    let path = "/pics/a.jpg";
    cache
        .upsert(&make_record(path, 10, 1.0).with_quality(QualityKind::Blur, 10.0))
        .unwrap();
    cache
        .upsert(&make_record(path, 10, 1.0).with_quality(QualityKind::Noise, 4.0))
        .unwrap();

    let got = cache.get(path, 10, 1.0).unwrap().unwrap();
    assert_eq!(got.quality_for(QualityKind::Noise), Some(4.0));
    assert_eq!(got.quality_for(QualityKind::Blur), None);
}

#[test]
fn test_changed_identity_drops_stale_metric() {
    let cache = MetadataCache::open_in_memory().unwrap();
    cache
        .upsert(&make_record("/pics/a.jpg", 2048, 100.0).with_quality(QualityKind::Noise, 9.0))
        .unwrap();
    cache.upsert(&make_record("/pics/a.jpg", 4096, 200.0)).unwrap();

    assert!(cache.get("/pics/a.jpg", 2048, 100.0).unwrap().is_none());
    let got = cache.get("/pics/a.jpg", 4096, 200.0).unwrap().unwrap();
    assert_eq!(got.quality_metric, None);
    assert_eq!(got.quality_kind, None);
}

#[test]
fn test_committed_rows_survive_reopen() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("nested").join("cache.db");

    let cache = MetadataCache::open(&db_path).unwrap();
    cache.upsert(&make_record("/pics/a.jpg", 1, 1.0)).unwrap();
    cache.close().unwrap();

    let reopened = MetadataCache::open(&db_path).unwrap();
    assert_eq!(reopened.count().unwrap(), 1);
    assert!(reopened.get("/pics/a.jpg", 1, 1.0).unwrap().is_some());
}

#[test]
fn test_uncommitted_batch_is_lost_on_drop() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("cache.db");

    let cache = MetadataCache::open(&db_path).unwrap();
    cache.upsert(&make_record("/pics/kept.jpg", 1, 1.0)).unwrap();
    cache.commit().unwrap();
    cache.upsert(&make_record("/pics/lost.jpg", 2, 1.0)).unwrap();
    drop(cache);

    let reopened = MetadataCache::open(&db_path).unwrap();
    assert_eq!(reopened.count().unwrap(), 1);
    assert!(reopened.get("/pics/lost.jpg", 2, 1.0).unwrap().is_none());
}

#[test]
fn test_migrates_store_with_legacy_noise_column() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("legacy.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE files (
                 path TEXT PRIMARY KEY,
                 size INTEGER NOT NULL,
                 modified_time REAL NOT NULL,
                 content_hash TEXT NOT NULL DEFAULT '',
                 perceptual_fingerprint TEXT NOT NULL DEFAULT '',
                 width INTEGER NOT NULL DEFAULT 0,
                 height INTEGER NOT NULL DEFAULT 0,
                 kind TEXT NOT NULL DEFAULT 'other',
                 noise REAL
             );
             PRAGMA user_version = 2;",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO files VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params!["/old/a.jpg", 10, 5.0, "aa", "0123456789abcdef", 8, 8, "img", 3.5],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO files VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
            params!["/old/b.mp4", 20, 6.0, "bb", "", 0, 0, "vid"],
        )
        .unwrap();
    }

    let cache = MetadataCache::open(&db_path).unwrap();
    assert_eq!(cache.schema_version().unwrap(), SCHEMA_VERSION);

    let a = cache.get("/old/a.jpg", 10, 5.0).unwrap().unwrap();
    assert_eq!(a.kind, MediaKind::Image);
    assert_eq!(a.quality_for(QualityKind::Noise), Some(3.5));

    let b = cache.get("/old/b.mp4", 20, 6.0).unwrap().unwrap();
    assert_eq!(b.kind, MediaKind::Video);
    assert_eq!(b.quality_metric, None);
}

#[test]
fn test_unversioned_hash_cache_table_is_set_aside() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("hash_cache.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS files(
               path   TEXT PRIMARY KEY,
               size   INTEGER,
               mtime  REAL,
               sha256 TEXT,
               phash  TEXT,
               width  INTEGER,
               height INTEGER,
               kind   TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_prefix ON files(substr(phash,1,4));",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO files(path,size,mtime,sha256,phash,width,height,kind)
             VALUES(?1,?2,?3,?4,?5,?6,?7,?8)",
            params!["/old/a.jpg", 10, 5.0, "ab".repeat(32), "8f373714acfcf4d0", 8, 8, "image"],
        )
        .unwrap();
    }

    let cache = MetadataCache::open(&db_path).unwrap();
    assert_eq!(cache.schema_version().unwrap(), SCHEMA_VERSION);
    assert_eq!(cache.count().unwrap(), 0);
    assert!(cache.get("/old/a.jpg", 10, 5.0).unwrap().is_none());

    let legacy_rows: i64 = cache
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {}", LEGACY_TABLE), [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(legacy_rows, 1);

    cache.upsert(&make_record("/old/a.jpg", 10, 5.0)).unwrap();
    cache.commit().unwrap();
    let got = cache.get("/old/a.jpg", 10, 5.0).unwrap().unwrap();
    assert_eq!(got.content_hash, format!("{:064x}", 10));
    cache.close().unwrap();

    // A second open finds a versioned store and leaves it alone.
    let reopened = MetadataCache::open(&db_path).unwrap();
    assert_eq!(reopened.count().unwrap(), 1);
}

#[test]
fn test_combined_reading_round_trips_and_survives_refresh() {
    let cache = MetadataCache::open_in_memory().unwrap();
    let reading = QualityReading {
        value: 120.0,
        aux: Some(0.031),
        texture: Some(900.0),
    };
    let scored = make_record("/pics/a.jpg", 2048, 100.0).with_reading(QualityKind::BlurHfr, reading);
    cache.upsert(&scored).unwrap();
    cache.upsert(&make_record("/pics/a.jpg", 2048, 100.0)).unwrap();

    let got = cache.get("/pics/a.jpg", 2048, 100.0).unwrap().unwrap();
    assert_eq!(got.reading_for(QualityKind::BlurHfr), Some(reading));
    assert_eq!(got.reading_for(QualityKind::Blur), None);

    // A single-value reading clears the stale second value.
    let plain = make_record("/pics/a.jpg", 2048, 100.0).with_quality(QualityKind::Tenengrad, 55.0);
    cache.upsert(&plain).unwrap();
    let got = cache.get("/pics/a.jpg", 2048, 100.0).unwrap().unwrap();
    assert_eq!(got.quality_aux, None);
    assert_eq!(got.quality_texture, None);
    assert_eq!(got.quality_for(QualityKind::Tenengrad), Some(55.0));
}

#[test]
fn test_newer_schema_is_rejected() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("future.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99;").unwrap();
    }

    match MetadataCache::open(&db_path) {
        Err(Error::Cache(msg)) => assert!(msg.contains("99")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("opening a newer store should fail"),
    }
}

#[test]
fn test_unopenable_path_is_a_cache_error() {
    let tmp = tempdir().unwrap();
    let blocker = tmp.path().join("not_a_dir");
    std::fs::write(&blocker, b"file").unwrap();

    let result = MetadataCache::open(&blocker.join("cache.db"));
    assert!(matches!(result, Err(Error::Cache(_))));
}

#[test]
fn test_clear_removes_every_row() {
    let cache = MetadataCache::open_in_memory().unwrap();
    for i in 0..5 {
        cache
            .upsert(&make_record(&format!("/pics/{}.jpg", i), i + 1, 1.0))
            .unwrap();
    }
    cache.commit().unwrap();
    assert_eq!(cache.count().unwrap(), 5);
    assert_eq!(cache.clear().unwrap(), 5);
    assert_eq!(cache.count().unwrap(), 0);
}
