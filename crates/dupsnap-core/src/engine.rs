use crate::cluster::{self, hamming, FINGERPRINT_BITS};
use crate::config::ScanConfig;
use crate::error::Error;
use crate::hasher::{Analyzer, MediaAnalyzer};
use crate::model::{GroupCategory, ResultGroup, ResultItem};
use crate::progress::{ChannelReporter, ProgressEvent, ProgressReporter, ProgressThrottle, ScanStage};
use crate::quality::{self, prepare_gray, QualityKind, QualityReading};
use crate::scanner::{collect_media_files, MediaFile, MediaKind};
use crate::scoring;
use crate::storage::{FileRecord, MetadataCache};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct ScanEngine {
    config: ScanConfig,
    analyzer: Arc<dyn Analyzer>,
    cancel: Arc<AtomicBool>,
}

/// Counters for one scan run. Per-file failures end up here instead of
/// aborting the scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStats {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub files_found: usize,
    pub cache_hits: usize,
    pub hashes_computed: usize,
    pub fingerprints_computed: usize,
    pub metrics_computed: usize,
    pub files_skipped: usize,
    pub metric_failures: usize,
    pub cache_write_failures: usize,
    pub exact_groups: usize,
    pub near_groups: usize,
    pub quality_groups: usize,
}

impl ScanStats {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_secs: 0.0,
            files_found: 0,
            cache_hits: 0,
            hashes_computed: 0,
            fingerprints_computed: 0,
            metrics_computed: 0,
            files_skipped: 0,
            metric_failures: 0,
            cache_write_failures: 0,
            exact_groups: 0,
            near_groups: 0,
            quality_groups: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Duplicate groups by descending score, then quality groups.
    pub groups: Vec<ResultGroup>,
    pub stats: ScanStats,
}

impl ScanReport {
    pub fn duplicate_groups(&self) -> impl Iterator<Item = &ResultGroup> {
        self.groups.iter().filter(|g| g.category.is_duplicate())
    }

    pub fn quality_groups(&self) -> impl Iterator<Item = &ResultGroup> {
        self.groups.iter().filter(|g| !g.category.is_duplicate())
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.duplicate_groups().map(|g| g.reclaimable_bytes()).sum()
    }
}

/// A hashed file and its (possibly cached) record.
struct Entry {
    path: PathBuf,
    record: FileRecord,
    /// False for paths that are not valid UTF-8; those never touch the
    /// cache, whose key is a string.
    cacheable: bool,
}

impl Entry {
    fn item(&self, quality_kind: Option<QualityKind>) -> ResultItem {
        ResultItem {
            path: self.path.clone(),
            kind: self.record.kind,
            size: self.record.size,
            width: self.record.width,
            height: self.record.height,
            content_hash: self.record.content_hash.clone(),
            perceptual_fingerprint: self.record.perceptual_fingerprint.clone(),
            quality_raw: quality_kind.and_then(|k| self.record.quality_for(k)),
            similarity_score: None,
            quality_score: None,
        }
    }
}

/// Index lists produced by the partition and clustering stages.
struct DuplicateSets {
    exact: Vec<Vec<usize>>,
    near: Vec<Vec<usize>>,
}

impl ScanEngine {
    pub fn new(config: ScanConfig) -> Self {
        let analyzer = Arc::new(MediaAnalyzer::from_config(&config));
        Self {
            config,
            analyzer,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Setting the flag stops the scan at the next file boundary with
    /// [`Error::Cancelled`].
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the full pipeline:
    /// 1. Walk the root and hash every file (cache first)
    /// 2. Partition by content hash into exact duplicates
    /// 3. Fingerprint the remaining unique files
    /// 4. Cluster fingerprints into near-duplicate groups
    /// 5. Score image quality, if enabled
    ///
    /// Failures that stop the scan are reported once through
    /// [`ProgressReporter::on_failed`] and returned; no groups are
    /// produced in that case.
    pub fn scan(&self, reporter: &dyn ProgressReporter) -> Result<ScanReport, Error> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(reporter)))
            .unwrap_or_else(|payload| Err(Error::Internal(panic_message(payload.as_ref()))));
        match outcome {
            Ok(report) => {
                reporter.on_complete(&report.stats);
                Ok(report)
            }
            Err(e) => {
                error!("Scan of {} failed: {}", self.config.root.display(), e);
                reporter.on_failed(&e.to_string());
                Err(e)
            }
        }
    }

    fn run(&self, reporter: &dyn ProgressReporter) -> Result<ScanReport, Error> {
        let clock = Instant::now();
        let mut stats = ScanStats::new(Utc::now());
        let mut progress = ProgressThrottle::new(reporter, self.config.progress_interval);
        let root = self.config.root.as_path();

        if !root.is_dir() {
            return Err(Error::InvalidRoot(root.to_path_buf()));
        }
        info!("Scanning {}", root.display());

        progress.stage(ScanStage::Collecting);
        let cache = MetadataCache::open(&self.config.cache_path)?;
        debug!("Opened cache {}", self.config.cache_path.display());

        let files = collect_media_files(
            root,
            &self.config.ignore_patterns,
            self.config.include_videos,
            |found, _| progress.note(|| format!("Found {} files", found)),
        )
        .map_err(|e| {
            warn!("Cannot walk {}: {}", root.display(), e);
            Error::InvalidRoot(root.to_path_buf())
        })?;
        stats.files_found = files.len();
        info!("Found {} media files", files.len());
        self.check_cancelled(&cache)?;

        progress.stage(ScanStage::Hashing);
        let entries = self.hash_files(&cache, &files, &mut stats, &mut progress)?;

        let exact = partition_exact(&entries);
        let grouped: Vec<bool> = membership(entries.len(), &exact);
        let unique: Vec<usize> = (0..entries.len()).filter(|&i| !grouped[i]).collect();
        info!(
            "{} exact duplicate groups, {} unique files",
            exact.len(),
            unique.len()
        );

        progress.stage(ScanStage::Fingerprinting);
        let mut entries = entries;
        self.fingerprint_unique(&cache, &mut entries, &unique, &mut stats, &mut progress)?;

        progress.stage(ScanStage::Clustering);
        self.check_cancelled(&cache)?;
        let fingerprints: Vec<&str> = unique
            .iter()
            .map(|&i| entries[i].record.perceptual_fingerprint.as_str())
            .collect();
        let near: Vec<Vec<usize>> =
            cluster::cluster_with_progress(&fingerprints, &self.config.cluster_config(), |done, total| {
                progress.advance(done, total, || format!("Compared {} of {} buckets", done, total))
            })
            .into_iter()
            .map(|group| group.into_iter().map(|j| unique[j]).collect())
            .collect();
        info!("{} near-duplicate groups", near.len());

        progress.stage(ScanStage::Scoring);
        let quality_kind = self.config.quality.kind();
        let quality_group = match quality_kind {
            Some(kind) => {
                self.measure_quality(&cache, &mut entries, kind, &mut stats, &mut progress)?;
                self.flag_quality(&entries, kind)
            }
            None => None,
        };

        let sets = DuplicateSets { exact, near };
        let mut groups = build_duplicate_groups(&entries, &sets, quality_kind);
        groups.sort_by(|a, b| {
            b.group_score
                .unwrap_or(0.0)
                .total_cmp(&a.group_score.unwrap_or(0.0))
        });
        stats.exact_groups = sets.exact.len();
        stats.near_groups = sets.near.len();
        if let Some(group) = quality_group {
            stats.quality_groups = 1;
            groups.push(group);
        }

        if let Err(e) = cache.close() {
            warn!("Failed to close cache cleanly: {}", e);
            stats.cache_write_failures += 1;
        }

        stats.duration_secs = clock.elapsed().as_secs_f64();
        progress.stage(ScanStage::Done);
        info!(
            "Scan finished in {:.2}s: {} exact, {} near, {} quality groups",
            stats.duration_secs, stats.exact_groups, stats.near_groups, stats.quality_groups
        );
        Ok(ScanReport { groups, stats })
    }

    fn check_cancelled(&self, cache: &MetadataCache) -> Result<(), Error> {
        if self.cancel.load(Ordering::Relaxed) {
            if let Err(e) = cache.commit() {
                warn!("Failed to commit cache on cancel: {}", e);
            }
            info!("Scan cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn hash_files(
        &self,
        cache: &MetadataCache,
        files: &[MediaFile],
        stats: &mut ScanStats,
        progress: &mut ProgressThrottle<'_>,
    ) -> Result<Vec<Entry>, Error> {
        let mut entries = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            self.check_cancelled(cache)?;
            let key = file.path.to_str();
            if key.is_none() {
                warn!(
                    "Not caching {}: path is not valid UTF-8",
                    file.path.display()
                );
            }
            match self.hash_one(cache, key, file, stats) {
                Some(record) => entries.push(Entry {
                    path: file.path.clone(),
                    record,
                    cacheable: key.is_some(),
                }),
                None => stats.files_skipped += 1,
            }
            self.batch_boundary(cache, i + 1, stats);
            progress.advance(i + 1, files.len(), || file_message("Hashing", &file.path));
        }
        commit(cache, stats);
        Ok(entries)
    }

    /// `key` is the cache key, `None` when the file bypasses the cache.
    fn hash_one(
        &self,
        cache: &MetadataCache,
        key: Option<&str>,
        file: &MediaFile,
        stats: &mut ScanStats,
    ) -> Option<FileRecord> {
        if let Some(key) = key {
            match cache.get(key, file.size, file.modified_time) {
                Ok(Some(record)) if !record.content_hash.is_empty() => {
                    debug!("Cache hit: {}", file.path.display());
                    stats.cache_hits += 1;
                    return Some(record);
                }
                Ok(_) => debug!("Cache miss: {}", file.path.display()),
                Err(e) => warn!("Cache lookup failed for {}: {}", file.path.display(), e),
            }
        }

        let analyzer = &self.analyzer;
        let hash = match guarded(&file.path, "hashing", || analyzer.content_hash(&file.path))? {
            Ok(hash) if !hash.is_empty() => hash,
            Ok(_) => return None,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", file.path.display(), e);
                return None;
            }
        };
        stats.hashes_computed += 1;

        let (width, height) = match guarded(&file.path, "probing", || {
            analyzer.dimensions(&file.path, file.kind)
        }) {
            Some(Ok(dims)) => dims,
            Some(Err(e)) => {
                warn!("No dimensions for {}: {}", file.path.display(), e);
                (0, 0)
            }
            None => (0, 0),
        };

        let mut record = FileRecord::new(&file.path, file.size, file.modified_time, file.kind);
        record.content_hash = hash;
        record.width = width;
        record.height = height;
        if key.is_some() {
            store(cache, &record, stats);
        }
        Some(record)
    }

    fn fingerprint_unique(
        &self,
        cache: &MetadataCache,
        entries: &mut [Entry],
        unique: &[usize],
        stats: &mut ScanStats,
        progress: &mut ProgressThrottle<'_>,
    ) -> Result<(), Error> {
        for (n, &i) in unique.iter().enumerate() {
            self.check_cancelled(cache)?;
            let entry = &mut entries[i];
            if entry.record.perceptual_fingerprint.is_empty() && entry.record.kind != MediaKind::Other {
                let analyzer = &self.analyzer;
                let path = entry.path.as_path();
                let kind = entry.record.kind;
                if let Some(fp) = guarded(path, "fingerprinting", || {
                    analyzer.perceptual_fingerprint(path, kind)
                }) {
                    stats.fingerprints_computed += 1;
                    entry.record.perceptual_fingerprint = fp;
                    if entry.cacheable {
                        store(cache, &entry.record.without_quality(), stats);
                    }
                }
            }
            self.batch_boundary(cache, n + 1, stats);
            progress.advance(n + 1, unique.len(), || {
                file_message("Fingerprinting", &entries[i].path)
            });
        }
        commit(cache, stats);
        Ok(())
    }

    /// Fill the quality reading of every image entry for `kind`. Files
    /// that share a content hash are measured once.
    fn measure_quality(
        &self,
        cache: &MetadataCache,
        entries: &mut [Entry],
        kind: QualityKind,
        stats: &mut ScanStats,
        progress: &mut ProgressThrottle<'_>,
    ) -> Result<(), Error> {
        let images: Vec<usize> = (0..entries.len())
            .filter(|&i| entries[i].record.kind == MediaKind::Image)
            .collect();
        let mut memo: AHashMap<String, Option<QualityReading>> = AHashMap::new();

        for (n, &i) in images.iter().enumerate() {
            self.check_cancelled(cache)?;
            let entry = &mut entries[i];
            if let Some(reading) = entry.record.reading_for(kind) {
                memo.entry(entry.record.content_hash.clone())
                    .or_insert(Some(reading));
            } else {
                let reading = match memo.get(&entry.record.content_hash) {
                    Some(reading) => *reading,
                    None => {
                        let reading = self.measure_one(&entry.path, kind, stats);
                        memo.insert(entry.record.content_hash.clone(), reading);
                        reading
                    }
                };
                if let Some(reading) = reading {
                    entry.record = entry.record.clone().with_reading(kind, reading);
                    if entry.cacheable {
                        store(cache, &entry.record, stats);
                    }
                }
            }
            self.batch_boundary(cache, n + 1, stats);
            progress.advance(n + 1, images.len(), || file_message("Scoring", &entries[i].path));
        }
        commit(cache, stats);
        Ok(())
    }

    fn measure_one(
        &self,
        path: &Path,
        kind: QualityKind,
        stats: &mut ScanStats,
    ) -> Option<QualityReading> {
        let analyzer = &self.analyzer;
        let long_side = self.config.analysis_long_side;
        let measured = guarded(path, "quality scoring", || {
            analyzer
                .grayscale(path)
                .map(|gray| kind.read(&prepare_gray(gray, long_side)))
        });
        match measured {
            Some(Ok(Some(reading))) => {
                stats.metrics_computed += 1;
                Some(reading)
            }
            Some(Ok(None)) => {
                debug!("Image too small for a {} metric: {}", kind, path.display());
                stats.metric_failures += 1;
                None
            }
            Some(Err(e)) => {
                warn!("No {} metric for {}: {}", kind, path.display(), e);
                stats.metric_failures += 1;
                None
            }
            None => {
                stats.metric_failures += 1;
                None
            }
        }
    }

    fn flag_quality(&self, entries: &[Entry], kind: QualityKind) -> Option<ResultGroup> {
        let measured: Vec<(usize, QualityReading)> = entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.record.reading_for(kind).map(|r| (i, r)))
            .filter(|(_, r)| r.value.is_finite())
            .collect();
        let readings: Vec<QualityReading> = measured.iter().map(|(_, r)| *r).collect();
        let verdict = quality::judge(&self.config.quality, &readings)?;

        let mut members: Vec<ResultItem> = verdict
            .flagged
            .iter()
            .map(|&(j, severity)| {
                let mut item = entries[measured[j].0].item(Some(kind));
                item.quality_score = Some(severity);
                item
            })
            .collect();
        members.sort_by(|a, b| {
            b.quality_score
                .unwrap_or(0.0)
                .total_cmp(&a.quality_score.unwrap_or(0.0))
        });
        info!("{} images flagged as {}", members.len(), verdict.category);
        Some(ResultGroup::new(verdict.category, verdict.label, members))
    }

    fn batch_boundary(&self, cache: &MetadataCache, processed: usize, stats: &mut ScanStats) {
        if processed % self.config.commit_every.max(1) == 0 {
            commit(cache, stats);
        }
    }
}

/// Run `ScanEngine::scan` on a dedicated thread, streaming progress as
/// [`ProgressEvent`]s.
pub fn spawn_scan(engine: ScanEngine) -> Result<ScanHandle, Error> {
    let (tx, rx) = mpsc::channel();
    let cancel = engine.cancel_token();
    let handle = thread::Builder::new()
        .name("dupsnap-scan".to_string())
        .spawn(move || engine.scan(&ChannelReporter::new(tx)))?;
    Ok(ScanHandle {
        events: rx,
        cancel,
        handle,
    })
}

pub struct ScanHandle {
    events: Receiver<ProgressEvent>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<ScanReport, Error>>,
}

impl ScanHandle {
    /// Closes once the scan thread exits.
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn join(self) -> Result<ScanReport, Error> {
        self.handle
            .join()
            .unwrap_or_else(|payload| Err(Error::Internal(panic_message(payload.as_ref()))))
    }
}

/// Buckets of entries sharing a non-empty content hash, first-seen order.
fn partition_exact(entries: &[Entry]) -> Vec<Vec<usize>> {
    let mut index: AHashMap<&str, usize> = AHashMap::new();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let hash = entry.record.content_hash.as_str();
        if hash.is_empty() {
            continue;
        }
        match index.get(hash) {
            Some(&b) => buckets[b].push(i),
            None => {
                index.insert(hash, buckets.len());
                buckets.push(vec![i]);
            }
        }
    }
    buckets.retain(|b| b.len() >= 2);
    buckets
}

fn membership(len: usize, groups: &[Vec<usize>]) -> Vec<bool> {
    let mut grouped = vec![false; len];
    for &i in groups.iter().flatten() {
        grouped[i] = true;
    }
    grouped
}

fn build_duplicate_groups(
    entries: &[Entry],
    sets: &DuplicateSets,
    quality_kind: Option<QualityKind>,
) -> Vec<ResultGroup> {
    let mut groups = Vec::with_capacity(sets.exact.len() + sets.near.len());

    for indices in &sets.exact {
        let mut members: Vec<ResultItem> =
            indices.iter().map(|&i| entries[i].item(quality_kind)).collect();
        let keep = keep_position(&members);
        for (j, member) in members.iter_mut().enumerate() {
            if j != keep {
                member.similarity_score = Some(scoring::similarity_score(0, FINGERPRINT_BITS));
            }
        }
        let label = format!(
            "Identical content {}",
            members[keep].content_hash.get(..8).unwrap_or_default()
        );
        groups.push(ResultGroup::new(GroupCategory::ExactDuplicate, label, members));
    }

    for indices in &sets.near {
        let mut members: Vec<ResultItem> =
            indices.iter().map(|&i| entries[i].item(quality_kind)).collect();
        let keep = keep_position(&members);
        let pivot = members[keep].perceptual_fingerprint.clone();
        for (j, member) in members.iter_mut().enumerate() {
            if j != keep {
                let distance = hamming(&pivot, &member.perceptual_fingerprint);
                member.similarity_score = Some(scoring::similarity_score(distance, FINGERPRINT_BITS));
            }
        }
        let label = format!(
            "Similar {} ({})",
            media_noun(&members),
            pivot.get(..4).unwrap_or(pivot.as_str())
        );
        groups.push(ResultGroup::new(GroupCategory::NearDuplicate, label, members));
    }

    groups
}

/// Index of the member to keep; groups are never empty here.
fn keep_position(members: &[ResultItem]) -> usize {
    scoring::keep_index(members, |m| (m.pixel_count(), m.size)).unwrap_or(0)
}

fn media_noun(members: &[ResultItem]) -> &'static str {
    if members.iter().all(|m| m.kind == MediaKind::Image) {
        "images"
    } else if members.iter().all(|m| m.kind == MediaKind::Video) {
        "videos"
    } else {
        "media"
    }
}

fn store(cache: &MetadataCache, record: &FileRecord, stats: &mut ScanStats) {
    if let Err(e) = cache.upsert(record) {
        warn!("Failed to cache {}: {}", record.path, e);
        stats.cache_write_failures += 1;
    }
}

fn commit(cache: &MetadataCache, stats: &mut ScanStats) {
    if let Err(e) = cache.commit() {
        warn!("Failed to commit cache batch: {}", e);
        stats.cache_write_failures += 1;
    }
}

/// Run one analyzer call for one file; a panic becomes `None`.
fn guarded<T, F>(path: &Path, what: &str, f: F) -> Option<T>
where
    F: FnOnce() -> T,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!(
                "{} panicked on {}: {}",
                what,
                path.display(),
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn file_message(verb: &str, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!("{} {}", verb, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, hash: &str, w: u32, h: u32, size: u64) -> Entry {
        let mut record = FileRecord::new(Path::new(path), size, 0.0, MediaKind::Image);
        record.content_hash = hash.to_string();
        record.width = w;
        record.height = h;
        Entry {
            path: PathBuf::from(path),
            record,
            cacheable: true,
        }
    }

    #[test]
    fn test_partition_exact_keeps_first_seen_order() {
        let entries = vec![
            entry("a", "h1", 1, 1, 1),
            entry("b", "h2", 1, 1, 1),
            entry("c", "h1", 1, 1, 1),
            entry("d", "", 1, 1, 1),
            entry("e", "", 1, 1, 1),
            entry("f", "h2", 1, 1, 1),
        ];
        assert_eq!(partition_exact(&entries), vec![vec![0, 2], vec![1, 5]]);
    }

    #[test]
    fn test_exact_group_keeps_largest_and_scores_others() {
        let entries = vec![entry("small", "h", 10, 10, 50), entry("big", "h", 20, 20, 40)];
        let sets = DuplicateSets {
            exact: vec![vec![0, 1]],
            near: Vec::new(),
        };
        let groups = build_duplicate_groups(&entries, &sets, None);
        assert_eq!(groups.len(), 1);
        let keep = groups[0].keep().unwrap();
        assert_eq!(keep.path, PathBuf::from("big"));
        assert_eq!(groups[0].members[0].similarity_score, Some(100.0));
        assert_eq!(groups[0].group_score, Some(100.0));
    }

    #[test]
    fn test_panic_message_from_payload() {
        let payload = panic::catch_unwind(|| panic!("decoder exploded")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "decoder exploded");
    }

    #[test]
    fn test_guarded_turns_panic_into_none() {
        let out: Option<u32> = guarded(Path::new("x.png"), "hashing", || panic!("boom"));
        assert!(out.is_none());
        assert_eq!(guarded(Path::new("x.png"), "hashing", || 7), Some(7));
    }
}
