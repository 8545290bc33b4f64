use crate::quality::{QualityKind, QualityReading};
use crate::scanner::MediaKind;
use std::path::Path;

/// One cached row of the `files` table.
///
/// A row is only valid for a file while its `(size, modified_time)` still
/// match the file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    pub modified_time: f64,
    /// Empty until computed.
    pub content_hash: String,
    /// Empty until computed, or when the file gave no perceptual signal.
    pub perceptual_fingerprint: String,
    pub width: u32,
    pub height: u32,
    pub kind: MediaKind,
    pub quality_metric: Option<f64>,
    pub quality_kind: Option<QualityKind>,
    /// Second metric of a combined kind (`blur+hfr`, `flat+block`).
    pub quality_aux: Option<f64>,
    /// Global intensity variance recorded alongside the metric.
    pub quality_texture: Option<f64>,
}

impl FileRecord {
    pub fn new(path: &Path, size: u64, modified_time: f64, kind: MediaKind) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            size,
            modified_time,
            content_hash: String::new(),
            perceptual_fingerprint: String::new(),
            width: 0,
            height: 0,
            kind,
            quality_metric: None,
            quality_kind: None,
            quality_aux: None,
            quality_texture: None,
        }
    }

    /// Stored metric, but only if it measures `kind`.
    pub fn quality_for(&self, kind: QualityKind) -> Option<f64> {
        match self.quality_kind {
            Some(stored) if stored == kind => self.quality_metric,
            _ => None,
        }
    }

    /// Full stored reading, but only if it measures `kind`.
    pub fn reading_for(&self, kind: QualityKind) -> Option<QualityReading> {
        self.quality_for(kind).map(|value| QualityReading {
            value,
            aux: self.quality_aux,
            texture: self.quality_texture,
        })
    }

    pub fn with_quality(self, kind: QualityKind, value: f64) -> Self {
        self.with_reading(kind, QualityReading::new(value))
    }

    pub fn with_reading(mut self, kind: QualityKind, reading: QualityReading) -> Self {
        self.quality_kind = Some(kind);
        self.quality_metric = Some(reading.value);
        self.quality_aux = reading.aux;
        self.quality_texture = reading.texture;
        self
    }

    /// Copy for an upsert that must not touch the stored metric.
    pub fn without_quality(&self) -> Self {
        Self {
            quality_metric: None,
            quality_kind: None,
            quality_aux: None,
            quality_texture: None,
            ..self.clone()
        }
    }
}
