pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod model;
pub mod progress;
pub mod quality;
pub mod scanner;
pub mod scoring;
pub mod storage;

pub use config::{AppConfig, QualityCheck, QualityMode, ScanConfig, Sensitivity, SimilarityThreshold};
pub use engine::{spawn_scan, ScanEngine, ScanHandle, ScanReport, ScanStats};
pub use error::Error;
pub use hasher::{Analyzer, MediaAnalyzer};
pub use model::{GroupCategory, ResultGroup, ResultItem};
pub use progress::{ChannelReporter, ProgressEvent, ProgressReporter, ScanStage, SilentReporter};
pub use quality::{BlurMethod, NoiseMethod, QualityKind};
pub use storage::{FileRecord, MetadataCache};
