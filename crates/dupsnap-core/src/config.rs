use crate::cluster::{ClusterConfig, ClusterStrategy};
use crate::quality::{BlurMethod, NoiseMethod, QualityKind};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Three-step dial shared by the similarity and quality settings.
/// `Strong` always flags more: looser Hamming cutoff, larger noisy
/// fraction, higher blur threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Weak,
    Medium,
    Strong,
}

impl Sensitivity {
    pub fn hamming_cutoff(self) -> u32 {
        match self {
            Sensitivity::Weak => 3,
            Sensitivity::Medium => 5,
            Sensitivity::Strong => 8,
        }
    }

    /// Share of the noisiest positive samples flagged in one run.
    pub fn noise_fraction(self) -> f64 {
        match self {
            Sensitivity::Weak => 0.1,
            Sensitivity::Medium => 0.3,
            Sensitivity::Strong => 0.6,
        }
    }

    /// Laplacian variance below which an image counts as blurry.
    pub fn blur_threshold(self) -> f64 {
        match self {
            Sensitivity::Weak => 50.0,
            Sensitivity::Medium => 100.0,
            Sensitivity::Strong => 150.0,
        }
    }
}

impl FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weak" => Ok(Sensitivity::Weak),
            "medium" => Ok(Sensitivity::Medium),
            "strong" => Ok(Sensitivity::Strong),
            other => Err(format!(
                "unknown sensitivity '{}' (expected weak, medium or strong)",
                other
            )),
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sensitivity::Weak => "weak",
            Sensitivity::Medium => "medium",
            Sensitivity::Strong => "strong",
        };
        f.write_str(name)
    }
}

/// Near-duplicate cutoff: a named tier or a raw Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SimilarityThreshold {
    Level(Sensitivity),
    Bits(u32),
}

impl SimilarityThreshold {
    pub fn max_distance(self) -> u32 {
        match self {
            SimilarityThreshold::Level(level) => level.hamming_cutoff(),
            SimilarityThreshold::Bits(bits) => bits,
        }
    }
}

impl Default for SimilarityThreshold {
    fn default() -> Self {
        SimilarityThreshold::Level(Sensitivity::Medium)
    }
}

impl FromStr for SimilarityThreshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u32>() {
            Ok(bits) => Ok(SimilarityThreshold::Bits(bits)),
            Err(_) => s.parse::<Sensitivity>().map(SimilarityThreshold::Level),
        }
    }
}

// Accepts `medium` as well as `6` (from TOML or a parsed env var).
impl<'de> Deserialize<'de> for SimilarityThreshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ThresholdVisitor;

        impl<'de> Visitor<'de> for ThresholdVisitor {
            type Value = SimilarityThreshold;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("weak, medium, strong or a Hamming distance")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                u32::try_from(v)
                    .map(SimilarityThreshold::Bits)
                    .map_err(|_| E::custom(format!("distance {} out of range", v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u32::try_from(v)
                    .map(SimilarityThreshold::Bits)
                    .map_err(|_| E::custom(format!("distance {} out of range", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ThresholdVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    #[default]
    Off,
    Blur,
    Noise,
}

impl FromStr for QualityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(QualityMode::Off),
            "blur" => Ok(QualityMode::Blur),
            "noise" => Ok(QualityMode::Noise),
            other => Err(format!(
                "unknown quality mode '{}' (expected off, blur or noise)",
                other
            )),
        }
    }
}

/// Resolved quality check for one scan run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityCheck {
    Off,
    /// Laplacian variance below a fixed threshold.
    Blur { threshold: f64 },
    /// `method`'s metrics below this run's `percentile` (5 to 50).
    RankedBlur { method: BlurMethod, percentile: f64 },
    /// `method`'s metrics among the noisiest share of this run.
    Noise {
        method: NoiseMethod,
        sensitivity: Sensitivity,
    },
}

impl QualityCheck {
    pub fn kind(&self) -> Option<QualityKind> {
        match self {
            QualityCheck::Off => None,
            QualityCheck::Blur { .. } => Some(QualityKind::Blur),
            QualityCheck::RankedBlur { method, .. } => Some(method.kind()),
            QualityCheck::Noise { method, .. } => Some(method.kind()),
        }
    }
}

/// File/env settings. Every field has a default so an empty environment
/// still yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache_path: String,
    pub similarity: SimilarityThreshold,
    pub quality: QualityMode,
    pub quality_sensitivity: Sensitivity,
    pub blur_threshold: Option<f64>,
    pub blur_method: BlurMethod,
    pub blur_percentile: f64,
    pub noise_method: NoiseMethod,
    pub include_videos: bool,
    pub video_samples: usize,
    pub video_timeout_secs: u64,
    pub ignore_patterns: Vec<String>,
    pub commit_every: usize,
    pub cluster_prefix_len: usize,
    pub cluster_strategy: ClusterStrategy,
    pub analysis_long_side: Option<u32>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub progress_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_path: "dupsnap_cache.db".to_string(),
            similarity: SimilarityThreshold::default(),
            quality: QualityMode::Off,
            quality_sensitivity: Sensitivity::Medium,
            blur_threshold: None,
            blur_method: BlurMethod::Variance,
            blur_percentile: 20.0,
            noise_method: NoiseMethod::Laplacian,
            include_videos: true,
            video_samples: 12,
            video_timeout_secs: 60,
            ignore_patterns: Vec::new(),
            commit_every: 50,
            cluster_prefix_len: 4,
            cluster_strategy: ClusterStrategy::Greedy,
            analysis_long_side: Some(1024),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            progress_interval_ms: 100,
        }
    }
}

impl AppConfig {
    pub fn quality_check(&self) -> QualityCheck {
        match self.quality {
            QualityMode::Off => QualityCheck::Off,
            QualityMode::Blur => match self.blur_method {
                BlurMethod::Variance => QualityCheck::Blur {
                    threshold: self
                        .blur_threshold
                        .unwrap_or_else(|| self.quality_sensitivity.blur_threshold()),
                },
                method => QualityCheck::RankedBlur {
                    method,
                    percentile: self.blur_percentile.clamp(5.0, 50.0),
                },
            },
            QualityMode::Noise => QualityCheck::Noise {
                method: self.noise_method,
                sensitivity: self.quality_sensitivity,
            },
        }
    }

    pub fn into_scan_config(self, root: impl Into<PathBuf>) -> ScanConfig {
        let quality = self.quality_check();
        ScanConfig {
            root: root.into(),
            cache_path: PathBuf::from(self.cache_path),
            similarity: self.similarity,
            quality,
            include_videos: self.include_videos,
            video_samples: self.video_samples.max(1),
            video_timeout: Duration::from_secs(self.video_timeout_secs.max(1)),
            ignore_patterns: self.ignore_patterns,
            commit_every: self.commit_every.max(1),
            cluster_prefix_len: self.cluster_prefix_len,
            cluster_strategy: self.cluster_strategy,
            analysis_long_side: self.analysis_long_side,
            ffmpeg_path: self.ffmpeg_path,
            ffprobe_path: self.ffprobe_path,
            progress_interval: Duration::from_millis(self.progress_interval_ms),
        }
    }
}

/// Load `DupSnap.toml` (optional) layered under `DUPSNAP_*` variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("DupSnap").required(false))
        .add_source(
            Environment::with_prefix("DUPSNAP")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Everything one scan run needs, resolved from `AppConfig` plus a root.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    pub cache_path: PathBuf,
    pub similarity: SimilarityThreshold,
    pub quality: QualityCheck,
    pub include_videos: bool,
    pub video_samples: usize,
    /// Wall-clock limit for one `ffprobe`/`ffmpeg` call.
    pub video_timeout: Duration,
    pub ignore_patterns: Vec<String>,
    /// Cache writes are committed every this many files; 0 acts as 1.
    pub commit_every: usize,
    pub cluster_prefix_len: usize,
    pub cluster_strategy: ClusterStrategy,
    pub analysis_long_side: Option<u32>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub progress_interval: Duration,
}

impl ScanConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        AppConfig::default().into_scan_config(root)
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    pub fn with_similarity(mut self, similarity: SimilarityThreshold) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn with_quality(mut self, quality: QualityCheck) -> Self {
        self.quality = quality;
        self
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            max_distance: self.similarity.max_distance(),
            prefix_len: self.cluster_prefix_len,
            strategy: self.cluster_strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_tiers_span_three_to_eight_bits() {
        assert_eq!(SimilarityThreshold::Level(Sensitivity::Weak).max_distance(), 3);
        assert_eq!(SimilarityThreshold::Level(Sensitivity::Medium).max_distance(), 5);
        assert_eq!(SimilarityThreshold::Level(Sensitivity::Strong).max_distance(), 8);
        assert_eq!(SimilarityThreshold::Bits(11).max_distance(), 11);
    }

    #[test]
    fn test_similarity_parses_level_or_bits() {
        assert_eq!(
            "strong".parse::<SimilarityThreshold>().unwrap(),
            SimilarityThreshold::Level(Sensitivity::Strong)
        );
        assert_eq!(
            "7".parse::<SimilarityThreshold>().unwrap(),
            SimilarityThreshold::Bits(7)
        );
        assert!("loose".parse::<SimilarityThreshold>().is_err());
    }

    #[test]
    fn test_similarity_deserializes_from_string_and_integer() {
        let level: SimilarityThreshold = serde_json::from_str("\"weak\"").unwrap();
        assert_eq!(level, SimilarityThreshold::Level(Sensitivity::Weak));
        let bits: SimilarityThreshold = serde_json::from_str("6").unwrap();
        assert_eq!(bits, SimilarityThreshold::Bits(6));
    }

    #[test]
    fn test_blur_threshold_override_wins_over_tier() {
        let config = AppConfig {
            quality: QualityMode::Blur,
            quality_sensitivity: Sensitivity::Strong,
            blur_threshold: Some(42.0),
            ..AppConfig::default()
        };
        assert_eq!(config.quality_check(), QualityCheck::Blur { threshold: 42.0 });

        let tiered = AppConfig {
            quality: QualityMode::Blur,
            quality_sensitivity: Sensitivity::Weak,
            ..AppConfig::default()
        };
        assert_eq!(tiered.quality_check(), QualityCheck::Blur { threshold: 50.0 });
    }

    #[test]
    fn test_blur_method_selects_ranked_check() {
        let config = AppConfig {
            quality: QualityMode::Blur,
            blur_method: BlurMethod::VarianceHfr,
            blur_percentile: 90.0,
            ..AppConfig::default()
        };
        assert_eq!(
            config.quality_check(),
            QualityCheck::RankedBlur {
                method: BlurMethod::VarianceHfr,
                percentile: 50.0
            }
        );
        assert_eq!(config.quality_check().kind(), Some(QualityKind::BlurHfr));

        let noise = AppConfig {
            quality: QualityMode::Noise,
            noise_method: NoiseMethod::Blockiness,
            ..AppConfig::default()
        };
        assert_eq!(noise.quality_check().kind(), Some(QualityKind::Blockiness));
    }

    #[test]
    fn test_method_names_deserialize() {
        let method: BlurMethod = serde_json::from_str("\"vol+hfr\"").unwrap();
        assert_eq!(method, BlurMethod::VarianceHfr);
        let method: NoiseMethod = serde_json::from_str("\"flat+block\"").unwrap();
        assert_eq!(method, NoiseMethod::FlatBlock);
    }

    #[test]
    fn test_scan_config_clamps_batch_and_samples() {
        let config = AppConfig {
            commit_every: 0,
            video_samples: 0,
            ..AppConfig::default()
        }
        .into_scan_config("/photos");
        assert_eq!(config.commit_every, 1);
        assert_eq!(config.video_samples, 1);
        assert_eq!(config.root, PathBuf::from("/photos"));
        assert_eq!(config.cluster_config().max_distance, 5);
    }
}
