use clap::{Args, Parser, Subcommand};
use dupsnap_core::cluster::ClusterStrategy;
use dupsnap_core::{AppConfig, BlurMethod, NoiseMethod, QualityMode, Sensitivity, SimilarityThreshold};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dupsnap")]
#[command(about = "Find duplicate, similar, blurry and noisy photos and videos", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a directory and print the result groups
    Scan(ScanArgs),
    /// Display the number of cached file records
    CacheStats {
        /// Cache file (defaults to the configured one)
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Delete every cached file record
    ClearCache {
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan
    pub dir: PathBuf,

    /// weak, medium, strong or a maximum Hamming distance in bits
    #[arg(long)]
    pub similarity: Option<SimilarityThreshold>,

    /// off, blur or noise
    #[arg(long)]
    pub quality: Option<QualityMode>,

    /// Quality sensitivity: weak, medium or strong
    #[arg(long)]
    pub sensitivity: Option<Sensitivity>,

    /// Explicit Laplacian variance threshold for --quality blur
    #[arg(long)]
    pub blur_threshold: Option<f64>,

    /// vol, tenengrad, hfr or vol+hfr
    #[arg(long)]
    pub blur_method: Option<BlurMethod>,

    /// Percentile cutoff for the ranked blur methods (5 to 50)
    #[arg(long)]
    pub blur_percentile: Option<f64>,

    /// laplacian, var_flat, jpeg_block or flat+block
    #[arg(long)]
    pub noise_method: Option<NoiseMethod>,

    /// Ignore video files
    #[arg(long)]
    pub no_videos: bool,

    /// Cache file
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// greedy or transitive near-duplicate grouping
    #[arg(long)]
    pub strategy: Option<ClusterStrategy>,

    /// Print the report as JSON instead of a listing
    #[arg(long)]
    pub json: bool,

    /// Also write one row per group member to this CSV file
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
}

impl ScanArgs {
    /// Layer the flags that were given over file/env configuration.
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(similarity) = self.similarity {
            config.similarity = similarity;
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(sensitivity) = self.sensitivity {
            config.quality_sensitivity = sensitivity;
        }
        if self.blur_threshold.is_some() {
            config.blur_threshold = self.blur_threshold;
        }
        if let Some(method) = self.blur_method {
            config.blur_method = method;
        }
        if let Some(percentile) = self.blur_percentile {
            config.blur_percentile = percentile;
        }
        if let Some(method) = self.noise_method {
            config.noise_method = method;
        }
        if self.no_videos {
            config.include_videos = false;
        }
        if let Some(cache) = &self.cache {
            config.cache_path = cache.to_string_lossy().into_owned();
        }
        if let Some(strategy) = self.strategy {
            config.cluster_strategy = strategy;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_flags_override_config() {
        let cli = Cli::parse_from([
            "dupsnap",
            "scan",
            "/photos",
            "--similarity",
            "7",
            "--quality",
            "noise",
            "--sensitivity",
            "strong",
            "--no-videos",
            "--strategy",
            "transitive",
        ]);
        let Some(Commands::Scan(args)) = cli.command else {
            panic!("expected scan command");
        };
        let config = args.apply(AppConfig::default());
        assert_eq!(config.similarity, SimilarityThreshold::Bits(7));
        assert_eq!(config.quality, QualityMode::Noise);
        assert_eq!(config.quality_sensitivity, Sensitivity::Strong);
        assert!(!config.include_videos);
        assert_eq!(config.cluster_strategy, ClusterStrategy::Transitive);
        assert_eq!(config.cache_path, AppConfig::default().cache_path);
    }

    #[test]
    fn test_named_similarity_tier() {
        let cli = Cli::parse_from(["dupsnap", "scan", ".", "--similarity", "weak"]);
        let Some(Commands::Scan(args)) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(
            args.similarity,
            Some(SimilarityThreshold::Level(Sensitivity::Weak))
        );
    }

    #[test]
    fn test_metric_method_flags() {
        let cli = Cli::parse_from([
            "dupsnap",
            "scan",
            ".",
            "--blur-method",
            "vol+hfr",
            "--blur-percentile",
            "30",
            "--noise-method",
            "flat+block",
        ]);
        let Some(Commands::Scan(args)) = cli.command else {
            panic!("expected scan command");
        };
        let config = args.apply(AppConfig::default());
        assert_eq!(config.blur_method, BlurMethod::VarianceHfr);
        assert_eq!(config.blur_percentile, 30.0);
        assert_eq!(config.noise_method, NoiseMethod::FlatBlock);
    }

    #[test]
    fn test_unknown_blur_method_is_rejected() {
        let parsed = Cli::try_parse_from(["dupsnap", "scan", ".", "--blur-method", "sobel"]);
        assert!(parsed.is_err());
    }
}
