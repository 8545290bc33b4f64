//! Per-file fingerprint functions: exact content hash, perceptual
//! fingerprint (images directly, videos via sampled frames) and the pixel
//! access the quality metrics need.

pub mod content;
pub mod perceptual;
pub mod video;

use crate::config::ScanConfig;
use crate::error::Error;
use crate::scanner::MediaKind;
use image::{GrayImage, ImageReader};
use std::io;
use std::path::Path;
use tracing::warn;

pub use content::content_hash;
pub use perceptual::{fingerprint_hasher, image_fingerprint, median_fingerprint};
pub use video::VideoTools;

/// Everything the pipeline computes from a file's bytes or pixels.
///
/// Implementations must be side-effect free; the engine calls them once
/// per file and caches what comes back.
pub trait Analyzer: Send + Sync {
    fn content_hash(&self, path: &Path) -> io::Result<String>;

    fn dimensions(&self, path: &Path, kind: MediaKind) -> Result<(u32, u32), Error>;

    /// Fixed-length hex fingerprint, or an empty string when the file
    /// gives no usable perceptual signal.
    fn perceptual_fingerprint(&self, path: &Path, kind: MediaKind) -> String;

    fn grayscale(&self, path: &Path) -> Result<GrayImage, Error>;
}

/// Decodes stills with `image` and videos through `ffmpeg`.
#[derive(Debug, Clone)]
pub struct MediaAnalyzer {
    video: VideoTools,
    video_samples: usize,
}

impl MediaAnalyzer {
    pub fn new(video: VideoTools, video_samples: usize) -> Self {
        Self {
            video,
            video_samples: video_samples.max(1),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            VideoTools::new(&config.ffmpeg_path, &config.ffprobe_path)
                .with_timeout(config.video_timeout),
            config.video_samples,
        )
    }

    fn video_fingerprint(&self, path: &Path) -> Result<String, Error> {
        let frames = self.video.sample_frames(path, self.video_samples)?;
        let hasher = fingerprint_hasher();
        let hashes: Vec<Vec<u8>> = frames
            .iter()
            .map(|frame| perceptual::fingerprint_bytes(&hasher, frame))
            .collect();
        Ok(median_fingerprint(&hashes))
    }
}

impl Default for MediaAnalyzer {
    fn default() -> Self {
        Self::new(VideoTools::new("ffmpeg", "ffprobe"), 12)
    }
}

impl Analyzer for MediaAnalyzer {
    fn content_hash(&self, path: &Path) -> io::Result<String> {
        content_hash(path)
    }

    fn dimensions(&self, path: &Path, kind: MediaKind) -> Result<(u32, u32), Error> {
        match kind {
            MediaKind::Image => {
                let reader = ImageReader::open(path)?.with_guessed_format()?;
                Ok(reader.into_dimensions()?)
            }
            MediaKind::Video => {
                let info = self.video.inspect(path)?;
                Ok((info.width, info.height))
            }
            MediaKind::Other => Ok((0, 0)),
        }
    }

    fn perceptual_fingerprint(&self, path: &Path, kind: MediaKind) -> String {
        let result = match kind {
            MediaKind::Image => image::open(path)
                .map(|img| image_fingerprint(&fingerprint_hasher(), &img))
                .map_err(Error::from),
            MediaKind::Video => self.video_fingerprint(path),
            MediaKind::Other => Ok(String::new()),
        };
        result.unwrap_or_else(|e| {
            warn!("No perceptual fingerprint for {}: {}", path.display(), e);
            String::new()
        })
    }

    fn grayscale(&self, path: &Path) -> Result<GrayImage, Error> {
        Ok(image::open(path)?.to_luma8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_image_dimensions_and_fingerprint() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("stripes.png");
        let img = RgbImage::from_fn(40, 30, |x, _| {
            if x % 10 < 5 {
                image::Rgb([250, 250, 250])
            } else {
                image::Rgb([5, 5, 5])
            }
        });
        img.save(&path).unwrap();

        let analyzer = MediaAnalyzer::default();
        assert_eq!(analyzer.dimensions(&path, MediaKind::Image).unwrap(), (40, 30));
        assert_eq!(analyzer.perceptual_fingerprint(&path, MediaKind::Image).len(), 16);
        let gray = analyzer.grayscale(&path).unwrap();
        assert_eq!(gray.dimensions(), (40, 30));
        assert_eq!(gray.get_pixel(0, 0), &Luma([250]));
    }

    #[test]
    fn test_undecodable_image_has_empty_fingerprint() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("broken.jpg");
        fs::write(&path, b"definitely not a jpeg").unwrap();

        let analyzer = MediaAnalyzer::default();
        assert_eq!(analyzer.perceptual_fingerprint(&path, MediaKind::Image), "");
        assert!(analyzer.dimensions(&path, MediaKind::Image).is_err());
        assert!(analyzer.grayscale(&path).is_err());
    }
}
