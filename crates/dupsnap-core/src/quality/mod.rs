//! Blur and noise statistics over decoded grayscale pixels.
//!
//! The default blur metric is the variance of the Laplacian response (less
//! edge energy means more blur) and the default noise metric is its
//! standard deviation. Tenengrad and the high-frequency ratio are
//! alternative blur metrics; flat-region variance and 8x8 blockiness are
//! alternative noise metrics. Only still images are scored.

pub mod blur;
pub mod gradient;
pub mod laplacian;
pub mod noise;
pub mod threshold;
pub mod verdict;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use blur::{
    blur_scores, high_frequency_ratio, intensity_variance, tenengrad, BlurScores,
    LOW_TEXTURE_EPSILON,
};
pub use laplacian::{laplacian_stats, prepare_gray, LaplacianStats};
pub use noise::{blockiness, flat_variance, noise_scores, NoiseScores, FLAT_PERCENTILE};
pub use threshold::{adaptive_noise_threshold, is_blurry, is_noisy, percentile};
pub use verdict::{judge, Verdict};

/// Which statistic a stored quality value holds. The tag is stored next
/// to the value so a row measured one way is never read as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityKind {
    /// Laplacian variance.
    #[serde(rename = "blur")]
    Blur,
    #[serde(rename = "tenengrad")]
    Tenengrad,
    #[serde(rename = "hfr")]
    HighFrequency,
    /// Laplacian variance, high-frequency ratio as the second value.
    #[serde(rename = "blur+hfr")]
    BlurHfr,
    /// Laplacian standard deviation.
    #[serde(rename = "noise")]
    Noise,
    #[serde(rename = "var_flat")]
    FlatVariance,
    #[serde(rename = "jpeg_block")]
    Blockiness,
    /// Flat-region variance, blockiness as the second value.
    #[serde(rename = "flat+block")]
    FlatBlock,
}

/// One measurement of a [`QualityKind`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReading {
    pub value: f64,
    /// Second metric of a combined kind.
    pub aux: Option<f64>,
    /// Intensity variance, recorded for blur kinds.
    pub texture: Option<f64>,
}

impl QualityReading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            aux: None,
            texture: None,
        }
    }
}

impl QualityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityKind::Blur => "blur",
            QualityKind::Tenengrad => "tenengrad",
            QualityKind::HighFrequency => "hfr",
            QualityKind::BlurHfr => "blur+hfr",
            QualityKind::Noise => "noise",
            QualityKind::FlatVariance => "var_flat",
            QualityKind::Blockiness => "jpeg_block",
            QualityKind::FlatBlock => "flat+block",
        }
    }

    pub fn is_blur(self) -> bool {
        matches!(
            self,
            QualityKind::Blur
                | QualityKind::Tenengrad
                | QualityKind::HighFrequency
                | QualityKind::BlurHfr
        )
    }

    /// Primary value only.
    pub fn measure(self, gray: &GrayImage) -> Option<f64> {
        self.read(gray).map(|reading| reading.value)
    }

    /// `None` for an image with no pixels.
    pub fn read(self, gray: &GrayImage) -> Option<QualityReading> {
        let (value, aux) = match self {
            QualityKind::Blur => (blur_metric(gray)?, None),
            QualityKind::Tenengrad => (tenengrad(gray)?, None),
            QualityKind::HighFrequency => (high_frequency_ratio(gray)?, None),
            QualityKind::BlurHfr => (blur_metric(gray)?, Some(high_frequency_ratio(gray)?)),
            QualityKind::Noise => (noise_metric(gray)?, None),
            QualityKind::FlatVariance => (flat_variance(gray, FLAT_PERCENTILE)?, None),
            QualityKind::Blockiness => (blockiness(gray)?, None),
            QualityKind::FlatBlock => (
                flat_variance(gray, FLAT_PERCENTILE)?,
                Some(blockiness(gray)?),
            ),
        };
        let texture = if self.is_blur() {
            intensity_variance(gray)
        } else {
            None
        };
        Some(QualityReading {
            value,
            aux,
            texture,
        })
    }
}

impl FromStr for QualityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blur" => Ok(QualityKind::Blur),
            "tenengrad" => Ok(QualityKind::Tenengrad),
            "hfr" => Ok(QualityKind::HighFrequency),
            "blur+hfr" => Ok(QualityKind::BlurHfr),
            "noise" => Ok(QualityKind::Noise),
            "var_flat" => Ok(QualityKind::FlatVariance),
            "jpeg_block" => Ok(QualityKind::Blockiness),
            "flat+block" => Ok(QualityKind::FlatBlock),
            other => Err(format!("unknown quality kind '{}'", other)),
        }
    }
}

impl fmt::Display for QualityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How blur is judged when the quality mode is `blur`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlurMethod {
    /// Laplacian variance against a fixed threshold.
    #[default]
    #[serde(rename = "vol")]
    Variance,
    #[serde(rename = "tenengrad")]
    Tenengrad,
    #[serde(rename = "hfr")]
    Hfr,
    /// Both the variance and the high-frequency ratio must be low.
    #[serde(rename = "vol+hfr")]
    VarianceHfr,
}

impl BlurMethod {
    pub fn kind(self) -> QualityKind {
        match self {
            BlurMethod::Variance => QualityKind::Blur,
            BlurMethod::Tenengrad => QualityKind::Tenengrad,
            BlurMethod::Hfr => QualityKind::HighFrequency,
            BlurMethod::VarianceHfr => QualityKind::BlurHfr,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlurMethod::Variance => "vol",
            BlurMethod::Tenengrad => "tenengrad",
            BlurMethod::Hfr => "hfr",
            BlurMethod::VarianceHfr => "vol+hfr",
        }
    }
}

impl FromStr for BlurMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vol" | "variance" => Ok(BlurMethod::Variance),
            "tenengrad" => Ok(BlurMethod::Tenengrad),
            "hfr" => Ok(BlurMethod::Hfr),
            "vol+hfr" => Ok(BlurMethod::VarianceHfr),
            other => Err(format!(
                "unknown blur method '{}' (expected vol, tenengrad, hfr or vol+hfr)",
                other
            )),
        }
    }
}

impl fmt::Display for BlurMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How noise is judged when the quality mode is `noise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoiseMethod {
    /// Laplacian standard deviation.
    #[default]
    #[serde(rename = "laplacian")]
    Laplacian,
    #[serde(rename = "var_flat")]
    FlatVariance,
    #[serde(rename = "jpeg_block")]
    Blockiness,
    /// Either the flat-region variance or the blockiness is high.
    #[serde(rename = "flat+block")]
    FlatBlock,
}

impl NoiseMethod {
    pub fn kind(self) -> QualityKind {
        match self {
            NoiseMethod::Laplacian => QualityKind::Noise,
            NoiseMethod::FlatVariance => QualityKind::FlatVariance,
            NoiseMethod::Blockiness => QualityKind::Blockiness,
            NoiseMethod::FlatBlock => QualityKind::FlatBlock,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoiseMethod::Laplacian => "laplacian",
            NoiseMethod::FlatVariance => "var_flat",
            NoiseMethod::Blockiness => "jpeg_block",
            NoiseMethod::FlatBlock => "flat+block",
        }
    }
}

impl FromStr for NoiseMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "laplacian" => Ok(NoiseMethod::Laplacian),
            "var_flat" => Ok(NoiseMethod::FlatVariance),
            "jpeg_block" => Ok(NoiseMethod::Blockiness),
            "flat+block" => Ok(NoiseMethod::FlatBlock),
            other => Err(format!(
                "unknown noise method '{}' (expected laplacian, var_flat, jpeg_block or flat+block)",
                other
            )),
        }
    }
}

impl fmt::Display for NoiseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn blur_metric(gray: &GrayImage) -> Option<f64> {
    laplacian_stats(gray).map(|s| s.variance)
}

pub fn noise_metric(gray: &GrayImage) -> Option<f64> {
    laplacian_stats(gray).map(|s| s.std_dev())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in [
            QualityKind::Blur,
            QualityKind::Tenengrad,
            QualityKind::HighFrequency,
            QualityKind::BlurHfr,
            QualityKind::Noise,
            QualityKind::FlatVariance,
            QualityKind::Blockiness,
            QualityKind::FlatBlock,
        ] {
            assert_eq!(kind.as_str().parse::<QualityKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_methods_map_to_distinct_kinds() {
        assert_eq!(BlurMethod::VarianceHfr.kind(), QualityKind::BlurHfr);
        assert_eq!(NoiseMethod::FlatBlock.kind(), QualityKind::FlatBlock);
        assert_eq!(NoiseMethod::default().kind(), QualityKind::Noise);
        assert_eq!("vol+hfr".parse::<BlurMethod>(), Ok(BlurMethod::VarianceHfr));
        assert!("sharpness".parse::<NoiseMethod>().is_err());
    }
}
