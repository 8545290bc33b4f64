//! Noise statistics beyond the Laplacian standard deviation.

use super::gradient::magnitudes;
use super::laplacian_stats;
use super::threshold::percentile;
use image::GrayImage;

/// Pixels whose Sobel magnitude sits below this percentile count as flat.
pub const FLAT_PERCENTILE: f64 = 60.0;

const BLOCK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseScores {
    /// Laplacian standard deviation.
    pub laplacian_std: f64,
    pub flat_variance: f64,
    pub blockiness: f64,
}

pub fn noise_scores(gray: &GrayImage) -> Option<NoiseScores> {
    Some(NoiseScores {
        laplacian_std: laplacian_stats(gray)?.std_dev(),
        flat_variance: flat_variance(gray, FLAT_PERCENTILE)?,
        blockiness: blockiness(gray)?,
    })
}

/// Intensity variance over the flat region: pixels whose gradient
/// magnitude is below the given percentile. Falls back to the whole image
/// when no pixel qualifies.
pub fn flat_variance(gray: &GrayImage, flat_percentile: f64) -> Option<f64> {
    let raw = gray.as_raw();
    if raw.is_empty() {
        return None;
    }
    let mags = magnitudes(gray);
    let cutoff = percentile(&mags, flat_percentile)?;
    let flat: Vec<f64> = raw
        .iter()
        .zip(&mags)
        .filter(|(_, m)| **m < cutoff)
        .map(|(&p, _)| p as f64)
        .collect();
    if flat.is_empty() {
        Some(variance(raw.iter().map(|&p| p as f64)))
    } else {
        Some(variance(flat.into_iter()))
    }
}

/// Mean absolute step across 8x8 block boundaries and between samples on
/// the 8-pixel grid. Compression blocking raises both.
pub fn blockiness(gray: &GrayImage) -> Option<f64> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let width = w as usize;
    let height = h as usize;
    let raw = gray.as_raw();
    let at = |x: usize, y: usize| raw[y * width + x] as f64;

    let mut total = 0.0f64;
    let mut count = 0usize;
    let mut add = |a: f64, b: f64| {
        total += (a - b).abs();
        count += 1;
    };

    for y in 0..height {
        for x in (BLOCK..width).step_by(BLOCK) {
            add(at(x, y), at(x - 1, y));
        }
        for x in (0..width.saturating_sub(BLOCK)).step_by(BLOCK) {
            add(at(x + BLOCK, y), at(x, y));
        }
    }
    for x in 0..width {
        for y in (BLOCK..height).step_by(BLOCK) {
            add(at(x, y), at(x, y - 1));
        }
        for y in (0..height.saturating_sub(BLOCK)).step_by(BLOCK) {
            add(at(x, y + BLOCK), at(x, y));
        }
    }

    if count == 0 {
        return Some(0.0);
    }
    Some(total / count as f64)
}

fn variance(values: impl Iterator<Item = f64>) -> f64 {
    let (n, sum, sum_sq) = values.fold((0usize, 0.0f64, 0.0f64), |(n, s, sq), v| {
        (n + 1, s + v, sq + v * v)
    });
    if n == 0 {
        return 0.0;
    }
    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0)
}
