//! Sharpness statistics beyond the Laplacian variance.

use super::gradient::sobel;
use super::laplacian_stats;
use image::GrayImage;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Median intensity variance below which a whole run counts as low
/// texture and blur is not judged.
pub const LOW_TEXTURE_EPSILON: f64 = 1.0;

/// Share of the shorter side used as the low-frequency radius.
const LOW_FREQUENCY_RADIUS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurScores {
    /// Laplacian variance.
    pub variance: f64,
    /// Mean squared Sobel magnitude.
    pub tenengrad: f64,
    /// Share of spectral energy outside the low-frequency disk.
    pub high_frequency_ratio: f64,
}

pub fn blur_scores(gray: &GrayImage) -> Option<BlurScores> {
    Some(BlurScores {
        variance: laplacian_stats(gray)?.variance,
        tenengrad: tenengrad(gray)?,
        high_frequency_ratio: high_frequency_ratio(gray)?,
    })
}

pub fn tenengrad(gray: &GrayImage) -> Option<f64> {
    let gradients = sobel(gray);
    if gradients.is_empty() {
        return None;
    }
    let energy: f64 = gradients.iter().map(|[gx, gy]| gx * gx + gy * gy).sum();
    Some(energy / gradients.len() as f64)
}

/// Population variance of the raw intensities.
pub fn intensity_variance(gray: &GrayImage) -> Option<f64> {
    let raw = gray.as_raw();
    if raw.is_empty() {
        return None;
    }
    let n = raw.len() as f64;
    let (sum, sum_sq) = raw.iter().fold((0.0f64, 0.0f64), |(s, sq), &p| {
        let v = p as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    Some((sum_sq / n - mean * mean).max(0.0))
}

/// Fraction of the 2-D spectrum's energy outside a centred disk of radius
/// `max(1, round(0.05 * min(w, h)))`.
///
/// Total energy comes from Parseval's theorem, so only the coefficients
/// inside the disk are evaluated: a partial DFT along rows for the needed
/// horizontal frequencies, then along columns.
pub fn high_frequency_ratio(gray: &GrayImage) -> Option<f64> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let width = w as usize;
    let height = h as usize;
    let raw = gray.as_raw();

    let sum_sq: f64 = raw.iter().map(|&p| (p as f64) * (p as f64)).sum();
    let total = (width * height) as f64 * sum_sq;
    if total <= 0.0 {
        return Some(0.0);
    }

    let radius = ((LOW_FREQUENCY_RADIUS * w.min(h) as f64).round() as i64).max(1);
    let kx = shifted_frequencies(width, radius);
    let ky = shifted_frequencies(height, radius);
    let row_twiddles = Twiddles::new(width);
    let col_twiddles = Twiddles::new(height);

    // rows[y][j] = DFT of row y at horizontal frequency kx[j]
    let rows: Vec<Vec<(f64, f64)>> = (0..height)
        .into_par_iter()
        .map(|y| {
            let row = &raw[y * width..(y + 1) * width];
            kx.iter()
                .map(|&k| row_twiddles.project(row.iter().map(|&p| p as f64), k))
                .collect()
        })
        .collect();

    let low: f64 = kx
        .par_iter()
        .enumerate()
        .map(|(j, &fx)| {
            let column: Vec<(f64, f64)> = rows.iter().map(|r| r[j]).collect();
            ky.iter()
                .filter(|&&fy| fx * fx + fy * fy <= radius * radius)
                .map(|&fy| {
                    let (re, im) = col_twiddles.project_complex(&column, fy);
                    re * re + im * im
                })
                .sum::<f64>()
        })
        .sum();

    Some(((total - low) / total).clamp(0.0, 1.0))
}

/// Signed frequencies in `[-radius, radius]` that exist in a centred
/// spectrum of length `len`.
fn shifted_frequencies(len: usize, radius: i64) -> Vec<i64> {
    let centre = (len / 2) as i64;
    let lowest = -centre;
    let highest = len as i64 - 1 - centre;
    (-radius..=radius)
        .filter(|k| *k >= lowest && *k <= highest)
        .collect()
}

struct Twiddles {
    cos: Vec<f64>,
    sin: Vec<f64>,
}

impl Twiddles {
    fn new(len: usize) -> Self {
        let step = 2.0 * PI / len as f64;
        Self {
            cos: (0..len).map(|m| (step * m as f64).cos()).collect(),
            sin: (0..len).map(|m| (step * m as f64).sin()).collect(),
        }
    }

    fn len(&self) -> usize {
        self.cos.len()
    }

    /// `sum_n x[n] * exp(-2πi k n / len)` for real input.
    fn project(&self, samples: impl Iterator<Item = f64>, k: i64) -> (f64, f64) {
        let len = self.len();
        let stride = k.rem_euclid(len as i64) as usize;
        let mut index = 0usize;
        let (mut re, mut im) = (0.0, 0.0);
        for x in samples {
            re += x * self.cos[index];
            im -= x * self.sin[index];
            index += stride;
            if index >= len {
                index -= len;
            }
        }
        (re, im)
    }

    fn project_complex(&self, samples: &[(f64, f64)], k: i64) -> (f64, f64) {
        let len = self.len();
        let stride = k.rem_euclid(len as i64) as usize;
        let mut index = 0usize;
        let (mut re, mut im) = (0.0, 0.0);
        for &(a, b) in samples {
            let (c, s) = (self.cos[index], self.sin[index]);
            // (a + ib) * (c - is)
            re += a * c + b * s;
            im += b * c - a * s;
            index += stride;
            if index >= len {
                index -= len;
            }
        }
        (re, im)
    }
}
