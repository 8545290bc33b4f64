use image::imageops::{self, FilterType};
use image::GrayImage;
use rayon::prelude::*;

/// Mean/variance of the 4-neighbour Laplacian response over a grayscale
/// image, borders mirrored without repeating the edge pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplacianStats {
    pub mean: f64,
    pub variance: f64,
    pub pixels: u64,
}

impl LaplacianStats {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Shrink so the long side is at most `long_side` pixels.
pub fn prepare_gray(gray: GrayImage, long_side: Option<u32>) -> GrayImage {
    let Some(target) = long_side else {
        return gray;
    };
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if target == 0 || longest <= target {
        return gray;
    }
    let scale = target as f64 / longest as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(&gray, new_w, new_h, FilterType::Triangle)
}

/// Returns `None` for an image with no pixels.
pub fn laplacian_stats(gray: &GrayImage) -> Option<LaplacianStats> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let width = w as usize;
    let height = h as usize;
    let raw = gray.as_raw();
    let at = |x: usize, y: usize| raw[y * width + x] as f64;

    let (sum, sum_sq) = (0..height)
        .into_par_iter()
        .map(|y| {
            let up = reflect(y as isize - 1, height);
            let down = reflect(y as isize + 1, height);
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;
            for x in 0..width {
                let left = reflect(x as isize - 1, width);
                let right = reflect(x as isize + 1, width);
                let response = at(x, up) + at(x, down) + at(left, y) + at(right, y)
                    - 4.0 * at(x, y);
                row_sum += response;
                row_sq += response * response;
            }
            (row_sum, row_sq)
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

    let n = (width * height) as f64;
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    Some(LaplacianStats {
        mean,
        variance,
        pixels: (width * height) as u64,
    })
}

pub(crate) fn reflect(i: isize, len: usize) -> usize {
    let n = len as isize;
    if n == 1 {
        return 0;
    }
    let mirrored = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    mirrored.clamp(0, n - 1) as usize
}
