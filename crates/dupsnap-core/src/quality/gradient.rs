use super::laplacian::reflect;
use image::GrayImage;
use rayon::prelude::*;

/// 3x3 Sobel responses `[gx, gy]` per pixel, row-major, with the same
/// mirrored borders as the Laplacian.
pub fn sobel(gray: &GrayImage) -> Vec<[f64; 2]> {
    let (w, h) = gray.dimensions();
    let width = w as usize;
    let height = h as usize;
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let raw = gray.as_raw();
    let at = |x: usize, y: usize| raw[y * width + x] as f64;

    (0..height)
        .into_par_iter()
        .flat_map_iter(|y| {
            let up = reflect(y as isize - 1, height);
            let down = reflect(y as isize + 1, height);
            (0..width).map(move |x| {
                let left = reflect(x as isize - 1, width);
                let right = reflect(x as isize + 1, width);
                let gx = (at(right, up) + 2.0 * at(right, y) + at(right, down))
                    - (at(left, up) + 2.0 * at(left, y) + at(left, down));
                let gy = (at(left, down) + 2.0 * at(x, down) + at(right, down))
                    - (at(left, up) + 2.0 * at(x, up) + at(right, up));
                [gx, gy]
            })
        })
        .collect()
}

pub fn magnitudes(gray: &GrayImage) -> Vec<f64> {
    sobel(gray)
        .into_iter()
        .map(|[gx, gy]| (gx * gx + gy * gy).sqrt())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_flat_image_has_no_gradient() {
        let gray = GrayImage::from_pixel(5, 4, Luma([90]));
        assert!(sobel(&gray).iter().all(|g| *g == [0.0, 0.0]));
    }

    #[test]
    fn test_vertical_edge_is_horizontal_gradient() {
        let gray = GrayImage::from_fn(4, 3, |x, _| Luma([if x < 2 { 0 } else { 100 }]));
        let g = sobel(&gray);
        // Pixel (1, 1): right column 100, left column 0, weights 1-2-1.
        assert_eq!(g[4 + 1], [400.0, 0.0]);
        assert_eq!(g[4], [0.0, 0.0]);
    }
}
