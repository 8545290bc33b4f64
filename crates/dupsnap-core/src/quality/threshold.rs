/// Pick the noise cutoff from this run's own distribution.
///
/// Non-positive samples are discarded, the rest sorted ascending, and the
/// value at rank `ceil(n * fraction)` counted from the top is returned. Every
/// sample `>=` the result is noisy, so with distinct samples exactly
/// `min(n, ceil(n * fraction))` get flagged.
pub fn adaptive_noise_threshold(samples: &[f64], fraction: f64) -> Option<f64> {
    let mut positive: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if positive.is_empty() || fraction <= 0.0 {
        return None;
    }
    positive.sort_by(|a, b| a.total_cmp(b));

    let n = positive.len();
    let flagged = ((n as f64) * fraction).ceil() as usize;
    let flagged = flagged.clamp(1, n);
    Some(positive[n - flagged])
}

/// Linearly interpolated percentile (`0..=100`) of the finite samples.
pub fn percentile(samples: &[f64], pct: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64))
}

pub fn is_noisy(value: f64, threshold: f64) -> bool {
    value > 0.0 && value >= threshold
}

pub fn is_blurry(value: f64, threshold: f64) -> bool {
    value < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_ignores_non_positive_samples() {
        let samples = [0.0, -3.0, 2.0, 4.0, 6.0, 8.0];
        // 4 positive samples, ceil(4 * 0.5) = 2 flagged: 6 and 8
        assert_eq!(adaptive_noise_threshold(&samples, 0.5), Some(6.0));
    }

    #[test]
    fn test_threshold_caps_at_all_samples() {
        let samples = [1.0, 2.0, 3.0];
        assert_eq!(adaptive_noise_threshold(&samples, 1.5), Some(1.0));
    }

    #[test]
    fn test_threshold_needs_positive_samples() {
        assert_eq!(adaptive_noise_threshold(&[], 0.3), None);
        assert_eq!(adaptive_noise_threshold(&[0.0, -1.0], 0.3), None);
        assert_eq!(adaptive_noise_threshold(&[1.0], 0.0), None);
    }

    #[test]
    fn test_unsorted_input() {
        let samples = [9.0, 1.0, 5.0, 3.0, 7.0];
        // ceil(5 * 0.3) = 2 flagged: 7 and 9
        assert_eq!(adaptive_noise_threshold(&samples, 0.3), Some(7.0));
    }

    #[test]
    fn test_percentile_interpolates() {
        let samples = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&samples, 0.0), Some(1.0));
        assert_eq!(percentile(&samples, 50.0), Some(3.0));
        assert_eq!(percentile(&samples, 100.0), Some(5.0));
        // rank 0.2 * 4 = 0.8 between 1 and 2
        assert!((percentile(&samples, 20.0).unwrap() - 1.8).abs() < 1e-12);
        assert_eq!(percentile(&[f64::NAN], 50.0), None);
    }

    #[test]
    fn test_blur_compares_directly() {
        assert!(is_blurry(49.9, 50.0));
        assert!(!is_blurry(50.0, 50.0));
        assert!(is_noisy(7.0, 7.0));
        assert!(!is_noisy(0.0, 0.0));
    }
}
