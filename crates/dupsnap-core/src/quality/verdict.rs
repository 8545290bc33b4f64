use super::threshold::{adaptive_noise_threshold, is_blurry, is_noisy, percentile};
use super::{BlurMethod, NoiseMethod, QualityReading, LOW_TEXTURE_EPSILON};
use crate::config::QualityCheck;
use crate::model::GroupCategory;
use crate::scoring::{blur_severity, noise_severity};
use tracing::info;

/// Which readings a quality check flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub category: GroupCategory,
    pub label: String,
    /// `(index into the readings, severity score)`.
    pub flagged: Vec<(usize, f64)>,
}

/// Apply `check` to one run's readings. Returns `None` when the check is
/// off, nothing can be decided, or nothing is flagged.
pub fn judge(check: &QualityCheck, readings: &[QualityReading]) -> Option<Verdict> {
    let verdict = match *check {
        QualityCheck::Off => return None,
        QualityCheck::Blur { threshold } => {
            if low_texture(readings) {
                return None;
            }
            let flagged = readings
                .iter()
                .enumerate()
                .filter(|(_, r)| is_blurry(r.value, threshold))
                .map(|(i, r)| (i, blur_severity(r.value, threshold)))
                .collect();
            Verdict {
                category: GroupCategory::Blurry,
                label: format!("Blurry images (variance below {:.1})", threshold),
                flagged,
            }
        }
        QualityCheck::RankedBlur { method, percentile: pct } => {
            if low_texture(readings) {
                return None;
            }
            judge_ranked_blur(method, pct, readings)?
        }
        QualityCheck::Noise {
            method,
            sensitivity,
        } => judge_noise(method, sensitivity.noise_fraction(), readings)?,
    };
    if verdict.flagged.is_empty() {
        None
    } else {
        Some(verdict)
    }
}

/// The median intensity variance of a run says there is nothing to
/// judge sharpness on.
fn low_texture(readings: &[QualityReading]) -> bool {
    let textures: Vec<f64> = readings.iter().filter_map(|r| r.texture).collect();
    match percentile(&textures, 50.0) {
        Some(median) if median < LOW_TEXTURE_EPSILON => {
            info!(
                "Median intensity variance {:.4} below {}; skipping blur check",
                median, LOW_TEXTURE_EPSILON
            );
            true
        }
        _ => false,
    }
}

fn judge_ranked_blur(method: BlurMethod, pct: f64, readings: &[QualityReading]) -> Option<Verdict> {
    let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
    let cutoff = percentile(&values, pct)?;
    let aux_cutoff = match method {
        BlurMethod::VarianceHfr => {
            let auxes: Vec<f64> = readings.iter().filter_map(|r| r.aux).collect();
            Some(percentile(&auxes, pct)?)
        }
        _ => None,
    };

    let flagged = readings
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            is_blurry(r.value, cutoff)
                && match aux_cutoff {
                    Some(c) => r.aux.is_some_and(|a| is_blurry(a, c)),
                    None => true,
                }
        })
        .map(|(i, r)| (i, blur_severity(r.value, cutoff)))
        .collect();

    let label = match aux_cutoff {
        Some(c) => format!(
            "Blurry images (variance below {:.1} and hfr below {:.4}, P{:.0})",
            cutoff, c, pct
        ),
        None => format!("Blurry images ({} below {:.4}, P{:.0})", method, cutoff, pct),
    };
    Some(Verdict {
        category: GroupCategory::Blurry,
        label,
        flagged,
    })
}

fn judge_noise(method: NoiseMethod, fraction: f64, readings: &[QualityReading]) -> Option<Verdict> {
    let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
    let cutoff = adaptive_noise_threshold(&values, fraction);
    let aux_cutoff = match method {
        NoiseMethod::FlatBlock => {
            let auxes: Vec<f64> = readings.iter().filter_map(|r| r.aux).collect();
            adaptive_noise_threshold(&auxes, fraction)
        }
        _ => None,
    };
    if cutoff.is_none() && aux_cutoff.is_none() {
        return None;
    }

    let flagged = readings
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let primary = cutoff
                .filter(|&c| is_noisy(r.value, c))
                .map(|c| noise_severity(r.value, c));
            let secondary = match (r.aux, aux_cutoff) {
                (Some(a), Some(c)) if is_noisy(a, c) => Some(noise_severity(a, c)),
                _ => None,
            };
            match (primary, secondary) {
                (None, None) => None,
                (p, s) => Some((i, p.unwrap_or(0.0).max(s.unwrap_or(0.0)))),
            }
        })
        .collect();

    let name = match method {
        NoiseMethod::Laplacian => "std dev",
        other => other.as_str(),
    };
    let label = match (cutoff, aux_cutoff) {
        (Some(c), Some(a)) => format!(
            "Noisy images (var_flat at or above {:.2} or jpeg_block at or above {:.2})",
            c, a
        ),
        (None, Some(a)) => format!("Noisy images (jpeg_block at or above {:.2})", a),
        (Some(c), None) => format!("Noisy images ({} at or above {:.2})", name, c),
        (None, None) => return None,
    };
    Some(Verdict {
        category: GroupCategory::Noisy,
        label,
        flagged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Sensitivity;

    fn reading(value: f64) -> QualityReading {
        QualityReading {
            value,
            aux: None,
            texture: Some(500.0),
        }
    }

    #[test]
    fn test_off_flags_nothing() {
        assert!(judge(&QualityCheck::Off, &[reading(1.0)]).is_none());
    }

    #[test]
    fn test_fixed_blur_threshold() {
        let readings = [reading(20.0), reading(150.0), reading(80.0)];
        let verdict = judge(&QualityCheck::Blur { threshold: 100.0 }, &readings).unwrap();
        let flagged: Vec<usize> = verdict.flagged.iter().map(|(i, _)| *i).collect();
        assert_eq!(flagged, vec![0, 2]);
        assert!((verdict.flagged[0].1 - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_texture_run_skips_blur() {
        let flat = QualityReading {
            value: 0.0,
            aux: None,
            texture: Some(0.2),
        };
        let check = QualityCheck::Blur { threshold: 100.0 };
        assert!(judge(&check, &[flat, flat, reading(10.0)]).is_none());
        assert!(judge(&check, &[flat, reading(10.0), reading(20.0)]).is_some());
    }

    #[test]
    fn test_combined_noise_flags_either_metric() {
        let readings: Vec<QualityReading> = (1..=10)
            .map(|i| QualityReading {
                value: i as f64,
                aux: Some(if i == 1 { 50.0 } else { 1.0 + i as f64 * 0.01 }),
                texture: None,
            })
            .collect();
        let check = QualityCheck::Noise {
            method: NoiseMethod::FlatBlock,
            sensitivity: Sensitivity::Weak,
        };
        let verdict = judge(&check, &readings).unwrap();
        // ceil(10 * 0.1) = 1 per metric: value 10 and the blocky first one.
        let mut flagged: Vec<usize> = verdict.flagged.iter().map(|(i, _)| *i).collect();
        flagged.sort();
        assert_eq!(flagged, vec![0, 9]);
        assert_eq!(verdict.category, GroupCategory::Noisy);
    }
}
