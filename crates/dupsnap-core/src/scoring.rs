//! Maps raw distances and metrics onto bounded 1–100 scores and picks the
//! member to keep in a duplicate group.

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 1.0;
    }
    score.clamp(1.0, 100.0)
}

pub fn similarity_score(distance: u32, bit_length: u32) -> f64 {
    if bit_length == 0 {
        return 1.0;
    }
    clamp_score(100.0 - (distance as f64 / bit_length as f64) * 100.0)
}

/// How far a noise value sits above its threshold.
pub fn noise_severity(value: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 100.0;
    }
    clamp_score(100.0 * (value - threshold) / threshold)
}

/// How far a Laplacian variance sits below the blur threshold.
pub fn blur_severity(value: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    clamp_score(100.0 * (1.0 - value / threshold))
}

/// Index of the member with the largest `(pixel_count, file_size)`;
/// the first one wins a tie.
pub fn keep_index<T, F>(members: &[T], key: F) -> Option<usize>
where
    F: Fn(&T) -> (u64, u64),
{
    let mut best: Option<(usize, (u64, u64))> = None;
    for (i, member) in members.iter().enumerate() {
        let candidate = key(member);
        match best {
            Some((_, current)) if candidate <= current => {}
            _ => best = Some((i, candidate)),
        }
    }
    best.map(|(i, _)| i)
}
