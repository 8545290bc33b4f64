//! Near-duplicate grouping over perceptual fingerprints.
//!
//! Items are bucketed by a fingerprint prefix and only compared within a
//! bucket. Pairs whose differing bits fall inside the prefix land in
//! different buckets and are never compared; `prefix_len = 0` disables
//! the pre-filter when full recall matters more than speed.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bit length of the fingerprints this crate produces (16 hex chars).
pub const FINGERPRINT_BITS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStrategy {
    /// Single pass: each unvisited item pulls every later close item into
    /// its group. Members need only be close to the pivot, not to each
    /// other, and the result depends on item order.
    #[default]
    Greedy,
    /// Connected components of the "within threshold" graph.
    Transitive,
}

impl FromStr for ClusterStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greedy" => Ok(ClusterStrategy::Greedy),
            "transitive" => Ok(ClusterStrategy::Transitive),
            other => Err(format!(
                "unknown cluster strategy '{}' (expected greedy or transitive)",
                other
            )),
        }
    }
}

impl fmt::Display for ClusterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterStrategy::Greedy => f.write_str("greedy"),
            ClusterStrategy::Transitive => f.write_str("transitive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    pub max_distance: u32,
    /// Bucket key width in hex characters.
    pub prefix_len: usize,
    pub strategy: ClusterStrategy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_distance: 5,
            prefix_len: 4,
            strategy: ClusterStrategy::Greedy,
        }
    }
}

/// Bit distance between two hex fingerprints.
///
/// An empty side never matches and scores `FINGERPRINT_BITS`. Non-hex
/// characters read as `0`; nibbles present on one side only count as
/// four differing bits.
pub fn hamming(a: &str, b: &str) -> u32 {
    if a.is_empty() || b.is_empty() {
        return FINGERPRINT_BITS;
    }
    let mut left = a.chars().map(nibble);
    let mut right = b.chars().map(nibble);
    let mut distance = 0;
    loop {
        match (left.next(), right.next()) {
            (Some(x), Some(y)) => distance += (x ^ y).count_ones(),
            (Some(_), None) | (None, Some(_)) => distance += 4,
            (None, None) => return distance,
        }
    }
}

fn nibble(c: char) -> u8 {
    c.to_digit(16).map(|d| d as u8).unwrap_or(0)
}

/// Group indices of `fingerprints` whose distance is within the cutoff.
///
/// Empty fingerprints are skipped. Only groups of two or more are
/// returned; groups are ordered by their first member and members keep
/// input order.
pub fn cluster(fingerprints: &[&str], config: &ClusterConfig) -> Vec<Vec<usize>> {
    cluster_with_progress(fingerprints, config, |_, _| {})
}

/// Same as [`cluster`], calling `on_bucket(done, total)` after each bucket.
pub fn cluster_with_progress<F>(
    fingerprints: &[&str],
    config: &ClusterConfig,
    mut on_bucket: F,
) -> Vec<Vec<usize>>
where
    F: FnMut(usize, usize),
{
    let buckets = bucket_by_prefix(fingerprints, config.prefix_len);
    let total = buckets.len();
    let mut groups = Vec::new();

    for (done, bucket) in buckets.iter().enumerate() {
        if bucket.len() >= 2 {
            let found = match config.strategy {
                ClusterStrategy::Greedy => greedy(bucket, fingerprints, config.max_distance),
                ClusterStrategy::Transitive => {
                    transitive(bucket, fingerprints, config.max_distance)
                }
            };
            groups.extend(found);
        }
        on_bucket(done + 1, total);
    }

    groups.sort_by_key(|g| g[0]);
    groups
}

/// Buckets in first-seen order.
fn bucket_by_prefix(fingerprints: &[&str], prefix_len: usize) -> Vec<Vec<usize>> {
    let mut index: AHashMap<&str, usize> = AHashMap::new();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (i, &fp) in fingerprints.iter().enumerate() {
        if fp.is_empty() {
            continue;
        }
        let key = fp.get(..prefix_len).unwrap_or(fp);
        let slot = *index.entry(key).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(i);
    }
    buckets
}

fn greedy(bucket: &[usize], fingerprints: &[&str], max_distance: u32) -> Vec<Vec<usize>> {
    let mut visited = vec![false; bucket.len()];
    let mut groups = Vec::new();

    for i in 0..bucket.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let pivot = fingerprints[bucket[i]];
        let mut group = vec![bucket[i]];
        for j in (i + 1)..bucket.len() {
            if visited[j] {
                continue;
            }
            if hamming(pivot, fingerprints[bucket[j]]) <= max_distance {
                visited[j] = true;
                group.push(bucket[j]);
            }
        }
        if group.len() >= 2 {
            groups.push(group);
        }
    }
    groups
}

fn transitive(bucket: &[usize], fingerprints: &[&str], max_distance: u32) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..bucket.len()).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for i in 0..bucket.len() {
        for j in (i + 1)..bucket.len() {
            if hamming(fingerprints[bucket[i]], fingerprints[bucket[j]]) <= max_distance {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    // Lower index stays root so groups come out in input order.
                    let (root, child) = if ri < rj { (ri, rj) } else { (rj, ri) };
                    parent[child] = root;
                }
            }
        }
    }

    let mut components: AHashMap<usize, Vec<usize>> = AHashMap::new();
    let mut order = Vec::new();
    for i in 0..bucket.len() {
        let root = find(&mut parent, i);
        let members = components.entry(root).or_insert_with(|| {
            order.push(root);
            Vec::new()
        });
        members.push(bucket[i]);
    }

    order
        .into_iter()
        .filter_map(|root| components.remove(&root))
        .filter(|members| members.len() >= 2)
        .collect()
}
