use crate::scanner::MediaKind;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// One file in a result group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultItem {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
    pub perceptual_fingerprint: String,
    /// Raw blur or noise statistic, when measured.
    pub quality_raw: Option<f64>,
    /// 0–100; `None` on the item to keep.
    pub similarity_score: Option<f64>,
    /// 0–100 severity for blurry/noisy members.
    pub quality_score: Option<f64>,
}

impl ResultItem {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCategory {
    ExactDuplicate,
    NearDuplicate,
    Blurry,
    Noisy,
}

impl GroupCategory {
    pub fn is_duplicate(self) -> bool {
        matches!(self, GroupCategory::ExactDuplicate | GroupCategory::NearDuplicate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupCategory::ExactDuplicate => "exact_duplicate",
            GroupCategory::NearDuplicate => "near_duplicate",
            GroupCategory::Blurry => "blurry",
            GroupCategory::Noisy => "noisy",
        }
    }
}

impl fmt::Display for GroupCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built once per scan and not modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultGroup {
    pub category: GroupCategory,
    pub label: String,
    pub members: Vec<ResultItem>,
    /// Highest member score.
    pub group_score: Option<f64>,
}

impl ResultGroup {
    pub(crate) fn new(category: GroupCategory, label: String, members: Vec<ResultItem>) -> Self {
        let group_score = members
            .iter()
            .filter_map(|m| match category {
                GroupCategory::ExactDuplicate | GroupCategory::NearDuplicate => {
                    m.similarity_score
                }
                GroupCategory::Blurry | GroupCategory::Noisy => m.quality_score,
            })
            .reduce(f64::max);
        Self {
            category,
            label,
            members,
            group_score,
        }
    }

    /// The recommended survivor of a duplicate group.
    pub fn keep(&self) -> Option<&ResultItem> {
        if !self.category.is_duplicate() {
            return None;
        }
        self.members.iter().find(|m| m.similarity_score.is_none())
    }

    /// Members suggested for removal, with their score.
    pub fn candidates(&self) -> impl Iterator<Item = &ResultItem> {
        let category = self.category;
        self.members.iter().filter(move |m| match category {
            GroupCategory::ExactDuplicate | GroupCategory::NearDuplicate => {
                m.similarity_score.is_some()
            }
            GroupCategory::Blurry | GroupCategory::Noisy => true,
        })
    }

    /// Bytes freed by removing every candidate.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.candidates().map(|m| m.size).sum()
    }
}
