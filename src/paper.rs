//! Canonical paper record shared by every downstream stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single paper as fetched from arXiv or the Supabase mirror.
///
/// Invariant: `id` is unique across a run; `title` and `abstract_text` are
/// non-empty for any paper entering retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Source-scoped identifier, e.g. an arXiv short id without version suffix.
    pub id: String,
    /// Origin of the record, e.g. `"arxiv"`.
    pub source: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub primary_category: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub published: DateTime<Utc>,
    pub link: String,
    /// Pre-computed embedding inherited from the mirror, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dim: Option<usize>,
}

impl Paper {
    /// `source:id`, the key used by the [`SeenSet`](crate::seen_set::SeenSet).
    pub fn seen_key(&self) -> String {
        format!("{}:{}", self.source, self.id)
    }

    /// Text handed to the BM25 tokenizer: `title + "\n" + abstract`.
    pub fn bm25_text(&self) -> String {
        format!("{}\n{}", self.title, self.abstract_text)
    }

    /// Text handed to the embedding encoder: `title + ". " + abstract`.
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.title, self.abstract_text)
    }
}

/// A single entry in a per-query [`RankedList`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntry {
    pub paper_id: String,
    pub score: f32,
    /// 1-based dense rank, tie-broken by `paper_id` ascending.
    pub rank: usize,
}

/// Ordered retrieval output for a single query. Scores are retriever-specific
/// and not comparable across retrievers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RankedList {
    pub entries: Vec<RankedEntry>,
}

impl RankedList {
    /// Sort by score descending, re-assign dense 1-based ranks, tie-break by
    /// `paper_id` ascending.
    pub fn from_scores(mut scored: Vec<(String, f32)>) -> Self {
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let entries = scored
            .into_iter()
            .enumerate()
            .map(|(idx, (paper_id, score))| RankedEntry {
                paper_id,
                score,
                rank: idx + 1,
            })
            .collect();
        RankedList { entries }
    }

    pub fn truncate(mut self, top_k: usize) -> Self {
        self.entries.truncate(top_k);
        self
    }

    pub fn rank_of(&self, paper_id: &str) -> Option<usize> {
        self.entries.iter().find(|e| e.paper_id == paper_id).map(|e| e.rank)
    }
}
