//! Reciprocal Rank Fusion (RRF) for combining BM25 and embedding rank lists.
//!
//! `score(p) = Σ 1 / (k + rank_i(p))`, `k = 60` by default; a paper absent
//! from a retriever simply contributes no term (`rank_i = ∞`).

use std::collections::HashMap;

use crate::paper::RankedList;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FusedEntry {
    pub paper_id: String,
    pub rrf_score: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct FusedList {
    pub entries: Vec<FusedEntry>,
}

/// Unweighted RRF: both retrievers contribute equally.
pub fn rrf_fuse(lists: &[&RankedList], k: usize, top_m: usize) -> FusedList {
    rrf_fuse_weighted(lists, k, top_m, None)
}

/// Weighted RRF: `weights[i]` scales retriever `i`'s contribution; omit for
/// uniform weighting. `weights`, if given, must have the same length as `lists`.
pub fn rrf_fuse_weighted(lists: &[&RankedList], k: usize, top_m: usize, weights: Option<&[f32]>) -> FusedList {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for (i, list) in lists.iter().enumerate() {
        let weight = weights.and_then(|w| w.get(i)).copied().unwrap_or(1.0);
        for entry in &list.entries {
            let contribution = weight / (k + entry.rank) as f32;
            *scores.entry(entry.paper_id.clone()).or_insert(0.0) += contribution;
        }
    }

    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    fused.truncate(top_m);

    let entries = fused
        .into_iter()
        .enumerate()
        .map(|(idx, (paper_id, rrf_score))| FusedEntry {
            paper_id,
            rrf_score,
            rank: idx + 1,
        })
        .collect();

    FusedList { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(pairs: &[(&str, f32)]) -> RankedList {
        RankedList::from_scores(pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect())
    }

    #[test]
    fn single_list_preserves_order() {
        let l = list(&[("doc_a", 1.0), ("doc_b", 0.5)]);
        let fused = rrf_fuse(&[&l], 60, 10);
        assert_eq!(fused.entries.len(), 2);
        assert_eq!(fused.entries[0].paper_id, "doc_a");
        assert_eq!(fused.entries[1].paper_id, "doc_b");
        assert!(fused.entries[0].rrf_score > fused.entries[1].rrf_score);
    }

    #[test]
    fn paper_in_both_lists_is_boosted() {
        let a = list(&[("doc_a", 1.0), ("doc_b", 0.5)]);
        let b = list(&[("doc_b", 1.0), ("doc_c", 0.5)]);
        let fused = rrf_fuse(&[&a, &b], 60, 10);
        assert_eq!(fused.entries[0].paper_id, "doc_b");
    }

    #[test]
    fn limit_truncates_results() {
        let l = list(&[("doc_a", 3.0), ("doc_b", 2.0), ("doc_c", 1.0)]);
        let fused = rrf_fuse(&[&l], 60, 2);
        assert_eq!(fused.entries.len(), 2);
    }

    #[test]
    fn rrf_score_matches_exact_formula() {
        // rank 1 and rank 2 in a single list: 1/(60+1) and 1/(60+2).
        let l = list(&[("doc_a", 2.0), ("doc_b", 1.0)]);
        let fused = rrf_fuse(&[&l], 60, 10);
        let a = fused.entries.iter().find(|e| e.paper_id == "doc_a").unwrap();
        let b = fused.entries.iter().find(|e| e.paper_id == "doc_b").unwrap();
        assert!((a.rrf_score - 1.0 / 61.0).abs() < 1e-6);
        assert!((b.rrf_score - 1.0 / 62.0).abs() < 1e-6);
    }

    #[test]
    fn absent_paper_contributes_zero() {
        let a = list(&[("doc_a", 1.0)]);
        let b = list(&[("doc_b", 1.0)]);
        let fused = rrf_fuse(&[&a, &b], 60, 10);
        // Each paper appears in exactly one list: contribution from the other is zero.
        for e in &fused.entries {
            assert!((e.rrf_score - 1.0 / 61.0).abs() < 1e-6);
        }
    }
}
