//! Daily recommendation selection: top-N by refined score, capped per tag so
//! one profile can't crowd out the rest.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::config::SelectorConfig;
use crate::llm::refiner::LlmScore;
use crate::rerank::ReRankedList;

/// Which shortlist size/cap regime is active for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Standard,
    Skims,
}

impl SelectionMode {
    pub fn from_skims_flag(use_skims: bool) -> Self {
        if use_skims {
            SelectionMode::Skims
        } else {
            SelectionMode::Standard
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectedPaper {
    pub paper_id: String,
    pub score: f32,
    /// Every `paper_tag` whose reranked list placed this paper at or above
    /// the star threshold.
    pub llm_tags: Vec<String>,
    pub matched_requirement_id: Option<String>,
    pub evidence_en: String,
    pub evidence_cn: String,
    pub tldr_en: String,
    pub tldr_cn: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectedList {
    pub mode: SelectionMode,
    pub papers: Vec<SelectedPaper>,
}

struct Candidate<'a> {
    score: &'a LlmScore,
    tags: Vec<String>,
}

fn llm_tags_of(reranked_by_tag: &HashMap<String, ReRankedList>, paper_id: &str, star_threshold: u8) -> Vec<String> {
    let mut tags: Vec<String> = reranked_by_tag
        .iter()
        .filter(|(_, list)| {
            list.entries
                .iter()
                .any(|e| e.paper_id == paper_id && e.star_rating >= star_threshold)
        })
        .map(|(tag, _)| tag.clone())
        .collect();
    tags.sort();
    tags
}

/// When the refiner didn't attribute a requirement, fall back to the
/// `paper_tag` under which this paper earned the highest star rating,
/// breaking ties by lexicographically smallest tag.
fn fallback_requirement(reranked_by_tag: &HashMap<String, ReRankedList>, paper_id: &str, tags: &[String]) -> Option<String> {
    tags.iter()
        .filter_map(|tag| {
            reranked_by_tag
                .get(tag)
                .and_then(|list| list.entries.iter().find(|e| e.paper_id == paper_id))
                .map(|e| (tag.clone(), e.star_rating))
        })
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(tag, _)| tag)
}

/// Selects the daily recommendation set from the refiner's scored papers.
///
/// Two-pass per-tag cap: a first pass fills each tag up to its cap in score
/// order; a second pass fills any remaining slots from the leftovers,
/// uncapped, still in score order. The final list is always emitted in
/// score-descending (id-ascending tie-break) order.
pub fn select(
    refined: &[LlmScore],
    reranked_by_tag: &HashMap<String, ReRankedList>,
    star_threshold: u8,
    mode: SelectionMode,
    config: &SelectorConfig,
) -> SelectedList {
    let (top_n, cap) = match mode {
        SelectionMode::Standard => (config.top_n, config.tag_cap()),
        // "Relaxed cap": large enough that the per-tag cap never binds.
        SelectionMode::Skims => (config.skims_top_n, config.skims_top_n.max(1)),
    };

    let mut by_id: HashMap<&str, &LlmScore> = HashMap::new();
    for score in refined {
        by_id
            .entry(score.paper_id.as_str())
            .and_modify(|existing| {
                if score.score > existing.score {
                    *existing = score;
                }
            })
            .or_insert(score);
    }

    let mut candidates: Vec<&LlmScore> = by_id.into_values().collect();
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.paper_id.cmp(&b.paper_id))
    });

    let enriched: Vec<Candidate> = candidates
        .into_iter()
        .map(|score| Candidate {
            score,
            tags: llm_tags_of(reranked_by_tag, &score.paper_id, star_threshold),
        })
        .collect();

    let mut tag_counts: HashMap<String, usize> = HashMap::new();
    let mut chosen: Vec<bool> = vec![false; enriched.len()];
    let mut deferred: Vec<usize> = Vec::new();
    let mut selected_count = 0usize;

    for (idx, candidate) in enriched.iter().enumerate() {
        if selected_count >= top_n {
            break;
        }
        let blocked = candidate
            .tags
            .iter()
            .any(|tag| tag_counts.get(tag).copied().unwrap_or(0) >= cap);
        if blocked {
            deferred.push(idx);
            continue;
        }
        for tag in &candidate.tags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
        chosen[idx] = true;
        selected_count += 1;
    }

    for idx in deferred {
        if selected_count >= top_n {
            break;
        }
        chosen[idx] = true;
        selected_count += 1;
    }

    let papers = enriched
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| chosen[*idx])
        .map(|(_, candidate)| {
            let matched_requirement_id = candidate
                .score
                .matched_requirement_id
                .clone()
                .or_else(|| fallback_requirement(reranked_by_tag, &candidate.score.paper_id, &candidate.tags));
            SelectedPaper {
                paper_id: candidate.score.paper_id.clone(),
                score: candidate.score.score,
                llm_tags: candidate.tags,
                matched_requirement_id,
                evidence_en: candidate.score.evidence_en.clone(),
                evidence_cn: candidate.score.evidence_cn.clone(),
                tldr_en: candidate.score.tldr_en.clone(),
                tldr_cn: candidate.score.tldr_cn.clone(),
            }
        })
        .collect();

    SelectedList { mode, papers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::ReRankedEntry;

    fn llm_score(id: &str, score: f32) -> LlmScore {
        LlmScore {
            paper_id: id.to_string(),
            score,
            matched_requirement_id: None,
            matched_query_tag: None,
            matched_query_text: None,
            evidence_en: "evidence".to_string(),
            evidence_cn: "证据".to_string(),
            tldr_en: "tldr".to_string(),
            tldr_cn: "摘要".to_string(),
        }
    }

    fn reranked_for(tag: &str, ids: &[&str]) -> (String, ReRankedList) {
        let entries = ids
            .iter()
            .enumerate()
            .map(|(i, id)| ReRankedEntry {
                paper_id: id.to_string(),
                cross_score: 1.0,
                star_rating: 5,
                rank: i + 1,
            })
            .collect();
        (tag.to_string(), ReRankedList { entries })
    }

    #[test]
    fn per_tag_cap_defers_then_backfills_uncapped() {
        let mut refined = Vec::new();
        let a_ids: Vec<String> = (0..20).map(|i| format!("a{i}")).collect();
        for (i, id) in a_ids.iter().enumerate() {
            refined.push(llm_score(id, 9.9 - i as f32 * (2.9 / 19.0)));
        }
        let b_ids = ["b0", "b1", "b2", "b3", "b4"];
        let b_scores = [9.8, 9.7, 9.6, 9.5, 9.4];
        for (id, score) in b_ids.iter().zip(b_scores) {
            refined.push(llm_score(id, score));
        }

        let mut reranked = HashMap::new();
        let (tag, list) = reranked_for("query:a", &a_ids.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        reranked.insert(tag, list);
        let (tag, list) = reranked_for("query:b", &b_ids);
        reranked.insert(tag, list);

        let config = SelectorConfig {
            top_n: 10,
            tag_cap_ratio: 0.4,
            skims_top_n: 50,
        };

        let selected = select(&refined, &reranked, 4, SelectionMode::Standard, &config);
        assert_eq!(selected.papers.len(), 10);

        let a_count = selected.papers.iter().filter(|p| p.paper_id.starts_with('a')).count();
        let b_count = selected.papers.iter().filter(|p| p.paper_id.starts_with('b')).count();
        assert_eq!(a_count, 5);
        assert_eq!(b_count, 5);

        for window in selected.papers.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[test]
    fn skims_mode_uses_relaxed_cap_and_larger_shortlist() {
        let refined: Vec<LlmScore> = (0..30).map(|i| llm_score(&format!("p{i}"), 10.0 - i as f32 * 0.1)).collect();
        let ids: Vec<&str> = refined.iter().map(|s| s.paper_id.as_str()).collect();
        let mut reranked = HashMap::new();
        let (tag, list) = reranked_for("query:only", &ids);
        reranked.insert(tag, list);

        let config = SelectorConfig {
            top_n: 10,
            tag_cap_ratio: 0.4,
            skims_top_n: 25,
        };
        let selected = select(&refined, &reranked, 4, SelectionMode::Skims, &config);
        assert_eq!(selected.papers.len(), 25);
        assert_eq!(selected.mode, SelectionMode::Skims);
    }

    #[test]
    fn fallback_requirement_picks_highest_star_then_lexicographic_tag() {
        let refined = vec![llm_score("p1", 9.0)];
        let mut reranked = HashMap::new();
        reranked.insert(
            "query:b".to_string(),
            ReRankedList {
                entries: vec![ReRankedEntry { paper_id: "p1".to_string(), cross_score: 1.0, star_rating: 5, rank: 1 }],
            },
        );
        reranked.insert(
            "query:a".to_string(),
            ReRankedList {
                entries: vec![ReRankedEntry { paper_id: "p1".to_string(), cross_score: 1.0, star_rating: 5, rank: 1 }],
            },
        );
        let config = SelectorConfig::default();
        let selected = select(&refined, &reranked, 4, SelectionMode::Standard, &config);
        assert_eq!(selected.papers[0].matched_requirement_id.as_deref(), Some("query:a"));
    }
}
