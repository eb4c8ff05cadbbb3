//! Cross-encoder reranking: scores `(query_text, title+abstract)` pairs for
//! the top-M fused candidates of each query, then buckets them into 0–5
//! star ratings local to that query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DprError, Result};
use crate::retrieval::fusion::FusedList;
use crate::retry;

/// A cross-encoder scoring backend: given one query and a batch of document
/// texts, returns one relevance score per document, same order as input.
#[async_trait]
pub trait RerankBackend: Send + Sync {
    async fn score_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Remote rerank provider: `POST /v1/rerank` with `{model, query, documents[], top_n}`.
pub struct RemoteRerankBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl RemoteRerankBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponseItem {
    index: usize,
    #[serde(alias = "relevance_score")]
    score: f32,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResponseItem>,
}

#[async_trait]
impl RerankBackend for RemoteRerankBackend {
    async fn score_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let parsed: RerankResponse = retry::with_backoff("remote_rerank", || async {
            let request = RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n: documents.len(),
            };
            let response = self
                .client
                .post(format!("{}/v1/rerank", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(DprError::Provider {
                    code: response.status().to_string(),
                    message: "rerank service returned an error".to_string(),
                });
            }
            response.json::<RerankResponse>().await.map_err(DprError::from)
        })
        .await?;

        let mut scores = vec![0.0f32; documents.len()];
        for item in parsed.results {
            if let Some(slot) = scores.get_mut(item.index) {
                *slot = item.score;
            }
        }
        Ok(scores)
    }
}

/// How rerank scores are bucketed into star ratings.
#[derive(Debug, Clone)]
pub enum StarStrategy {
    /// Top 10% / next 20% / next 30% / next 30% / bottom 10% of a query's
    /// score distribution get stars 5 / 4 / 3 / 2 / 1, respectively.
    Quantiles,
    /// Fixed cut points on the raw cross-encoder score, descending:
    /// `[star5_min, star4_min, star3_min, star2_min]`; anything below the
    /// last cut gets 1 star.
    FixedThresholds([f32; 4]),
}

impl Default for StarStrategy {
    fn default() -> Self {
        Self::Quantiles
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReRankedEntry {
    pub paper_id: String,
    pub cross_score: f32,
    pub star_rating: u8,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReRankedList {
    pub entries: Vec<ReRankedEntry>,
}

/// Quantile fraction boundaries, cumulative from the top: 10/30/60/90/100%.
const QUANTILE_CUTS: [(f32, u8); 5] = [(0.10, 5), (0.30, 4), (0.60, 3), (0.90, 2), (1.0, 1)];

fn assign_stars_quantiles(count: usize, idx: usize) -> u8 {
    if count == 0 {
        return 0;
    }
    let fraction = (idx + 1) as f32 / count as f32;
    for (cut, star) in QUANTILE_CUTS {
        if fraction <= cut {
            return star;
        }
    }
    1
}

fn assign_stars_fixed(score: f32, thresholds: [f32; 4]) -> u8 {
    if score >= thresholds[0] {
        5
    } else if score >= thresholds[1] {
        4
    } else if score >= thresholds[2] {
        3
    } else if score >= thresholds[3] {
        2
    } else {
        1
    }
}

/// Scores the top-M fused candidates for one query and assigns star ratings.
/// The caller supplies `doc_for` mapping `paper_id -> "Title... Abstract..."`.
pub async fn rerank_query(
    backend: &dyn RerankBackend,
    query_text: &str,
    fused: &FusedList,
    doc_text: impl Fn(&str) -> Option<String>,
    strategy: &StarStrategy,
) -> Result<ReRankedList> {
    let mut paper_ids = Vec::with_capacity(fused.entries.len());
    let mut documents = Vec::with_capacity(fused.entries.len());
    for entry in &fused.entries {
        if let Some(text) = doc_text(&entry.paper_id) {
            paper_ids.push(entry.paper_id.clone());
            documents.push(text);
        }
    }

    if documents.is_empty() {
        return Ok(ReRankedList::default());
    }

    let scores = backend.score_batch(query_text, &documents).await?;

    let mut scored: Vec<(String, f32)> = paper_ids.into_iter().zip(scores).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));

    let count = scored.len();
    let entries = scored
        .into_iter()
        .enumerate()
        .map(|(idx, (paper_id, cross_score))| {
            let star_rating = match strategy {
                StarStrategy::Quantiles => assign_stars_quantiles(count, idx),
                StarStrategy::FixedThresholds(t) => assign_stars_fixed(cross_score, *t),
            };
            ReRankedEntry {
                paper_id,
                cross_score,
                star_rating,
                rank: idx + 1,
            }
        })
        .collect();

    Ok(ReRankedList { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::fusion::FusedEntry;

    struct DescendingBackend;

    #[async_trait]
    impl RerankBackend for DescendingBackend {
        async fn score_batch(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
            // Score is the (100 - index) encoded in the doc text itself, for determinism.
            Ok(documents
                .iter()
                .map(|d| d.parse::<f32>().unwrap_or(0.0))
                .collect())
        }
    }

    fn fused_of(n: usize) -> FusedList {
        FusedList {
            entries: (0..n)
                .map(|i| FusedEntry {
                    paper_id: format!("p{i}"),
                    rrf_score: 1.0 / (i + 1) as f32,
                    rank: i + 1,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn star_assignment_on_100_uniform_scores() {
        let backend = DescendingBackend;
        let fused = fused_of(100);
        let reranked = rerank_query(
            &backend,
            "q",
            &fused,
            |id| {
                let idx: usize = id.trim_start_matches('p').parse().unwrap();
                Some(((99 - idx) as f32 / 100.0).to_string())
            },
            &StarStrategy::Quantiles,
        )
        .await
        .unwrap();

        let counts = |star: u8| reranked.entries.iter().filter(|e| e.star_rating == star).count();
        assert_eq!(counts(5), 10);
        assert_eq!(counts(4), 20);
        assert_eq!(counts(3), 30);
        assert_eq!(counts(2), 30);
        assert_eq!(counts(1), 10);
    }

    #[tokio::test]
    async fn fixed_thresholds_strategy_is_configurable() {
        let backend = DescendingBackend;
        let fused = fused_of(3);
        let reranked = rerank_query(
            &backend,
            "q",
            &fused,
            |id| match id.as_str() {
                "p0" => Some("0.95".to_string()),
                "p1" => Some("0.5".to_string()),
                _ => Some("0.05".to_string()),
            },
            &StarStrategy::FixedThresholds([0.9, 0.6, 0.3, 0.1]),
        )
        .await
        .unwrap();

        let star_of = |id: &str| reranked.entries.iter().find(|e| e.paper_id == id).unwrap().star_rating;
        assert_eq!(star_of("p0"), 5);
        assert_eq!(star_of("p1"), 3);
        assert_eq!(star_of("p2"), 1);
    }

    #[tokio::test]
    async fn missing_documents_are_skipped_not_errored() {
        let backend = DescendingBackend;
        let fused = fused_of(2);
        let reranked = rerank_query(&backend, "q", &fused, |_| None, &StarStrategy::Quantiles)
            .await
            .unwrap();
        assert!(reranked.entries.is_empty());
    }
}
