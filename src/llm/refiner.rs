//! LLMRefiner: batched bilingual relevance scoring and evidence generation
//! over the star-rated candidates surfaced by the reranker.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::archive::ArchiveLayout;
use crate::config::LlmConfig;
use crate::config::MAX_OUTPUT_TOKENS_CEILING;
use crate::error::{DprError, Result};
use crate::llm::provider::{ChatMessage, ChatProvider, ResponseFormat};
use crate::paper::Paper;
use crate::prompts::refiner::{build_user_prompt, SYSTEM_PROMPT};
use crate::rerank::ReRankedList;
use crate::subscription::UserRequirement;
use crate::usage::UsageAccumulator;

const NOT_RELEVANT_EN: &str = "not relevant";
const NOT_RELEVANT_CN: &str = "不相关";

/// One refined paper: the highest-scoring requirement match and bilingual
/// evidence/TLDR, merged across whichever batch produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmScore {
    pub paper_id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_requirement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_query_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_query_text: Option<String>,
    pub evidence_en: String,
    pub evidence_cn: String,
    pub tldr_en: String,
    pub tldr_cn: String,
}

#[derive(Debug, Deserialize)]
struct RawBatchResponse {
    results: Vec<RawLlmResult>,
}

#[derive(Debug, Deserialize)]
struct RawLlmResult {
    id: String,
    #[serde(default)]
    matched_requirement_index: usize,
    #[serde(default)]
    evidence_en: String,
    #[serde(default)]
    evidence_cn: String,
    #[serde(default)]
    tldr_en: String,
    #[serde(default)]
    tldr_cn: String,
    #[serde(default)]
    score: f32,
}

/// Union of every paper whose star rating meets `star_threshold` in at least
/// one query's reranked list, deduplicated by id.
pub fn candidate_union<'a>(
    papers_by_id: &'a HashMap<String, Paper>,
    reranked_by_tag: &HashMap<String, ReRankedList>,
    star_threshold: u8,
) -> Vec<&'a Paper> {
    let mut ids: Vec<&str> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for list in reranked_by_tag.values() {
        for entry in &list.entries {
            if entry.star_rating >= star_threshold && seen.insert(entry.paper_id.as_str()) {
                ids.push(entry.paper_id.as_str());
            }
        }
    }
    ids.into_iter().filter_map(|id| papers_by_id.get(id)).collect()
}

fn serialize_doc(paper: &Paper, max_chars: usize) -> String {
    let mut abstract_text = paper.abstract_text.clone();
    if abstract_text.chars().count() > max_chars {
        abstract_text = abstract_text.chars().take(max_chars).collect::<String>();
        abstract_text.push('\u{2026}');
    }
    format!("Title: {}\nAbstract: {}", paper.title, abstract_text)
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn streaming_first_object(s: &str) -> Option<RawBatchResponse> {
    serde_json::Deserializer::from_str(s)
        .into_iter::<RawBatchResponse>()
        .next()
        .and_then(|r| r.ok())
}

/// Walks the text tracking string/bracket state, closes a truncated string
/// and any still-open brackets in LIFO order, and strips a dangling trailing
/// comma before the first appended closer.
fn suffix_repair(s: &str) -> String {
    let mut in_string = false;
    let mut escape = false;
    let mut stack: Vec<char> = Vec::new();

    for ch in s.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = s.to_string();
    if in_string {
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }

    for closer in stack.into_iter().rev() {
        out.push(closer);
    }
    out
}

fn lenient_decode(raw: &str) -> Result<RawBatchResponse> {
    let stripped = strip_code_fences(raw);
    if let Some(v) = streaming_first_object(stripped) {
        return Ok(v);
    }
    let repaired = suffix_repair(stripped);
    if let Some(v) = streaming_first_object(&repaired) {
        return Ok(v);
    }
    Err(DprError::Parse("could not decode refiner response as JSON".to_string()))
}

fn map_result(raw: RawLlmResult, requirements: &[UserRequirement]) -> LlmScore {
    let requirement = if raw.matched_requirement_index > 0 {
        requirements.get(raw.matched_requirement_index - 1)
    } else {
        None
    };

    let (evidence_en, evidence_cn, tldr_en, tldr_cn) = if raw.score <= 0.0 {
        (
            NOT_RELEVANT_EN.to_string(),
            NOT_RELEVANT_CN.to_string(),
            NOT_RELEVANT_EN.to_string(),
            NOT_RELEVANT_CN.to_string(),
        )
    } else {
        let tldr_en = if raw.tldr_en.trim().is_empty() { raw.evidence_en.clone() } else { raw.tldr_en };
        let tldr_cn = if raw.tldr_cn.trim().is_empty() { raw.evidence_cn.clone() } else { raw.tldr_cn };
        (raw.evidence_en, raw.evidence_cn, tldr_en, tldr_cn)
    };

    LlmScore {
        paper_id: raw.id,
        score: raw.score,
        matched_requirement_id: requirement.map(|r| r.id.clone()),
        matched_query_tag: requirement.map(|r| r.tag.clone()),
        matched_query_text: requirement.map(|r| r.query.clone()),
        evidence_en,
        evidence_cn,
        tldr_en,
        tldr_cn,
    }
}

/// Runs the full refiner stage: shuffles and batches `candidates`, scores
/// each batch concurrently (bounded by `config.filter_concurrency`), and
/// merges results by id keeping the highest score. A batch that fails its
/// request or fails to decode is logged and skipped, not fatal to the stage.
pub async fn refine(
    provider: &dyn ChatProvider,
    mut candidates: Vec<Paper>,
    requirements: &[UserRequirement],
    config: &LlmConfig,
    usage: &UsageAccumulator,
    archive: &ArchiveLayout,
) -> Result<Vec<LlmScore>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    candidates.shuffle(&mut rand::thread_rng());

    let batches: Vec<Vec<Paper>> = candidates
        .chunks(config.batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();

    let semaphore = Arc::new(Semaphore::new(config.filter_concurrency.max(1)));
    let max_tokens = config.max_output_tokens.min(MAX_OUTPUT_TOKENS_CEILING);
    let max_chars = config.max_chars;
    let requirements = requirements.to_vec();

    let batch_results: Vec<Option<Vec<LlmScore>>> = stream::iter(batches.into_iter().enumerate())
        .map(|(batch_idx, batch)| {
            let semaphore = Arc::clone(&semaphore);
            let requirements = requirements.clone();
            let archive = archive;
            async move {
                let _permit = semaphore.acquire().await.ok()?;

                let docs: Vec<(String, String)> =
                    batch.iter().map(|p| (p.id.clone(), serialize_doc(p, max_chars))).collect();
                let user_message = build_user_prompt(&requirements, &docs);
                let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_message)];

                let response = match provider.chat(&messages, Some(ResponseFormat::JsonObject), max_tokens).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(batch_idx, error = %e, "refiner batch request failed, skipping");
                        return None;
                    }
                };

                usage.record(
                    response.usage.prompt_tokens,
                    response.usage.completion_tokens,
                    response.usage.reasoning_tokens,
                    response.elapsed,
                );

                match lenient_decode(&response.content) {
                    Ok(parsed) => {
                        let known_ids: std::collections::HashSet<&str> =
                            batch.iter().map(|p| p.id.as_str()).collect();
                        Some(
                            parsed
                                .results
                                .into_iter()
                                .filter(|r| known_ids.contains(r.id.as_str()))
                                .map(|r| map_result(r, &requirements))
                                .collect(),
                        )
                    }
                    Err(e) => {
                        let dump_path = archive.debug_dump(batch_idx);
                        if let Some(parent) = dump_path.parent() {
                            let _ = std::fs::create_dir_all(parent);
                        }
                        let _ = std::fs::write(&dump_path, &response.content);
                        warn!(
                            batch_idx,
                            error = %e,
                            path = %dump_path.display(),
                            "refiner batch JSON decode failed, raw response dumped, skipping batch"
                        );
                        None
                    }
                }
            }
        })
        .buffer_unordered(config.filter_concurrency.max(1))
        .collect()
        .await;

    let mut merged: HashMap<String, LlmScore> = HashMap::new();
    for scores in batch_results.into_iter().flatten() {
        for score in scores {
            merged
                .entry(score.paper_id.clone())
                .and_modify(|existing| {
                    if score.score > existing.score {
                        *existing = score.clone();
                    }
                })
                .or_insert(score);
        }
    }

    Ok(merged.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"results\":[]}\n```";
        assert_eq!(strip_code_fences(raw), "{\"results\":[]}");
    }

    #[test]
    fn decodes_json_with_trailing_prose() {
        let raw = "{\"results\":[{\"id\":\"p1\",\"matched_requirement_index\":1,\"evidence_en\":\"e\",\"evidence_cn\":\"c\",\"tldr_en\":\"t\",\"tldr_cn\":\"t\",\"score\":8.0}]}\nthanks!";
        let parsed = lenient_decode(raw).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].id, "p1");
    }

    #[test]
    fn suffix_repair_recovers_truncated_string_and_brackets() {
        let raw = r#"{"results":[{"id":"p1","evidence_en":"truncated mid str"#;
        let repaired = suffix_repair(raw);
        let parsed: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert!(parsed["results"][0]["id"] == "p1");
    }

    #[test]
    fn suffix_repair_strips_dangling_trailing_comma() {
        let raw = r#"{"results":[{"id":"p1","score":5},]}"#;
        let repaired = suffix_repair(raw);
        let parsed: Result<RawBatchResponse> = serde_json::from_str(&repaired).map_err(DprError::from);
        assert!(parsed.is_ok());
    }

    #[test]
    fn fallback_evidence_for_zero_score() {
        let raw = RawLlmResult {
            id: "p1".to_string(),
            matched_requirement_index: 0,
            evidence_en: "whatever the model said".to_string(),
            evidence_cn: "无论模型说什么".to_string(),
            tldr_en: String::new(),
            tldr_cn: String::new(),
            score: 0.0,
        };
        let score = map_result(raw, &[]);
        assert_eq!(score.evidence_en, NOT_RELEVANT_EN);
        assert_eq!(score.evidence_cn, NOT_RELEVANT_CN);
        assert_eq!(score.tldr_en, NOT_RELEVANT_EN);
    }

    #[test]
    fn tldr_falls_back_to_evidence_when_empty() {
        let raw = RawLlmResult {
            id: "p1".to_string(),
            matched_requirement_index: 0,
            evidence_en: "strong signal".to_string(),
            evidence_cn: "强信号".to_string(),
            tldr_en: String::new(),
            tldr_cn: String::new(),
            score: 7.0,
        };
        let score = map_result(raw, &[]);
        assert_eq!(score.tldr_en, "strong signal");
        assert_eq!(score.tldr_cn, "强信号");
    }

    #[test]
    fn maps_matched_requirement_index_to_requirement_fields() {
        let requirements = vec![UserRequirement {
            id: "req-1".to_string(),
            query: "symbolic regression".to_string(),
            tag: "query:sr".to_string(),
            description_en: "symbolic regression".to_string(),
        }];
        let raw = RawLlmResult {
            id: "p1".to_string(),
            matched_requirement_index: 1,
            evidence_en: "e".to_string(),
            evidence_cn: "c".to_string(),
            tldr_en: "t".to_string(),
            tldr_cn: "t".to_string(),
            score: 9.0,
        };
        let score = map_result(raw, &requirements);
        assert_eq!(score.matched_requirement_id.as_deref(), Some("req-1"));
        assert_eq!(score.matched_query_tag.as_deref(), Some("query:sr"));
    }
}
