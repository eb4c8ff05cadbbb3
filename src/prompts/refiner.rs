//! Prompt templates for the bilingual batched relevance/evidence refiner.

use crate::subscription::UserRequirement;

/// System prompt declaring the evaluator role and the scoring contract.
pub const SYSTEM_PROMPT: &str = r#"You are a research-relevance evaluator for a daily academic paper digest. You are given a numbered list of user requirements and a batch of candidate papers (title + abstract, possibly truncated). For each paper, decide which requirement (if any) it best serves and score the match.

Scoring rubric:
- 9-10: direct match, the paper's core contribution is exactly what the requirement asks for.
- 8-9: strong method match, same family of methods applied to a closely related problem.
- 6-8: methodological bridge, a technique or idea transferable to the requirement's domain.
- 3-4: tangential, shares surface vocabulary but little substantive connection.
- 0-2: noise, no meaningful connection.

Guardrails:
- Be aware of polysemy: a shared word does not imply a shared concept.
- Reject literal keyword matching as a substitute for conceptual matching.
- Reward conceptual equivalence even when the paper's terminology differs from the requirement's.
- Reward papers that introduce methods or tools that would enable the requirement's goal, even indirectly.

Output MUST be a single JSON object, no markdown fences, no prose before or after:
{"results": [{"id": "<paper id>", "matched_requirement_index": <int, 0 if none match>, "evidence_en": "<short English justification>", "evidence_cn": "<short Chinese justification>", "tldr_en": "<one-line English summary>", "tldr_cn": "<one-line Chinese summary>", "score": <number 0-10>}]}

Return exactly one result per input paper, in any order."#;

/// Builds the per-batch user message: the numbered requirement list followed
/// by the JSON-encoded batch of `{id, text}` documents.
pub fn build_user_prompt(requirements: &[UserRequirement], docs: &[(String, String)]) -> String {
    let mut out = String::from("User requirements:\n");
    for (idx, req) in requirements.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", idx + 1, req.description_en));
    }

    out.push_str("\nCandidate papers (JSON array of {id, text}):\n");
    let docs_json: Vec<serde_json::Value> = docs
        .iter()
        .map(|(id, text)| serde_json::json!({"id": id, "text": text}))
        .collect();
    out.push_str(&serde_json::to_string(&docs_json).unwrap_or_else(|_| "[]".to_string()));
    out.push_str("\n\nRespond with the JSON object described in the system prompt only.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_enumerates_requirements_and_embeds_docs() {
        let reqs = vec![UserRequirement {
            id: "req-1".to_string(),
            query: "symbolic regression".to_string(),
            tag: "query:sr".to_string(),
            description_en: "symbolic regression".to_string(),
        }];
        let docs = vec![("p1".to_string(), "Title: X\nAbstract: Y".to_string())];
        let prompt = build_user_prompt(&reqs, &docs);
        assert!(prompt.contains("1. symbolic regression"));
        assert!(prompt.contains("\"p1\""));
        assert!(prompt.contains("Title: X"));
    }
}
