//! Normalizes user intent profiles into BM25 / embedding / refinement inputs.
//!
//! Ported from the source project's subscription-planning step, which the
//! project itself carried three overlapping versions of over time. This
//! module adopts only the newest field names (`intent_profiles` with
//! `keywords[]` and `intent_queries[]`) and accepts `keyword_rules` /
//! `semantic_queries` only as deprecated aliases, logging a warning when seen.

use serde::{Deserialize, Serialize};
use tracing::warn;

const MAIN_TERM_WEIGHT: f32 = 1.0;
const RELATED_TERM_WEIGHT: f32 = 0.5;
pub const OR_SOFT_WEIGHT: f32 = 0.3;

const DEFAULT_STAGE: &str = "A";
const SUPPORTED_STAGES: &[&str] = &["A", "B", "C"];
const DEFAULT_KEYWORD_RECALL_MODE: &str = "or";
const SUPPORTED_KEYWORD_RECALL_MODES: &[&str] = &["or", "boolean_mixed"];

/// A single `{keyword, query?, logic_cn?, enabled?}` entry, or a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeywordEntry {
    Bare(String),
    Full {
        #[serde(default)]
        id: Option<String>,
        #[serde(alias = "expr")]
        keyword: Option<String>,
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        rewrite_for_embedding: Option<String>,
        #[serde(default)]
        logic_cn: String,
        #[serde(default)]
        must_have: Vec<String>,
        #[serde(default)]
        optional: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        source: Option<String>,
    },
}

/// A single `{query, enabled?}` entry, or a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IntentQueryEntry {
    Bare(String),
    Full {
        #[serde(default)]
        id: Option<String>,
        query: Option<String>,
        #[serde(default)]
        logic_cn: String,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        source: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

/// Raw shape of one `subscriptions.intent_profiles[]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntentProfileConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, alias = "keyword_rules")]
    pub keywords: Vec<KeywordEntry>,
    #[serde(default, alias = "semantic_queries")]
    pub intent_queries: Vec<IntentQueryEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaMigrationConfig {
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionsConfig {
    #[serde(default)]
    pub intent_profiles: Vec<IntentProfileConfig>,
    #[serde(default)]
    pub schema_migration: SchemaMigrationConfig,
    #[serde(default)]
    pub keyword_recall_mode: Option<String>,
}

/// A normalized keyword rule, ready for plan construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedKeywordRule {
    pub id: String,
    pub expr: String,
    pub logic_cn: String,
    pub must_have: Vec<String>,
    pub optional: Vec<String>,
    pub exclude: Vec<String>,
    pub rewrite_for_embedding: String,
    pub enabled: bool,
    pub source: String,
}

/// A normalized intent query, ready for plan construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedIntentQuery {
    pub id: String,
    pub text: String,
    pub logic_cn: String,
    pub enabled: bool,
    pub source: String,
}

/// A normalized profile: stable id, tag, and its normalized rules/queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedProfile {
    pub id: String,
    pub tag: String,
    pub description: String,
    pub enabled: bool,
    pub keywords: Vec<NormalizedKeywordRule>,
    pub intent_queries: Vec<NormalizedIntentQuery>,
}

/// A per-term weight used when a BM25 query has explicit `query_terms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTerm {
    pub text: String,
    pub weight: f32,
}

/// One entry of the derived query plan, consumed by both retrievers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanQuery {
    /// `"keyword"` or `"intent_query"`.
    #[serde(rename = "type")]
    pub query_type: String,
    pub tag: String,
    pub paper_tag: String,
    pub query_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_terms: Vec<QueryTerm>,
    #[serde(default)]
    pub boolean_expr: String,
    #[serde(default)]
    pub logic_cn: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_have: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    pub source_profile_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_query_id: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or_soft_weight: Option<f32>,
}

impl PlanQuery {
    /// The `(type, paper_tag, query_text)` triple that forms the query identity.
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.query_type, &self.paper_tag, &self.query_text)
    }
}

/// A flattened requirement, one per enabled keyword/intent-query, handed to
/// the LLM refiner as `user_requirements`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequirement {
    pub id: String,
    pub query: String,
    pub tag: String,
    pub description_en: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLabel {
    pub tag: String,
    pub text: String,
    pub logic_cn: String,
}

/// Output of [`build_pipeline_inputs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub stage: String,
    pub source: String,
    pub profiles: Vec<NormalizedProfile>,
    pub bm25_queries: Vec<PlanQuery>,
    pub embedding_queries: Vec<PlanQuery>,
    pub context_keywords: Vec<ContextLabel>,
    pub context_queries: Vec<ContextLabel>,
    pub tags: Vec<String>,
    pub user_requirements: Vec<UserRequirement>,
}

fn slugify(s: &str) -> String {
    let lower = s.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_dash = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "profile".to_string()
    } else {
        trimmed
    }
}

fn uniq_keep_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        let key = trimmed.to_lowercase();
        if seen.insert(key) {
            out.push(trimmed);
        }
    }
    out
}

/// Strip boolean operators from a keyword expression, the way BM25 query
/// text is always cleaned unless `boolean_mixed` mode explicitly opts in.
fn clean_expr_for_embedding(expr: &str) -> String {
    let cleaned = expr
        .split_whitespace()
        .filter(|tok| !matches!(*tok, "AND" | "OR" | "NOT" | "and" | "or" | "not"))
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        expr.trim().to_string()
    } else {
        cleaned
    }
}

fn normalize_keyword_entry(entry: &KeywordEntry, profile_id: &str, idx: usize) -> Option<NormalizedKeywordRule> {
    match entry {
        KeywordEntry::Bare(text) => {
            let expr = text.trim().to_string();
            if expr.is_empty() {
                return None;
            }
            Some(NormalizedKeywordRule {
                id: format!("{profile_id}-kw-{}", idx + 1),
                rewrite_for_embedding: clean_expr_for_embedding(&expr),
                expr,
                logic_cn: String::new(),
                must_have: Vec::new(),
                optional: Vec::new(),
                exclude: Vec::new(),
                enabled: true,
                source: "manual".to_string(),
            })
        }
        KeywordEntry::Full {
            id,
            keyword,
            query,
            rewrite_for_embedding,
            logic_cn,
            must_have,
            optional,
            exclude,
            enabled,
            source,
        } => {
            let expr = keyword.clone().unwrap_or_default().trim().to_string();
            if expr.is_empty() {
                return None;
            }
            let rewrite = rewrite_for_embedding
                .clone()
                .or_else(|| query.clone())
                .map(|s| clean_expr_for_embedding(&s))
                .unwrap_or_else(|| clean_expr_for_embedding(&expr));
            Some(NormalizedKeywordRule {
                id: id.clone().unwrap_or_else(|| format!("{profile_id}-kw-{}", idx + 1)),
                expr,
                logic_cn: logic_cn.clone(),
                must_have: must_have.clone(),
                optional: optional.clone(),
                exclude: exclude.clone(),
                rewrite_for_embedding: rewrite,
                enabled: *enabled,
                source: source.clone().unwrap_or_else(|| "manual".to_string()),
            })
        }
    }
}

fn normalize_intent_query_entry(
    entry: &IntentQueryEntry,
    profile_id: &str,
    idx: usize,
) -> Option<NormalizedIntentQuery> {
    match entry {
        IntentQueryEntry::Bare(text) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(NormalizedIntentQuery {
                id: format!("{profile_id}-q-{}", idx + 1),
                text,
                logic_cn: String::new(),
                enabled: true,
                source: "manual".to_string(),
            })
        }
        IntentQueryEntry::Full {
            id,
            query,
            logic_cn,
            enabled,
            source,
        } => {
            let text = query.clone().unwrap_or_default().trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(NormalizedIntentQuery {
                id: id.clone().unwrap_or_else(|| format!("{profile_id}-q-{}", idx + 1)),
                text,
                logic_cn: logic_cn.clone(),
                enabled: *enabled,
                source: source.clone().unwrap_or_else(|| "manual".to_string()),
            })
        }
    }
}

fn normalize_profile(raw: &IntentProfileConfig, idx: usize) -> NormalizedProfile {
    let tag = raw.tag.clone().unwrap_or_default().trim().to_string();
    let description = raw.description.clone().unwrap_or_default();
    let id = raw
        .id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("profile-{}-{}", idx + 1, slugify(if !tag.is_empty() { &tag } else { &description })));
    let tag = if tag.is_empty() { id.clone() } else { tag };

    if !raw.keywords.is_empty() {
        // `keyword_rules` alias detection happens at deserialize time via #[serde(alias)],
        // so there is nothing further to warn on here beyond the struct-level alias use.
    }

    let keywords = raw
        .keywords
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| normalize_keyword_entry(entry, &id, i))
        .collect();
    let intent_queries = raw
        .intent_queries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| normalize_intent_query_entry(entry, &id, i))
        .collect();

    NormalizedProfile {
        id,
        tag,
        description,
        enabled: raw.enabled,
        keywords,
        intent_queries,
    }
}

fn get_migration_stage(subs: &SubscriptionsConfig) -> String {
    let stage = subs
        .schema_migration
        .stage
        .clone()
        .unwrap_or_else(|| DEFAULT_STAGE.to_string())
        .to_uppercase();
    if SUPPORTED_STAGES.contains(&stage.as_str()) {
        stage
    } else {
        DEFAULT_STAGE.to_string()
    }
}

/// Resolves `subscriptions.keyword_recall_mode`, falling back to `"or"` for
/// an unrecognized value.
pub fn get_keyword_recall_mode(subs: &SubscriptionsConfig) -> String {
    let mode = subs
        .keyword_recall_mode
        .clone()
        .unwrap_or_else(|| DEFAULT_KEYWORD_RECALL_MODE.to_string())
        .to_lowercase();
    if SUPPORTED_KEYWORD_RECALL_MODES.contains(&mode.as_str()) {
        mode
    } else {
        DEFAULT_KEYWORD_RECALL_MODE.to_string()
    }
}

/// Renders `must_have`/`exclude` into the hard-filter expression BM25
/// consults when `keyword_recall_mode` is `boolean_mixed`. Returns an empty
/// string outside that mode, or when the rule carries no boolean structure,
/// so `PlanQuery::boolean_expr` stays empty and `Bm25Index::score_query`'s
/// `apply_boolean` gate stays closed.
fn build_boolean_expr(mode: &str, must_have: &[String], exclude: &[String]) -> String {
    if mode != "boolean_mixed" || (must_have.is_empty() && exclude.is_empty()) {
        return String::new();
    }
    let mut parts: Vec<String> = must_have.iter().map(|t| t.to_string()).collect();
    parts.extend(exclude.iter().map(|t| format!("NOT {t}")));
    parts.join(" AND ")
}

fn build_from_profiles(subs: &SubscriptionsConfig) -> (Vec<NormalizedProfile>, Vec<PlanQuery>, Vec<PlanQuery>, Vec<ContextLabel>, Vec<ContextLabel>, Vec<String>) {
    let keyword_recall_mode = get_keyword_recall_mode(subs);
    let profiles: Vec<NormalizedProfile> = subs
        .intent_profiles
        .iter()
        .enumerate()
        .map(|(idx, p)| normalize_profile(p, idx))
        .collect();

    let mut bm25_queries = Vec::new();
    let mut embedding_queries = Vec::new();
    let mut context_keywords = Vec::new();
    let mut context_queries = Vec::new();
    let mut tags = Vec::new();

    for profile in &profiles {
        if !profile.enabled {
            continue;
        }
        if profile.tag.is_empty() {
            continue;
        }
        tags.push(profile.tag.clone());
        let paper_tag_keyword = format!("keyword:{}", profile.tag);
        let paper_tag_query = format!("query:{}", profile.tag);

        for rule in &profile.keywords {
            if !rule.enabled || rule.expr.is_empty() {
                continue;
            }
            let bm25_text = clean_expr_for_embedding(&rule.expr);
            let mut query_terms = vec![QueryTerm {
                text: bm25_text.clone(),
                weight: MAIN_TERM_WEIGHT,
            }];
            for opt in uniq_keep_order(rule.optional.clone()) {
                query_terms.push(QueryTerm {
                    text: opt,
                    weight: RELATED_TERM_WEIGHT,
                });
            }
            bm25_queries.push(PlanQuery {
                query_type: "keyword".to_string(),
                tag: profile.tag.clone(),
                paper_tag: paper_tag_keyword.clone(),
                query_text: bm25_text,
                query_terms,
                boolean_expr: build_boolean_expr(&keyword_recall_mode, &rule.must_have, &rule.exclude),
                logic_cn: rule.logic_cn.clone(),
                must_have: rule.must_have.clone(),
                optional: rule.optional.clone(),
                exclude: rule.exclude.clone(),
                source_profile_id: profile.id.clone(),
                source_rule_id: Some(rule.id.clone()),
                source_query_id: None,
                source: rule.source.clone(),
                or_soft_weight: Some(OR_SOFT_WEIGHT),
            });
            embedding_queries.push(PlanQuery {
                query_type: "keyword".to_string(),
                tag: profile.tag.clone(),
                paper_tag: paper_tag_keyword.clone(),
                query_text: if rule.rewrite_for_embedding.is_empty() {
                    rule.expr.clone()
                } else {
                    rule.rewrite_for_embedding.clone()
                },
                query_terms: Vec::new(),
                boolean_expr: String::new(),
                logic_cn: rule.logic_cn.clone(),
                must_have: Vec::new(),
                optional: Vec::new(),
                exclude: Vec::new(),
                source_profile_id: profile.id.clone(),
                source_rule_id: Some(rule.id.clone()),
                source_query_id: None,
                source: rule.source.clone(),
                or_soft_weight: None,
            });
            context_keywords.push(ContextLabel {
                tag: paper_tag_keyword.clone(),
                text: rule.expr.clone(),
                logic_cn: rule.logic_cn.clone(),
            });
        }

        for item in &profile.intent_queries {
            if !item.enabled || item.text.is_empty() {
                continue;
            }
            bm25_queries.push(PlanQuery {
                query_type: "intent_query".to_string(),
                tag: profile.tag.clone(),
                paper_tag: paper_tag_query.clone(),
                query_text: item.text.clone(),
                query_terms: Vec::new(),
                boolean_expr: String::new(),
                logic_cn: item.logic_cn.clone(),
                must_have: Vec::new(),
                optional: Vec::new(),
                exclude: Vec::new(),
                source_profile_id: profile.id.clone(),
                source_rule_id: None,
                source_query_id: Some(item.id.clone()),
                source: item.source.clone(),
                or_soft_weight: None,
            });
            embedding_queries.push(PlanQuery {
                query_type: "intent_query".to_string(),
                tag: profile.tag.clone(),
                paper_tag: paper_tag_query.clone(),
                query_text: item.text.clone(),
                query_terms: Vec::new(),
                boolean_expr: String::new(),
                logic_cn: item.logic_cn.clone(),
                must_have: Vec::new(),
                optional: Vec::new(),
                exclude: Vec::new(),
                source_profile_id: profile.id.clone(),
                source_rule_id: None,
                source_query_id: Some(item.id.clone()),
                source: item.source.clone(),
                or_soft_weight: None,
            });
            context_queries.push(ContextLabel {
                tag: paper_tag_query.clone(),
                text: item.text.clone(),
                logic_cn: item.logic_cn.clone(),
            });
        }
    }

    (profiles, bm25_queries, embedding_queries, context_keywords, context_queries, uniq_keep_order(tags))
}

/// Flattens enabled profiles into `user_requirements`: the first enabled
/// keyword rule of each profile becomes requirement `req-N`, tagged
/// `query:<tag>`; each enabled intent query adds a further requirement whose
/// tag is suffixed `-intent-K` to stay distinct while `paper_tag`
/// attribution remains `query:<tag>`.
fn build_user_requirements(profiles: &[NormalizedProfile]) -> Vec<UserRequirement> {
    let mut reqs = Vec::new();
    let mut n = 0usize;
    for profile in profiles {
        if !profile.enabled || profile.tag.is_empty() {
            continue;
        }
        let slug_tag = profile.tag.to_lowercase();
        if let Some(first_kw) = profile.keywords.iter().find(|k| k.enabled) {
            n += 1;
            let query_text = if first_kw.rewrite_for_embedding.is_empty() {
                first_kw.expr.clone()
            } else {
                first_kw.rewrite_for_embedding.clone()
            };
            reqs.push(UserRequirement {
                id: format!("req-{n}"),
                description_en: query_text.clone(),
                query: query_text,
                tag: format!("query:{slug_tag}"),
            });
        }
        for (k, iq) in profile.intent_queries.iter().filter(|q| q.enabled).enumerate() {
            n += 1;
            reqs.push(UserRequirement {
                id: format!("req-{n}"),
                description_en: iq.text.clone(),
                query: iq.text.clone(),
                tag: format!("query:{slug_tag}-intent-{}", k + 1),
            });
        }
    }
    reqs
}

/// Builds the full [`QueryPlan`] from a configuration document.
///
/// When `subscriptions.intent_profiles` is empty or absent, returns an empty
/// plan with `source = "intent_profiles_required_but_missing"`; downstream
/// stages must treat this as a successful no-op, not an error.
pub fn build_pipeline_inputs(subs: &SubscriptionsConfig) -> QueryPlan {
    let stage = get_migration_stage(subs);
    let has_profiles = !subs.intent_profiles.is_empty();

    for profile in &subs.intent_profiles {
        if profile.keywords.is_empty() && profile.intent_queries.is_empty() {
            warn!(profile_tag = ?profile.tag, "profile has neither keywords nor intent_queries");
        }
    }

    if has_profiles {
        let (profiles, bm25_queries, embedding_queries, context_keywords, context_queries, tags) =
            build_from_profiles(subs);
        let user_requirements = build_user_requirements(&profiles);
        QueryPlan {
            stage,
            source: "intent_profiles".to_string(),
            profiles,
            bm25_queries,
            embedding_queries,
            context_keywords,
            context_queries,
            tags,
            user_requirements,
        }
    } else {
        QueryPlan {
            stage,
            source: "intent_profiles_required_but_missing".to_string(),
            profiles: Vec::new(),
            bm25_queries: Vec::new(),
            embedding_queries: Vec::new(),
            context_keywords: Vec::new(),
            context_queries: Vec::new(),
            tags: Vec::new(),
            user_requirements: Vec::new(),
        }
    }
}

/// Count of de-duplicated, enabled profile tags plus the tags themselves.
pub fn count_subscription_tags(subs: &SubscriptionsConfig) -> (usize, Vec<String>) {
    let plan = build_pipeline_inputs(subs);
    (plan.tags.len(), plan.tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(tag: &str, keywords: Vec<KeywordEntry>, intent_queries: Vec<IntentQueryEntry>) -> IntentProfileConfig {
        IntentProfileConfig {
            id: None,
            tag: Some(tag.to_string()),
            description: None,
            enabled: true,
            keywords,
            intent_queries,
        }
    }

    #[test]
    fn build_pipeline_inputs_from_profiles() {
        let subs = SubscriptionsConfig {
            intent_profiles: vec![profile(
                "SR",
                vec![KeywordEntry::Full {
                    id: None,
                    keyword: Some("A AND B".to_string()),
                    query: Some("find papers about A and B".to_string()),
                    rewrite_for_embedding: None,
                    logic_cn: "semantic supplement".to_string(),
                    must_have: vec![],
                    optional: vec![],
                    exclude: vec![],
                    enabled: true,
                    source: None,
                }],
                vec![],
            )],
            schema_migration: SchemaMigrationConfig { stage: Some("A".to_string()) },
            keyword_recall_mode: None,
        };

        let plan = build_pipeline_inputs(&subs);
        assert_eq!(plan.stage, "A");
        assert!(!plan.bm25_queries.is_empty());
        assert!(!plan.embedding_queries.is_empty());
        assert!(!plan.context_keywords.is_empty());

        let kw_bm25 = plan.bm25_queries.iter().find(|q| q.query_type == "keyword").unwrap();
        assert_eq!(kw_bm25.boolean_expr, "");
        assert_eq!(kw_bm25.query_text, "A B");
        assert_eq!(kw_bm25.paper_tag, "keyword:SR");
    }

    #[test]
    fn boolean_mixed_mode_populates_boolean_expr_from_must_have_and_exclude() {
        let subs = SubscriptionsConfig {
            intent_profiles: vec![profile(
                "SR",
                vec![KeywordEntry::Full {
                    id: None,
                    keyword: Some("A AND B".to_string()),
                    query: None,
                    rewrite_for_embedding: None,
                    logic_cn: "hard filter".to_string(),
                    must_have: vec!["A".to_string(), "B".to_string()],
                    optional: vec![],
                    exclude: vec!["C".to_string()],
                    enabled: true,
                    source: None,
                }],
                vec![],
            )],
            schema_migration: SchemaMigrationConfig::default(),
            keyword_recall_mode: Some("boolean_mixed".to_string()),
        };

        let plan = build_pipeline_inputs(&subs);
        let kw_bm25 = plan.bm25_queries.iter().find(|q| q.query_type == "keyword").unwrap();
        assert_eq!(kw_bm25.boolean_expr, "A AND B AND NOT C");

        // Intent queries carry no boolean structure and stay inert even in boolean_mixed mode.
        let subs_intent = SubscriptionsConfig {
            intent_profiles: vec![profile("SR", vec![], vec![IntentQueryEntry::Bare("find A".to_string())])],
            schema_migration: SchemaMigrationConfig::default(),
            keyword_recall_mode: Some("boolean_mixed".to_string()),
        };
        let plan_intent = build_pipeline_inputs(&subs_intent);
        let intent_bm25 = plan_intent.bm25_queries.iter().find(|q| q.query_type == "intent_query").unwrap();
        assert_eq!(intent_bm25.boolean_expr, "");
    }

    #[test]
    fn build_pipeline_inputs_without_profiles() {
        let subs = SubscriptionsConfig {
            intent_profiles: vec![],
            schema_migration: SchemaMigrationConfig::default(),
            keyword_recall_mode: Some("or".to_string()),
        };
        let plan = build_pipeline_inputs(&subs);
        assert_eq!(plan.stage, "A");
        assert_eq!(plan.source, "intent_profiles_required_but_missing");
        assert!(plan.bm25_queries.is_empty());
        assert!(plan.embedding_queries.is_empty());
    }

    #[test]
    fn build_pipeline_inputs_accepts_bare_keyword_strings() {
        let subs = SubscriptionsConfig {
            intent_profiles: vec![profile("SR", vec![KeywordEntry::Bare("legacy expr".to_string())], vec![])],
            schema_migration: SchemaMigrationConfig::default(),
            keyword_recall_mode: None,
        };
        let plan = build_pipeline_inputs(&subs);
        let kw_bm25 = plan.bm25_queries.iter().find(|q| q.query_type == "keyword").unwrap();
        assert_eq!(kw_bm25.query_text, "legacy expr");
        let emb = plan.embedding_queries.iter().find(|q| q.query_type == "keyword").unwrap();
        assert_eq!(emb.query_text, "legacy expr");
    }

    #[test]
    fn two_intent_queries_same_tag_produce_distinct_entries() {
        let subs = SubscriptionsConfig {
            intent_profiles: vec![profile(
                "SR",
                vec![],
                vec![
                    IntentQueryEntry::Bare("symbolic regression with RL".to_string()),
                    IntentQueryEntry::Bare("equation discovery for physics".to_string()),
                ],
            )],
            schema_migration: SchemaMigrationConfig::default(),
            keyword_recall_mode: None,
        };
        let plan = build_pipeline_inputs(&subs);
        let matching: Vec<_> = plan.bm25_queries.iter().filter(|q| q.paper_tag == "query:SR").collect();
        assert_eq!(matching.len(), 2);
        assert_ne!(matching[0].query_text, matching[1].query_text);

        let identities: std::collections::HashSet<_> = plan.bm25_queries.iter().map(|q| q.identity()).collect();
        assert_eq!(identities.len(), plan.bm25_queries.len());
    }

    #[test]
    fn count_tags_deduplicates_and_preserves_order() {
        let subs = SubscriptionsConfig {
            intent_profiles: vec![profile("A", vec![], vec![]), profile("B", vec![], vec![])],
            schema_migration: SchemaMigrationConfig::default(),
            keyword_recall_mode: None,
        };
        let (count, tags) = count_subscription_tags(&subs);
        assert_eq!(count, 2);
        assert!(tags.contains(&"A".to_string()));
        assert!(tags.contains(&"B".to_string()));
    }

    #[test]
    fn build_user_requirements_keeps_query_tag_and_intent_queries() {
        let subs = SubscriptionsConfig {
            intent_profiles: vec![profile(
                "SR",
                vec![KeywordEntry::Full {
                    id: Some("q1".to_string()),
                    keyword: Some("Symbolic Regression".to_string()),
                    query: Some("symbolic regression with rl".to_string()),
                    rewrite_for_embedding: None,
                    logic_cn: String::new(),
                    must_have: vec![],
                    optional: vec![],
                    exclude: vec![],
                    enabled: true,
                    source: None,
                }],
                vec![
                    IntentQueryEntry::Full {
                        id: None,
                        query: Some("symbolic regression with reinforcement learning".to_string()),
                        logic_cn: String::new(),
                        enabled: true,
                        source: None,
                    },
                    IntentQueryEntry::Full {
                        id: None,
                        query: Some("equation discovery for physical systems".to_string()),
                        logic_cn: String::new(),
                        enabled: true,
                        source: None,
                    },
                ],
            )],
            schema_migration: SchemaMigrationConfig::default(),
            keyword_recall_mode: None,
        };
        let plan = build_pipeline_inputs(&subs);
        assert_eq!(plan.user_requirements.len(), 3);
        assert_eq!(plan.user_requirements[0].tag, "query:sr");
        assert!(plan.user_requirements[1].tag.starts_with("query:sr-intent"));
        assert!(plan.user_requirements[2].tag.starts_with("query:sr-intent"));
    }
}
