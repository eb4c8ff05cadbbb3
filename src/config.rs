//! Layered configuration: a `config.yaml` document overlaid by environment
//! variables (via `.env` through `dotenvy`) overlaid by explicit CLI flags.

use serde::Deserialize;
use std::path::Path;

use crate::error::{DprError, Result};
use crate::subscription::SubscriptionsConfig;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArxivPaperSetting {
    #[serde(default)]
    pub days_window: i64,
    #[serde(default)]
    pub prefer_supabase_read: bool,
}

impl Default for ArxivPaperSetting {
    fn default() -> Self {
        Self {
            days_window: 1,
            prefer_supabase_read: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_papers_table")]
    pub papers_table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_vector_rpc")]
    pub vector_rpc: String,
    #[serde(default = "default_bm25_rpc")]
    pub bm25_rpc: String,
    #[serde(default)]
    pub use_vector_rpc: bool,
    #[serde(default)]
    pub use_bm25_rpc: bool,
}

fn default_papers_table() -> String {
    "arxiv_papers".to_string()
}
fn default_schema() -> String {
    "public".to_string()
}
fn default_vector_rpc() -> String {
    "match_arxiv_papers".to_string()
}
fn default_bm25_rpc() -> String {
    "match_arxiv_papers_bm25".to_string()
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            anon_key: String::new(),
            papers_table: default_papers_table(),
            schema: default_schema(),
            vector_rpc: default_vector_rpc(),
            bm25_rpc: default_bm25_rpc(),
            use_vector_rpc: false,
            use_bm25_rpc: false,
        }
    }
}

impl SupabaseConfig {
    /// Whether the Supabase read path should be used: the mirror is both
    /// enabled in config and preferred by the arXiv setting.
    pub fn read_enabled(&self, prefer_supabase_read: bool) -> bool {
        self.enabled && prefer_supabase_read
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CrawlerConfig {
    #[serde(default)]
    pub docs_dir: Option<String>,
    #[serde(default)]
    pub days_window: Option<i64>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub bm25_top_k: usize,
    #[serde(default = "default_top_k")]
    pub embedding_top_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    #[serde(default = "default_rrf_top_m")]
    pub rrf_top_m: usize,
}

fn default_top_k() -> usize {
    200
}
fn default_rrf_k() -> usize {
    60
}
fn default_rrf_top_m() -> usize {
    100
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_top_k: default_top_k(),
            embedding_top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            rrf_top_m: default_rrf_top_m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankConfig {
    #[serde(default = "default_star_threshold")]
    pub star_threshold: u8,
    /// `"quantiles"` (default) or `"fixed_thresholds"`; see `fixed_thresholds` below.
    #[serde(default = "default_quantile_strategy")]
    pub quantile_strategy: String,
    /// Descending `[star5_min, star4_min, star3_min, star2_min]` cut points on
    /// the raw cross-encoder score, used only when `quantile_strategy =
    /// "fixed_thresholds"`.
    #[serde(default)]
    pub fixed_thresholds: Option<[f32; 4]>,
    /// Base URL of a standalone `/v1/rerank` service. When unset, the driver
    /// falls back to the dispatched chat provider's own `rerank()` (only the
    /// BLT gateway implements it).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_star_threshold() -> u8 {
    4
}
fn default_quantile_strategy() -> String {
    "quantiles".to_string()
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            star_threshold: default_star_threshold(),
            quantile_strategy: default_quantile_strategy(),
            fixed_thresholds: None,
            base_url: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub filter_model: Option<String>,
    #[serde(default = "default_filter_concurrency")]
    pub filter_concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_filter_concurrency() -> usize {
    8
}
fn default_batch_size() -> usize {
    10
}
fn default_max_chars() -> usize {
    850
}
fn default_max_output_tokens() -> u32 {
    4096
}

/// Hard ceiling enforced on `max_output_tokens` regardless of configured value.
pub const MAX_OUTPUT_TOKENS_CEILING: u32 = 10_000;

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            filter_model: None,
            filter_concurrency: default_filter_concurrency(),
            batch_size: default_batch_size(),
            max_chars: default_max_chars(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_selector_top_n")]
    pub top_n: usize,
    #[serde(default = "default_tag_cap_ratio")]
    pub tag_cap_ratio: f32,
    #[serde(default = "default_skims_top_n")]
    pub skims_top_n: usize,
}

fn default_selector_top_n() -> usize {
    10
}
fn default_tag_cap_ratio() -> f32 {
    0.4
}
fn default_skims_top_n() -> usize {
    50
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            top_n: default_selector_top_n(),
            tag_cap_ratio: default_tag_cap_ratio(),
            skims_top_n: default_skims_top_n(),
        }
    }
}

impl SelectorConfig {
    /// `ceil(top_n * tag_cap_ratio)`, at least 1.
    pub fn tag_cap(&self) -> usize {
        ((self.top_n as f32 * self.tag_cap_ratio).ceil() as usize).max(1)
    }
}

/// Root configuration document, parsed from `config.yaml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub arxiv_paper_setting: ArxivPaperSetting,
    #[serde(default)]
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
}

impl Config {
    /// Loads `config.yaml` from `path`, tolerating a missing file by
    /// returning the all-defaults configuration (mirrors the source
    /// project's `load_arxiv_paper_setting`, which treats a missing or
    /// unreadable file as empty rather than an error).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(DprError::from)
    }
}

/// Environment-sourced LLM credentials, loaded after `.env` (via `dotenvy`)
/// has been applied.
#[derive(Debug, Clone)]
pub struct LlmEnv {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub blt_api_key: Option<String>,
    pub rerank_api_key: Option<String>,
}

impl LlmEnv {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| DprError::Config("LLM_API_KEY is required".to_string()))?;
        let model = std::env::var("LLM_MODEL")
            .map_err(|_| DprError::Config("LLM_MODEL is required (provider/model)".to_string()))?;
        Ok(Self {
            api_key,
            model,
            base_url: std::env::var("LLM_BASE_URL").ok(),
            blt_api_key: std::env::var("BLT_API_KEY").ok(),
            rerank_api_key: std::env::var("RERANK_API_KEY").ok(),
        })
    }

    /// Splits `LLM_MODEL` into its `provider` and `model` halves on the first `/`.
    pub fn provider_model(&self) -> Result<(String, String)> {
        parse_provider_model(&self.model)
    }
}

/// Splits a `"provider/model"` string on the first `/`.
pub fn parse_provider_model(spec: &str) -> Result<(String, String)> {
    match spec.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider.to_string(), model.to_string()))
        }
        _ => Err(DprError::Config(format!(
            "LLM_MODEL must be of the form provider/model, got {spec:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/config.yaml").unwrap();
        assert_eq!(cfg.arxiv_paper_setting.days_window, 1);
        assert!(cfg.subscriptions.intent_profiles.is_empty());
    }

    #[test]
    fn parse_provider_model_splits_on_first_slash() {
        let (provider, model) = parse_provider_model("deepseek/deepseek-chat").unwrap();
        assert_eq!(provider, "deepseek");
        assert_eq!(model, "deepseek-chat");
    }

    #[test]
    fn parse_provider_model_rejects_missing_slash() {
        assert!(parse_provider_model("deepseek-chat").is_err());
    }

    #[test]
    fn tag_cap_rounds_up() {
        let selector = SelectorConfig {
            top_n: 10,
            tag_cap_ratio: 0.4,
            skims_top_n: 50,
        };
        assert_eq!(selector.tag_cap(), 4);
    }
}
