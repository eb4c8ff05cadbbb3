//! Chat-completions provider abstraction.
//!
//! Every provider this crate talks to (DeepSeek, Siliconflow, CSTCloud,
//! Ollama, and the BLT gateway) speaks the same OpenAI-compatible
//! `/chat/completions` wire format, so one client handles the request
//! shape and each provider only supplies its base URL(s) and rerank
//! support.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::config::LlmEnv;
use crate::error::{DprError, Result};
use crate::retry;

/// Hard ceiling mirrored from the source project's own defensive clamp.
pub const MAX_OUTPUT_TOKENS: u32 = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// `{"type": "json_object"}` or a strict `json_schema` payload.
#[derive(Debug, Clone)]
pub enum ResponseFormat {
    JsonObject,
    JsonSchema { name: String, schema: Value },
}

impl ResponseFormat {
    fn to_json(&self) -> Value {
        match self {
            ResponseFormat::JsonObject => json!({"type": "json_object"}),
            ResponseFormat::JsonSchema { name, schema } => json!({
                "type": "json_schema",
                "json_schema": {"name": name, "schema": schema, "strict": true},
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: ChatUsage,
    pub elapsed: Duration,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        response_format: Option<ResponseFormat>,
        max_tokens: u32,
    ) -> Result<ChatResponse>;

    /// Cross-encoder rerank via `POST /v1/rerank`; only the BLT gateway
    /// supports this in the source project.
    async fn rerank(&self, _query: &str, _documents: &[String], _top_n: Option<usize>) -> Result<Vec<(usize, f32)>> {
        Err(DprError::Config("this provider does not support rerank".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

/// An OpenAI-Chat-Completions-compatible client with failover across a
/// primary base URL and, for providers that have one, a legacy fallback.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    bases: Vec<String>,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, bases: Vec<String>) -> Self {
        let mut deduped = Vec::new();
        for base in bases {
            let trimmed = base.trim().trim_end_matches('/').to_string();
            if !trimmed.is_empty() && !deduped.contains(&trimmed) {
                deduped.push(trimmed);
            }
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            bases: deduped,
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl OpenAiCompatClient {
    async fn chat_once(&self, messages: &[ChatMessage], response_format: &Option<ResponseFormat>, max_tokens: u32) -> Result<ChatResponse> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
            "max_tokens": max_tokens.min(MAX_OUTPUT_TOKENS),
        });
        if let Some(format) = response_format {
            payload["response_format"] = format.to_json();
        }

        let start = Instant::now();
        let mut last_error = None;
        for base in &self.bases {
            let url = format!("{base}/chat/completions");
            match self.client.post(&url).bearer_auth(&self.api_key).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: ChatCompletionResponse = response.json().await?;
                    let content = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
                    let usage = parsed.usage.map(|u| {
                        let reasoning = u.completion_tokens_details.map(|d| d.reasoning_tokens).unwrap_or(0);
                        ChatUsage {
                            prompt_tokens: u.prompt_tokens,
                            completion_tokens: u.completion_tokens.saturating_sub(reasoning),
                            reasoning_tokens: reasoning,
                            total_tokens: u.total_tokens,
                        }
                    }).unwrap_or_default();
                    return Ok(ChatResponse { content, usage, elapsed: start.elapsed() });
                }
                Ok(response) => {
                    let status = response.status();
                    last_error = Some(DprError::Provider {
                        code: status.to_string(),
                        message: format!("chat completions request to {base} failed"),
                    });
                }
                Err(e) => last_error = Some(DprError::from(e)),
            }
        }
        Err(last_error.unwrap_or_else(|| DprError::Config("no base URL configured".to_string())))
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatClient {
    async fn chat(&self, messages: &[ChatMessage], response_format: Option<ResponseFormat>, max_tokens: u32) -> Result<ChatResponse> {
        retry::with_backoff("llm_chat", || self.chat_once(messages, &response_format, max_tokens)).await
    }
}

#[derive(Debug, Deserialize)]
struct RerankApiResponse {
    results: Vec<RerankApiItem>,
}

#[derive(Debug, Deserialize)]
struct RerankApiItem {
    index: usize,
    #[serde(alias = "relevance_score")]
    score: f32,
}

/// The BLT (柏拉图) gateway: a primary base with a legacy fallback, and the
/// only provider in the source project exposing `/v1/rerank`.
pub struct BltClient {
    inner: OpenAiCompatClient,
    rerank_client: reqwest::Client,
    bases: Vec<String>,
    api_key: String,
    model: String,
}

const PRIMARY_BLT_BASE_URL: &str = "https://api.gptbest.vip/v1";
const LEGACY_BLT_BASE_URL: &str = "https://api.bltcy.ai/v1";

impl BltClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, primary_base: Option<String>, legacy_base: Option<String>) -> Self {
        let api_key = api_key.into();
        let model = model.into();
        let primary = primary_base.unwrap_or_else(|| PRIMARY_BLT_BASE_URL.to_string());
        let legacy = legacy_base.unwrap_or_else(|| LEGACY_BLT_BASE_URL.to_string());
        let bases = vec![primary, legacy];
        Self {
            inner: OpenAiCompatClient::new(api_key.clone(), model.clone(), bases.clone()),
            rerank_client: reqwest::Client::builder().timeout(Duration::from_secs(120)).build().unwrap_or_default(),
            bases,
            api_key,
            model,
        }
    }

    async fn rerank_once(&self, query: &str, documents: &[String], top_n: Option<usize>) -> Result<Vec<(usize, f32)>> {
        let mut payload = json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });
        if let Some(n) = top_n {
            payload["top_n"] = json!(n);
        }

        let mut last_error = None;
        for base in &self.bases {
            let url = format!("{base}/rerank");
            match self.rerank_client.post(&url).bearer_auth(&self.api_key).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: RerankApiResponse = response.json().await?;
                    return Ok(parsed.results.into_iter().map(|r| (r.index, r.score)).collect());
                }
                Ok(response) => {
                    last_error = Some(DprError::Provider {
                        code: response.status().to_string(),
                        message: format!("rerank request to {base} failed"),
                    });
                }
                Err(e) => last_error = Some(DprError::from(e)),
            }
        }
        Err(last_error.unwrap_or_else(|| DprError::Config("no base URL configured".to_string())))
    }
}

#[async_trait]
impl ChatProvider for BltClient {
    async fn chat(&self, messages: &[ChatMessage], response_format: Option<ResponseFormat>, max_tokens: u32) -> Result<ChatResponse> {
        self.inner.chat(messages, response_format, max_tokens).await
    }

    async fn rerank(&self, query: &str, documents: &[String], top_n: Option<usize>) -> Result<Vec<(usize, f32)>> {
        if query.is_empty() || documents.is_empty() {
            return Ok(Vec::new());
        }
        retry::with_backoff("blt_rerank", || self.rerank_once(query, documents, top_n)).await
    }
}

/// Resolves a `ChatProvider` from `(provider, model)` plus the environment
/// credentials, matching the source project's provider dispatch rules.
pub fn dispatch(provider: &str, model: &str, env: &LlmEnv) -> Result<Box<dyn ChatProvider>> {
    let api_key = env.api_key.clone();
    match provider.to_lowercase().as_str() {
        "deepseek" => Ok(Box::new(OpenAiCompatClient::new(
            api_key,
            model,
            vec![env.base_url.clone().unwrap_or_else(|| "https://api.deepseek.com".to_string())],
        ))),
        "siliconflow" | "silicon-flow" | "sflow" => Ok(Box::new(OpenAiCompatClient::new(
            api_key,
            model,
            vec![env.base_url.clone().unwrap_or_else(|| "https://api.siliconflow.cn/v1".to_string())],
        ))),
        "ollama" => Ok(Box::new(OpenAiCompatClient::new(
            api_key,
            model,
            vec![env.base_url.clone().unwrap_or_else(|| "http://localhost:11111/v1".to_string())],
        ))),
        "cstcloud" | "cst" | "cst-cloud" => Ok(Box::new(OpenAiCompatClient::new(
            api_key,
            model,
            vec![env.base_url.clone().unwrap_or_else(|| "https://uni-api.cstcloud.cn/v1".to_string())],
        ))),
        "blt" | "bltcy" | "plato" => Ok(Box::new(BltClient::new(
            env.blt_api_key.clone().unwrap_or(api_key),
            model,
            env.base_url.clone(),
            None,
        ))),
        other => Err(DprError::Config(format!(
            "unsupported LLM provider {other:?}; use one of deepseek, siliconflow, blt, cstcloud, ollama"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_dedupes_and_trims_bases() {
        let client = OpenAiCompatClient::new("k", "m", vec!["https://a/ ".to_string(), "https://a/".to_string(), "https://b".to_string()]);
        assert_eq!(client.bases, vec!["https://a".to_string(), "https://b".to_string()]);
    }

    #[test]
    fn dispatch_rejects_unknown_provider() {
        let env = LlmEnv {
            api_key: "k".to_string(),
            model: "x".to_string(),
            base_url: None,
            blt_api_key: None,
            rerank_api_key: None,
        };
        assert!(dispatch("unknownprovider", "model", &env).is_err());
    }

    #[test]
    fn dispatch_accepts_known_providers() {
        let env = LlmEnv {
            api_key: "k".to_string(),
            model: "x".to_string(),
            base_url: None,
            blt_api_key: None,
            rerank_api_key: None,
        };
        assert!(dispatch("deepseek", "deepseek-chat", &env).is_ok());
        assert!(dispatch("blt", "gemini-3-flash-preview-nothinking", &env).is_ok());
    }
}
