//! Read-only client for the Supabase paper mirror: a plain table fetch by
//! publish-date window, plus two optional RPCs for database-side BM25 and
//! vector similarity search.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::config::SupabaseConfig;
use crate::error::{DprError, Result};
use crate::paper::Paper;
use crate::retry;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const PAGE_SIZE: u32 = 1000;
const DEFAULT_MAX_ROWS: u32 = 20_000;

pub struct SupabaseClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    papers_table: String,
    schema: String,
    vector_rpc: String,
    bm25_rpc: String,
}

impl SupabaseClient {
    pub fn from_config(config: &SupabaseConfig) -> Result<Self> {
        if config.url.is_empty() || config.anon_key.is_empty() {
            return Err(DprError::Config("supabase.url and supabase.anon_key are required when supabase.enabled".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.anon_key.clone(),
            papers_table: config.papers_table.clone(),
            schema: config.schema.clone(),
            vector_rpc: config.vector_rpc.clone(),
            bm25_rpc: config.bm25_rpc.clone(),
        })
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("apikey", self.api_key.parse().expect("api key is valid header value"));
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", self.api_key).parse().expect("bearer token is valid header value"),
        );
        headers.insert(reqwest::header::ACCEPT, "application/json".parse().expect("literal header value is valid"));
        if !self.schema.is_empty() {
            headers.insert("Accept-Profile", self.schema.parse().expect("schema is valid header value"));
            headers.insert("Content-Profile", self.schema.parse().expect("schema is valid header value"));
        }
        headers
    }

    /// Paginates `GET /rest/v1/<table>?published=gte.&published=lt.` in
    /// pages of `PAGE_SIZE`, stopping at a short page or `max_rows`.
    pub async fn fetch_papers_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Paper>> {
        if end <= start {
            return Ok(Vec::new());
        }

        let start_iso = start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let end_iso = end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let mut all_rows = Vec::new();
        let mut offset = 0u32;
        let max_rows = DEFAULT_MAX_ROWS;

        loop {
            let page_limit = PAGE_SIZE.min(max_rows - offset.min(max_rows));
            if page_limit == 0 {
                break;
            }
            let endpoint = format!(
                "{}/{}?select=id,title,abstract,authors,primary_category,categories,published,link,source,embedding,embedding_model,embedding_dim&published=gte.{}&published=lt.{}&order=published.desc&limit={}&offset={}",
                self.rest_url(),
                self.papers_table,
                urlencoding::encode(&start_iso),
                urlencoding::encode(&end_iso),
                page_limit,
                offset
            );

            let rows: Vec<SupabaseRow> = retry::with_backoff("supabase_papers_page", || async {
                let response = self.client.get(&endpoint).headers(self.headers()).send().await?;
                if !response.status().is_success() {
                    return Err(DprError::Provider {
                        code: response.status().to_string(),
                        message: "supabase papers query failed".to_string(),
                    });
                }
                response.json::<Vec<SupabaseRow>>().await.map_err(DprError::from)
            })
            .await?;
            let got = rows.len() as u32;
            all_rows.extend(rows);
            offset += got;
            if got < page_limit || offset >= max_rows {
                break;
            }
        }

        Ok(all_rows.into_iter().filter_map(SupabaseRow::into_paper).collect())
    }

    /// Calls the configured vector-similarity RPC and returns `(id, similarity)` pairs.
    pub async fn match_arxiv_papers(&self, query_embedding: &[f32], match_count: u32) -> Result<Vec<(String, f32)>> {
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = format!("{}/rpc/{}", self.rest_url(), self.vector_rpc);
        let payload = json!({
            "query_embedding": query_embedding,
            "match_count": match_count.max(1),
        });
        self.call_match_rpc(&endpoint, payload).await
    }

    /// Calls the configured database-side BM25/FTS RPC and returns `(id, similarity)` pairs.
    pub async fn match_arxiv_papers_bm25(&self, query_text: &str, match_count: u32) -> Result<Vec<(String, f32)>> {
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = format!("{}/rpc/{}", self.rest_url(), self.bm25_rpc);
        let payload = json!({
            "query_text": query_text,
            "match_count": match_count.max(1),
        });
        self.call_match_rpc(&endpoint, payload).await
    }

    async fn call_match_rpc(&self, endpoint: &str, payload: serde_json::Value) -> Result<Vec<(String, f32)>> {
        let rows: Vec<MatchRow> = retry::with_backoff("supabase_rpc", || async {
            let response = self.client.post(endpoint).headers(self.headers()).json(&payload).send().await?;
            if !response.status().is_success() {
                return Err(DprError::Provider {
                    code: response.status().to_string(),
                    message: "supabase rpc call failed".to_string(),
                });
            }
            response.json::<Vec<MatchRow>>().await.map_err(DprError::from)
        })
        .await?;
        Ok(rows.into_iter().map(|r| (r.id, r.similarity)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct MatchRow {
    id: String,
    #[serde(default)]
    similarity: f32,
}

#[derive(Debug, Deserialize)]
struct SupabaseRow {
    id: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(rename = "abstract", default)]
    abstract_text: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    primary_category: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    published: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    embedding: Option<EmbeddingValue>,
}

/// pgvector rows may come back as a JSON array or a `"[0.1,0.2]"` string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingValue {
    Array(Vec<f32>),
    Text(String),
}

impl EmbeddingValue {
    fn into_vec(self) -> Vec<f32> {
        match self {
            EmbeddingValue::Array(v) => v,
            EmbeddingValue::Text(s) => s
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect(),
        }
    }
}

impl SupabaseRow {
    fn into_paper(self) -> Option<Paper> {
        if self.id.is_empty() {
            return None;
        }
        let published: DateTime<Utc> = self.published.parse().ok()?;
        let embedding = self.embedding.map(EmbeddingValue::into_vec).filter(|v| !v.is_empty());
        let embedding_dim = embedding.as_ref().map(|v| v.len());
        Some(Paper {
            id: self.id,
            source: self.source.unwrap_or_else(|| "supabase".to_string()),
            title: self.title,
            abstract_text: self.abstract_text,
            authors: self.authors,
            primary_category: self.primary_category.unwrap_or_default(),
            categories: self.categories,
            published,
            link: self.link,
            embedding,
            embedding_model: None,
            embedding_dim,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_value_parses_text_form() {
        let v = EmbeddingValue::Text("[0.1, 0.2, 0.3]".to_string()).into_vec();
        assert_eq!(v.len(), 3);
        assert!((v[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn embedding_value_parses_array_form() {
        let v = EmbeddingValue::Array(vec![1.0, 2.0]).into_vec();
        assert_eq!(v, vec![1.0, 2.0]);
    }

    #[test]
    fn from_config_rejects_missing_credentials() {
        let config = SupabaseConfig::default();
        assert!(SupabaseClient::from_config(&config).is_err());
    }
}
