//! arXiv Search API client (`export.arxiv.org/api/query`), an Atom feed.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{DprError, Result};
use crate::paper::Paper;
use crate::rate_limit::TokenBucket;
use crate::retry;
use crate::subscription::{PlanQuery, QueryPlan};

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
const MAX_RESULTS: u32 = 200;

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    title: String,
    summary: String,
    published: String,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
    #[serde(rename = "primary_category", default)]
    primary_category: Option<PrimaryCategory>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
}

#[derive(Debug, Deserialize)]
struct PrimaryCategory {
    #[serde(rename = "@term")]
    term: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: String,
}

/// Strips a trailing `vN` version suffix from an arXiv id, e.g.
/// `http://arxiv.org/abs/2501.00001v2` -> `2501.00001`.
fn normalize_arxiv_id(raw_id: &str) -> String {
    let short = raw_id.rsplit('/').next().unwrap_or(raw_id);
    match short.rfind('v') {
        Some(pos) if short[pos + 1..].chars().all(|c| c.is_ascii_digit()) && pos + 1 < short.len() => {
            short[..pos].to_string()
        }
        _ => short.to_string(),
    }
}

fn parse_entry(entry: Entry) -> Option<Paper> {
    let id = normalize_arxiv_id(&entry.id);
    if id.is_empty() {
        return None;
    }
    let published: DateTime<Utc> = entry.published.parse().ok()?;

    let primary_category = entry
        .primary_category
        .map(|p| p.term)
        .or_else(|| entry.categories.first().map(|c| c.term.clone()))
        .unwrap_or_default();

    let link = entry
        .links
        .iter()
        .find(|l| l.rel == "alternate")
        .map(|l| l.href.clone())
        .unwrap_or_else(|| entry.id.clone());

    Some(Paper {
        id,
        source: "arxiv".to_string(),
        title: entry.title.split_whitespace().collect::<Vec<_>>().join(" "),
        abstract_text: entry.summary.split_whitespace().collect::<Vec<_>>().join(" "),
        authors: entry.authors.into_iter().map(|a| a.name).collect(),
        primary_category,
        categories: entry.categories.into_iter().map(|c| c.term).collect(),
        published,
        link,
        embedding: None,
        embedding_model: None,
        embedding_dim: None,
    })
}

/// Issues a single arXiv Search query, sorted by submission date descending.
async fn search(client: &reqwest::Client, search_query: &str) -> Result<Vec<Paper>> {
    let response = client
        .get(ARXIV_API_URL)
        .query(&[
            ("search_query", search_query),
            ("sortBy", "submittedDate"),
            ("sortOrder", "descending"),
            ("max_results", &MAX_RESULTS.to_string()),
        ])
        .send()
        .await?;

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(DprError::RateLimited(5));
    }
    if !response.status().is_success() {
        return Err(DprError::Provider {
            code: response.status().to_string(),
            message: "arXiv Search API error".to_string(),
        });
    }

    let body = response.text().await?;
    let feed: Feed = quick_xml::de::from_str(&body).map_err(|e| DprError::Parse(format!("arXiv feed parse failed: {e}")))?;
    Ok(feed.entries.into_iter().filter_map(parse_entry).collect())
}

fn build_search_query(query: &PlanQuery) -> String {
    let terms: Vec<String> = if !query.query_terms.is_empty() {
        query.query_terms.iter().map(|t| t.text.clone()).collect()
    } else {
        vec![query.query_text.clone()]
    };
    terms
        .iter()
        .map(|t| format!("all:\"{}\"", t.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Runs every BM25-stage query in the plan against arXiv Search, spaced 3s
/// apart by `bucket`, and unions the results keyed by normalized id. A query
/// that errors is logged and skipped, not fatal to the run.
pub async fn fetch_for_plan(
    plan: &QueryPlan,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    bucket: &TokenBucket,
) -> Result<Vec<Paper>> {
    let client = reqwest::Client::builder()
        .user_agent("daily-paper-reader/0.1")
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let mut by_id: HashMap<String, Paper> = HashMap::new();

    for query in &plan.bm25_queries {
        bucket.acquire().await;
        let search_query = build_search_query(query);
        match retry::with_backoff("arxiv_search", || search(&client, &search_query)).await {
            Ok(papers) => {
                for paper in papers {
                    if paper.published >= start && paper.published < end {
                        by_id.entry(paper.id.clone()).or_insert(paper);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(tag = %query.tag, error = %e, "arXiv query failed, skipping");
            }
        }
    }

    Ok(by_id.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_version_suffix() {
        assert_eq!(normalize_arxiv_id("http://arxiv.org/abs/2501.00001v2"), "2501.00001");
        assert_eq!(normalize_arxiv_id("2501.00001"), "2501.00001");
    }

    #[test]
    fn normalize_handles_missing_version() {
        assert_eq!(normalize_arxiv_id("http://arxiv.org/abs/2501.00001"), "2501.00001");
    }

    #[test]
    fn feed_parses_minimal_atom_entry() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2501.00001v1</id>
    <title>  A Paper   About Things </title>
    <summary>An abstract about things.</summary>
    <published>2026-01-01T00:00:00Z</published>
    <author><name>Jane Doe</name></author>
    <category term="cs.LG"/>
    <link href="http://arxiv.org/abs/2501.00001v1" rel="alternate"/>
  </entry>
</feed>"#;
        let feed: Feed = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(feed.entries.len(), 1);
        let paper = parse_entry(feed.entries.into_iter().next().unwrap()).unwrap();
        assert_eq!(paper.id, "2501.00001");
        assert_eq!(paper.title, "A Paper About Things");
        assert_eq!(paper.authors, vec!["Jane Doe".to_string()]);
    }
}
