//! Paper acquisition: an arXiv Search API client and an optional Supabase
//! mirror read path, unioned and de-duplicated against a [`SeenSet`](crate::seen_set::SeenSet).

pub mod arxiv;
pub mod supabase;

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::error::Result;
use crate::paper::Paper;
use crate::rate_limit::TokenBucket;
use crate::seen_set::SeenSet;
use crate::subscription::QueryPlan;

/// `[start, end)` in UTC for a fetch window of `days` days ending now.
pub fn fetch_window(days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = Utc::now();
    let start = end - Duration::days(days.max(1));
    (start, end)
}

/// Runs the configured source strategy (Supabase mirror if enabled and
/// preferred, arXiv Search otherwise), unions results across every query in
/// the plan, de-duplicates against `seen`, and returns the accepted papers.
/// `seen` is updated in place but not persisted; callers save it explicitly.
pub async fn fetch_papers(
    config: &Config,
    plan: &QueryPlan,
    days: i64,
    seen: &mut SeenSet,
    arxiv_bucket: &TokenBucket,
) -> Result<Vec<Paper>> {
    let (start, end) = fetch_window(days);

    let raw = if config.supabase.read_enabled(config.arxiv_paper_setting.prefer_supabase_read) {
        supabase::SupabaseClient::from_config(&config.supabase)?
            .fetch_papers_by_date_range(start, end)
            .await?
    } else {
        arxiv::fetch_for_plan(plan, start, end, arxiv_bucket).await?
    };

    let mut accepted = Vec::new();
    let mut seen_this_run = std::collections::HashSet::new();
    for paper in raw {
        if paper.published < start || paper.published >= end {
            continue;
        }
        let key = paper.seen_key();
        if seen.contains(&key) || !seen_this_run.insert(key.clone()) {
            continue;
        }
        seen.insert(key);
        accepted.push(paper);
    }

    Ok(accepted)
}
