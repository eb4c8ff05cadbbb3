//! Run-date token computation and archive path layout.
//!
//! Ported from the source pipeline driver's `resolve_run_date_token` /
//! `resolve_sidebar_date_label`. The two day-count thresholds are
//! intentionally distinct constants (see the design notes in SPEC_FULL.md,
//! open question (a)): one governs the token format, the other governs
//! whether the selector runs in `skims` mode. They must not be collapsed
//! into a single cutoff.

use std::path::PathBuf;

use chrono::{Duration, Utc};

/// Above this many days, the run-date token switches from `YYYYMMDD` to a
/// `YYYYMMDD-YYYYMMDD` range, and a sidebar date-range label is shown.
pub const LONG_RANGE_DAYS_THRESHOLD: i64 = 7;

/// At or above this many days, the selector runs in `skims` mode.
pub const SKIMS_FETCH_DAYS_THRESHOLD: i64 = 11;

/// Builds the `YYYYMMDD-YYYYMMDD` token for a window of `days` ending today (UTC).
pub fn build_run_date_token(days: i64) -> String {
    let safe_days = days.max(1);
    let end_date = Utc::now().date_naive();
    let start_date = end_date - Duration::days(safe_days - 1);
    format!("{}-{}", start_date.format("%Y%m%d"), end_date.format("%Y%m%d"))
}

/// Builds the human-readable `YYYY-MM-DD ~ YYYY-MM-DD` sidebar label.
pub fn build_sidebar_date_label(days: i64) -> String {
    let safe_days = days.max(1);
    let end_date = Utc::now().date_naive();
    let start_date = end_date - Duration::days(safe_days - 1);
    format!("{} ~ {}", start_date.format("%Y-%m-%d"), end_date.format("%Y-%m-%d"))
}

/// Resolves the single-run-date token: a long window (> `LONG_RANGE_DAYS_THRESHOLD`)
/// uses the range token; otherwise a plain `YYYYMMDD` for today.
pub fn resolve_run_date_token(fetch_days: Option<i64>, config_days_window: i64) -> String {
    let days = fetch_days.unwrap_or(config_days_window);
    if days > LONG_RANGE_DAYS_THRESHOLD {
        build_run_date_token(days)
    } else {
        Utc::now().format("%Y%m%d").to_string()
    }
}

/// Resolves the optional sidebar date-range label, shown only in long-window mode.
pub fn resolve_sidebar_date_label(fetch_days: Option<i64>, config_days_window: i64) -> Option<String> {
    let days = fetch_days.unwrap_or(config_days_window);
    if days > LONG_RANGE_DAYS_THRESHOLD {
        Some(build_sidebar_date_label(days))
    } else {
        None
    }
}

/// Whether the selector should run in `skims` mode for this window.
pub fn use_skims_mode(fetch_days: Option<i64>, config_days_window: i64) -> bool {
    let days = fetch_days.unwrap_or(config_days_window);
    days >= SKIMS_FETCH_DAYS_THRESHOLD
}

/// Root directory for a given run-date token: `archive/<token>/`.
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(archive_root: impl Into<PathBuf>, run_date_token: &str) -> Self {
        Self {
            root: archive_root.into().join(run_date_token),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn papers_json(&self) -> PathBuf {
        self.root.join("papers.json")
    }

    /// The normalized query plan, persisted so that later stages — each a
    /// separate process under the driver — can load it without re-reading
    /// and re-normalizing the configuration document.
    pub fn plan_json(&self) -> PathBuf {
        self.root.join("plan.json")
    }

    /// Small per-run metadata (currently just the fetch window actually
    /// used) that the fetch stage records and the selector stage later
    /// reads back to decide standard vs. skims mode.
    pub fn run_meta_json(&self) -> PathBuf {
        self.root.join("run_meta.json")
    }

    pub fn retrieval_bm25(&self, tag: &str) -> PathBuf {
        self.root.join("retrieval").join(format!("bm25_{tag}.json"))
    }

    pub fn retrieval_embedding(&self, tag: &str) -> PathBuf {
        self.root.join("retrieval").join(format!("embedding_{tag}.json"))
    }

    pub fn retrieval_fused(&self, tag: &str) -> PathBuf {
        self.root.join("retrieval").join(format!("fused_{tag}.json"))
    }

    pub fn rank_output(&self, run_date_token: &str) -> PathBuf {
        self.root.join("rank").join(format!("arxiv_papers_{run_date_token}.json"))
    }

    pub fn llm_output(&self, run_date_token: &str) -> PathBuf {
        self.root
            .join("rank")
            .join(format!("arxiv_papers_{run_date_token}.llm.json"))
    }

    pub fn debug_dump(&self, batch_idx: usize) -> PathBuf {
        self.root
            .join("rank")
            .join("debug")
            .join(format!("filter_raw_batch_{batch_idx:03}.txt"))
    }

    pub fn selected(&self, run_date_token: &str) -> PathBuf {
        self.root.join("selected").join(format!("{run_date_token}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_window_uses_single_day_token() {
        assert!(resolve_sidebar_date_label(Some(5), 0).is_none());
        let token = resolve_run_date_token(Some(5), 0);
        assert_eq!(token.len(), 8);
    }

    #[test]
    fn long_window_uses_range_token_and_label() {
        let token = resolve_run_date_token(Some(14), 0);
        assert_eq!(token.len(), 17);
        assert!(token.contains('-'));
        assert!(resolve_sidebar_date_label(Some(14), 0).is_some());
    }

    #[test]
    fn thresholds_are_asymmetric_and_independent() {
        // 8 days: past the long-range threshold (>7) but below skims (>=11).
        assert!(!use_skims_mode(Some(8), 0));
        let token = resolve_run_date_token(Some(8), 0);
        assert!(token.contains('-'));

        // 11 days: both thresholds trip.
        assert!(use_skims_mode(Some(11), 0));
    }

    #[test]
    fn falls_back_to_config_days_window_when_fetch_days_absent() {
        assert!(use_skims_mode(None, 11));
        assert!(!use_skims_mode(None, 10));
    }
}
