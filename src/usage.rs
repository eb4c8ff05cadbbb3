//! Explicit, shareable LLM usage accounting.
//!
//! The source project tracked tokens/time with module-level mutable globals.
//! This threads an `Arc`-shared set of atomics through calls instead,
//! generalizing the pattern already used for token counting in this crate's
//! LLM-filter stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A snapshot of accumulated usage.
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    pub calls: u64,
    pub total_time: Duration,
}

#[derive(Debug, Default)]
struct UsageAccumulatorInner {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    reasoning_tokens: AtomicU64,
    total_tokens: AtomicU64,
    calls: AtomicU64,
    total_time_millis: AtomicU64,
}

/// Shared accumulator of LLM token/time usage, passed explicitly to every
/// call site that makes a provider request. Clone is cheap (`Arc` bump).
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator(Arc<UsageAccumulatorInner>);

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call's usage and elapsed wall-clock time.
    pub fn record(&self, prompt_tokens: u64, completion_tokens: u64, reasoning_tokens: u64, elapsed: Duration) {
        let inner = &self.0;
        inner.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        inner.completion_tokens.fetch_add(completion_tokens, Ordering::Relaxed);
        inner.reasoning_tokens.fetch_add(reasoning_tokens, Ordering::Relaxed);
        inner
            .total_tokens
            .fetch_add(prompt_tokens + completion_tokens, Ordering::Relaxed);
        inner.calls.fetch_add(1, Ordering::Relaxed);
        inner
            .total_time_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let inner = &self.0;
        UsageSnapshot {
            prompt_tokens: inner.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: inner.completion_tokens.load(Ordering::Relaxed),
            reasoning_tokens: inner.reasoning_tokens.load(Ordering::Relaxed),
            total_tokens: inner.total_tokens.load(Ordering::Relaxed),
            calls: inner.calls.load(Ordering::Relaxed),
            total_time: Duration::from_millis(inner.total_time_millis.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_clones() {
        let acc = UsageAccumulator::new();
        let acc2 = acc.clone();
        acc.record(10, 5, 0, Duration::from_millis(100));
        acc2.record(20, 15, 2, Duration::from_millis(200));

        let snap = acc.snapshot();
        assert_eq!(snap.prompt_tokens, 30);
        assert_eq!(snap.completion_tokens, 20);
        assert_eq!(snap.reasoning_tokens, 2);
        assert_eq!(snap.total_tokens, 50);
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.total_time, Duration::from_millis(300));
    }
}
