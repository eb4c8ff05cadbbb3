//! Explicit rate limiting primitive.
//!
//! A single-resource token bucket (`capacity`, `refill_interval`) that
//! callers construct and pass around explicitly, rather than a bare
//! module-level mutable timestamp.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{DprError, Result};

/// A single-resource token bucket: `capacity` tokens, refilled one at a time
/// every `refill_interval`. Used both for the 3s arXiv search spacing and for
/// the interactive-search endpoint's one-token bucket.
pub struct TokenBucket {
    capacity: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self {
            capacity,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        let refills = (elapsed.as_nanos() / self.refill_interval.as_nanos().max(1)) as u32;
        if refills > 0 {
            state.tokens = (state.tokens + refills).min(self.capacity);
            state.last_refill += self.refill_interval * refills;
        }
    }

    /// Non-blocking attempt: consumes a token if one is available, otherwise
    /// returns `RateLimited` with seconds until the next refill.
    pub fn try_acquire(&self) -> Result<()> {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");
        self.refill(&mut state);
        if state.tokens > 0 {
            state.tokens -= 1;
            Ok(())
        } else {
            let remaining = self.refill_interval.saturating_sub(state.last_refill.elapsed());
            Err(DprError::RateLimited(remaining.as_secs().max(1)))
        }
    }

    /// Blocking (async-sleep) variant used by batch callers such as the
    /// arXiv fetcher, which waits out the spacing rather than failing.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket mutex poisoned");
                self.refill(&mut state);
                if state.tokens > 0 {
                    state.tokens -= 1;
                    None
                } else {
                    Some(self.refill_interval.saturating_sub(state.last_refill.elapsed()))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_reports_rate_limited() {
        let bucket = TokenBucket::new(1, Duration::from_secs(3));
        assert!(bucket.try_acquire().is_ok());
        assert!(matches!(bucket.try_acquire(), Err(DprError::RateLimited(_))));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let bucket = TokenBucket::new(1, Duration::from_millis(50));
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
