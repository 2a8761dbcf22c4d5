//! Adaptive token-bucket rate limiting for the read path.
//!
//! Each endpoint gets its own bucket because the platform scopes quotas
//! per endpoint. Buckets refill lazily and adapt to what the server
//! reports: rate-limit headers overwrite capacity and refill rate, a 429
//! halves capacity, and a streak of successes grows it back. Write
//! operations are governed separately by [`crate::mutation_limit`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ClientError, Result};

/// Fallback wait when the server rejects us without a usable reset or
/// retry-after header. Matches the platform's standard 15 minute window.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(900);

/// Longest single sleep inside `acquire`. Long waits are taken in
/// slices so a header sync or capacity change mid-wait is picked up on
/// the next recheck instead of after the whole window elapses.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(60);

const MIN_CAPACITY: f64 = 5.0;
const MAX_CAPACITY: f64 = 100.0;
const BACKOFF_FACTOR: f64 = 0.5;
const RECOVERY_FACTOR: f64 = 1.1;
const RECOVERY_THRESHOLD: u32 = 10;

/// Rate limit state parsed from response headers. All fields are optional
/// because mutation endpoints frequently omit them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_epoch: Option<i64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        fn parse<T: std::str::FromStr>(
            headers: &reqwest::header::HeaderMap,
            name: &str,
        ) -> Option<T> {
            headers
                .get(name)?
                .to_str()
                .ok()
                .and_then(|v| v.parse().ok())
        }
        Self {
            limit: parse(headers, "x-rate-limit-limit"),
            remaining: parse(headers, "x-rate-limit-remaining"),
            reset_epoch: parse(headers, "x-rate-limit-reset"),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Seconds until the window resets, clamped to zero for stale headers.
    pub fn reset_delay(&self) -> Option<Duration> {
        let reset = self.reset_epoch?;
        let now = chrono::Utc::now().timestamp();
        Some(Duration::from_secs(reset.saturating_sub(now).max(0) as u64))
    }
}

struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    consecutive_successes: u32,
    consecutive_rate_limits: u32,
}

impl Bucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: Instant::now(),
            consecutive_successes: 0,
            consecutive_rate_limits: 0,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn time_until(&self, cost: f64) -> Duration {
        if self.tokens >= cost {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((cost - self.tokens) / self.refill_per_sec)
        }
    }
}

/// Snapshot of one endpoint's bucket, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointStats {
    pub available_tokens: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub consecutive_rate_limits: u32,
}

/// Per-endpoint adaptive limiter. One instance per client; the same
/// credential backs every endpoint the client touches, so the buckets
/// live and adapt together.
pub struct RateLimiter {
    default_capacity: f64,
    default_refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(default_capacity: f64, default_refill_per_sec: f64) -> Self {
        Self {
            default_capacity,
            default_refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_entry<'a>(
        &self,
        buckets: &'a mut HashMap<String, Bucket>,
        endpoint: &str,
    ) -> &'a mut Bucket {
        buckets
            .entry(endpoint.to_string())
            .or_insert_with(|| Bucket::new(self.default_capacity, self.default_refill_per_sec))
    }

    /// Take `cost` tokens from the endpoint's bucket, sleeping until the
    /// bucket refills enough. Sleeps at most [`MAX_SLEEP_SLICE`] at a
    /// time and rechecks the bucket between slices.
    pub async fn acquire(&self, endpoint: &str, cost: f64) -> Result<()> {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = self.bucket_entry(&mut buckets, endpoint);
                if cost > bucket.capacity {
                    return Err(ClientError::Config(format!(
                        "requested cost {cost} exceeds bucket capacity {} for {endpoint}",
                        bucket.capacity
                    )));
                }
                bucket.refill();
                if bucket.tokens >= cost {
                    bucket.tokens -= cost;
                    return Ok(());
                }
                bucket.time_until(cost)
            };
            tracing::debug!(endpoint = %endpoint, wait_secs = wait.as_secs_f64(), "Rate limiter waiting");
            tokio::time::sleep(wait.min(MAX_SLEEP_SLICE)).await;
        }
    }

    /// Take `cost` tokens only if they are available right now.
    pub async fn try_acquire(&self, endpoint: &str, cost: f64) -> Result<bool> {
        let mut buckets = self.buckets.lock().await;
        let bucket = self.bucket_entry(&mut buckets, endpoint);
        if cost > bucket.capacity {
            return Err(ClientError::Config(format!(
                "requested cost {cost} exceeds bucket capacity {} for {endpoint}",
                bucket.capacity
            )));
        }
        bucket.refill();
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub async fn time_until_available(&self, endpoint: &str, cost: f64) -> Duration {
        let mut buckets = self.buckets.lock().await;
        let bucket = self.bucket_entry(&mut buckets, endpoint);
        bucket.refill();
        bucket.time_until(cost)
    }

    /// Record a successful request. Ten in a row grow the bucket.
    pub async fn on_success(&self, endpoint: &str) {
        let mut buckets = self.buckets.lock().await;
        let bucket = self.bucket_entry(&mut buckets, endpoint);
        bucket.consecutive_rate_limits = 0;
        bucket.consecutive_successes += 1;
        if bucket.consecutive_successes >= RECOVERY_THRESHOLD {
            bucket.consecutive_successes = 0;
            let grown = (bucket.capacity * RECOVERY_FACTOR).min(MAX_CAPACITY);
            if grown != bucket.capacity {
                bucket.capacity = grown;
                tracing::debug!(endpoint = %endpoint, capacity = grown, "Rate limit capacity increased");
            }
        }
    }

    /// Record a 429. Capacity halves, floored at the minimum.
    pub async fn on_rate_limit(&self, endpoint: &str, retry_after: Option<Duration>) {
        let mut buckets = self.buckets.lock().await;
        let bucket = self.bucket_entry(&mut buckets, endpoint);
        bucket.consecutive_successes = 0;
        bucket.consecutive_rate_limits += 1;
        bucket.capacity = (bucket.capacity * BACKOFF_FACTOR).max(MIN_CAPACITY);
        bucket.tokens = bucket.tokens.min(bucket.capacity);
        tracing::warn!(
            endpoint = %endpoint,
            capacity = bucket.capacity,
            retry_after_secs = retry_after.map(|d| d.as_secs()),
            streak = bucket.consecutive_rate_limits,
            "Rate limit hit, reducing capacity"
        );
    }

    /// Sync the bucket to what the server reported. With `remaining: 0`
    /// the next `acquire` waits out the window instead of failing.
    pub async fn on_rate_limit_headers(&self, endpoint: &str, headers: &RateLimitHeaders) {
        let mut buckets = self.buckets.lock().await;
        let bucket = self.bucket_entry(&mut buckets, endpoint);
        bucket.refill();
        if let Some(limit) = headers.limit {
            bucket.capacity = (limit as f64).min(MAX_CAPACITY);
        }
        if let Some(remaining) = headers.remaining {
            bucket.tokens = (remaining as f64).min(bucket.capacity);
        }
        if let (Some(limit), Some(delay)) = (headers.limit, headers.reset_delay()) {
            if limit > 0 && !delay.is_zero() {
                bucket.refill_per_sec = limit as f64 / delay.as_secs_f64();
            }
        }
    }

    pub async fn stats(&self) -> HashMap<String, EndpointStats> {
        let mut buckets = self.buckets.lock().await;
        buckets
            .iter_mut()
            .map(|(endpoint, bucket)| {
                bucket.refill();
                (
                    endpoint.clone(),
                    EndpointStats {
                        available_tokens: bucket.tokens,
                        capacity: bucket.capacity,
                        refill_per_sec: bucket.refill_per_sec,
                        consecutive_rate_limits: bucket.consecutive_rate_limits,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(50.0, 1.0)
    }
}
