//! Write-operation throttling, independent of the read-path limiter.
//!
//! Mutations risk account standing rather than API quota, so the ceilings
//! here are deliberately conservative: hourly and daily caps plus a
//! minimum gap between same-kind operations, tracked per account. Waits
//! sleep in bounded slices so shutdown is never stuck behind a full
//! window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ClientError, Result};

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(60);

/// Kinds of write operations, each with its own ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Tweet,
    Reply,
    Like,
    Retweet,
    Dm,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tweet => "tweet",
            Self::Reply => "reply",
            Self::Like => "like",
            Self::Retweet => "retweet",
            Self::Dm => "dm",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ceilings for one mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindLimits {
    pub per_hour: u32,
    pub per_day: u32,
    pub min_delay: Duration,
}

/// Full limit table. Defaults are conservative enough to keep accounts
/// out of trouble; override per deployment as needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationLimits {
    pub tweets: KindLimits,
    pub replies: KindLimits,
    pub likes: KindLimits,
    pub retweets: KindLimits,
    pub dms: KindLimits,
}

impl Default for MutationLimits {
    fn default() -> Self {
        Self {
            tweets: KindLimits {
                per_hour: 5,
                per_day: 50,
                min_delay: Duration::from_secs(30),
            },
            replies: KindLimits {
                per_hour: 20,
                per_day: 200,
                min_delay: Duration::from_secs(10),
            },
            likes: KindLimits {
                per_hour: 50,
                per_day: 500,
                min_delay: Duration::from_secs(2),
            },
            retweets: KindLimits {
                per_hour: 20,
                per_day: 200,
                min_delay: Duration::from_secs(5),
            },
            dms: KindLimits {
                per_hour: 20,
                per_day: 50,
                min_delay: Duration::from_secs(30),
            },
        }
    }
}

impl MutationLimits {
    pub fn for_kind(&self, kind: MutationKind) -> KindLimits {
        match kind {
            MutationKind::Tweet => self.tweets,
            MutationKind::Reply => self.replies,
            MutationKind::Like => self.likes,
            MutationKind::Retweet => self.retweets,
            MutationKind::Dm => self.dms,
        }
    }
}

struct Counter {
    hourly_count: u32,
    daily_count: u32,
    hour_start: Instant,
    day_start: Instant,
    last_operation: Option<Instant>,
}

impl Counter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            hourly_count: 0,
            daily_count: 0,
            hour_start: now,
            day_start: now,
            last_operation: None,
        }
    }

    fn roll_windows(&mut self) {
        let now = Instant::now();
        if now - self.hour_start >= HOUR {
            self.hourly_count = 0;
            self.hour_start = now;
        }
        if now - self.day_start >= DAY {
            self.daily_count = 0;
            self.day_start = now;
        }
    }

    /// Checks caps in order: hourly, daily, minimum gap. Returns the wait
    /// needed before the next attempt could succeed.
    fn can_proceed(&mut self, limits: KindLimits) -> std::result::Result<(), Duration> {
        self.roll_windows();
        let now = Instant::now();

        if self.hourly_count >= limits.per_hour {
            return Err((self.hour_start + HOUR).saturating_duration_since(now));
        }
        if self.daily_count >= limits.per_day {
            return Err((self.day_start + DAY).saturating_duration_since(now));
        }
        if let Some(last) = self.last_operation {
            let since = now - last;
            if since < limits.min_delay {
                return Err(limits.min_delay - since);
            }
        }
        Ok(())
    }

    fn record(&mut self) {
        self.roll_windows();
        self.hourly_count += 1;
        self.daily_count += 1;
        self.last_operation = Some(Instant::now());
    }
}

/// Remaining capacity snapshot for one `(account, kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRemaining {
    pub hourly_remaining: u32,
    pub hourly_limit: u32,
    pub daily_remaining: u32,
    pub daily_limit: u32,
}

/// Process-wide mutation throttle, shared by every client. Counters are
/// keyed by account so one busy account never consumes another's budget.
pub struct MutationLimiter {
    limits: MutationLimits,
    counters: Mutex<HashMap<(String, MutationKind), Counter>>,
}

impl MutationLimiter {
    pub fn new(limits: MutationLimits) -> Self {
        Self {
            limits,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Permission to perform one mutation, blocking until the caps allow
    /// it. Sleeps are sliced so a shutdown signal is observed promptly.
    pub async fn acquire(&self, account_id: &str, kind: MutationKind) -> Result<()> {
        loop {
            let wait = {
                let mut counters = self.counters.lock().await;
                let counter = counters
                    .entry((account_id.to_string(), kind))
                    .or_insert_with(Counter::new);
                match counter.can_proceed(self.limits.for_kind(kind)) {
                    Ok(()) => {
                        counter.record();
                        tracing::debug!(
                            account_id = %account_id,
                            kind = %kind,
                            hourly = counter.hourly_count,
                            daily = counter.daily_count,
                            "Mutation allowed"
                        );
                        return Ok(());
                    }
                    Err(wait) => wait,
                }
            };
            tracing::info!(
                account_id = %account_id,
                kind = %kind,
                wait_secs = wait.as_secs_f64(),
                "Mutation rate limit, waiting"
            );
            tokio::time::sleep(wait.min(MAX_SLEEP_SLICE)).await;
        }
    }

    /// Non-blocking variant. Fails with the wait time when a cap is hit.
    pub async fn try_acquire(&self, account_id: &str, kind: MutationKind) -> Result<()> {
        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry((account_id.to_string(), kind))
            .or_insert_with(Counter::new);
        match counter.can_proceed(self.limits.for_kind(kind)) {
            Ok(()) => {
                counter.record();
                Ok(())
            }
            Err(wait) => Err(ClientError::RateLimited {
                retry_after_secs: wait.as_secs_f64().ceil() as u64,
            }),
        }
    }

    pub async fn remaining(&self, account_id: &str, kind: MutationKind) -> MutationRemaining {
        let limits = self.limits.for_kind(kind);
        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry((account_id.to_string(), kind))
            .or_insert_with(Counter::new);
        counter.roll_windows();
        MutationRemaining {
            hourly_remaining: limits.per_hour.saturating_sub(counter.hourly_count),
            hourly_limit: limits.per_hour,
            daily_remaining: limits.per_day.saturating_sub(counter.daily_count),
            daily_limit: limits.per_day,
        }
    }
}

impl Default for MutationLimiter {
    fn default() -> Self {
        Self::new(MutationLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_limits() -> MutationLimits {
        MutationLimits {
            tweets: KindLimits {
                per_hour: 2,
                per_day: 3,
                min_delay: Duration::ZERO,
            },
            likes: KindLimits {
                per_hour: 50,
                per_day: 500,
                min_delay: Duration::from_secs(2),
            },
            ..MutationLimits::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hourly_cap_blocks_until_hour_rolls() {
        let limiter = MutationLimiter::new(tight_limits());
        limiter.acquire("acct", MutationKind::Tweet).await.unwrap();
        limiter.acquire("acct", MutationKind::Tweet).await.unwrap();

        let err = limiter
            .try_acquire("acct", MutationKind::Tweet)
            .await
            .unwrap_err();
        match err {
            ClientError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs > 3500 && retry_after_secs <= 3600);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }

        tokio::time::advance(HOUR).await;
        limiter
            .try_acquire("acct", MutationKind::Tweet)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn daily_cap_survives_hourly_reset() {
        let limiter = MutationLimiter::new(tight_limits());
        for _ in 0..2 {
            limiter.acquire("acct", MutationKind::Tweet).await.unwrap();
        }
        tokio::time::advance(HOUR).await;
        limiter.acquire("acct", MutationKind::Tweet).await.unwrap();

        // Three for the day; the hourly window has room but the daily
        // cap does not.
        tokio::time::advance(HOUR).await;
        let err = limiter
            .try_acquire("acct", MutationKind::Tweet)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RateLimited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn min_delay_spaces_same_kind_operations() {
        let limiter = MutationLimiter::new(tight_limits());
        limiter.acquire("acct", MutationKind::Like).await.unwrap();

        let start = Instant::now();
        limiter.acquire("acct", MutationKind::Like).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn accounts_have_independent_budgets() {
        let limiter = MutationLimiter::new(tight_limits());
        limiter.acquire("a", MutationKind::Tweet).await.unwrap();
        limiter.acquire("a", MutationKind::Tweet).await.unwrap();
        assert!(limiter.try_acquire("a", MutationKind::Tweet).await.is_err());
        assert!(limiter.try_acquire("b", MutationKind::Tweet).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_have_independent_budgets() {
        let limiter = MutationLimiter::new(tight_limits());
        limiter.acquire("a", MutationKind::Tweet).await.unwrap();
        limiter.acquire("a", MutationKind::Tweet).await.unwrap();
        assert!(limiter.try_acquire("a", MutationKind::Tweet).await.is_err());
        assert!(limiter.try_acquire("a", MutationKind::Like).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_reflects_recorded_operations() {
        let limiter = MutationLimiter::new(tight_limits());
        limiter.acquire("acct", MutationKind::Tweet).await.unwrap();
        let remaining = limiter.remaining("acct", MutationKind::Tweet).await;
        assert_eq!(remaining.hourly_remaining, 1);
        assert_eq!(remaining.daily_remaining, 2);
        assert_eq!(remaining.hourly_limit, 2);
        assert_eq!(remaining.daily_limit, 3);
    }
}
