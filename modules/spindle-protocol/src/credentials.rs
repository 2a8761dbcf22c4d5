//! Credential rotation with health and rate-limit tracking.
//!
//! A credential is one logical account. The pool owns all per-credential
//! mutable state; callers only ever see cloned [`Credential`]s and report
//! outcomes back through the mark methods. Selection and mark-used happen
//! under one lock so two callers can never pick the same about-to-recover
//! entry when alternatives exist.

use std::time::Duration;

use spindle_common::Credential;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ClientError, Result};

/// Credentials with this many consecutive errors are treated as invalid
/// until the operator replaces them.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Default rate-limit window when the server gives no retry-after.
const DEFAULT_RATE_LIMIT_SECS: u64 = 900;

struct CredentialState {
    credential: Credential,
    is_valid: bool,
    rate_limited_until: Option<Instant>,
    request_count: u64,
    error_count: u64,
    consecutive_errors: u32,
    last_used: Option<Instant>,
}

impl CredentialState {
    fn new(credential: Credential) -> Self {
        Self {
            credential,
            is_valid: true,
            rate_limited_until: None,
            request_count: 0,
            error_count: 0,
            consecutive_errors: 0,
            last_used: None,
        }
    }

    /// Availability check that also self-heals expired rate-limit windows.
    fn is_available(&mut self, now: Instant) -> bool {
        if !self.is_valid || self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            return false;
        }
        if let Some(until) = self.rate_limited_until {
            if now < until {
                return false;
            }
            self.rate_limited_until = None;
            tracing::info!(credential_id = %self.credential.id, "Credential rate limit window elapsed");
        }
        true
    }

    fn time_until_available(&self, now: Instant) -> Option<Duration> {
        if !self.is_valid {
            return None;
        }
        match self.rate_limited_until {
            Some(until) if now < until => Some(until - now),
            _ => Some(Duration::ZERO),
        }
    }
}

/// Aggregate pool counters, for observability endpoints and boot logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CredentialPoolStats {
    pub total: usize,
    pub valid: usize,
    pub available: usize,
    pub rate_limited: usize,
    pub total_requests: u64,
    pub total_errors: u64,
}

struct Inner {
    states: Vec<CredentialState>,
    cursor: usize,
}

/// Round-robin credential pool. `get` wraps the pool exactly once before
/// declaring exhaustion; `get_batch` hands out least-recently-used entries
/// for fan-out work.
pub struct CredentialPool {
    inner: Mutex<Inner>,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        let states = credentials.into_iter().map(CredentialState::new).collect();
        Self {
            inner: Mutex::new(Inner { states, cursor: 0 }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.states.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.states.is_empty()
    }

    pub async fn available_count(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner
            .states
            .iter_mut()
            .map(|s| s.is_available(now))
            .filter(|&available| available)
            .count()
    }

    /// Next available credential, round robin. Errors distinguish "every
    /// credential is dead" from "every credential is waiting out a rate
    /// limit" so callers can decide whether waiting helps.
    pub async fn get(&self) -> Result<Credential> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        if inner.states.is_empty() {
            return Err(ClientError::authentication("no credentials configured"));
        }

        let n = inner.states.len();
        let start = inner.cursor;
        for i in 0..n {
            let idx = (start + i) % n;
            if inner.states[idx].is_available(now) {
                inner.cursor = (idx + 1) % n;
                let state = &mut inner.states[idx];
                state.last_used = Some(now);
                return Ok(state.credential.clone());
            }
        }

        if !inner.states.iter().any(|s| s.is_valid) {
            return Err(ClientError::authentication("all credentials are invalid"));
        }

        let min_wait = inner
            .states
            .iter()
            .filter_map(|s| s.time_until_available(now))
            .min()
            .unwrap_or(Duration::from_secs(DEFAULT_RATE_LIMIT_SECS));
        Err(ClientError::RateLimited {
            retry_after_secs: min_wait.as_secs().max(1),
        })
    }

    /// Up to `n` distinct available credentials, least-recently-used first.
    /// Fewer than `n` returned means partial capacity, not failure.
    pub async fn get_batch(&self, n: usize) -> Vec<Credential> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let mut available: Vec<usize> = (0..inner.states.len())
            .filter(|&i| inner.states[i].is_available(now))
            .collect();
        available.sort_by_key(|&i| inner.states[i].last_used);
        available.truncate(n);

        available
            .into_iter()
            .map(|i| {
                let state = &mut inner.states[i];
                state.last_used = Some(now);
                state.credential.clone()
            })
            .collect()
    }

    pub async fn mark_success(&self, credential_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.credential.id == credential_id)
        {
            state.request_count += 1;
            state.consecutive_errors = 0;
            state.last_used = Some(Instant::now());
        }
    }

    pub async fn mark_error(&self, credential_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.credential.id == credential_id)
        {
            state.error_count += 1;
            state.consecutive_errors += 1;
            state.last_used = Some(Instant::now());
            if state.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                tracing::warn!(
                    credential_id = %credential_id,
                    consecutive_errors = state.consecutive_errors,
                    "Credential exceeded max consecutive errors"
                );
            }
        }
    }

    pub async fn mark_rate_limited(&self, credential_id: &str, reset_after: Option<Duration>) {
        let reset = reset_after.unwrap_or(Duration::from_secs(DEFAULT_RATE_LIMIT_SECS));
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.credential.id == credential_id)
        {
            state.rate_limited_until = Some(Instant::now() + reset);
            tracing::warn!(
                credential_id = %credential_id,
                reset_secs = reset.as_secs(),
                "Credential rate limited"
            );
        }
    }

    /// Permanently sideline a credential after a 401 or app-level auth error.
    pub async fn mark_invalid(&self, credential_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.credential.id == credential_id)
        {
            state.is_valid = false;
            tracing::error!(credential_id = %credential_id, "Credential marked invalid");
        }
    }

    pub async fn stats(&self) -> CredentialPoolStats {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut stats = CredentialPoolStats {
            total: inner.states.len(),
            ..Default::default()
        };
        for state in inner.states.iter_mut() {
            if state.is_valid {
                stats.valid += 1;
            }
            if state.is_available(now) {
                stats.available += 1;
            } else if state.rate_limited_until.is_some() {
                stats.rate_limited += 1;
            }
            stats.total_requests += state.request_count;
            stats.total_errors += state.error_count;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(id: &str) -> Credential {
        Credential {
            id: id.to_string(),
            bearer_token: format!("bearer-{id}"),
            csrf_token: format!("csrf-{id}"),
            session_token: format!("session-{id}"),
        }
    }

    fn pool(ids: &[&str]) -> CredentialPool {
        CredentialPool::new(ids.iter().map(|id| credential(id)).collect())
    }

    #[tokio::test]
    async fn round_robin_cycles_through_all_entries() {
        let pool = pool(&["a", "b", "c"]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(pool.get().await.unwrap().id);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn get_skips_rate_limited_entries() {
        let pool = pool(&["a", "b"]);
        pool.mark_rate_limited("a", Some(Duration::from_secs(300))).await;
        for _ in 0..4 {
            assert_eq!(pool.get().await.unwrap().id, "b");
        }
    }

    #[tokio::test]
    async fn invalid_after_consecutive_errors() {
        let pool = pool(&["a", "b"]);
        for _ in 0..5 {
            pool.mark_error("a").await;
        }
        assert_eq!(pool.available_count().await, 1);
        assert_eq!(pool.get().await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn all_rate_limited_reports_min_wait() {
        let pool = pool(&["a", "b"]);
        pool.mark_rate_limited("a", Some(Duration::from_secs(600))).await;
        pool.mark_rate_limited("b", Some(Duration::from_secs(120))).await;
        match pool.get().await.unwrap_err() {
            ClientError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs <= 120, "wait should be the shortest window");
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_invalid_is_an_auth_error() {
        let pool = pool(&["a"]);
        pool.mark_invalid("a").await;
        assert!(matches!(
            pool.get().await.unwrap_err(),
            ClientError::Authentication { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_window_self_heals() {
        let pool = pool(&["a"]);
        pool.mark_rate_limited("a", Some(Duration::from_secs(60))).await;
        assert!(pool.get().await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pool.get().await.unwrap().id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn batch_returns_least_recently_used_first() {
        let pool = pool(&["a", "b", "c"]);
        // Touch a and b so c is the cold entry.
        pool.mark_success("a").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        pool.mark_success("b").await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let batch = pool.get_batch(2).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "c");
        assert_eq!(batch[1].id, "a");
    }

    #[tokio::test]
    async fn batch_is_partial_when_capacity_is_short() {
        let pool = pool(&["a", "b"]);
        pool.mark_rate_limited("b", Some(Duration::from_secs(300))).await;
        let batch = pool.get_batch(5).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "a");
    }

    #[tokio::test]
    async fn stats_count_states() {
        let pool = pool(&["a", "b", "c"]);
        pool.mark_success("a").await;
        pool.mark_error("b").await;
        pool.mark_rate_limited("c", None).await;
        let stats = pool.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.valid, 3);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.total_errors, 1);
    }
}
