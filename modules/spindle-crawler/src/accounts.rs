//! Rotation over a pool of authenticated clients.
//!
//! Each entry is one account-bound [`SocialClient`]. The pool mirrors the
//! credential pool's selection rules one level up: round robin that wraps
//! exactly once, rate-limit windows that self-heal, and a batch mode that
//! hands out the least-recently-used accounts for fan-out work. Callers
//! report outcomes back so the pool's view of account health stays honest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use spindle_common::User;
use spindle_protocol::error::ClientError;
use spindle_protocol::{Result, SocialClient};

const DEFAULT_RATE_LIMIT_SECS: u64 = 900;

struct AccountState {
    client: Arc<dyn SocialClient>,
    is_valid: bool,
    rate_limited_until: Option<Instant>,
    request_count: u64,
    error_count: u64,
    last_used: Option<Instant>,
}

impl AccountState {
    fn is_available(&mut self, now: Instant) -> bool {
        if !self.is_valid {
            return false;
        }
        if let Some(until) = self.rate_limited_until {
            if now < until {
                return false;
            }
            self.rate_limited_until = None;
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountPoolStats {
    pub total: usize,
    pub valid: usize,
    pub available: usize,
    pub rate_limited: usize,
    pub total_requests: u64,
    pub total_errors: u64,
}

/// Result of a fan-out keyword search. Keywords that fail after rotation
/// land in `errors`; partial results are normal operation, not failure.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub users_by_keyword: HashMap<String, Vec<User>>,
    pub errors: Vec<String>,
}

struct Inner {
    states: Vec<AccountState>,
    cursor: usize,
}

pub struct AccountPool {
    inner: Mutex<Inner>,
}

impl AccountPool {
    pub fn new(clients: Vec<Arc<dyn SocialClient>>) -> Self {
        let states = clients
            .into_iter()
            .map(|client| AccountState {
                client,
                is_valid: true,
                rate_limited_until: None,
                request_count: 0,
                error_count: 0,
                last_used: None,
            })
            .collect();
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

    /// Next available account, round robin, wrapping the pool exactly once.
    pub async fn get(&self) -> Result<Arc<dyn SocialClient>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        if inner.states.is_empty() {
            return Err(ClientError::authentication("no accounts configured"));
        }

        let n = inner.states.len();
        let start = inner.cursor;
        for i in 0..n {
            let idx = (start + i) % n;
            if inner.states[idx].is_available(now) {
                inner.cursor = (idx + 1) % n;
                let state = &mut inner.states[idx];
                state.last_used = Some(now);
                return Ok(state.client.clone());
            }
        }

        if !inner.states.iter().any(|s| s.is_valid) {
            return Err(ClientError::authentication("all accounts are invalid"));
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

    /// Up to `n` distinct available accounts, least-recently-used first.
    /// Fewer than `n` means partial capacity, not failure.
    pub async fn get_batch(&self, n: usize) -> Vec<Arc<dyn SocialClient>> {
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
                state.client.clone()
            })
            .collect()
    }

    pub async fn mark_success(&self, account_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.client.credential_id() == account_id)
        {
            state.request_count += 1;
        }
    }

    pub async fn mark_error(&self, account_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.client.credential_id() == account_id)
        {
            state.error_count += 1;
        }
    }

    pub async fn mark_rate_limited(&self, account_id: &str, reset_after: Option<Duration>) {
        let reset = reset_after.unwrap_or(Duration::from_secs(DEFAULT_RATE_LIMIT_SECS));
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.client.credential_id() == account_id)
        {
            state.rate_limited_until = Some(Instant::now() + reset);
            tracing::warn!(
                account_id = %account_id,
                reset_secs = reset.as_secs(),
                "Account rate limited"
            );
        }
    }

    pub async fn mark_invalid(&self, account_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .states
            .iter_mut()
            .find(|s| s.client.credential_id() == account_id)
        {
            state.is_valid = false;
            tracing::error!(account_id = %account_id, "Account marked invalid");
        }
    }

    /// Map a request error onto pool state the same way every caller should.
    pub async fn record_failure(&self, account_id: &str, err: &ClientError) {
        match err {
            ClientError::RateLimited { .. } => {
                self.mark_rate_limited(account_id, err.retry_after()).await
            }
            ClientError::Authentication { .. } => self.mark_invalid(account_id).await,
            _ => self.mark_error(account_id).await,
        }
    }

    pub async fn stats(&self) -> AccountPoolStats {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut stats = AccountPoolStats {
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

    /// Fan keyword searches out over distinct accounts, then retry keywords
    /// that hit a rate limit or a dead account with a fresh one. Keywords
    /// outnumbering accounts share clients round robin.
    pub async fn concurrent_search(&self, keywords: &[String], count: u32) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();
        if keywords.is_empty() {
            return outcome;
        }
        let clients = self.get_batch(keywords.len()).await;
        if clients.is_empty() {
            if let Err(err) = self.get().await {
                for keyword in keywords {
                    outcome.errors.push(format!("search '{keyword}': {err}"));
                }
            }
            return outcome;
        }

        let tasks = keywords.iter().enumerate().map(|(i, keyword)| {
            let client = clients[i % clients.len()].clone();
            async move {
                let account_id = client.credential_id().to_string();
                let result = client.search_people(keyword, count, None).await;
                (keyword.clone(), account_id, result)
            }
        });

        let mut retry = Vec::new();
        for (keyword, account_id, result) in futures::future::join_all(tasks).await {
            match result {
                Ok((users, _)) => {
                    self.mark_success(&account_id).await;
                    outcome.users_by_keyword.insert(keyword, users);
                }
                Err(err @ ClientError::RateLimited { .. }) => {
                    self.mark_rate_limited(&account_id, err.retry_after()).await;
                    retry.push(keyword);
                }
                Err(ClientError::Authentication { .. }) => {
                    self.mark_invalid(&account_id).await;
                    retry.push(keyword);
                }
                Err(err) => {
                    self.mark_error(&account_id).await;
                    outcome.errors.push(format!("search '{keyword}': {err}"));
                }
            }
        }

        for keyword in retry {
            match self.get().await {
                Ok(client) => {
                    let account_id = client.credential_id().to_string();
                    match client.search_people(&keyword, count, None).await {
                        Ok((users, _)) => {
                            self.mark_success(&account_id).await;
                            outcome.users_by_keyword.insert(keyword, users);
                        }
                        Err(err) => {
                            self.record_failure(&account_id, &err).await;
                            outcome.errors.push(format!("search '{keyword}': {err}"));
                        }
                    }
                }
                Err(err) => outcome.errors.push(format!("search '{keyword}': {err}")),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockClient, ScriptedError};

    fn pool(clients: Vec<MockClient>) -> AccountPool {
        AccountPool::new(
            clients
                .into_iter()
                .map(|c| Arc::new(c) as Arc<dyn SocialClient>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn round_robin_skips_sidelined_accounts() {
        let pool = pool(vec![MockClient::new("a"), MockClient::new("b")]);
        pool.mark_rate_limited("a", Some(Duration::from_secs(300))).await;
        for _ in 0..3 {
            assert_eq!(pool.get().await.unwrap().credential_id(), "b");
        }
    }

    #[tokio::test]
    async fn exhausted_pool_reports_shortest_wait() {
        let pool = pool(vec![MockClient::new("a"), MockClient::new("b")]);
        pool.mark_rate_limited("a", Some(Duration::from_secs(600))).await;
        pool.mark_rate_limited("b", Some(Duration::from_secs(60))).await;
        match pool.get().await.map(|_| ()).unwrap_err() {
            ClientError::RateLimited { retry_after_secs } => assert!(retry_after_secs <= 60),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_invalid_is_an_auth_error() {
        let pool = pool(vec![MockClient::new("a")]);
        pool.mark_invalid("a").await;
        assert!(matches!(
            pool.get().await.map(|_| ()).unwrap_err(),
            ClientError::Authentication { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_search_fans_out_and_merges() {
        let a = MockClient::new("a")
            .with_people_search("rust", vec![MockClient::user("1", "alice")])
            .with_people_search("tokio", vec![MockClient::user("2", "bob")]);
        let b = MockClient::new("b")
            .with_people_search("rust", vec![MockClient::user("1", "alice")])
            .with_people_search("tokio", vec![MockClient::user("2", "bob")]);
        let pool = pool(vec![a, b]);

        let outcome = pool
            .concurrent_search(&["rust".to_string(), "tokio".to_string()], 50)
            .await;
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.users_by_keyword["rust"][0].handle, "alice");
        assert_eq!(outcome.users_by_keyword["tokio"][0].handle, "bob");
    }

    #[tokio::test]
    async fn rate_limited_keyword_retries_on_a_fresh_account() {
        // "a" is rate limited for the search; "b" has the data.
        let a = MockClient::new("a")
            .fail_search("rust", ScriptedError::RateLimited(60));
        let b = MockClient::new("b")
            .with_people_search("rust", vec![MockClient::user("1", "alice")]);
        let pool = pool(vec![a, b]);

        let outcome = pool.concurrent_search(&["rust".to_string()], 50).await;
        assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);
        assert_eq!(outcome.users_by_keyword["rust"].len(), 1);

        let stats = pool.stats().await;
        assert_eq!(stats.rate_limited, 1);
    }

    #[tokio::test]
    async fn fully_rate_limited_pool_yields_errors_not_panic() {
        let pool = pool(vec![MockClient::new("a")]);
        pool.mark_rate_limited("a", Some(Duration::from_secs(600))).await;
        let outcome = pool.concurrent_search(&["rust".to_string()], 50).await;
        assert!(outcome.users_by_keyword.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }
}
