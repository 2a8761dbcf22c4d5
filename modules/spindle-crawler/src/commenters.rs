//! Commenter expansion around seed users.
//!
//! Follow edges miss the people who only engage. This pass walks each
//! seed's recent posts, collects reply authors, and persists them as
//! engagement edges (commenter to seed) so scoring sees active audiences,
//! not just follow relationships.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use typed_builder::TypedBuilder;

use spindle_common::User;
use spindle_graph::GraphStore;
use spindle_protocol::error::ClientError;

use crate::accounts::AccountPool;

#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct CommenterOptions {
    /// Recent posts inspected per seed (one timeline page).
    #[builder(default = 20)]
    pub max_tweets_per_seed: usize,
    /// Reply authors collected per post.
    #[builder(default = 100)]
    pub max_repliers_per_tweet: usize,
    /// Depth commenters are persisted at.
    #[builder(default = 1)]
    pub depth: u32,
}

impl Default for CommenterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommenterStats {
    pub seeds_processed: usize,
    pub tweets_checked: u64,
    pub commenters_found: u64,
    pub edges_added: u64,
    pub errors: Vec<String>,
}

pub struct CommenterCrawler {
    accounts: Arc<AccountPool>,
    store: Arc<dyn GraphStore>,
    options: CommenterOptions,
}

impl CommenterCrawler {
    pub fn new(
        accounts: Arc<AccountPool>,
        store: Arc<dyn GraphStore>,
        options: CommenterOptions,
    ) -> Self {
        Self {
            accounts,
            store,
            options,
        }
    }

    /// Expand every seed, recording per-seed failures and continuing.
    /// A drained account pool aborts the pass.
    pub async fn expand(&self, seeds: &[User]) -> Result<CommenterStats> {
        let mut stats = CommenterStats::default();
        for seed in seeds {
            match self.expand_seed(seed, &mut stats).await {
                Ok(()) => stats.seeds_processed += 1,
                Err(
                    err @ (ClientError::RateLimited { .. } | ClientError::Authentication { .. }),
                ) => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(handle = %seed.handle, error = %err, "Commenter expansion failed");
                    stats.errors.push(format!("{}: {err}", seed.handle));
                }
            }
        }
        tracing::info!(
            seeds = stats.seeds_processed,
            commenters = stats.commenters_found,
            edges = stats.edges_added,
            "Commenter expansion finished"
        );
        Ok(stats)
    }

    async fn expand_seed(&self, seed: &User, stats: &mut CommenterStats) -> std::result::Result<(), ClientError> {
        let page = self
            .with_rotation(|client| {
                let seed_id = seed.id.clone();
                let count = self.options.max_tweets_per_seed as u32;
                async move { client.tweets_page(&seed_id, count, None, false).await }
            })
            .await?;

        for tweet in page.tweets.iter().take(self.options.max_tweets_per_seed) {
            stats.tweets_checked += 1;
            if tweet.reply_count == 0 {
                continue;
            }
            let replies = self
                .with_rotation(|client| {
                    let tweet_id = tweet.id.clone();
                    async move { client.tweet_replies(&tweet_id).await }
                })
                .await?;

            let mut seen: HashSet<&str> = HashSet::new();
            for reply in replies.iter().take(self.options.max_repliers_per_tweet) {
                if reply.author_id == seed.id || reply.author_id.is_empty() {
                    continue;
                }
                if !seen.insert(&reply.author_id) {
                    continue;
                }
                let commenter = commenter_user(reply);
                self.store
                    .upsert_user(&commenter, self.options.depth, false)
                    .await
                    .map_err(|e| ClientError::scraping(e.to_string()))?;
                let added = self
                    .store
                    .upsert_edges(&reply.author_id, &[seed.id.clone()])
                    .await
                    .map_err(|e| ClientError::scraping(e.to_string()))?;
                stats.commenters_found += 1;
                stats.edges_added += added;
            }
        }
        Ok(())
    }

    /// Run one request, rotating to the next account on a rate limit or a
    /// dead account, wrapping the pool at most once.
    async fn with_rotation<T, F, Fut>(&self, call: F) -> std::result::Result<T, ClientError>
    where
        F: Fn(Arc<dyn spindle_protocol::SocialClient>) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ClientError>>,
    {
        let max_rotations = self.accounts.len().await.max(1);
        let mut rotations = 0;
        loop {
            let client = self.accounts.get().await?;
            let account_id = client.credential_id().to_string();
            match call(client).await {
                Ok(value) => {
                    self.accounts.mark_success(&account_id).await;
                    return Ok(value);
                }
                Err(
                    err @ (ClientError::RateLimited { .. } | ClientError::Authentication { .. }),
                ) => {
                    self.accounts.record_failure(&account_id, &err).await;
                    rotations += 1;
                    if rotations >= max_rotations {
                        return Err(err);
                    }
                }
                Err(err) => {
                    self.accounts.record_failure(&account_id, &err).await;
                    return Err(err);
                }
            }
        }
    }
}

/// Reply authors arrive as tweets, not profiles; build the sparse user
/// record the graph can hold until a later crawl fills it in.
fn commenter_user(reply: &spindle_common::Tweet) -> User {
    User {
        id: reply.author_id.clone(),
        handle: reply.author_handle.clone(),
        ..Default::default()
    }
}
