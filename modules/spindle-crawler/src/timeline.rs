//! Timeline collection for scored users.
//!
//! Pulls recent posts page by page, newest first, with optional retweet
//! and reply filtering and a time window. Since the timeline is reverse
//! chronological, hitting a post older than `since` ends the walk early.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use typed_builder::TypedBuilder;

use spindle_common::{Tweet, TweetBatch, TweetPage, User};
use spindle_protocol::error::ClientError;
use spindle_protocol::{Result, SocialClient};

use crate::accounts::AccountPool;

/// Cursor-driven pager over a user's timeline, restartable mid-listing.
pub struct TweetPager {
    client: Arc<dyn SocialClient>,
    user_id: String,
    page_size: u32,
    include_replies: bool,
    cursor: Option<String>,
    done: bool,
}

impl TweetPager {
    pub fn new(
        client: Arc<dyn SocialClient>,
        user_id: impl Into<String>,
        page_size: u32,
        include_replies: bool,
    ) -> Self {
        Self::resume(client, user_id, page_size, include_replies, None)
    }

    pub fn resume(
        client: Arc<dyn SocialClient>,
        user_id: impl Into<String>,
        page_size: u32,
        include_replies: bool,
        cursor: Option<String>,
    ) -> Self {
        Self {
            client,
            user_id: user_id.into(),
            page_size,
            include_replies,
            cursor,
            done: false,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_more(&self) -> bool {
        !self.done
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<Tweet>>> {
        if self.done {
            return Ok(None);
        }
        let TweetPage {
            tweets,
            next_cursor,
        } = self
            .client
            .tweets_page(
                &self.user_id,
                self.page_size,
                self.cursor.as_deref(),
                self.include_replies,
            )
            .await?;
        if tweets.is_empty() {
            self.done = true;
            return Ok(None);
        }
        match next_cursor {
            Some(cursor) => self.cursor = Some(cursor),
            None => self.done = true,
        }
        Ok(Some(tweets))
    }
}

#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct TimelineOptions {
    #[builder(default = 200)]
    pub max_tweets: usize,
    #[builder(default = true)]
    pub include_retweets: bool,
    #[builder(default = false)]
    pub include_replies: bool,
    /// Posts older than this end the walk.
    #[builder(default)]
    pub since: Option<DateTime<Utc>>,
    /// Posts newer than this are dropped but the walk continues.
    #[builder(default)]
    pub until: Option<DateTime<Utc>>,
    #[builder(default = 100)]
    pub page_size: u32,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub struct TimelineScraper {
    accounts: Arc<AccountPool>,
    options: TimelineOptions,
}

impl TimelineScraper {
    pub fn new(accounts: Arc<AccountPool>, options: TimelineOptions) -> Self {
        Self { accounts, options }
    }

    /// Collect one user's recent posts, rotating accounts on rate limits.
    pub async fn scrape_user(&self, user: &User) -> Result<TweetBatch> {
        let mut tweets: Vec<Tweet> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut rotations = 0;
        let max_rotations = self.accounts.len().await.max(1);

        'rotate: loop {
            let client = self.accounts.get().await?;
            let account_id = client.credential_id().to_string();
            let mut pager = TweetPager::resume(
                client,
                user.id.clone(),
                self.options.page_size,
                self.options.include_replies,
                cursor.clone(),
            );
            loop {
                match pager.next_page().await {
                    Ok(Some(page)) => {
                        let mut reached_since = false;
                        for tweet in page {
                            if let (Some(since), Some(created)) =
                                (self.options.since, tweet.created_at)
                            {
                                if created < since {
                                    reached_since = true;
                                    break;
                                }
                            }
                            if self.keep(&tweet) {
                                tweets.push(tweet);
                            }
                        }
                        cursor = pager.cursor().map(String::from);
                        let full = tweets.len() >= self.options.max_tweets;
                        if reached_since || full || !pager.has_more() {
                            tweets.truncate(self.options.max_tweets);
                            self.accounts.mark_success(&account_id).await;
                            return Ok(self.batch(user, tweets));
                        }
                    }
                    Ok(None) => {
                        self.accounts.mark_success(&account_id).await;
                        return Ok(self.batch(user, tweets));
                    }
                    Err(
                        err @ (ClientError::RateLimited { .. }
                        | ClientError::Authentication { .. }),
                    ) => {
                        self.accounts.record_failure(&account_id, &err).await;
                        rotations += 1;
                        if rotations >= max_rotations {
                            return Err(err);
                        }
                        continue 'rotate;
                    }
                    Err(err) => {
                        self.accounts.record_failure(&account_id, &err).await;
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Collect several users' timelines, recording per-user failures
    /// instead of aborting the batch.
    pub async fn scrape_many(&self, users: &[User]) -> (Vec<TweetBatch>, Vec<String>) {
        let mut batches = Vec::with_capacity(users.len());
        let mut errors = Vec::new();
        for user in users {
            match self.scrape_user(user).await {
                Ok(batch) => batches.push(batch),
                Err(err) => {
                    tracing::warn!(handle = %user.handle, error = %err, "Timeline scrape failed");
                    errors.push(format!("{}: {err}", user.handle));
                }
            }
        }
        (batches, errors)
    }

    fn keep(&self, tweet: &Tweet) -> bool {
        if !self.options.include_retweets && tweet.is_retweet {
            return false;
        }
        if !self.options.include_replies && tweet.is_reply {
            return false;
        }
        if let (Some(until), Some(created)) = (self.options.until, tweet.created_at) {
            if created > until {
                return false;
            }
        }
        true
    }

    fn batch(&self, user: &User, tweets: Vec<Tweet>) -> TweetBatch {
        TweetBatch {
            user_id: user.id.clone(),
            handle: user.handle.clone(),
            tweets,
            scraped_at: Utc::now(),
        }
    }
}
