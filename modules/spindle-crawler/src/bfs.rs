//! Breadth-first crawl of the follow graph.
//!
//! Seeds enter at depth 0; each processed node's followings are persisted
//! as nodes and edges, and unseen targets join the queue one level deeper.
//! First-seen depth wins when a user is reachable along multiple paths.
//! The crawl survives restarts: scraped nodes are skipped on resume and
//! unscraped ones re-enter the queue at their stored depth.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use typed_builder::TypedBuilder;

use spindle_common::{CrawlProgress, CrawlStats, User};
use spindle_graph::GraphStore;
use spindle_protocol::error::ClientError;
use spindle_protocol::FollowingPager;

use crate::accounts::AccountPool;

#[derive(Debug, Clone, TypedBuilder)]
pub struct CrawlOptions {
    /// Levels beyond the seeds. Zero persists seeds without crawling.
    #[builder(default = 2)]
    pub max_depth: u32,
    /// Edge upserts are flushed in chunks of this size.
    #[builder(default = 100)]
    pub batch_size: usize,
    /// Cap on followings collected per user.
    #[builder(default = 500)]
    pub max_followings_per_user: u32,
    #[builder(default = 100)]
    pub page_size: u32,
    /// Skip already-scraped users and re-queue unscraped ones.
    #[builder(default = false)]
    pub resume: bool,
    /// Record per-user scrape failures and continue instead of aborting.
    /// Pool exhaustion aborts regardless.
    #[builder(default = true)]
    pub skip_errors: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

type ProgressFn = Box<dyn Fn(&CrawlProgress) + Send + Sync>;

pub struct GraphCrawler {
    accounts: Arc<AccountPool>,
    store: Arc<dyn GraphStore>,
    options: CrawlOptions,
    progress: Option<ProgressFn>,
}

impl GraphCrawler {
    pub fn new(
        accounts: Arc<AccountPool>,
        store: Arc<dyn GraphStore>,
        options: CrawlOptions,
    ) -> Self {
        Self {
            accounts,
            store,
            options,
            progress: None,
        }
    }

    /// Receive a snapshot after each node completes.
    pub fn with_progress(
        mut self,
        callback: impl Fn(&CrawlProgress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Run the crawl from the given seed users. Returns once the queue
    /// drains or an unrecoverable error aborts it.
    pub async fn crawl_from_seeds(&self, seeds: &[User]) -> Result<CrawlStats> {
        let mut stats = CrawlStats::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, String, u32)> = VecDeque::new();

        let scraped = if self.options.resume {
            self.store.load_scraped_user_ids().await?
        } else {
            HashSet::new()
        };

        for seed in seeds {
            self.store.upsert_user(seed, 0, true).await?;
            if visited.insert(seed.id.clone()) && !scraped.contains(&seed.id) {
                queue.push_back((seed.id.clone(), seed.handle.clone(), 0));
            }
        }
        if self.options.resume {
            for (user_id, depth) in self.store.load_unscraped_users().await? {
                if depth < self.options.max_depth && visited.insert(user_id.clone()) {
                    queue.push_back((user_id, String::new(), depth));
                }
            }
            visited.extend(scraped);
        }

        tracing::info!(
            seeds = seeds.len(),
            queued = queue.len(),
            max_depth = self.options.max_depth,
            resume = self.options.resume,
            "Starting graph crawl"
        );

        while let Some((user_id, handle, depth)) = queue.pop_front() {
            if depth >= self.options.max_depth {
                continue;
            }

            let followings = match self.collect_followings(&user_id).await {
                Ok(followings) => followings,
                Err(err) if self.should_skip(&err) => {
                    tracing::warn!(user_id = %user_id, error = %err, "Skipping user");
                    stats.errors.push(format!("{user_id}: {err}"));
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let child_depth = depth + 1;
            let mut new_edges = 0u64;
            let mut batch: Vec<String> = Vec::with_capacity(self.options.batch_size);
            for target in &followings {
                self.store.upsert_user(target, child_depth, false).await?;
                batch.push(target.id.clone());
                if batch.len() >= self.options.batch_size {
                    new_edges += self.store.upsert_edges(&user_id, &batch).await?;
                    batch.clear();
                }
                if visited.insert(target.id.clone()) && child_depth < self.options.max_depth {
                    queue.push_back((target.id.clone(), target.handle.clone(), child_depth));
                }
            }
            if !batch.is_empty() {
                new_edges += self.store.upsert_edges(&user_id, &batch).await?;
            }
            self.store.mark_followings_scraped(&user_id).await?;

            stats.users_visited += 1;
            stats.edges_discovered += new_edges;
            stats.max_depth_reached = stats.max_depth_reached.max(child_depth);

            if let Some(callback) = &self.progress {
                let progress = CrawlProgress {
                    current_user_id: user_id.clone(),
                    current_handle: handle.clone(),
                    current_depth: depth,
                    queue_size: queue.len(),
                    visited_count: visited.len(),
                    edges_found: new_edges,
                    total_edges: self.store.count_edges().await?,
                };
                callback(&progress);
            }
        }

        tracing::info!(
            users_visited = stats.users_visited,
            edges = stats.edges_discovered,
            errors = stats.errors.len(),
            "Graph crawl finished"
        );
        Ok(stats)
    }

    /// Per-user failures are survivable; a drained pool is not.
    fn should_skip(&self, err: &ClientError) -> bool {
        if matches!(
            err,
            ClientError::RateLimited { .. } | ClientError::Authentication { .. }
        ) {
            return false;
        }
        err.is_terminal() || self.options.skip_errors
    }

    /// Collect one user's followings, rotating accounts when one hits a
    /// rate limit or dies. The cursor carries over across rotations so no
    /// page is fetched twice.
    async fn collect_followings(&self, user_id: &str) -> std::result::Result<Vec<User>, ClientError> {
        let cap = self.options.max_followings_per_user as usize;
        let mut users: Vec<User> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut rotations = 0;
        let max_rotations = self.accounts.len().await.max(1);

        'rotate: loop {
            let client = self.accounts.get().await?;
            let account_id = client.credential_id().to_string();
            let mut pager =
                FollowingPager::resume(client, user_id, self.options.page_size, cursor.clone());
            loop {
                match pager.next_page().await {
                    Ok(Some(page)) => {
                        users.extend(page);
                        cursor = pager.cursor().map(String::from);
                        if users.len() >= cap {
                            users.truncate(cap);
                            self.accounts.mark_success(&account_id).await;
                            return Ok(users);
                        }
                        if !pager.has_more() {
                            self.accounts.mark_success(&account_id).await;
                            return Ok(users);
                        }
                    }
                    Ok(None) => {
                        self.accounts.mark_success(&account_id).await;
                        return Ok(users);
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
}
