//! The discovery job pipeline.
//!
//! One job flows through fixed stages: collect seeds, crawl the follow
//! graph, optionally expand commenters, score, finalize. Stage and percent
//! are persisted at every boundary so pollers can render progress. A job
//! that finds zero seeds completes with an explanatory message rather than
//! failing; real failures (a drained account pool, storage errors) mark
//! the job failed with the error text.

use std::sync::Arc;

use anyhow::Result;

use spindle_common::{JobStage, SearchJob, User};
use spindle_crawler::{
    AccountPool, CommenterCrawler, CommenterOptions, CrawlOptions, GraphCrawler, SeedCollector,
    SeedOutcome,
};
use spindle_graph::{pagerank, GraphStore, JobStore, PageRankParams};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Followings cap for shallow crawls; deep crawls shrink it further.
    pub max_followings_per_user: u32,
    /// Deep crawls (depth > 1) only expand this many seeds, by followers.
    pub top_seeds_for_deep_crawl: usize,
    pub commenter_options: CommenterOptions,
    pub pagerank: PageRankParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_followings_per_user: 500,
            top_seeds_for_deep_crawl: 20,
            commenter_options: CommenterOptions::default(),
            pagerank: PageRankParams::default(),
        }
    }
}

pub struct SearchPipeline {
    accounts: Arc<AccountPool>,
    graph: Arc<dyn GraphStore>,
    jobs: Arc<dyn JobStore>,
    config: PipelineConfig,
}

impl SearchPipeline {
    pub fn new(
        accounts: Arc<AccountPool>,
        graph: Arc<dyn GraphStore>,
        jobs: Arc<dyn JobStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            accounts,
            graph,
            jobs,
            config,
        }
    }

    /// Run a claimed job to a terminal state. Pipeline errors are recorded
    /// on the job; only storage failures while recording escape.
    pub async fn process(&self, job: SearchJob) -> Result<()> {
        tracing::info!(
            job_id = %job.id,
            keywords = job.request.keywords.len(),
            seed_handles = job.request.seed_handles.len(),
            depth = job.request.crawl_depth,
            "Processing job"
        );
        if let Err(err) = self.run(&job).await {
            tracing::error!(job_id = %job.id, error = %err, "Job failed");
            self.jobs.fail_job(job.id, &err.to_string()).await?;
        }
        Ok(())
    }

    async fn run(&self, job: &SearchJob) -> Result<()> {
        let request = &job.request;
        self.progress(job, JobStage::Initializing, 5, "Initializing").await?;
        if self.accounts.len().await == 0 {
            anyhow::bail!("no accounts available");
        }

        let seeds = self.collect_seeds(job).await?;
        if seeds.users.is_empty() {
            let message = if seeds
                .errors
                .iter()
                .any(|e| e.contains("Rate limited"))
            {
                "All accounts rate limited; try again later"
            } else {
                "No users found matching keywords"
            };
            tracing::warn!(job_id = %job.id, message, "Job finished without seeds");
            self.jobs.complete_job(job.id, message).await?;
            return Ok(());
        }

        let depth = request.crawl_depth;
        self.progress(job, JobStage::BuildingGraph, 35, "Building follow graph").await?;
        let crawl_seeds = self.pick_crawl_seeds(&seeds.users, depth);
        let crawler = GraphCrawler::new(
            self.accounts.clone(),
            self.graph.clone(),
            CrawlOptions::builder()
                .max_depth(depth)
                .max_followings_per_user(self.followings_cap(depth))
                .resume(true)
                .build(),
        );
        let crawl = crawler.crawl_from_seeds(&crawl_seeds).await?;
        let built_pct = if depth == 0 {
            50
        } else {
            (35 + 10 * depth).min(55) as u8
        };
        self.progress(
            job,
            JobStage::BuildingGraph,
            built_pct,
            &format!(
                "Crawled {} users, {} edges",
                crawl.users_visited, crawl.edges_discovered
            ),
        )
        .await?;

        if request.include_commenters {
            self.progress(job, JobStage::CrawlingCommenters, 60, "Collecting commenters")
                .await?;
            let commenters = CommenterCrawler::new(
                self.accounts.clone(),
                self.graph.clone(),
                self.config.commenter_options,
            )
            .expand(&seeds.users)
            .await?;
            tracing::info!(
                job_id = %job.id,
                commenters = commenters.commenters_found,
                edges = commenters.edges_added,
                "Commenter expansion done"
            );
        }

        self.progress(job, JobStage::CalculatingScores, 70, "Computing influence scores")
            .await?;
        let edges = self.graph.load_edges().await?;
        let scores = pagerank(&edges, self.config.pagerank);
        self.progress(job, JobStage::CalculatingScores, 85, "Saving influence scores")
            .await?;
        self.graph.save_influence_scores(&scores).await?;
        self.progress(
            job,
            JobStage::CalculatingScores,
            88,
            &format!("{} edges in graph", edges.len()),
        )
        .await?;

        self.progress(job, JobStage::Finalizing, 95, "Finalizing").await?;
        let users = self.graph.load_users().await?;
        self.jobs
            .complete_job(
                job.id,
                &format!("Found {} users, {} edges", users.len(), edges.len()),
            )
            .await?;
        tracing::info!(job_id = %job.id, users = users.len(), edges = edges.len(), "Job completed");
        Ok(())
    }

    async fn collect_seeds(&self, job: &SearchJob) -> Result<SeedOutcome> {
        let request = &job.request;
        let collector = SeedCollector::new(self.accounts.clone());

        let mut outcome = SeedOutcome::default();
        if !request.seed_handles.is_empty() {
            self.progress(job, JobStage::ResolvingSeeds, 8, "Resolving seed handles")
                .await?;
            outcome = collector.resolve_handles(&request.seed_handles).await;
        }
        if !request.keywords.is_empty() {
            self.progress(
                job,
                JobStage::SearchingSeeds,
                10,
                &format!("Searching {} keywords", request.keywords.len()),
            )
            .await?;
            let searched = collector
                .search_keywords(&request.keywords, request.max_users_per_keyword)
                .await;
            let known: std::collections::HashSet<String> =
                outcome.users.iter().map(|u| u.id.clone()).collect();
            for user in searched.users {
                if !known.contains(&user.id) {
                    outcome.users.push(user);
                }
            }
            outcome.errors.extend(searched.errors);
        }
        self.progress(
            job,
            JobStage::SearchingSeeds,
            30,
            &format!("Found {} seed users", outcome.users.len()),
        )
        .await?;
        Ok(outcome)
    }

    /// Deep crawls explode combinatorially; expand only the most-followed
    /// seeds and tighten the per-user followings cap with depth.
    fn pick_crawl_seeds(&self, seeds: &[User], depth: u32) -> Vec<User> {
        if depth <= 1 || seeds.len() <= self.config.top_seeds_for_deep_crawl {
            return seeds.to_vec();
        }
        let mut sorted = seeds.to_vec();
        sorted.sort_by(|a, b| b.followers_count.cmp(&a.followers_count));
        sorted.truncate(self.config.top_seeds_for_deep_crawl);
        sorted
    }

    fn followings_cap(&self, depth: u32) -> u32 {
        if depth > 1 {
            (50u32.saturating_sub(depth * 10)).max(20)
        } else {
            self.config.max_followings_per_user
        }
    }

    async fn progress(
        &self,
        job: &SearchJob,
        stage: JobStage,
        percent: u8,
        message: &str,
    ) -> Result<()> {
        tracing::debug!(job_id = %job.id, stage = %stage, percent, message, "Progress");
        self.jobs.save_progress(job.id, stage, percent, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spindle_common::{JobRequest, JobStatus};
    use spindle_crawler::testing::{MockClient, ScriptedError};
    use spindle_graph::MemoryStore;
    use spindle_protocol::SocialClient;

    fn pool_of(clients: Vec<MockClient>) -> Arc<AccountPool> {
        Arc::new(AccountPool::new(
            clients
                .into_iter()
                .map(|c| Arc::new(c) as Arc<dyn SocialClient>)
                .collect(),
        ))
    }

    fn pipeline(clients: Vec<MockClient>, store: Arc<MemoryStore>) -> SearchPipeline {
        SearchPipeline::new(
            pool_of(clients),
            store.clone(),
            store,
            PipelineConfig::default(),
        )
    }

    async fn claimed(store: &MemoryStore, request: JobRequest) -> SearchJob {
        store.create_job(request).await.unwrap();
        store.claim_next_job().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn keyword_job_runs_to_completion_with_scores() {
        let client = MockClient::new("a")
            .with_people_search("rust", vec![MockClient::user("1", "alice")])
            .with_following("1", vec![MockClient::user("2", "bob")]);
        let store = Arc::new(MemoryStore::new());
        let job = claimed(
            &store,
            JobRequest {
                keywords: vec!["rust".to_string()],
                crawl_depth: 1,
                ..Default::default()
            },
        )
        .await;

        pipeline(vec![client], store.clone()).process(job.clone()).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.percent, 100);
        assert_eq!(finished.message, "Found 2 users, 1 edges");

        let scores = store.influence_scores().await;
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().any(|s| s.user_id == "2" && s.score == 1.0));
    }

    #[tokio::test]
    async fn seed_handles_feed_the_crawl() {
        let client = MockClient::new("a")
            .with_user(MockClient::user("1", "alice"))
            .with_following("1", vec![MockClient::user("2", "bob")]);
        let store = Arc::new(MemoryStore::new());
        let job = claimed(
            &store,
            JobRequest {
                seed_handles: vec!["@alice".to_string()],
                crawl_depth: 1,
                ..Default::default()
            },
        )
        .await;

        pipeline(vec![client], store.clone()).process(job.clone()).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(store.is_seed("1").await);
        assert_eq!(store.user_depth("2").await, Some(1));
    }

    #[tokio::test]
    async fn zero_seeds_completes_with_no_match_message() {
        let client = MockClient::new("a").with_people_search("rust", vec![]);
        let store = Arc::new(MemoryStore::new());
        let job = claimed(
            &store,
            JobRequest {
                keywords: vec!["rust".to_string()],
                crawl_depth: 1,
                ..Default::default()
            },
        )
        .await;

        pipeline(vec![client], store.clone()).process(job.clone()).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.message, "No users found matching keywords");
    }

    #[tokio::test]
    async fn zero_seeds_from_rate_limits_says_so() {
        let client = MockClient::new("a").fail_search("rust", ScriptedError::RateLimited(600));
        let store = Arc::new(MemoryStore::new());
        let job = claimed(
            &store,
            JobRequest {
                keywords: vec!["rust".to_string()],
                crawl_depth: 1,
                ..Default::default()
            },
        )
        .await;

        pipeline(vec![client], store.clone()).process(job.clone()).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.message, "All accounts rate limited; try again later");
    }

    #[tokio::test]
    async fn commenter_stage_adds_engagement_edges() {
        let mut seed_post = MockClient::tweet("100", "1", "post");
        seed_post.reply_count = 1;
        let mut reply = MockClient::tweet("200", "3", "reply");
        reply.author_handle = "carol".to_string();

        let client = MockClient::new("a")
            .with_user(MockClient::user("1", "alice"))
            .with_following("1", vec![MockClient::user("2", "bob")])
            .with_tweets("1", vec![seed_post.clone()])
            .with_replies(seed_post, vec![reply]);
        let store = Arc::new(MemoryStore::new());
        let job = claimed(
            &store,
            JobRequest {
                seed_handles: vec!["alice".to_string()],
                crawl_depth: 1,
                include_commenters: true,
                ..Default::default()
            },
        )
        .await;

        pipeline(vec![client], store.clone()).process(job.clone()).await.unwrap();

        let edges = store.load_edges().await.unwrap();
        assert!(edges.contains(&("3".to_string(), "1".to_string())));
        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn crawl_abort_marks_the_job_failed() {
        let client = MockClient::new("a")
            .with_user(MockClient::user("1", "alice"))
            .fail_following("1", ScriptedError::RateLimited(600));
        let store = Arc::new(MemoryStore::new());
        let job = claimed(
            &store,
            JobRequest {
                seed_handles: vec!["alice".to_string()],
                crawl_depth: 1,
                ..Default::default()
            },
        )
        .await;

        pipeline(vec![client], store.clone()).process(job.clone()).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert!(finished.error_message.unwrap().contains("Rate limited"));
    }

    #[tokio::test]
    async fn empty_account_pool_fails_the_job() {
        let store = Arc::new(MemoryStore::new());
        let job = claimed(
            &store,
            JobRequest {
                keywords: vec!["rust".to_string()],
                crawl_depth: 1,
                ..Default::default()
            },
        )
        .await;

        pipeline(vec![], store.clone()).process(job.clone()).await.unwrap();

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.error_message.as_deref(), Some("no accounts available"));
    }

    #[test]
    fn deep_crawls_tighten_the_followings_cap() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(vec![MockClient::new("a")], store);
        assert_eq!(p.followings_cap(0), 500);
        assert_eq!(p.followings_cap(1), 500);
        assert_eq!(p.followings_cap(2), 30);
        assert_eq!(p.followings_cap(3), 20);
        assert_eq!(p.followings_cap(10), 20);
    }
}
