//! In-memory store backing local runs and tests.
//!
//! Implements every storage trait over mutex-guarded maps. Semantics match
//! what a database implementation must provide: min-depth wins on user
//! re-discovery, seed status is sticky, edge upserts are idempotent, and
//! job claiming hands out the oldest runnable job exactly once.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use spindle_common::{
    Credential, InfluenceScore, JobRequest, JobStage, JobStatus, SearchJob, User,
};

use crate::store::{CredentialStore, GraphStore, JobStore};

#[derive(Debug, Clone)]
struct UserRecord {
    user: User,
    depth: u32,
    is_seed: bool,
}

#[derive(Default)]
struct GraphInner {
    users: HashMap<String, UserRecord>,
    edges: HashSet<(String, String)>,
    scraped: HashSet<String>,
    scores: Vec<InfluenceScore>,
}

#[derive(Default)]
pub struct MemoryStore {
    graph: Mutex<GraphInner>,
    jobs: Mutex<Vec<SearchJob>>,
    credentials: Mutex<Vec<Credential>>,
    proxies: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_credentials(&self, credentials: Vec<Credential>) {
        *self.credentials.lock().await = credentials;
    }

    pub async fn set_proxies(&self, proxies: Vec<String>) {
        *self.proxies.lock().await = proxies;
    }

    pub async fn user_depth(&self, user_id: &str) -> Option<u32> {
        self.graph
            .lock()
            .await
            .users
            .get(user_id)
            .map(|r| r.depth)
    }

    pub async fn is_seed(&self, user_id: &str) -> bool {
        self.graph
            .lock()
            .await
            .users
            .get(user_id)
            .map(|r| r.is_seed)
            .unwrap_or(false)
    }

    pub async fn influence_scores(&self) -> Vec<InfluenceScore> {
        self.graph.lock().await.scores.clone()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn upsert_user(&self, user: &User, depth: u32, is_seed: bool) -> Result<()> {
        let mut graph = self.graph.lock().await;
        match graph.users.get_mut(&user.id) {
            Some(record) => {
                record.user = user.clone();
                record.depth = record.depth.min(depth);
                record.is_seed |= is_seed;
            }
            None => {
                graph.users.insert(
                    user.id.clone(),
                    UserRecord {
                        user: user.clone(),
                        depth,
                        is_seed,
                    },
                );
            }
        }
        Ok(())
    }

    async fn upsert_edges(&self, source_id: &str, target_ids: &[String]) -> Result<u64> {
        let mut graph = self.graph.lock().await;
        let mut added = 0;
        for target in target_ids {
            if graph
                .edges
                .insert((source_id.to_string(), target.clone()))
            {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn mark_followings_scraped(&self, user_id: &str) -> Result<()> {
        self.graph.lock().await.scraped.insert(user_id.to_string());
        Ok(())
    }

    async fn load_scraped_user_ids(&self) -> Result<HashSet<String>> {
        Ok(self.graph.lock().await.scraped.clone())
    }

    async fn load_unscraped_users(&self) -> Result<Vec<(String, u32)>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .users
            .values()
            .filter(|r| !graph.scraped.contains(&r.user.id))
            .map(|r| (r.user.id.clone(), r.depth))
            .collect())
    }

    async fn count_edges(&self) -> Result<u64> {
        Ok(self.graph.lock().await.edges.len() as u64)
    }

    async fn load_edges(&self) -> Result<Vec<(String, String)>> {
        Ok(self.graph.lock().await.edges.iter().cloned().collect())
    }

    async fn load_users(&self) -> Result<Vec<User>> {
        Ok(self
            .graph
            .lock()
            .await
            .users
            .values()
            .map(|r| r.user.clone())
            .collect())
    }

    async fn save_influence_scores(&self, scores: &[InfluenceScore]) -> Result<()> {
        self.graph.lock().await.scores = scores.to_vec();
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, request: JobRequest) -> Result<SearchJob> {
        let job = SearchJob::new(request);
        self.jobs.lock().await.push(job.clone());
        Ok(job)
    }

    async fn claim_next_job(&self) -> Result<Option<SearchJob>> {
        let mut jobs = self.jobs.lock().await;
        // Pending before orphaned-running, oldest first within each.
        let candidate = jobs
            .iter_mut()
            .filter(|j| !j.status.is_terminal())
            .min_by_key(|j| (j.status == JobStatus::Running, j.created_at));
        Ok(candidate.map(|job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn save_progress(
        &self,
        job_id: Uuid,
        stage: JobStage,
        percent: u8,
        message: &str,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.stage = stage;
            job.percent = percent;
            job.message = message.to_string();
        }
        Ok(())
    }

    async fn complete_job(&self, job_id: Uuid, message: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Completed;
            job.stage = JobStage::Finalizing;
            job.percent = 100;
            job.message = message.to_string();
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Failed;
            job.error_message = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<SearchJob>> {
        Ok(self.jobs.lock().await.iter().find(|j| j.id == job_id).cloned())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load_active_credentials(&self) -> Result<Vec<Credential>> {
        Ok(self.credentials.lock().await.clone())
    }

    async fn load_active_proxies(&self) -> Result<Vec<String>> {
        Ok(self.proxies.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            handle: format!("user_{id}"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rediscovery_keeps_minimum_depth_and_seed_flag() {
        let store = MemoryStore::new();
        store.upsert_user(&user("1"), 0, true).await.unwrap();
        store.upsert_user(&user("1"), 2, false).await.unwrap();
        assert_eq!(store.user_depth("1").await, Some(0));
        assert!(store.is_seed("1").await);

        store.upsert_user(&user("2"), 2, false).await.unwrap();
        store.upsert_user(&user("2"), 1, false).await.unwrap();
        assert_eq!(store.user_depth("2").await, Some(1));
    }

    #[tokio::test]
    async fn edge_upserts_are_idempotent() {
        let store = MemoryStore::new();
        let targets = vec!["2".to_string(), "3".to_string()];
        assert_eq!(store.upsert_edges("1", &targets).await.unwrap(), 2);
        assert_eq!(store.upsert_edges("1", &targets).await.unwrap(), 0);
        assert_eq!(store.count_edges().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unscraped_users_exclude_scraped_ids() {
        let store = MemoryStore::new();
        store.upsert_user(&user("1"), 0, true).await.unwrap();
        store.upsert_user(&user("2"), 1, false).await.unwrap();
        store.mark_followings_scraped("1").await.unwrap();

        let unscraped = store.load_unscraped_users().await.unwrap();
        assert_eq!(unscraped, vec![("2".to_string(), 1)]);
        assert!(store.load_scraped_user_ids().await.unwrap().contains("1"));
    }

    #[tokio::test]
    async fn claim_hands_out_oldest_pending_first() {
        let store = MemoryStore::new();
        let first = store.create_job(JobRequest::default()).await.unwrap();
        let _second = store.create_job(JobRequest::default()).await.unwrap();

        let claimed = store.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn orphaned_running_jobs_are_reclaimable() {
        let store = MemoryStore::new();
        let job = store.create_job(JobRequest::default()).await.unwrap();
        store.claim_next_job().await.unwrap().unwrap();

        // Worker died; the job is still running and gets claimed again.
        let reclaimed = store.claim_next_job().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);

        store.complete_job(job.id, "done").await.unwrap();
        assert!(store.claim_next_job().await.unwrap().is_none());

        let finished = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.percent, 100);
    }

    #[tokio::test]
    async fn failed_jobs_carry_the_error() {
        let store = MemoryStore::new();
        let job = store.create_job(JobRequest::default()).await.unwrap();
        store.fail_job(job.id, "pool exhausted").await.unwrap();
        let failed = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("pool exhausted"));
    }
}
