// Trait abstractions for crawler and pipeline persistence.
//
// GraphStore: the influence graph. Users, follow edges, scrape progress,
// and computed scores. Edges are the canonical record; everything else
// can be rebuilt from them.
// JobStore: the discovery job queue. One worker claims at a time.
// CredentialStore: where accounts and proxies come from at boot.
//
// These enable deterministic testing with MemoryStore and MockClient:
// no network, no database.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use spindle_common::{Credential, InfluenceScore, JobRequest, JobStage, SearchJob, User};

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or update a user node. Re-discovery at a greater depth keeps
    /// the shallower depth; seed status is sticky once set.
    async fn upsert_user(&self, user: &User, depth: u32, is_seed: bool) -> Result<()>;

    /// Record follow edges from `source_id` to each target. Idempotent.
    /// Returns how many edges were new.
    async fn upsert_edges(&self, source_id: &str, target_ids: &[String]) -> Result<u64>;

    /// Mark a user's following list as fully scraped.
    async fn mark_followings_scraped(&self, user_id: &str) -> Result<()>;

    /// Ids of users whose following lists have been scraped. Drives resume.
    async fn load_scraped_user_ids(&self) -> Result<HashSet<String>>;

    /// Known users not yet scraped, with the depth they were discovered at.
    async fn load_unscraped_users(&self) -> Result<Vec<(String, u32)>>;

    async fn count_edges(&self) -> Result<u64>;

    /// Every follow edge as (source_id, target_id). Input to scoring.
    async fn load_edges(&self) -> Result<Vec<(String, String)>>;

    async fn load_users(&self) -> Result<Vec<User>>;

    /// Replace stored influence scores with a freshly computed set.
    async fn save_influence_scores(&self, scores: &[InfluenceScore]) -> Result<()>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, request: JobRequest) -> Result<SearchJob>;

    /// Claim the oldest runnable job and mark it running. Jobs left running
    /// by a dead worker are claimable again; pending jobs go first.
    async fn claim_next_job(&self) -> Result<Option<SearchJob>>;

    async fn save_progress(
        &self,
        job_id: Uuid,
        stage: JobStage,
        percent: u8,
        message: &str,
    ) -> Result<()>;

    async fn complete_job(&self, job_id: Uuid, message: &str) -> Result<()>;

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<SearchJob>>;
}

/// Source of accounts and proxy URLs at boot. The env-backed config is the
/// usual implementation; a database can stand in without touching callers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_active_credentials(&self) -> Result<Vec<Credential>>;
    async fn load_active_proxies(&self) -> Result<Vec<String>>;
}
