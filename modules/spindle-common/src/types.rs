use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One authentication bundle for the remote platform: a logical account.
///
/// The bearer token is shared across the web client; the CSRF token and
/// session token are what actually identify the account. Credentials are
/// immutable; per-credential health lives in the pool that owns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub bearer_token: String,
    pub csrf_token: String,
    pub session_token: String,
}

/// Platform verification tier attached to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    #[default]
    None,
    Blue,
    Business,
    Government,
}

impl VerificationKind {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "blue" => Self::Blue,
            "business" => Self::Business,
            "government" => Self::Government,
            _ => Self::None,
        }
    }
}

impl fmt::Display for VerificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Blue => "blue",
            Self::Business => "business",
            Self::Government => "government",
        };
        write!(f, "{s}")
    }
}

/// A profile discovered on the platform.
///
/// `id` is the platform's numeric rest id as a string; `handle` is the
/// @-name without the @. Counts are snapshots from the moment of scraping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub bio: String,
    pub location: String,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub followers_count: u64,
    pub following_count: u64,
    pub tweet_count: u64,
    pub listed_count: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub verification: VerificationKind,
    pub protected: bool,
    pub blue_verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    /// Direct media URL; for videos, the highest-bitrate MP4 variant.
    pub url: String,
    pub preview_url: Option<String>,
}

/// A post, with engagement counts and entity extractions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub author_id: String,
    pub author_handle: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub reply_count: u64,
    pub retweet_count: u64,
    pub like_count: u64,
    pub quote_count: u64,
    pub view_count: Option<u64>,
    pub bookmark_count: u64,
    pub is_retweet: bool,
    pub is_quote: bool,
    pub is_reply: bool,
    pub retweeted_tweet_id: Option<String>,
    pub quoted_tweet_id: Option<String>,
    pub in_reply_to_tweet_id: Option<String>,
    pub in_reply_to_user_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Client the post was made from, e.g. "Twitter for iPhone".
    pub source: Option<String>,
    pub lang: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

/// One page of a following/followers listing.
#[derive(Debug, Clone, Default)]
pub struct FollowingPage {
    pub users: Vec<User>,
    pub next_cursor: Option<String>,
    pub previous_cursor: Option<String>,
}

/// One page of a user's timeline.
#[derive(Debug, Clone, Default)]
pub struct TweetPage {
    pub tweets: Vec<Tweet>,
    pub next_cursor: Option<String>,
}

/// All tweets collected for one user in a scrape pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetBatch {
    pub user_id: String,
    pub handle: String,
    pub tweets: Vec<Tweet>,
    pub scraped_at: DateTime<Utc>,
}

/// Snapshot emitted after each node the crawler completes.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlProgress {
    pub current_user_id: String,
    pub current_handle: String,
    pub current_depth: u32,
    pub queue_size: usize,
    pub visited_count: usize,
    pub edges_found: u64,
    pub total_edges: u64,
}

/// Summary of one crawl run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    pub users_visited: usize,
    pub edges_discovered: u64,
    pub max_depth_reached: u32,
    pub errors: Vec<String>,
}

/// Influence ranking entry for one discovered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceScore {
    pub user_id: String,
    pub score: f64,
    pub in_degree: u32,
    pub out_degree: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Pipeline stages in execution order. Persisted with every progress write
/// so external pollers can render job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Initializing,
    ResolvingSeeds,
    SearchingSeeds,
    BuildingGraph,
    CrawlingCommenters,
    CalculatingScores,
    Finalizing,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::ResolvingSeeds => "resolving_seeds",
            Self::SearchingSeeds => "searching_seeds",
            Self::BuildingGraph => "building_graph",
            Self::CrawlingCommenters => "crawling_commenters",
            Self::CalculatingScores => "calculating_scores",
            Self::Finalizing => "finalizing",
        };
        write!(f, "{s}")
    }
}

/// Parameters an external caller submits to create a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub seed_handles: Vec<String>,
    pub crawl_depth: u32,
    #[serde(default)]
    pub include_commenters: bool,
    #[serde(default = "default_max_users_per_keyword")]
    pub max_users_per_keyword: u32,
}

impl Default for JobRequest {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            seed_handles: Vec::new(),
            crawl_depth: 0,
            include_commenters: false,
            max_users_per_keyword: default_max_users_per_keyword(),
        }
    }
}

fn default_max_users_per_keyword() -> u32 {
    100
}

/// A discovery job as stored and mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub stage: JobStage,
    pub percent: u8,
    pub message: String,
    pub request: JobRequest,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SearchJob {
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            stage: JobStage::Initializing,
            percent: 0,
            message: String::new(),
            request,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_kind_parses_loosely() {
        assert_eq!(VerificationKind::from_str_loose("Blue"), VerificationKind::Blue);
        assert_eq!(
            VerificationKind::from_str_loose("government"),
            VerificationKind::Government
        );
        assert_eq!(VerificationKind::from_str_loose("celebrity"), VerificationKind::None);
    }

    #[test]
    fn job_status_round_trips_display() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str_loose(&status.to_string()), Some(status));
        }
    }

    #[test]
    fn new_job_starts_pending_at_zero() {
        let job = SearchJob::new(JobRequest {
            keywords: vec!["rust".into()],
            crawl_depth: 2,
            ..Default::default()
        });
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.percent, 0);
        assert!(job.started_at.is_none());
        assert!(!job.status.is_terminal());
    }
}
