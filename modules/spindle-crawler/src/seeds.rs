//! Seed user collection: explicit handles plus keyword search.
//!
//! Seeds are the depth-0 entry points of a crawl. Handle resolution
//! rotates accounts on rate limits and records terminal failures instead
//! of aborting; keyword search fans out over the pool. Duplicates across
//! handles and keywords collapse to one seed.

use std::collections::HashSet;
use std::sync::Arc;

use spindle_common::User;
use spindle_protocol::error::ClientError;

use crate::accounts::AccountPool;

/// Collected seeds plus whatever went wrong along the way. Both can be
/// non-empty; zero users with errors means the caller decides whether the
/// run still counts.
#[derive(Debug, Default)]
pub struct SeedOutcome {
    pub users: Vec<User>,
    pub errors: Vec<String>,
}

impl SeedOutcome {
    fn push_unique(&mut self, user: User, seen: &mut HashSet<String>) {
        if seen.insert(user.id.clone()) {
            self.users.push(user);
        }
    }
}

pub struct SeedCollector {
    accounts: Arc<AccountPool>,
}

impl SeedCollector {
    pub fn new(accounts: Arc<AccountPool>) -> Self {
        Self { accounts }
    }

    /// Resolve explicit handles to users. A leading `@` is tolerated.
    pub async fn resolve_handles(&self, handles: &[String]) -> SeedOutcome {
        let mut outcome = SeedOutcome::default();
        let mut seen = HashSet::new();
        for raw in handles {
            let handle = raw.trim().trim_start_matches('@');
            if handle.is_empty() {
                continue;
            }
            match self.resolve_one(handle).await {
                Ok(user) => outcome.push_unique(user, &mut seen),
                Err(err) => {
                    tracing::warn!(handle = %handle, error = %err, "Seed handle failed");
                    outcome.errors.push(format!("@{handle}: {err}"));
                }
            }
        }
        outcome
    }

    async fn resolve_one(&self, handle: &str) -> Result<User, ClientError> {
        let max_rotations = self.accounts.len().await.max(1);
        let mut rotations = 0;
        loop {
            let client = self.accounts.get().await?;
            let account_id = client.credential_id().to_string();
            match client.user_by_handle(handle).await {
                Ok(user) => {
                    self.accounts.mark_success(&account_id).await;
                    return Ok(user);
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

    /// Find seed candidates by people search, one fan-out per keyword.
    pub async fn search_keywords(&self, keywords: &[String], max_per_keyword: u32) -> SeedOutcome {
        let mut outcome = SeedOutcome::default();
        let mut seen = HashSet::new();
        let search = self.accounts.concurrent_search(keywords, max_per_keyword).await;
        outcome.errors = search.errors;
        for keyword in keywords {
            let Some(users) = search.users_by_keyword.get(keyword) else {
                continue;
            };
            for user in users {
                outcome.push_unique(user.clone(), &mut seen);
            }
        }
        outcome
    }

    /// Handles first, then keyword hits, deduplicated across both.
    pub async fn collect(
        &self,
        handles: &[String],
        keywords: &[String],
        max_per_keyword: u32,
    ) -> SeedOutcome {
        let mut outcome = self.resolve_handles(handles).await;
        let mut seen: HashSet<String> = outcome.users.iter().map(|u| u.id.clone()).collect();

        let searched = self.search_keywords(keywords, max_per_keyword).await;
        for user in searched.users {
            outcome.push_unique(user, &mut seen);
        }
        outcome.errors.extend(searched.errors);

        tracing::info!(
            seeds = outcome.users.len(),
            errors = outcome.errors.len(),
            "Seed collection finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use spindle_protocol::SocialClient;

    use crate::testing::{MockClient, ScriptedError};

    fn pool_of(clients: Vec<MockClient>) -> Arc<AccountPool> {
        Arc::new(AccountPool::new(
            clients
                .into_iter()
                .map(|c| Arc::new(c) as Arc<dyn SocialClient>)
                .collect(),
        ))
    }

    #[tokio::test]
    async fn resolves_handles_and_strips_at_sign() {
        let client = MockClient::new("a").with_user(MockClient::user("1", "alice"));
        let collector = SeedCollector::new(pool_of(vec![client]));

        let outcome = collector
            .resolve_handles(&["@alice".to_string(), "ghost".to_string()])
            .await;
        assert_eq!(outcome.users.len(), 1);
        assert_eq!(outcome.users[0].id, "1");
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("@ghost:"));
    }

    #[tokio::test]
    async fn handle_resolution_rotates_past_a_rate_limit() {
        let limited = MockClient::new("a").fail_handle("alice", ScriptedError::RateLimited(60));
        let healthy = MockClient::new("b").with_user(MockClient::user("1", "alice"));
        let collector = SeedCollector::new(pool_of(vec![limited, healthy]));

        let outcome = collector.resolve_handles(&["alice".to_string()]).await;
        assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);
        assert_eq!(outcome.users.len(), 1);
    }

    #[tokio::test]
    async fn keyword_hits_deduplicate_across_keywords() {
        let client = MockClient::new("a")
            .with_people_search("rust", vec![MockClient::user("1", "alice"), MockClient::user("2", "bob")])
            .with_people_search("tokio", vec![MockClient::user("2", "bob"), MockClient::user("3", "carol")]);
        let collector = SeedCollector::new(pool_of(vec![client]));

        let outcome = collector
            .search_keywords(&["rust".to_string(), "tokio".to_string()], 50)
            .await;
        assert_eq!(outcome.users.len(), 3);
    }

    #[tokio::test]
    async fn collect_merges_handles_and_search_without_duplicates() {
        let client = MockClient::new("a")
            .with_user(MockClient::user("1", "alice"))
            .with_people_search("rust", vec![MockClient::user("1", "alice"), MockClient::user("2", "bob")]);
        let collector = SeedCollector::new(pool_of(vec![client]));

        let outcome = collector
            .collect(&["alice".to_string()], &["rust".to_string()], 50)
            .await;
        let ids: Vec<&str> = outcome.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn exhausted_pool_records_an_error_per_handle() {
        let limited = MockClient::new("a").fail_handle("alice", ScriptedError::RateLimited(600));
        let collector = SeedCollector::new(pool_of(vec![limited]));

        let outcome = collector.resolve_handles(&["alice".to_string()]).await;
        assert!(outcome.users.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("Rate limited"));
    }
}
