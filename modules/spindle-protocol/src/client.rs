//! The rotating protocol client.
//!
//! `ProtocolClient` ties the pieces together: every request flows through
//! the per-endpoint rate limiter, picks a credential and a proxy, carries
//! the web client's header set, and reports the outcome back to the pools.
//! Transport failures and server errors retry with jittered exponential
//! backoff; everything else maps to a typed [`ClientError`] the caller
//! can branch on. The [`SocialClient`] trait is the seam higher layers
//! program against.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use spindle_common::{Credential, FollowingPage, Tweet, TweetPage, User};

use crate::credentials::CredentialPool;
use crate::endpoints::{ProtocolRequest, SearchProduct, BASE_URL};
use crate::error::{ClientError, Result};
use crate::mutation_limit::{MutationLimiter, MutationLimits};
use crate::parse;
use crate::proxy::ProxyPool;
use crate::rate_limit::{RateLimitHeaders, RateLimiter, DEFAULT_RETRY_AFTER};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Tunables for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GraphQL base URL. Overridable for tests.
    pub base_url: String,
    pub timeout: Duration,
    /// Retries on top of the first attempt, for transport and 5xx failures.
    pub max_retries: u32,
    pub retry_wait_min: Duration,
    pub retry_wait_max: Duration,
    pub rate_limit_capacity: f64,
    pub rate_limit_refill_per_sec: f64,
    pub mutation_limits: MutationLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_wait_min: Duration::from_secs(1),
            retry_wait_max: Duration::from_secs(30),
            rate_limit_capacity: 50.0,
            rate_limit_refill_per_sec: 1.0,
            mutation_limits: MutationLimits::default(),
        }
    }
}

/// Executes [`ProtocolRequest`]s with credential rotation, proxy egress,
/// and adaptive rate limiting.
pub struct ProtocolClient {
    label: String,
    config: ClientConfig,
    credentials: Arc<CredentialPool>,
    proxies: Arc<ProxyPool>,
    rate_limiter: RateLimiter,
    mutation_limiter: MutationLimiter,
    // reqwest binds the proxy at build time, so one client per egress path.
    http_clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl ProtocolClient {
    pub fn new(
        label: impl Into<String>,
        config: ClientConfig,
        credentials: Arc<CredentialPool>,
        proxies: Arc<ProxyPool>,
    ) -> Self {
        let rate_limiter =
            RateLimiter::new(config.rate_limit_capacity, config.rate_limit_refill_per_sec);
        let mutation_limiter = MutationLimiter::new(config.mutation_limits.clone());
        Self {
            label: label.into(),
            config,
            credentials,
            proxies,
            rate_limiter,
            mutation_limiter,
            http_clients: Mutex::new(HashMap::new()),
        }
    }

    /// A client bound to exactly one account. This is the shape the account
    /// pool hands out, so per-account rate limit state stays isolated.
    pub fn for_credential(
        credential: Credential,
        config: ClientConfig,
        proxies: Arc<ProxyPool>,
    ) -> Self {
        let label = credential.id.clone();
        let pool = Arc::new(CredentialPool::new(vec![credential]));
        Self::new(label, config, pool, proxies)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn mutation_limiter(&self) -> &MutationLimiter {
        &self.mutation_limiter
    }

    async fn http_client(&self, proxy_url: Option<&str>) -> Result<reqwest::Client> {
        let key = proxy_url.unwrap_or_default().to_string();
        let mut clients = self.http_clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let mut builder = reqwest::Client::builder().timeout(self.config.timeout);
        if let Some(url) = proxy_url {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| ClientError::Proxy(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .retry_wait_min
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.retry_wait_max);
        let jitter = rand::rng().random_range(0.0..0.25);
        base.mul_f64(1.0 + jitter)
    }

    /// Execute a request through the full pipeline. The rate limiter gates
    /// entry; retries cover transport and 5xx failures only.
    pub async fn request(&self, request: &ProtocolRequest) -> Result<Value> {
        request.validate()?;
        let limiter_key = request.endpoint.limiter_key();
        self.rate_limiter.acquire(&limiter_key, 1.0).await?;

        let credential = self.credentials.get().await?;
        if let Some(kind) = request.mutation_kind() {
            self.mutation_limiter.acquire(&credential.id, kind).await?;
        }

        let mut attempt = 0;
        loop {
            match self.execute_once(request, &credential, &limiter_key).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let wait = self.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        endpoint = %request.endpoint.operation_name(),
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_once(
        &self,
        request: &ProtocolRequest,
        credential: &Credential,
        limiter_key: &str,
    ) -> Result<Value> {
        let proxy = self.proxies.get().await?;
        let http = self.http_client(proxy.as_deref()).await?;
        let url = format!(
            "{}/{}/{}",
            self.config.base_url,
            request.endpoint.query_id(),
            request.endpoint.operation_name()
        );

        let mut builder = if let Some(body) = &request.body {
            http.post(&url).json(body)
        } else {
            http.get(&url).query(&request.params)
        };
        builder = builder
            .header("authorization", format!("Bearer {}", credential.bearer_token))
            .header("x-csrf-token", &credential.csrf_token)
            .header(
                "cookie",
                format!(
                    "ct0={}; auth_token={}",
                    credential.csrf_token, credential.session_token
                ),
            )
            .header("user-agent", USER_AGENT)
            .header("accept", "*/*")
            .header("accept-language", "en-US,en;q=0.9")
            .header("x-twitter-active-user", "yes")
            .header("x-twitter-auth-type", "OAuth2Session")
            .header("x-twitter-client-language", "en")
            .header("referer", "https://x.com/");

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                self.proxies.mark_error(proxy.as_deref(), None).await;
                return Err(ClientError::Network(err.to_string()));
            }
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = response.status().as_u16();
        let rl_headers = RateLimitHeaders::from_headers(response.headers());
        let retry_after_header = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        match status {
            200 => {
                let body: Value = response.json().await?;
                if let Some(err) = parse::application_error(&body) {
                    self.record_application_error(limiter_key, credential, &err)
                        .await;
                    self.proxies.mark_success(proxy.as_deref(), latency_ms).await;
                    return Err(err);
                }
                self.rate_limiter
                    .on_rate_limit_headers(limiter_key, &rl_headers)
                    .await;
                self.rate_limiter.on_success(limiter_key).await;
                self.credentials.mark_success(&credential.id).await;
                self.proxies.mark_success(proxy.as_deref(), latency_ms).await;
                Ok(body)
            }
            429 => {
                let retry_after = retry_after_header.or_else(|| rl_headers.reset_delay());
                self.rate_limiter
                    .on_rate_limit_headers(limiter_key, &rl_headers)
                    .await;
                self.rate_limiter.on_rate_limit(limiter_key, retry_after).await;
                self.credentials
                    .mark_rate_limited(&credential.id, retry_after)
                    .await;
                self.proxies.mark_success(proxy.as_deref(), latency_ms).await;
                Err(ClientError::RateLimited {
                    retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER).as_secs(),
                })
            }
            401 => {
                self.credentials.mark_invalid(&credential.id).await;
                Err(ClientError::Authentication {
                    message: "credential rejected (401)".to_string(),
                    credential_id: Some(credential.id.clone()),
                })
            }
            403 => {
                self.credentials.mark_error(&credential.id).await;
                Err(ClientError::Authentication {
                    message: "request forbidden (403)".to_string(),
                    credential_id: Some(credential.id.clone()),
                })
            }
            status if status >= 500 => {
                self.proxies.mark_error(proxy.as_deref(), None).await;
                self.credentials.mark_error(&credential.id).await;
                Err(ClientError::scraping_status(
                    format!("server error ({status})"),
                    status,
                ))
            }
            status => {
                self.credentials.mark_error(&credential.id).await;
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::scraping_status(
                    format!("unexpected status {status}: {}", truncate(&body, 200)),
                    status,
                ))
            }
        }
    }

    /// Pool bookkeeping for errors the platform reports inside a 200 body.
    async fn record_application_error(
        &self,
        limiter_key: &str,
        credential: &Credential,
        err: &ClientError,
    ) {
        match err {
            ClientError::RateLimited { .. } => {
                self.rate_limiter
                    .on_rate_limit(limiter_key, err.retry_after())
                    .await;
                self.credentials
                    .mark_rate_limited(&credential.id, err.retry_after())
                    .await;
            }
            ClientError::Authentication { .. } => {
                self.credentials.mark_invalid(&credential.id).await;
            }
            _ => {
                self.credentials.mark_error(&credential.id).await;
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Everything higher layers need from the platform, one method per
/// operation. The crawler and pipeline depend on this trait rather than
/// the concrete client so tests can script responses.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Stable identifier of the account behind this client.
    fn credential_id(&self) -> &str;

    async fn user_by_handle(&self, handle: &str) -> Result<User>;
    async fn user_by_id(&self, user_id: &str) -> Result<User>;
    async fn following_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<FollowingPage>;
    async fn followers_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<FollowingPage>;
    async fn tweets_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
        include_replies: bool,
    ) -> Result<TweetPage>;
    /// The focal tweet plus its visible replies.
    async fn tweet_detail(&self, tweet_id: &str) -> Result<(Tweet, Vec<Tweet>)>;
    async fn tweet_replies(&self, tweet_id: &str) -> Result<Vec<Tweet>>;
    async fn search_people(
        &self,
        query: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<(Vec<User>, Option<String>)>;
    async fn search_tweets(
        &self,
        query: &str,
        count: u32,
        cursor: Option<&str>,
        product: SearchProduct,
    ) -> Result<(Vec<Tweet>, Option<String>)>;

    /// Post a tweet, returning the new tweet id.
    async fn post_tweet(
        &self,
        text: &str,
        reply_to_tweet_id: Option<&str>,
        quote_tweet_id: Option<&str>,
        media_ids: &[String],
    ) -> Result<String>;
    async fn delete_tweet(&self, tweet_id: &str) -> Result<()>;
    async fn like_tweet(&self, tweet_id: &str) -> Result<()>;
    async fn unlike_tweet(&self, tweet_id: &str) -> Result<()>;
    async fn retweet(&self, tweet_id: &str) -> Result<()>;
    async fn unretweet(&self, tweet_id: &str) -> Result<()>;
}

#[async_trait]
impl SocialClient for ProtocolClient {
    fn credential_id(&self) -> &str {
        &self.label
    }

    async fn user_by_handle(&self, handle: &str) -> Result<User> {
        let body = self.request(&ProtocolRequest::user_by_handle(handle)).await?;
        parse::parse_user_lookup(&body)
    }

    async fn user_by_id(&self, user_id: &str) -> Result<User> {
        let body = self.request(&ProtocolRequest::user_by_id(user_id)).await?;
        parse::parse_user_lookup(&body)
    }

    async fn following_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<FollowingPage> {
        let body = self
            .request(&ProtocolRequest::following(user_id, count, cursor))
            .await?;
        Ok(parse::parse_following_page(&body))
    }

    async fn followers_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<FollowingPage> {
        let body = self
            .request(&ProtocolRequest::followers(user_id, count, cursor))
            .await?;
        Ok(parse::parse_following_page(&body))
    }

    async fn tweets_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
        include_replies: bool,
    ) -> Result<TweetPage> {
        let body = self
            .request(&ProtocolRequest::user_tweets(
                user_id,
                count,
                cursor,
                include_replies,
            ))
            .await?;
        Ok(parse::parse_tweet_page(&body))
    }

    async fn tweet_detail(&self, tweet_id: &str) -> Result<(Tweet, Vec<Tweet>)> {
        let body = self.request(&ProtocolRequest::tweet_detail(tweet_id)).await?;
        parse::parse_tweet_detail(&body, tweet_id)
    }

    async fn tweet_replies(&self, tweet_id: &str) -> Result<Vec<Tweet>> {
        let (_, replies) = self.tweet_detail(tweet_id).await?;
        Ok(replies)
    }

    async fn search_people(
        &self,
        query: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<(Vec<User>, Option<String>)> {
        let body = self
            .request(&ProtocolRequest::search(
                query,
                count,
                cursor,
                SearchProduct::People,
            ))
            .await?;
        Ok(parse::parse_people_search(&body))
    }

    async fn search_tweets(
        &self,
        query: &str,
        count: u32,
        cursor: Option<&str>,
        product: SearchProduct,
    ) -> Result<(Vec<Tweet>, Option<String>)> {
        let body = self
            .request(&ProtocolRequest::search(query, count, cursor, product))
            .await?;
        Ok(parse::parse_tweet_search(&body))
    }

    async fn post_tweet(
        &self,
        text: &str,
        reply_to_tweet_id: Option<&str>,
        quote_tweet_id: Option<&str>,
        media_ids: &[String],
    ) -> Result<String> {
        let body = self
            .request(&ProtocolRequest::create_tweet(
                text,
                reply_to_tweet_id,
                quote_tweet_id,
                media_ids,
            ))
            .await?;
        body["data"]["create_tweet"]["tweet_results"]["result"]["rest_id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ClientError::Parse("create_tweet response has no rest_id".to_string()))
    }

    async fn delete_tweet(&self, tweet_id: &str) -> Result<()> {
        self.request(&ProtocolRequest::delete_tweet(tweet_id)).await?;
        Ok(())
    }

    async fn like_tweet(&self, tweet_id: &str) -> Result<()> {
        self.request(&ProtocolRequest::favorite_tweet(tweet_id)).await?;
        Ok(())
    }

    async fn unlike_tweet(&self, tweet_id: &str) -> Result<()> {
        self.request(&ProtocolRequest::unfavorite_tweet(tweet_id))
            .await?;
        Ok(())
    }

    async fn retweet(&self, tweet_id: &str) -> Result<()> {
        self.request(&ProtocolRequest::create_retweet(tweet_id)).await?;
        Ok(())
    }

    async fn unretweet(&self, tweet_id: &str) -> Result<()> {
        self.request(&ProtocolRequest::delete_retweet(tweet_id)).await?;
        Ok(())
    }
}

/// Cursor-driven pager over a user's following list. Restartable: seed it
/// with a saved cursor and it resumes mid-listing.
pub struct FollowingPager {
    client: Arc<dyn SocialClient>,
    user_id: String,
    page_size: u32,
    cursor: Option<String>,
    done: bool,
}

impl FollowingPager {
    pub fn new(client: Arc<dyn SocialClient>, user_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            client,
            user_id: user_id.into(),
            page_size,
            cursor: None,
            done: false,
        }
    }

    pub fn resume(
        client: Arc<dyn SocialClient>,
        user_id: impl Into<String>,
        page_size: u32,
        cursor: Option<String>,
    ) -> Self {
        Self {
            client,
            user_id: user_id.into(),
            page_size,
            cursor,
            done: false,
        }
    }

    /// Checkpoint for resuming this listing later.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_more(&self) -> bool {
        !self.done
    }

    /// Next page of users, or `None` once the listing is exhausted. An
    /// empty page or a missing bottom cursor both end the listing.
    pub async fn next_page(&mut self) -> Result<Option<Vec<User>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .client
            .following_page(&self.user_id, self.page_size, self.cursor.as_deref())
            .await?;
        if page.users.is_empty() {
            self.done = true;
            return Ok(None);
        }
        match page.next_cursor {
            Some(cursor) => self.cursor = Some(cursor),
            None => self.done = true,
        }
        Ok(Some(page.users))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path_regex, query_param_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential(id: &str) -> Credential {
        Credential {
            id: id.to_string(),
            bearer_token: format!("bearer-{id}"),
            csrf_token: format!("csrf-{id}"),
            session_token: format!("session-{id}"),
        }
    }

    fn test_client(server: &MockServer, ids: &[&str]) -> ProtocolClient {
        let config = ClientConfig {
            base_url: server.uri(),
            max_retries: 2,
            retry_wait_min: Duration::from_millis(1),
            retry_wait_max: Duration::from_millis(5),
            ..Default::default()
        };
        let pool = Arc::new(CredentialPool::new(
            ids.iter().map(|id| credential(id)).collect(),
        ));
        let proxies = Arc::new(ProxyPool::new(Vec::new(), true));
        ProtocolClient::new("test", config, pool, proxies)
    }

    fn user_body(id: &str, handle: &str) -> Value {
        json!({
            "data": { "user": { "result": {
                "__typename": "User",
                "rest_id": id,
                "legacy": {
                    "screen_name": handle,
                    "name": handle,
                    "followers_count": 7,
                    "friends_count": 3,
                    "statuses_count": 1,
                }
            } } }
        })
    }

    #[tokio::test]
    async fn lookup_sends_auth_headers_and_parses_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/[^/]+/UserByScreenName$"))
            .and(header("authorization", "Bearer bearer-a"))
            .and(header("x-csrf-token", "csrf-a"))
            .and(header("cookie", "ct0=csrf-a; auth_token=session-a"))
            .and(query_param_contains("variables", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body("123", "alice")))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let user = client.user_by_handle("alice").await.unwrap();
        assert_eq!(user.id, "123");
        assert_eq!(user.handle, "alice");
    }

    #[tokio::test]
    async fn rate_limit_response_sidelines_the_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", "120"),
            )
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let err = client.user_by_handle("alice").await.unwrap_err();
        match err {
            ClientError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 120),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        // The only credential is now waiting out its window.
        assert_eq!(client.credentials.available_count().await, 0);
    }

    #[tokio::test]
    async fn unauthorized_invalidates_the_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let err = client.user_by_handle("alice").await.unwrap_err();
        assert!(matches!(err, ClientError::Authentication { .. }));

        // Dead pool now fails fast without touching the wire.
        let err = client.user_by_handle("alice").await.unwrap_err();
        assert!(matches!(err, ClientError::Authentication { .. }));
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_body("9", "bob")))
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let user = client.user_by_handle("bob").await.unwrap();
        assert_eq!(user.handle, "bob");
    }

    #[tokio::test]
    async fn application_error_in_200_body_maps_to_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "code": 63, "message": "User has been suspended" }]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let err = client.user_by_handle("ghost").await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn post_tweet_returns_new_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/[^/]+/CreateTweet$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "create_tweet": { "tweet_results": { "result": {
                    "rest_id": "555"
                } } } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let id = client.post_tweet("hello", None, None, &[]).await.unwrap();
        assert_eq!(id, "555");
    }

    #[tokio::test]
    async fn pager_walks_cursors_to_exhaustion() {
        let server = MockServer::start().await;

        fn page_body(users: &[(&str, &str)], next: Option<&str>) -> Value {
            let mut entries: Vec<Value> = users
                .iter()
                .map(|(id, handle)| {
                    json!({
                        "entryId": format!("user-{id}"),
                        "content": { "itemContent": { "user_results": { "result": {
                            "__typename": "User",
                            "rest_id": id,
                            "legacy": { "screen_name": handle, "name": handle }
                        } } } }
                    })
                })
                .collect();
            if let Some(next) = next {
                entries.push(json!({
                    "entryId": "cursor-bottom-0",
                    "content": { "value": next }
                }));
            }
            json!({
                "data": { "user": { "result": { "timeline": { "timeline": {
                    "instructions": [{ "type": "TimelineAddEntries", "entries": entries }]
                } } } } }
            })
        }

        Mock::given(method("GET"))
            .and(path_regex(r"^/[^/]+/Following$"))
            .and(query_param_contains("variables", "page-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page_body(&[("3", "carol")], None)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/[^/]+/Following$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                &[("1", "alice"), ("2", "bob")],
                Some("page-2"),
            )))
            .mount(&server)
            .await;

        let client: Arc<dyn SocialClient> = Arc::new(test_client(&server, &["a"]));
        let mut pager = FollowingPager::new(client, "42", 2);

        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(pager.cursor(), Some("page-2"));

        let second = pager.next_page().await.unwrap().unwrap();
        assert_eq!(second[0].handle, "carol");
        assert!(!pager.has_more());
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn followers_listing_parses_users_and_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/[^/]+/Followers$"))
            .and(query_param_contains("variables", "fans-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "user": { "result": { "timeline": { "timeline": {
                    "instructions": [{ "type": "TimelineAddEntries", "entries": [
                        {
                            "entryId": "user-7",
                            "content": { "itemContent": { "user_results": { "result": {
                                "__typename": "User",
                                "rest_id": "7",
                                "legacy": { "screen_name": "dave", "name": "dave" }
                            } } } }
                        },
                        { "entryId": "cursor-bottom-0", "content": { "value": "fans-3" } }
                    ] }]
                } } } } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let page = client
            .followers_page("42", 20, Some("fans-2"))
            .await
            .unwrap();
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.users[0].handle, "dave");
        assert_eq!(page.next_cursor.as_deref(), Some("fans-3"));
    }

    #[tokio::test]
    async fn tweet_search_pages_through_results() {
        let server = MockServer::start().await;

        fn search_body(tweets: &[(&str, &str, &str)], next: Option<&str>) -> Value {
            let mut entries: Vec<Value> = tweets
                .iter()
                .map(|(id, author_id, text)| {
                    json!({
                        "entryId": format!("tweet-{id}"),
                        "content": { "itemContent": {
                            "itemType": "TimelineTweet",
                            "tweet_results": { "result": {
                                "__typename": "Tweet",
                                "rest_id": id,
                                "core": { "user_results": { "result": {
                                    "legacy": { "screen_name": "poster" }
                                } } },
                                "legacy": {
                                    "user_id_str": author_id,
                                    "full_text": text,
                                    "reply_count": 1,
                                    "favorite_count": 2
                                }
                            } }
                        } }
                    })
                })
                .collect();
            if let Some(next) = next {
                entries.push(json!({
                    "entryId": "cursor-bottom-0",
                    "content": { "cursorType": "Bottom", "value": next }
                }));
            }
            json!({
                "data": { "search_by_raw_query": { "search_timeline": { "timeline": {
                    "instructions": [{ "type": "TimelineAddEntries", "entries": entries }]
                } } } }
            })
        }

        Mock::given(method("GET"))
            .and(path_regex(r"^/[^/]+/SearchTimeline$"))
            .and(query_param_contains("variables", "scroll-2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(search_body(&[("30", "3", "late entry")], None)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/[^/]+/SearchTimeline$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
                &[("10", "1", "rust is fast"), ("20", "2", "learning rust")],
                Some("scroll-2"),
            )))
            .mount(&server)
            .await;

        let client = test_client(&server, &["a"]);
        let (tweets, cursor) = client
            .search_tweets("rust", 20, None, SearchProduct::Latest)
            .await
            .unwrap();
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0].id, "10");
        assert_eq!(tweets[0].author_id, "1");
        assert_eq!(tweets[0].author_handle, "poster");
        assert_eq!(tweets[1].text, "learning rust");
        assert_eq!(cursor.as_deref(), Some("scroll-2"));

        let (tweets, cursor) = client
            .search_tweets("rust", 20, cursor.as_deref(), SearchProduct::Latest)
            .await
            .unwrap();
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].text, "late entry");
        assert!(cursor.is_none());
    }
}
