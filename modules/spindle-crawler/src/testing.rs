// Test mock for the SocialClient boundary.
//
// MockClient serves HashMap-scripted responses with cursor paging, plus
// injectable failures keyed by operation. Unregistered listings return
// empty pages so BFS leaves need no setup; unregistered user lookups
// return the platform's not-found error.
//
// Enables deterministic crawler and pipeline tests: no network, no
// credentials.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use spindle_common::{FollowingPage, Tweet, TweetPage, User};
use spindle_protocol::error::ClientError;
use spindle_protocol::{Result, SearchProduct, SocialClient};

/// Failure to inject for a scripted operation.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedError {
    RateLimited(u64),
    Authentication,
    NotFound,
    Suspended,
    Network,
    ServerError,
}

impl ScriptedError {
    fn to_error(self) -> ClientError {
        match self {
            Self::RateLimited(secs) => ClientError::RateLimited {
                retry_after_secs: secs,
            },
            Self::Authentication => ClientError::authentication("scripted auth failure"),
            Self::NotFound => ClientError::scraping_code("User not found", 50),
            Self::Suspended => ClientError::scraping_code("User has been suspended", 63),
            Self::Network => ClientError::Network("scripted connection reset".to_string()),
            Self::ServerError => ClientError::scraping_status("scripted server error", 503),
        }
    }
}

struct Script {
    error: ScriptedError,
    /// `None` fails forever; `Some(n)` fails the next n calls.
    remaining: Option<u32>,
}

#[derive(Default)]
struct CallLog {
    calls: Vec<String>,
    tweet_counter: u64,
}

/// Scripted [`SocialClient`]. Builder pattern: `.with_user()`,
/// `.with_following()`, `.fail_handle()`, etc.
pub struct MockClient {
    id: String,
    users_by_handle: HashMap<String, User>,
    users_by_id: HashMap<String, User>,
    following: HashMap<String, Vec<User>>,
    followers: HashMap<String, Vec<User>>,
    tweets: HashMap<String, Vec<Tweet>>,
    replies: HashMap<String, Vec<Tweet>>,
    tweet_details: HashMap<String, Tweet>,
    people_search: HashMap<String, Vec<User>>,
    scripts: Mutex<HashMap<String, Script>>,
    log: Mutex<CallLog>,
}

impl MockClient {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            users_by_handle: HashMap::new(),
            users_by_id: HashMap::new(),
            following: HashMap::new(),
            followers: HashMap::new(),
            tweets: HashMap::new(),
            replies: HashMap::new(),
            tweet_details: HashMap::new(),
            people_search: HashMap::new(),
            scripts: Mutex::new(HashMap::new()),
            log: Mutex::new(CallLog::default()),
        }
    }

    /// A minimal user with sensible defaults for test graphs.
    pub fn user(id: &str, handle: &str) -> User {
        User {
            id: id.to_string(),
            handle: handle.to_string(),
            display_name: handle.to_string(),
            ..Default::default()
        }
    }

    /// A minimal tweet authored by `author_id`.
    pub fn tweet(id: &str, author_id: &str, text: &str) -> Tweet {
        Tweet {
            id: id.to_string(),
            author_id: author_id.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users_by_handle.insert(user.handle.clone(), user.clone());
        self.users_by_id.insert(user.id.clone(), user);
        self
    }

    pub fn with_following(mut self, user_id: &str, users: Vec<User>) -> Self {
        self.following.insert(user_id.to_string(), users);
        self
    }

    pub fn with_followers(mut self, user_id: &str, users: Vec<User>) -> Self {
        self.followers.insert(user_id.to_string(), users);
        self
    }

    pub fn with_tweets(mut self, user_id: &str, tweets: Vec<Tweet>) -> Self {
        self.tweets.insert(user_id.to_string(), tweets);
        self
    }

    pub fn with_replies(mut self, tweet: Tweet, replies: Vec<Tweet>) -> Self {
        self.replies.insert(tweet.id.clone(), replies);
        self.tweet_details.insert(tweet.id.clone(), tweet);
        self
    }

    pub fn with_people_search(mut self, query: &str, users: Vec<User>) -> Self {
        self.people_search.insert(query.to_string(), users);
        self
    }

    fn script(self, key: String, error: ScriptedError, remaining: Option<u32>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(key, Script { error, remaining });
        }
        self
    }

    pub fn fail_handle(self, handle: &str, error: ScriptedError) -> Self {
        self.script(format!("handle:{handle}"), error, None)
    }

    pub fn fail_following(self, user_id: &str, error: ScriptedError) -> Self {
        self.script(format!("following:{user_id}"), error, None)
    }

    pub fn fail_following_times(self, user_id: &str, error: ScriptedError, times: u32) -> Self {
        self.script(format!("following:{user_id}"), error, Some(times))
    }

    pub fn fail_tweets(self, user_id: &str, error: ScriptedError) -> Self {
        self.script(format!("tweets:{user_id}"), error, None)
    }

    pub fn fail_search(self, query: &str, error: ScriptedError) -> Self {
        self.script(format!("search:{query}"), error, None)
    }

    /// Operations performed, in order, e.g. `"like:555"`.
    pub fn calls(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|log| log.calls.clone())
            .unwrap_or_default()
    }

    fn check_script(&self, key: &str) -> Result<()> {
        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| ClientError::Network("mock lock poisoned".to_string()))?;
        if let Some(script) = scripts.get_mut(key) {
            match &mut script.remaining {
                None => return Err(script.error.to_error()),
                Some(n) => {
                    let error = script.error.to_error();
                    *n -= 1;
                    if *n == 0 {
                        scripts.remove(key);
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn record(&self, call: String) {
        if let Ok(mut log) = self.log.lock() {
            log.calls.push(call);
        }
    }

    fn page<T: Clone>(items: Option<&Vec<T>>, count: u32, cursor: Option<&str>) -> (Vec<T>, Option<String>) {
        let items = match items {
            Some(items) => items,
            None => return (Vec::new(), None),
        };
        let offset = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (offset + count as usize).min(items.len());
        let page = items[offset..end].to_vec();
        let next = (end < items.len()).then(|| end.to_string());
        (page, next)
    }
}

#[async_trait]
impl SocialClient for MockClient {
    fn credential_id(&self) -> &str {
        &self.id
    }

    async fn user_by_handle(&self, handle: &str) -> Result<User> {
        self.record(format!("handle:{handle}"));
        self.check_script(&format!("handle:{handle}"))?;
        self.users_by_handle
            .get(handle)
            .cloned()
            .ok_or_else(|| ClientError::scraping_code(format!("User not found: {handle}"), 50))
    }

    async fn user_by_id(&self, user_id: &str) -> Result<User> {
        self.check_script(&format!("user:{user_id}"))?;
        self.users_by_id
            .get(user_id)
            .cloned()
            .ok_or_else(|| ClientError::scraping_code(format!("User not found: {user_id}"), 50))
    }

    async fn following_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<FollowingPage> {
        self.record(format!("following:{user_id}"));
        self.check_script(&format!("following:{user_id}"))?;
        let (users, next_cursor) = Self::page(self.following.get(user_id), count, cursor);
        Ok(FollowingPage {
            users,
            next_cursor,
            previous_cursor: None,
        })
    }

    async fn followers_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<FollowingPage> {
        self.check_script(&format!("followers:{user_id}"))?;
        let (users, next_cursor) = Self::page(self.followers.get(user_id), count, cursor);
        Ok(FollowingPage {
            users,
            next_cursor,
            previous_cursor: None,
        })
    }

    async fn tweets_page(
        &self,
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
        _include_replies: bool,
    ) -> Result<TweetPage> {
        self.record(format!("tweets:{user_id}"));
        self.check_script(&format!("tweets:{user_id}"))?;
        let (tweets, next_cursor) = Self::page(self.tweets.get(user_id), count, cursor);
        Ok(TweetPage {
            tweets,
            next_cursor,
        })
    }

    async fn tweet_detail(&self, tweet_id: &str) -> Result<(Tweet, Vec<Tweet>)> {
        let focal = self
            .tweet_details
            .get(tweet_id)
            .cloned()
            .ok_or_else(|| ClientError::scraping(format!("Tweet not found: {tweet_id}")))?;
        Ok((focal, self.replies.get(tweet_id).cloned().unwrap_or_default()))
    }

    async fn tweet_replies(&self, tweet_id: &str) -> Result<Vec<Tweet>> {
        self.check_script(&format!("replies:{tweet_id}"))?;
        Ok(self.replies.get(tweet_id).cloned().unwrap_or_default())
    }

    async fn search_people(
        &self,
        query: &str,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<(Vec<User>, Option<String>)> {
        self.check_script(&format!("search:{query}"))?;
        Ok(Self::page(self.people_search.get(query), count, cursor))
    }

    async fn search_tweets(
        &self,
        query: &str,
        _count: u32,
        _cursor: Option<&str>,
        _product: SearchProduct,
    ) -> Result<(Vec<Tweet>, Option<String>)> {
        self.check_script(&format!("search:{query}"))?;
        Ok((Vec::new(), None))
    }

    async fn post_tweet(
        &self,
        text: &str,
        reply_to_tweet_id: Option<&str>,
        _quote_tweet_id: Option<&str>,
        _media_ids: &[String],
    ) -> Result<String> {
        self.check_script("mutation")?;
        let mut log = self
            .log
            .lock()
            .map_err(|_| ClientError::Network("mock lock poisoned".to_string()))?;
        log.tweet_counter += 1;
        let id = format!("tweet-{}", log.tweet_counter);
        match reply_to_tweet_id {
            Some(parent) => log.calls.push(format!("reply:{parent}:{text}")),
            None => log.calls.push(format!("post:{text}")),
        }
        Ok(id)
    }

    async fn delete_tweet(&self, tweet_id: &str) -> Result<()> {
        self.check_script("mutation")?;
        self.record(format!("delete:{tweet_id}"));
        Ok(())
    }

    async fn like_tweet(&self, tweet_id: &str) -> Result<()> {
        self.check_script("mutation")?;
        self.record(format!("like:{tweet_id}"));
        Ok(())
    }

    async fn unlike_tweet(&self, tweet_id: &str) -> Result<()> {
        self.check_script("mutation")?;
        self.record(format!("unlike:{tweet_id}"));
        Ok(())
    }

    async fn retweet(&self, tweet_id: &str) -> Result<()> {
        self.check_script("mutation")?;
        self.record(format!("retweet:{tweet_id}"));
        Ok(())
    }

    async fn unretweet(&self, tweet_id: &str) -> Result<()> {
        self.check_script("mutation")?;
        self.record(format!("unretweet:{tweet_id}"));
        Ok(())
    }
}
