//! Typed parsing of GraphQL response trees.
//!
//! The platform nests every entity layers deep inside timeline
//! instructions; the important fields live under a `legacy` object at the
//! leaves. These functions navigate with `Value` and build the domain
//! types at the bottom, tolerating missing fields (counts default to zero,
//! timestamps to `None`) because the response shape drifts.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use spindle_common::{
    FollowingPage, MediaItem, MediaKind, Tweet, TweetPage, User, VerificationKind,
};

use crate::error::{ClientError, Result};

/// Platform timestamp format, e.g. "Wed Oct 10 20:19:24 +0000 2018".
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn str_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn opt_str_field(value: &Value, key: &str) -> Option<String> {
    value[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn count_field(value: &Value, key: &str) -> u64 {
    value[key].as_u64().unwrap_or(0)
}

/// Map an application-level error entry from a 200 response body to the
/// matching typed error. The platform reports these in an `errors` array
/// alongside (or instead of) `data`.
pub fn application_error(body: &Value) -> Option<ClientError> {
    let errors = body.get("errors")?.as_array()?;
    for error in errors {
        let message = error["message"].as_str().unwrap_or("unknown error");
        let code = error["code"].as_u64().map(|c| c as u32);
        match code {
            Some(32) => return Some(ClientError::authentication("Could not authenticate")),
            Some(88) => {
                return Some(ClientError::RateLimited {
                    retry_after_secs: crate::rate_limit::DEFAULT_RETRY_AFTER.as_secs(),
                })
            }
            Some(code @ (34 | 50 | 63 | 187 | 226 | 385)) => {
                return Some(ClientError::scraping_code(message, code))
            }
            _ if message.to_lowercase().contains("suspended") => {
                return Some(ClientError::scraping_code(message, 63))
            }
            _ => continue,
        }
    }
    None
}

/// Parse a user result object (the node carrying `rest_id` + `legacy`).
pub fn parse_user(result: &Value) -> Result<User> {
    if result["__typename"] == "UserUnavailable" {
        let reason = result["reason"].as_str().unwrap_or("unavailable");
        return Err(ClientError::scraping(format!("User unavailable: {reason}")));
    }
    let legacy = &result["legacy"];
    let id = str_field(result, "rest_id");
    if id.is_empty() {
        return Err(ClientError::Parse("user result has no rest_id".to_string()));
    }

    Ok(User {
        id,
        handle: str_field(legacy, "screen_name"),
        display_name: str_field(legacy, "name"),
        bio: str_field(legacy, "description"),
        location: str_field(legacy, "location"),
        website: opt_str_field(legacy, "url"),
        avatar_url: opt_str_field(legacy, "profile_image_url_https")
            .map(|url| url.replace("_normal", "_400x400")),
        banner_url: opt_str_field(legacy, "profile_banner_url"),
        followers_count: count_field(legacy, "followers_count"),
        following_count: count_field(legacy, "friends_count"),
        tweet_count: count_field(legacy, "statuses_count"),
        listed_count: count_field(legacy, "listed_count"),
        created_at: legacy["created_at"].as_str().and_then(parse_created_at),
        verified: legacy["verified"].as_bool().unwrap_or(false),
        verification: parse_verification(result),
        protected: legacy["protected"].as_bool().unwrap_or(false),
        blue_verified: result["is_blue_verified"].as_bool().unwrap_or(false),
    })
}

fn parse_verification(result: &Value) -> VerificationKind {
    if result["is_blue_verified"].as_bool().unwrap_or(false) {
        return VerificationKind::Blue;
    }
    let badge = &result["affiliates_highlighted_label"]["label"]["badge"]["url"];
    if badge.as_str().map(|s| !s.is_empty()).unwrap_or(false) {
        return VerificationKind::Business;
    }
    if result["legacy"]["verified"].as_bool().unwrap_or(false) {
        return VerificationKind::Government;
    }
    VerificationKind::None
}

/// Extract the user record from a `UserByScreenName`/`UserByRestId` body.
pub fn parse_user_lookup(body: &Value) -> Result<User> {
    let result = &body["data"]["user"]["result"];
    if result.is_null() || !result.is_object() {
        return Err(ClientError::scraping_code("User not found", 50));
    }
    parse_user(result)
}

fn source_anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">(.+?)</a>").expect("static regex"))
}

/// The `source` field arrives as an HTML anchor; keep only its text.
fn parse_source(result: &Value) -> Option<String> {
    let raw = result["source"].as_str()?;
    if raw.is_empty() {
        return None;
    }
    if raw.contains("<a") {
        return source_anchor_regex()
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .or_else(|| Some(raw.to_string()));
    }
    Some(raw.to_string())
}

fn parse_media(legacy: &Value) -> Vec<MediaItem> {
    let entities = if legacy["extended_entities"].is_object() {
        &legacy["extended_entities"]
    } else {
        &legacy["entities"]
    };
    let Some(media) = entities["media"].as_array() else {
        return Vec::new();
    };

    media
        .iter()
        .filter_map(|m| {
            let kind = match m["type"].as_str()? {
                "photo" => MediaKind::Photo,
                "video" => MediaKind::Video,
                "animated_gif" => MediaKind::AnimatedGif,
                _ => return None,
            };
            let preview = opt_str_field(m, "media_url_https");
            let url = match kind {
                MediaKind::Video | MediaKind::AnimatedGif => {
                    best_mp4_variant(m).or_else(|| preview.clone())?
                }
                MediaKind::Photo => preview.clone()?,
            };
            Some(MediaItem {
                kind,
                url,
                preview_url: preview,
            })
        })
        .collect()
}

/// Pick the highest-bitrate MP4 variant for videos.
fn best_mp4_variant(media: &Value) -> Option<String> {
    media["video_info"]["variants"]
        .as_array()?
        .iter()
        .filter(|v| v["content_type"] == "video/mp4")
        .max_by_key(|v| v["bitrate"].as_u64().unwrap_or(0))
        .and_then(|v| v["url"].as_str())
        .map(String::from)
}

fn entity_strings(legacy: &Value, entity: &str, key: &str) -> Vec<String> {
    legacy["entities"][entity]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item[key].as_str())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_urls(legacy: &Value) -> Vec<String> {
    legacy["entities"]["urls"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item["expanded_url"]
                        .as_str()
                        .or_else(|| item["url"].as_str())
                })
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a tweet result object (the node carrying `rest_id` + `legacy`).
pub fn parse_tweet(result: &Value) -> Result<Tweet> {
    let legacy = &result["legacy"];
    let id = str_field(result, "rest_id");
    if id.is_empty() {
        return Err(ClientError::Parse("tweet result has no rest_id".to_string()));
    }

    let author = &result["core"]["user_results"]["result"];
    let author_handle = str_field(&author["legacy"], "screen_name");

    let retweeted_tweet_id = legacy["retweeted_status_result"]["result"]["rest_id"]
        .as_str()
        .map(String::from);
    let quoted_tweet_id = result["quoted_status_result"]["result"]["rest_id"]
        .as_str()
        .map(String::from);
    let in_reply_to_tweet_id = opt_str_field(legacy, "in_reply_to_status_id_str");

    Ok(Tweet {
        id,
        author_id: str_field(legacy, "user_id_str"),
        author_handle,
        text: legacy["full_text"]
            .as_str()
            .or_else(|| legacy["text"].as_str())
            .unwrap_or_default()
            .to_string(),
        created_at: legacy["created_at"].as_str().and_then(parse_created_at),
        reply_count: count_field(legacy, "reply_count"),
        retweet_count: count_field(legacy, "retweet_count"),
        like_count: count_field(legacy, "favorite_count"),
        quote_count: count_field(legacy, "quote_count"),
        // Views arrive as a string count, unlike every other counter.
        view_count: result["views"]["count"].as_str().and_then(|c| c.parse().ok()),
        bookmark_count: count_field(legacy, "bookmark_count"),
        is_retweet: retweeted_tweet_id.is_some(),
        is_quote: quoted_tweet_id.is_some(),
        is_reply: in_reply_to_tweet_id.is_some(),
        retweeted_tweet_id,
        quoted_tweet_id,
        in_reply_to_tweet_id,
        in_reply_to_user_id: opt_str_field(legacy, "in_reply_to_user_id_str"),
        conversation_id: opt_str_field(legacy, "conversation_id_str"),
        source: parse_source(result),
        lang: opt_str_field(legacy, "lang"),
        media: parse_media(legacy),
        urls: parse_urls(legacy),
        hashtags: entity_strings(legacy, "hashtags", "text"),
        mentions: entity_strings(legacy, "user_mentions", "screen_name"),
    })
}

fn timeline_instructions<'a>(body: &'a Value, path: &[&str]) -> &'a Value {
    let mut node = body;
    for key in path {
        node = &node[*key];
    }
    &node["instructions"]
}

fn added_entries(instructions: &Value) -> impl Iterator<Item = &Value> {
    instructions
        .as_array()
        .into_iter()
        .flatten()
        .filter(|i| i["type"] == "TimelineAddEntries")
        .flat_map(|i| i["entries"].as_array().into_iter().flatten())
}

/// Parse a `Following`/`Followers` body into users plus cursors.
pub fn parse_following_page(body: &Value) -> FollowingPage {
    let instructions = timeline_instructions(
        body,
        &["data", "user", "result", "timeline", "timeline"],
    );

    let mut page = FollowingPage::default();
    for entry in added_entries(instructions) {
        let entry_id = entry["entryId"].as_str().unwrap_or_default();
        if entry_id.starts_with("user-") {
            let result = &entry["content"]["itemContent"]["user_results"]["result"];
            if result["__typename"] == "User" {
                if let Ok(user) = parse_user(result) {
                    page.users.push(user);
                }
            }
        } else if entry_id.starts_with("cursor-bottom-") {
            page.next_cursor = entry["content"]["value"].as_str().map(String::from);
        } else if entry_id.starts_with("cursor-top-") {
            page.previous_cursor = entry["content"]["value"].as_str().map(String::from);
        }
    }
    page
}

/// Parse a `UserTweets` body into tweets plus the bottom cursor.
pub fn parse_tweet_page(body: &Value) -> TweetPage {
    let instructions = timeline_instructions(
        body,
        &["data", "user", "result", "timeline_v2", "timeline"],
    );

    let mut page = TweetPage::default();
    for entry in added_entries(instructions) {
        let entry_id = entry["entryId"].as_str().unwrap_or_default();
        if entry_id.starts_with("tweet-") {
            let result = &entry["content"]["itemContent"]["tweet_results"]["result"];
            if result["__typename"] == "Tweet" {
                if let Ok(tweet) = parse_tweet(result) {
                    page.tweets.push(tweet);
                }
            }
        } else if entry_id.starts_with("cursor-bottom-") {
            page.next_cursor = entry["content"]["value"].as_str().map(String::from);
        }
    }
    page
}

/// Parse a `SearchTimeline` body (product People) into users + cursor.
pub fn parse_people_search(body: &Value) -> (Vec<User>, Option<String>) {
    let instructions = timeline_instructions(
        body,
        &["data", "search_by_raw_query", "search_timeline", "timeline"],
    );

    let mut users = Vec::new();
    let mut next_cursor = None;
    for entry in added_entries(instructions) {
        let content = &entry["content"];
        let item = &content["itemContent"];
        if item["itemType"] == "TimelineUser" {
            let result = &item["user_results"]["result"];
            if result["__typename"] == "User" {
                if let Ok(user) = parse_user(result) {
                    users.push(user);
                }
            }
        }
        if content["cursorType"] == "Bottom" {
            next_cursor = content["value"].as_str().map(String::from);
        }
    }
    (users, next_cursor)
}

/// Parse a `SearchTimeline` body (product Top/Latest) into tweets + cursor.
pub fn parse_tweet_search(body: &Value) -> (Vec<Tweet>, Option<String>) {
    let instructions = timeline_instructions(
        body,
        &["data", "search_by_raw_query", "search_timeline", "timeline"],
    );

    let mut tweets = Vec::new();
    let mut next_cursor = None;
    for entry in added_entries(instructions) {
        let content = &entry["content"];
        let item = &content["itemContent"];
        if item["itemType"] == "TimelineTweet" {
            let result = &item["tweet_results"]["result"];
            if result["__typename"] == "Tweet" {
                if let Ok(tweet) = parse_tweet(result) {
                    tweets.push(tweet);
                }
            }
        }
        if content["cursorType"] == "Bottom" {
            next_cursor = content["value"].as_str().map(String::from);
        }
    }
    (tweets, next_cursor)
}

/// Parse a `TweetDetail` body: the focal tweet plus the visible replies in
/// its conversation thread. Reply items arrive both as plain `tweet-`
/// entries and inside `conversationthread-` modules.
pub fn parse_tweet_detail(body: &Value, focal_tweet_id: &str) -> Result<(Tweet, Vec<Tweet>)> {
    let instructions = timeline_instructions(
        body,
        &["data", "threaded_conversation_with_injections_v2"],
    );

    let mut focal = None;
    let mut replies = Vec::new();

    let mut consider = |result: &Value| {
        if result["__typename"] != "Tweet" {
            return;
        }
        if let Ok(tweet) = parse_tweet(result) {
            if tweet.id == focal_tweet_id {
                focal = Some(tweet);
            } else {
                replies.push(tweet);
            }
        }
    };

    for entry in added_entries(instructions) {
        let entry_id = entry["entryId"].as_str().unwrap_or_default();
        if entry_id.starts_with("tweet-") {
            consider(&entry["content"]["itemContent"]["tweet_results"]["result"]);
        } else if entry_id.starts_with("conversationthread-") {
            for item in entry["content"]["items"].as_array().into_iter().flatten() {
                consider(&item["item"]["itemContent"]["tweet_results"]["result"]);
            }
        }
    }

    let focal = focal.ok_or_else(|| {
        ClientError::scraping(format!("Tweet not found: {focal_tweet_id}"))
    })?;
    Ok((focal, replies))
}
