//! GraphQL endpoint registry and request builders.
//!
//! Every operation the platform's web client performs is addressed by a
//! `{query_id}/{operation_name}` pair under the GraphQL base URL. Query
//! endpoints are GETs carrying `variables`/`features`/`fieldToggles` as
//! compact JSON strings in the query string; mutations are POSTs with the
//! same triplet in the body. Query ids drift as the platform redeploys;
//! they are pinned here and updated as a set.

use serde_json::{json, Value};

use crate::error::{ClientError, Result};

pub const BASE_URL: &str = "https://x.com/i/api/graphql";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    UserByScreenName,
    UserByRestId,
    Following,
    Followers,
    UserTweets,
    UserTweetsAndReplies,
    TweetDetail,
    SearchTimeline,
    CreateTweet,
    DeleteTweet,
    FavoriteTweet,
    UnfavoriteTweet,
    CreateRetweet,
    DeleteRetweet,
}

impl Endpoint {
    pub fn query_id(&self) -> &'static str {
        match self {
            Self::UserByScreenName => "NimuplG1OB7Fd2btCLdBOw",
            Self::UserByRestId => "tD8zKvQzwY3kdx5yz6YmOw",
            Self::Following => "2vUj-_Ek-UmBVDNtd8OnQA",
            Self::Followers => "gC_lyAxZOptAMLCJX5UhWw",
            Self::UserTweets => "QWF3SzpHmykQHsQMixG0cg",
            Self::UserTweetsAndReplies => "vMkJyzx1wdmvOeeNG0n6Wg",
            Self::TweetDetail => "U0HTv-bAWTBYylwEMT7x5A",
            Self::SearchTimeline => "flaR-PUMshxFWZWPNpq4zA",
            Self::CreateTweet => "SiM_cAu83R0wnrpmKQQSEw",
            Self::DeleteTweet => "VaenaVgh5q5ih7kvyVjgtg",
            Self::FavoriteTweet => "lI07N6Otwv1PhnEgXILM7A",
            Self::UnfavoriteTweet => "ZYKSe-w7KEslx3JhSIk5LA",
            Self::CreateRetweet => "ojPdsZsimiJrUGLR1sjUtA",
            Self::DeleteRetweet => "iQtK4dl5hBmXewYZuEOKVw",
        }
    }

    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::UserByScreenName => "UserByScreenName",
            Self::UserByRestId => "UserByRestId",
            Self::Following => "Following",
            Self::Followers => "Followers",
            Self::UserTweets => "UserTweets",
            Self::UserTweetsAndReplies => "UserTweetsAndReplies",
            Self::TweetDetail => "TweetDetail",
            Self::SearchTimeline => "SearchTimeline",
            Self::CreateTweet => "CreateTweet",
            Self::DeleteTweet => "DeleteTweet",
            Self::FavoriteTweet => "FavoriteTweet",
            Self::UnfavoriteTweet => "UnfavoriteTweet",
            Self::CreateRetweet => "CreateRetweet",
            Self::DeleteRetweet => "DeleteRetweet",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateTweet
                | Self::DeleteTweet
                | Self::FavoriteTweet
                | Self::UnfavoriteTweet
                | Self::CreateRetweet
                | Self::DeleteRetweet
        )
    }

    pub fn url(&self) -> String {
        format!("{BASE_URL}/{}/{}", self.query_id(), self.operation_name())
    }

    /// Key used for per-endpoint rate limiting. Mutations get their own
    /// buckets so write quotas never starve reads.
    pub fn limiter_key(&self) -> String {
        if self.is_mutation() {
            format!("mutation_{}", self.operation_name())
        } else {
            self.operation_name().to_string()
        }
    }
}

/// Search result ranking the platform should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchProduct {
    #[default]
    Top,
    Latest,
    People,
}

impl SearchProduct {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "Top",
            Self::Latest => "Latest",
            Self::People => "People",
        }
    }
}

fn base_features() -> Value {
    json!({
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "responsive_web_media_download_video_enabled": false,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
    })
}

fn user_features() -> Value {
    json!({
        "hidden_profile_likes_enabled": true,
        "hidden_profile_subscriptions_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "subscriptions_verification_info_is_identity_verified_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true,
        "highlights_tweets_tab_ui_enabled": true,
        "responsive_web_twitter_article_notes_tab_enabled": true,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
    })
}

fn mutation_features() -> Value {
    json!({
        "communities_web_enable_tweet_community_results_fetch": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "creator_subscriptions_quote_tweet_preview_enabled": false,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "articles_preview_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "rweb_tipjar_consumption_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
        "responsive_web_media_download_video_enabled": true,
    })
}

/// Serialize a JSON value the way the web client does: no whitespace.
fn compact(value: &Value) -> String {
    value.to_string()
}

/// A fully-built request, ready for the client to execute. Query endpoints
/// carry `params`; mutations carry `body`.
#[derive(Debug, Clone)]
pub struct ProtocolRequest {
    pub endpoint: Endpoint,
    pub params: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl ProtocolRequest {
    fn get(endpoint: Endpoint, variables: Value, features: Value) -> Self {
        Self {
            endpoint,
            params: vec![
                ("variables", compact(&variables)),
                ("features", compact(&features)),
            ],
            body: None,
        }
    }

    fn get_with_toggles(
        endpoint: Endpoint,
        variables: Value,
        features: Value,
        field_toggles: Value,
    ) -> Self {
        Self {
            endpoint,
            params: vec![
                ("variables", compact(&variables)),
                ("features", compact(&features)),
                ("fieldToggles", compact(&field_toggles)),
            ],
            body: None,
        }
    }

    fn post(endpoint: Endpoint, variables: Value, features: Option<Value>) -> Self {
        let mut body = json!({
            "variables": variables,
            "queryId": endpoint.query_id(),
        });
        if let Some(features) = features {
            body["features"] = features;
        }
        Self {
            endpoint,
            params: Vec::new(),
            body: Some(body),
        }
    }

    pub fn url(&self) -> String {
        self.endpoint.url()
    }

    pub fn user_by_handle(handle: &str) -> Self {
        Self::get_with_toggles(
            Endpoint::UserByScreenName,
            json!({
                "screen_name": handle,
                "withSafetyModeUserFields": true,
            }),
            user_features(),
            json!({ "withAuxiliaryUserLabels": false }),
        )
    }

    pub fn user_by_id(user_id: &str) -> Self {
        Self::get(
            Endpoint::UserByRestId,
            json!({
                "userId": user_id,
                "withSafetyModeUserFields": true,
            }),
            user_features(),
        )
    }

    pub fn following(user_id: &str, count: u32, cursor: Option<&str>) -> Self {
        Self::get(
            Endpoint::Following,
            follow_list_variables(user_id, count, cursor),
            base_features(),
        )
    }

    pub fn followers(user_id: &str, count: u32, cursor: Option<&str>) -> Self {
        Self::get(
            Endpoint::Followers,
            follow_list_variables(user_id, count, cursor),
            base_features(),
        )
    }

    pub fn user_tweets(
        user_id: &str,
        count: u32,
        cursor: Option<&str>,
        include_replies: bool,
    ) -> Self {
        let endpoint = if include_replies {
            Endpoint::UserTweetsAndReplies
        } else {
            Endpoint::UserTweets
        };
        let mut variables = json!({
            "userId": user_id,
            "count": count,
            "includePromotedContent": true,
            "withQuickPromoteEligibilityTweetFields": true,
            "withVoice": true,
            "withV2Timeline": true,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = json!(cursor);
        }
        Self::get(endpoint, variables, base_features())
    }

    pub fn tweet_detail(tweet_id: &str) -> Self {
        Self::get_with_toggles(
            Endpoint::TweetDetail,
            json!({
                "focalTweetId": tweet_id,
                "with_rux_injections": false,
                "includePromotedContent": true,
                "withCommunity": true,
                "withQuickPromoteEligibilityTweetFields": true,
                "withBirdwatchNotes": true,
                "withVoice": true,
                "withV2Timeline": true,
            }),
            base_features(),
            json!({
                "withArticleRichContentState": true,
                "withArticlePlainText": false,
            }),
        )
    }

    pub fn search(query: &str, count: u32, cursor: Option<&str>, product: SearchProduct) -> Self {
        let mut variables = json!({
            "rawQuery": query,
            "count": count,
            "querySource": "typed_query",
            "product": product.as_str(),
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = json!(cursor);
        }
        Self::get(Endpoint::SearchTimeline, variables, base_features())
    }

    pub fn create_tweet(
        text: &str,
        reply_to_tweet_id: Option<&str>,
        quote_tweet_id: Option<&str>,
        media_ids: &[String],
    ) -> Self {
        let media_entities: Vec<Value> = media_ids
            .iter()
            .map(|id| json!({ "media_id": id, "tagged_users": [] }))
            .collect();
        let mut variables = json!({
            "tweet_text": text,
            "dark_request": false,
            "media": {
                "media_entities": media_entities,
                "possibly_sensitive": false,
            },
            "semantic_annotation_ids": [],
        });
        if let Some(reply_to) = reply_to_tweet_id {
            variables["reply"] = json!({
                "in_reply_to_tweet_id": reply_to,
                "exclude_reply_user_ids": [],
            });
        }
        if let Some(quoted) = quote_tweet_id {
            variables["attachment_url"] =
                json!(format!("https://twitter.com/i/web/status/{quoted}"));
        }
        Self::post(Endpoint::CreateTweet, variables, Some(mutation_features()))
    }

    pub fn delete_tweet(tweet_id: &str) -> Self {
        Self::post(
            Endpoint::DeleteTweet,
            json!({ "tweet_id": tweet_id, "dark_request": false }),
            None,
        )
    }

    pub fn favorite_tweet(tweet_id: &str) -> Self {
        Self::post(Endpoint::FavoriteTweet, json!({ "tweet_id": tweet_id }), None)
    }

    pub fn unfavorite_tweet(tweet_id: &str) -> Self {
        Self::post(Endpoint::UnfavoriteTweet, json!({ "tweet_id": tweet_id }), None)
    }

    pub fn create_retweet(tweet_id: &str) -> Self {
        Self::post(
            Endpoint::CreateRetweet,
            json!({ "tweet_id": tweet_id, "dark_request": false }),
            None,
        )
    }

    pub fn delete_retweet(tweet_id: &str) -> Self {
        Self::post(
            Endpoint::DeleteRetweet,
            json!({ "source_tweet_id": tweet_id, "dark_request": false }),
            None,
        )
    }

    /// The mutation kind this request counts against, if any.
    pub fn mutation_kind(&self) -> Option<crate::mutation_limit::MutationKind> {
        use crate::mutation_limit::MutationKind;
        match self.endpoint {
            Endpoint::CreateTweet => {
                let is_reply = self
                    .body
                    .as_ref()
                    .map(|b| b["variables"].get("reply").is_some())
                    .unwrap_or(false);
                Some(if is_reply {
                    MutationKind::Reply
                } else {
                    MutationKind::Tweet
                })
            }
            Endpoint::DeleteTweet => Some(MutationKind::Tweet),
            Endpoint::FavoriteTweet | Endpoint::UnfavoriteTweet => Some(MutationKind::Like),
            Endpoint::CreateRetweet | Endpoint::DeleteRetweet => Some(MutationKind::Retweet),
            _ => None,
        }
    }

    /// Validate the request is executable (mutations need a body, queries
    /// need params).
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_mutation() && self.body.is_none() {
            return Err(ClientError::Config(format!(
                "{} is a mutation and requires a body",
                self.endpoint.operation_name()
            )));
        }
        Ok(())
    }
}

fn follow_list_variables(user_id: &str, count: u32, cursor: Option<&str>) -> Value {
    let mut variables = json!({
        "userId": user_id,
        "count": count,
        "includePromotedContent": false,
    });
    if let Some(cursor) = cursor {
        variables["cursor"] = json!(cursor);
    }
    variables
}
