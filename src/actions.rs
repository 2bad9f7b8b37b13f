//! High-level platform actions.
//!
//! Thin wrappers over [`Client::request`]: each one builds the endpoint
//! payload, delegates to the engine (which owns every recovery concern),
//! and decodes the interesting part of the response. GraphQL operations
//! resolve their persisted query id through the immutable action table.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::account::AccountStatus;
use crate::client::{ApiRequest, Client, gql_action_url};
use crate::errors::{Error, FlowError, Result};
use crate::models::{Media, Tweet, User, tweets_data_from_instructions};
use crate::session::TransportError;

/// Duplicate-post API codes: 187 for tweets, 327 for retweets.
const CODE_DUPLICATE_TWEET: i64 = 187;
const CODE_DUPLICATE_RETWEET: i64 = 327;
/// "Already liked" code on FavoriteTweet.
const CODE_ALREADY_FAVORITED: i64 = 139;

const SETTINGS_URL: &str = "https://twitter.com/i/api/1.1/account/settings.json";
const UPDATE_PROFILE_URL: &str = "https://twitter.com/i/api/1.1/account/update_profile.json";
const MEDIA_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
const BACKUP_CODE_URL: &str = "https://api.twitter.com/1.1/account/backup_code.json";
const VOTE_URL: &str = "https://caps.twitter.com/v2/capi/passthrough/1";
const PIN_TWEET_URL: &str = "https://api.twitter.com/1.1/account/pin_tweet.json";
const CHANGE_PASSWORD_URL: &str = "https://twitter.com/i/api/i/account/change_password.json";

/// Feature switch set the web frontend sends with GraphQL reads.
fn default_features() -> Value {
    json!({
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "hidden_profile_likes_enabled": true,
        "hidden_profile_subscriptions_enabled": true,
        "highlights_tweets_tab_ui_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_media_download_video_enabled": false,
        "responsive_web_twitter_article_tweet_consumption_enabled": false,
        "rweb_lists_timeline_redesign_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "standardized_nudges_misinfo": true,
        "subscriptions_verification_info_is_identity_verified_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "verified_phone_label_enabled": false,
        "view_counts_everywhere_api_enabled": true,
    })
}

/// Legacy `include_*` switch set carried by the 1.1 endpoints.
fn legacy_include_params() -> Vec<(String, String)> {
    [
        "include_profile_interstitial_type",
        "include_blocking",
        "include_blocked_by",
        "include_followed_by",
        "include_want_retweets",
        "include_mute_edge",
        "include_can_dm",
        "include_can_media_tag",
        "include_ext_has_nft_avatar",
        "include_ext_is_blue_verified",
        "include_ext_verified_type",
        "include_ext_profile_image_shape",
        "skip_status",
    ]
    .iter()
    .map(|name| (name.to_string(), "1".to_string()))
    .collect()
}

impl Client {
    async fn gql_get(
        &mut self,
        action: &str,
        variables: Value,
        field_toggles: Option<Value>,
    ) -> Result<Value> {
        let (url, _) = gql_action_url(action)?;
        let mut request = ApiRequest::get(url)
            .param("variables", variables.to_string())
            .param("features", default_features().to_string());
        if let Some(field_toggles) = field_toggles {
            request = request.param("fieldToggles", field_toggles.to_string());
        }
        Ok(self.request(request).await?.data)
    }

    async fn gql_post(&mut self, action: &str, mut payload: Value) -> Result<Value> {
        let (url, query_id) = gql_action_url(action)?;
        payload["queryId"] = json!(query_id);
        Ok(self.request(ApiRequest::post(url).json(payload)).await?.data)
    }

    /// Probe the account with a cheap authenticated call, with every
    /// recovery protocol disabled, and record the observed status. Account
    /// lifecycle failures are absorbed: the status they left behind is the
    /// probe's answer.
    pub async fn establish_status(&mut self) -> Result<()> {
        let request = ApiRequest::post(UPDATE_PROFILE_URL)
            .auto_unlock(false)
            .auto_relogin(false);
        match self.request(request).await {
            Ok(_) => {
                self.account.set_status(AccountStatus::Good);
                Ok(())
            }
            Err(Error::Account(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// GraphQL viewer call; the web frontend issues it right after login.
    pub(crate) async fn viewer(&mut self) -> Result<Value> {
        self.gql_get(
            "Viewer",
            json!({"withCommunitiesMemberships": true}),
            Some(json!({"isDelegate": false, "withAuxiliaryUserLabels": false})),
        )
        .await
    }

    /// Fetch a fresh single-use backup code onto the account.
    pub async fn update_backup_code(&mut self) -> Result<()> {
        let response = self.request(ApiRequest::get(BACKUP_CODE_URL)).await?;
        let code = response
            .data
            .pointer("/codes/0")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Flow(FlowError::new("backup_code", "response carries no codes"))
            })?;
        self.account.set_backup_code(code);
        Ok(())
    }

    async fn update_account_username(&mut self) -> Result<()> {
        let response = self.request(ApiRequest::post(SETTINGS_URL)).await?;
        let username = response
            .data
            .get("screen_name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Flow(FlowError::new("settings", "response carries no screen_name"))
            })?;
        self.account.set_username(username);
        Ok(())
    }

    /// Refresh the account's own id, name, and username from the platform.
    pub async fn update_account_info(&mut self) -> Result<()> {
        if self.account.username().is_none() {
            self.update_account_username().await?;
        }
        let username = self
            .account
            .username()
            .expect("username fetched above")
            .to_string();

        if let Some(user) = self.user_by_username(&username).await? {
            self.account.set_id(user.id);
            self.account.set_name(user.name);
            self.account.set_username(user.username);
        }
        Ok(())
    }

    /// Look up a user by handle (without the `@`). `None` when the handle
    /// is unknown.
    pub async fn user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        let variables = json!({
            "screen_name": username.trim_start_matches('@'),
            "withSafetyModeUserFields": true,
        });
        let data = self
            .gql_get(
                "UserByScreenName",
                variables,
                Some(json!({"withAuxiliaryUserLabels": false})),
            )
            .await?;

        match data.pointer("/data/user/result") {
            Some(raw) => Ok(Some(User::from_raw_data(raw)?)),
            None => Ok(None),
        }
    }

    /// Bulk user lookup by numeric id.
    pub async fn users_by_ids(&mut self, user_ids: &[u64]) -> Result<Vec<User>> {
        let ids: Vec<String> = user_ids.iter().map(u64::to_string).collect();
        let data = self
            .gql_get("UsersByRestIds", json!({"userIds": ids}), None)
            .await?;

        let mut users = Vec::new();
        if let Some(raw_users) = data.pointer("/data/users").and_then(Value::as_array) {
            for raw in raw_users {
                if let Some(result) = raw.get("result") {
                    users.push(User::from_raw_data(result)?);
                }
            }
        }
        Ok(users)
    }

    pub async fn user_by_id(&mut self, user_id: u64) -> Result<Option<User>> {
        let users = self.users_by_ids(&[user_id]).await?;
        Ok(users.into_iter().next())
    }

    async fn users_by_action(
        &mut self,
        action: &str,
        user_id: u64,
        count: u32,
        cursor: Option<&str>,
    ) -> Result<Vec<User>> {
        let mut variables = json!({
            "userId": user_id.to_string(),
            "count": count,
            "includePromotedContent": false,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = json!(cursor);
        }
        let data = self.gql_get(action, variables, None).await?;

        let mut users = Vec::new();
        let instructions = data
            .pointer("/data/user/result/timeline/timeline/instructions")
            .and_then(Value::as_array);
        let Some(instructions) = instructions else {
            return Ok(users);
        };
        for instruction in instructions {
            let Some(entries) = instruction.get("entries").and_then(Value::as_array) else {
                continue;
            };
            for entry in entries {
                let is_user = entry
                    .get("entryId")
                    .and_then(Value::as_str)
                    .is_some_and(|id| id.starts_with("user"));
                if !is_user {
                    continue;
                }
                if let Some(raw) = entry.pointer("/content/itemContent/user_results/result") {
                    users.push(User::from_raw_data(raw)?);
                }
            }
        }
        Ok(users)
    }

    async fn own_id(&mut self) -> Result<u64> {
        if self.account.id().is_none() {
            self.update_account_info().await?;
        }
        self.account
            .id()
            .ok_or_else(|| Error::Usage("account id unknown".into()))
    }

    /// Followers of a user, or of the account itself when `user_id` is `None`.
    pub async fn followers(&mut self, user_id: Option<u64>, count: u32) -> Result<Vec<User>> {
        let user_id = match user_id {
            Some(id) => id,
            None => self.own_id().await?,
        };
        self.users_by_action("Followers", user_id, count, None).await
    }

    /// Accounts a user follows, or the account's own when `user_id` is `None`.
    pub async fn followings(&mut self, user_id: Option<u64>, count: u32) -> Result<Vec<User>> {
        let user_id = match user_id {
            Some(id) => id,
            None => self.own_id().await?,
        };
        self.users_by_action("Following", user_id, count, None).await
    }

    async fn follow_action(&mut self, action: &str, user_id: u64) -> Result<bool> {
        let url = format!("https://twitter.com/i/api/1.1/friendships/{action}.json");
        let mut params = legacy_include_params();
        params.push(("user_id".to_string(), user_id.to_string()));

        let mut request =
            ApiRequest::post(url).header("content-type", "application/x-www-form-urlencoded");
        for (name, value) in params {
            request = request.param(name, value);
        }
        let response = self.request(request).await?;
        Ok(response
            .data
            .as_object()
            .is_some_and(|fields| !fields.is_empty()))
    }

    pub async fn follow(&mut self, user_id: u64) -> Result<bool> {
        self.follow_action("create", user_id).await
    }

    pub async fn unfollow(&mut self, user_id: u64) -> Result<bool> {
        self.follow_action("destroy", user_id).await
    }

    async fn interact_with_tweet(&mut self, action: &str, tweet_id: u64) -> Result<Value> {
        self.gql_post(
            action,
            json!({"variables": {"tweet_id": tweet_id.to_string(), "dark_request": false}}),
        )
        .await
    }

    /// Like a post. `true` even when the post was already liked.
    pub async fn like(&mut self, tweet_id: u64) -> Result<bool> {
        match self.interact_with_tweet("FavoriteTweet", tweet_id).await {
            Ok(data) => Ok(data.pointer("/data/favorite_tweet") == Some(&json!("Done"))),
            Err(err) if err.api_codes().contains(&CODE_ALREADY_FAVORITED) => Ok(true),
            Err(err) => Err(err),
        }
    }

    pub async fn unlike(&mut self, tweet_id: u64) -> Result<bool> {
        let data = self.interact_with_tweet("UnfavoriteTweet", tweet_id).await?;
        Ok(data.pointer("/data/unfavorite_tweet") == Some(&json!("Done")))
    }

    pub async fn delete_tweet(&mut self, tweet_id: u64) -> Result<bool> {
        let data = self.interact_with_tweet("DeleteTweet", tweet_id).await?;
        Ok(data.pointer("/data/delete_tweet").is_some())
    }

    pub async fn pin_tweet(&mut self, tweet_id: u64) -> Result<bool> {
        let request = ApiRequest::post(PIN_TWEET_URL)
            .header("content-type", "application/x-www-form-urlencoded")
            .form(vec![
                ("tweet_mode".to_string(), "extended".to_string()),
                ("id".to_string(), tweet_id.to_string()),
            ]);
        let response = self.request(request).await?;
        let pinned = response
            .data
            .get("pinned_tweets")
            .and_then(Value::as_array)
            .is_some_and(|tweets| !tweets.is_empty());
        Ok(pinned)
    }

    /// Fetch one post by id.
    pub async fn request_tweet(&mut self, tweet_id: u64) -> Result<Tweet> {
        let variables = json!({
            "focalTweetId": tweet_id.to_string(),
            "with_rux_injections": false,
            "includePromotedContent": true,
            "withCommunity": true,
            "withQuickPromoteEligibilityTweetFields": true,
            "withBirdwatchNotes": true,
            "withVoice": true,
            "withV2Timeline": true,
        });
        let data = self.gql_get("TweetDetail", variables, None).await?;
        let instructions = data
            .pointer("/data/threaded_conversation_with_injections_v2/instructions")
            .cloned()
            .unwrap_or(Value::Null);
        let tweets = tweets_data_from_instructions(&instructions);
        let raw = tweets.first().copied().ok_or_else(|| {
            Error::Flow(FlowError::new("TweetDetail", "timeline carries no tweet payload"))
        })?;
        Ok(Tweet::from_raw_data(raw)?)
    }

    /// Recent posts of a user, or of the account itself when `user_id` is
    /// `None`.
    pub async fn request_tweets(&mut self, user_id: Option<u64>, count: u32) -> Result<Vec<Tweet>> {
        let user_id = match user_id {
            Some(id) => id,
            None => self.own_id().await?,
        };
        let variables = json!({
            "userId": user_id.to_string(),
            "count": count,
            "includePromotedContent": true,
            "withQuickPromoteEligibilityTweetFields": true,
            "withVoice": true,
            "withV2Timeline": true,
        });
        let data = self.gql_get("UserTweets", variables, None).await?;
        let instructions = data
            .pointer("/data/user/result/timeline_v2/timeline/instructions")
            .cloned()
            .unwrap_or(Value::Null);

        let mut tweets = Vec::new();
        for raw in tweets_data_from_instructions(&instructions) {
            tweets.push(Tweet::from_raw_data(raw)?);
        }
        Ok(tweets)
    }

    async fn compose_tweet(
        &mut self,
        text: &str,
        media_id: Option<u64>,
        reply_to: Option<u64>,
        attachment_url: Option<&str>,
    ) -> Result<Tweet> {
        let mut variables = json!({
            "tweet_text": text,
            "dark_request": false,
            "media": {"media_entities": [], "possibly_sensitive": false},
            "semantic_annotation_ids": [],
        });
        if let Some(url) = attachment_url {
            variables["attachment_url"] = json!(url);
        }
        if let Some(reply_to) = reply_to {
            variables["reply"] = json!({
                "in_reply_to_tweet_id": reply_to.to_string(),
                "exclude_reply_user_ids": [],
            });
        }
        if let Some(media_id) = media_id {
            variables["media"]["media_entities"] = json!([
                {"media_id": media_id.to_string(), "tagged_users": []}
            ]);
        }

        let data = self
            .gql_post(
                "CreateTweet",
                json!({"variables": variables, "features": default_features()}),
            )
            .await?;
        let raw = data
            .pointer("/data/create_tweet/tweet_results/result")
            .ok_or_else(|| {
                Error::Flow(FlowError::new("CreateTweet", "response carries no tweet payload"))
            })?;
        Ok(Tweet::from_raw_data(raw)?)
    }

    async fn compose_or_search_duplicate(
        &mut self,
        text: &str,
        media_id: Option<u64>,
        reply_to: Option<u64>,
        attachment_url: Option<&str>,
        search_duplicate: bool,
    ) -> Result<Tweet> {
        match self
            .compose_tweet(text, media_id, reply_to, attachment_url)
            .await
        {
            Ok(tweet) => Ok(tweet),
            Err(err) if search_duplicate && err.api_codes().contains(&CODE_DUPLICATE_TWEET) => {
                let recent = self.request_tweets(None, 20).await?;
                recent
                    .into_iter()
                    .find(|tweet| tweet.text.starts_with(text.trim()))
                    .ok_or_else(|| {
                        Error::Flow(FlowError::new(
                            "CreateTweet",
                            "duplicate reported but no matching post among the 20 most recent",
                        ))
                    })
            }
            Err(err) => Err(err),
        }
    }

    /// Publish a post. When the platform reports it as a duplicate, the
    /// matching recent post is returned instead of an error.
    pub async fn tweet(&mut self, text: &str, media_id: Option<u64>) -> Result<Tweet> {
        self.compose_or_search_duplicate(text, media_id, None, None, true)
            .await
    }

    pub async fn reply(&mut self, tweet_id: u64, text: &str, media_id: Option<u64>) -> Result<Tweet> {
        self.compose_or_search_duplicate(text, media_id, Some(tweet_id), None, true)
            .await
    }

    pub async fn quote(&mut self, tweet_url: &str, text: &str, media_id: Option<u64>) -> Result<Tweet> {
        self.compose_or_search_duplicate(text, media_id, None, Some(tweet_url), true)
            .await
    }

    /// Repost. Falls back to locating the existing repost when the platform
    /// reports a duplicate.
    pub async fn repost(&mut self, tweet_id: u64) -> Result<Tweet> {
        match self.interact_with_tweet("CreateRetweet", tweet_id).await {
            Ok(data) => {
                let reposted_id = data
                    .pointer("/data/create_retweet/retweet_results/result/rest_id")
                    .and_then(Value::as_str)
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(|| {
                        Error::Flow(FlowError::new(
                            "CreateRetweet",
                            "response carries no retweet rest_id",
                        ))
                    })?;
                self.request_tweet(reposted_id).await
            }
            Err(err) if err.api_codes().contains(&CODE_DUPLICATE_RETWEET) => {
                let recent = self.request_tweets(None, 20).await?;
                recent
                    .into_iter()
                    .find(|tweet| {
                        tweet
                            .retweeted_tweet
                            .as_ref()
                            .is_some_and(|original| original.id == tweet_id)
                    })
                    .ok_or_else(|| {
                        Error::Flow(FlowError::new(
                            "CreateRetweet",
                            "duplicate reported but no matching repost among the 20 most recent",
                        ))
                    })
            }
            Err(err) => Err(err),
        }
    }

    /// Answer a poll. Returns the raw card payload.
    pub async fn vote(&mut self, tweet_id: u64, card_id: u64, choice_number: u32) -> Result<Value> {
        let request = ApiRequest::post(VOTE_URL)
            .param("twitter:string:card_uri", format!("card://{card_id}"))
            .param("twitter:long:original_tweet_id", tweet_id.to_string())
            .param("twitter:string:response_card_name", "poll2choice_text_only")
            .param("twitter:string:cards_platform", "Web-12")
            .param("twitter:string:selected_choice", choice_number.to_string());
        Ok(self.request(request).await?.data)
    }

    /// Upload an image and return its media handle. The first attempt
    /// occasionally dies with a 408 or a transport timeout; those are
    /// retried up to `attempts` times.
    pub async fn upload_image(&mut self, image: &[u8], attempts: u32) -> Result<Media> {
        let encoded = BASE64.encode(image);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = ApiRequest::post(MEDIA_UPLOAD_URL)
                .form(vec![("media_data".to_string(), encoded.clone())])
                .timeout(Duration::from_secs(10));
            match self.request(request).await {
                Ok(response) => return Ok(Media::from_raw_data(&response.data)?),
                Err(err) if attempt < attempts && is_upload_hiccup(&err) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    async fn update_profile_image(&mut self, kind: &str, media_id: u64) -> Result<String> {
        let url = format!("https://api.twitter.com/1.1/account/update_profile_{kind}.json");
        let mut params = legacy_include_params();
        params.push(("media_id".to_string(), media_id.to_string()));
        params.push(("return_user".to_string(), "true".to_string()));

        let mut request = ApiRequest::post(url);
        for (name, value) in params {
            request = request.param(name, value);
        }
        let response = self.request(request).await?;
        response
            .data
            .get(format!("profile_{kind}_url").as_str())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Flow(FlowError::new("update_profile_image", "response carries no image url"))
            })
    }

    /// Set the avatar; returns the hosted image URL.
    pub async fn update_profile_avatar(&mut self, media_id: u64) -> Result<String> {
        self.update_profile_image("image", media_id).await
    }

    /// Set the banner; returns the hosted image URL.
    pub async fn update_profile_banner(&mut self, media_id: u64) -> Result<String> {
        self.update_profile_image("banner", media_id).await
    }

    pub async fn change_username(&mut self, username: &str) -> Result<bool> {
        let request = ApiRequest::post(SETTINGS_URL)
            .form(vec![("screen_name".to_string(), username.to_string())]);
        let response = self.request(request).await?;
        let new_username = response
            .data
            .get("screen_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let changed = new_username == username;
        if !new_username.is_empty() {
            self.account.set_username(new_username);
        }
        Ok(changed)
    }

    /// Change the password. The server rotates `auth_token` on success; the
    /// engine harvests the new one from the response cookies.
    pub async fn change_password(&mut self, password: &str) -> Result<bool> {
        let current = self
            .account
            .password()
            .ok_or_else(|| Error::Usage("current password required to change it".into()))?
            .to_string();

        let request = ApiRequest::post(CHANGE_PASSWORD_URL).form(vec![
            ("current_password".to_string(), current),
            ("password".to_string(), password.to_string()),
            ("password_confirmation".to_string(), password.to_string()),
        ]);
        let response = self.request(request).await?;
        let changed = response.data.get("status") == Some(&json!("ok"));
        if changed {
            self.account.set_password(password);
        }
        Ok(changed)
    }

    /// Update profile text fields. Known to trip the lock heuristics when
    /// overused.
    pub async fn update_profile(
        &mut self,
        name: Option<&str>,
        description: Option<&str>,
        location: Option<&str>,
        website: Option<&str>,
    ) -> Result<bool> {
        if name.is_none() && description.is_none() && location.is_none() && website.is_none() {
            return Err(Error::Usage("update_profile requires at least one field".into()));
        }

        let fields = [
            ("name", name),
            ("description", description),
            ("location", location),
            ("url", website),
        ];
        let form: Vec<(String, String)> = fields
            .iter()
            .filter_map(|(key, value)| value.map(|value| (key.to_string(), value.to_string())))
            .collect();

        let request = ApiRequest::post(UPDATE_PROFILE_URL).form(form.clone());
        let response = self.request(request).await?;
        let updated = form
            .iter()
            .filter(|(key, _)| key.as_str() != "url")
            .all(|(key, value)| {
                response.data.get(key.as_str()).and_then(Value::as_str) == Some(value.as_str())
            });

        self.update_account_info().await?;
        Ok(updated)
    }

    pub async fn update_birthdate(&mut self, day: u32, month: u32, year: u32) -> Result<bool> {
        let request = ApiRequest::post(UPDATE_PROFILE_URL).json(json!({
            "birthdate_day": day,
            "birthdate_month": month,
            "birthdate_year": year,
            "birthdate_visibility": "self",
            "birthdate_year_visibility": "self",
        }));
        let response = self.request(request).await?;
        let birthdate = response
            .data
            .pointer("/extended_profile/birthdate")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(birthdate.get("day") == Some(&json!(day))
            && birthdate.get("month") == Some(&json!(month))
            && birthdate.get("year") == Some(&json!(year)))
    }
}

fn is_upload_hiccup(err: &Error) -> bool {
    match err {
        Error::Http(http) => http.status() == 408,
        Error::Transport(TransportError::Request(_)) => true,
        _ => false,
    }
}
