//! Typed records decoded from the platform's raw JSON payloads.
//!
//! The GraphQL surface ships deeply nested, dict-shaped objects. Each record
//! validates the keys it needs explicitly and fails with a decode error that
//! names the record kind and the missing path, instead of panicking on a
//! key lookup.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

/// Decode failure for a raw platform payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{kind}: missing field `{path}`")]
    MissingField { kind: &'static str, path: &'static str },
    #[error("{kind}: field `{path}` has an unexpected type or value")]
    WrongType { kind: &'static str, path: &'static str },
    #[error("{kind}: invalid timestamp `{value}`")]
    BadTimestamp { kind: &'static str, value: String },
}

fn pluck<'a>(
    kind: &'static str,
    value: &'a Value,
    path: &'static str,
) -> Result<&'a Value, DecodeError> {
    let mut current = value;
    for segment in path.split('.') {
        current = current
            .get(segment)
            .ok_or(DecodeError::MissingField { kind, path })?;
    }
    Ok(current)
}

fn str_at<'a>(
    kind: &'static str,
    value: &'a Value,
    path: &'static str,
) -> Result<&'a str, DecodeError> {
    pluck(kind, value, path)?
        .as_str()
        .ok_or(DecodeError::WrongType { kind, path })
}

fn i64_at(kind: &'static str, value: &Value, path: &'static str) -> Result<i64, DecodeError> {
    pluck(kind, value, path)?
        .as_i64()
        .ok_or(DecodeError::WrongType { kind, path })
}

fn u64_from_str(
    kind: &'static str,
    value: &Value,
    path: &'static str,
) -> Result<u64, DecodeError> {
    str_at(kind, value, path)?
        .parse()
        .map_err(|_| DecodeError::WrongType { kind, path })
}

fn timestamp(kind: &'static str, raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DecodeError::BadTimestamp {
            kind,
            value: raw.to_string(),
        })
}

/// A platform user, decoded from a GraphQL `user.result` payload.
#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub location: String,
    pub followers_count: i64,
    pub followings_count: i64,
    pub raw: Value,
}

impl User {
    pub fn from_raw_data(data: &Value) -> Result<Self, DecodeError> {
        const KIND: &str = "User";
        Ok(User {
            id: u64_from_str(KIND, data, "rest_id")?,
            username: str_at(KIND, data, "legacy.screen_name")?.to_string(),
            name: str_at(KIND, data, "legacy.name")?.to_string(),
            created_at: timestamp(KIND, str_at(KIND, data, "legacy.created_at")?)?,
            description: str_at(KIND, data, "legacy.description")?.to_string(),
            location: str_at(KIND, data, "legacy.location")?.to_string(),
            followers_count: i64_at(KIND, data, "legacy.followers_count")?,
            followings_count: i64_at(KIND, data, "legacy.friends_count")?,
            raw: data.clone(),
        })
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) @{}", self.id, self.username)
    }
}

/// A post, decoded from a GraphQL `tweet_results.result` payload.
#[derive(Debug, Clone)]
pub struct Tweet {
    pub id: u64,
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub lang: String,
    pub favorite_count: i64,
    pub quote_count: i64,
    pub reply_count: i64,
    pub retweet_count: i64,
    pub retweeted: bool,
    /// Present when this post is a repost of another post.
    pub retweeted_tweet: Option<Box<Tweet>>,
    pub raw: Value,
}

impl Tweet {
    pub fn from_raw_data(data: &Value) -> Result<Self, DecodeError> {
        const KIND: &str = "Tweet";
        let retweeted_tweet = data
            .get("legacy")
            .and_then(|legacy| legacy.get("retweeted_status_result"))
            .and_then(|retweet| retweet.get("result"))
            .and_then(|result| Tweet::from_raw_data(result).ok())
            .map(Box::new);

        Ok(Tweet {
            id: u64_from_str(KIND, data, "legacy.id_str")?,
            user_id: u64_from_str(KIND, data, "legacy.user_id_str")?,
            created_at: timestamp(KIND, str_at(KIND, data, "legacy.created_at")?)?,
            text: str_at(KIND, data, "legacy.full_text")?.to_string(),
            lang: str_at(KIND, data, "legacy.lang")?.to_string(),
            favorite_count: i64_at(KIND, data, "legacy.favorite_count")?,
            quote_count: i64_at(KIND, data, "legacy.quote_count")?,
            reply_count: i64_at(KIND, data, "legacy.reply_count")?,
            retweet_count: i64_at(KIND, data, "legacy.retweet_count")?,
            retweeted: pluck(KIND, data, "legacy.retweeted")?
                .as_bool()
                .ok_or(DecodeError::WrongType {
                    kind: KIND,
                    path: "legacy.retweeted",
                })?,
            retweeted_tweet,
            raw: data.clone(),
        })
    }

    /// Canonical web URL of the post.
    pub fn url(&self, username: &str) -> String {
        format!("https://x.com/{username}/status/{}", self.id)
    }
}

impl std::fmt::Display for Tweet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short: String = self.text.chars().take(32).collect();
        write!(f, "({}) {short}", self.id)
    }
}

/// Handle to an uploaded binary asset. The id becomes invalid once
/// `expires_at` has passed and must not be reused.
#[derive(Debug, Clone)]
pub struct Media {
    pub id: u64,
    pub size: u64,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub expires_at: DateTime<Utc>,
}

impl Media {
    pub fn from_raw_data(data: &Value) -> Result<Self, DecodeError> {
        const KIND: &str = "Media";
        let id = pluck(KIND, data, "media_id")?
            .as_u64()
            .ok_or(DecodeError::WrongType {
                kind: KIND,
                path: "media_id",
            })?;
        let size = pluck(KIND, data, "size")?
            .as_u64()
            .ok_or(DecodeError::WrongType {
                kind: KIND,
                path: "size",
            })?;
        let expires_after = pluck(KIND, data, "expires_after_secs")?
            .as_i64()
            .ok_or(DecodeError::WrongType {
                kind: KIND,
                path: "expires_after_secs",
            })?;

        Ok(Media {
            id,
            size,
            image_width: data
                .get("image")
                .and_then(|image| image.get("w"))
                .and_then(Value::as_u64)
                .map(|w| w as u32),
            image_height: data
                .get("image")
                .and_then(|image| image.get("h"))
                .and_then(Value::as_u64)
                .map(|h| h as u32),
            expires_at: Utc::now() + Duration::seconds(expires_after),
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// One step of a server-directed flow task.
#[derive(Debug, Clone)]
pub struct Subtask {
    pub id: String,
    pub primary_text: Option<String>,
    pub secondary_text: Option<String>,
    pub detail_text: Option<String>,
    pub raw: Value,
}

impl Subtask {
    pub fn from_raw_data(data: &Value) -> Result<Self, DecodeError> {
        const KIND: &str = "Subtask";
        Ok(Subtask {
            id: str_at(KIND, data, "subtask_id")?.to_string(),
            primary_text: find_text(data, "primary_text"),
            secondary_text: find_text(data, "secondary_text"),
            detail_text: find_text(data, "detail_text"),
            raw: data.clone(),
        })
    }
}

/// Depth-first search for a display-text holder. Subtask payloads place
/// `primary_text`/`secondary_text` at varying depths, either as a plain
/// string or as a `{ "text": ... }` object.
fn find_text(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(fields) => {
            if let Some(holder) = fields.get(key) {
                if let Some(text) = holder.as_str() {
                    return Some(text.to_string());
                }
                if let Some(text) = holder.get("text").and_then(Value::as_str) {
                    return Some(text.to_string());
                }
            }
            fields.values().find_map(|child| find_text(child, key))
        }
        Value::Array(items) => items.iter().find_map(|child| find_text(child, key)),
        _ => None,
    }
}

/// Extract raw tweet payloads from a timeline `instructions` array.
pub fn tweets_data_from_instructions(instructions: &Value) -> Vec<&Value> {
    let mut tweets = Vec::new();
    let Some(instructions) = instructions.as_array() else {
        return tweets;
    };

    for instruction in instructions {
        let Some(entries) = instruction.get("entries").and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            let is_tweet = entry
                .get("entryId")
                .and_then(Value::as_str)
                .is_some_and(|id| id.starts_with("tweet"));
            if !is_tweet {
                continue;
            }
            if let Some(tweet) = entry
                .get("content")
                .and_then(|content| content.get("itemContent"))
                .and_then(|item| item.get("tweet_results"))
                .and_then(|results| results.get("result"))
            {
                tweets.push(tweet);
            }
        }
    }

    tweets
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_user() -> Value {
        json!({
            "rest_id": "1234567890",
            "legacy": {
                "screen_name": "alice",
                "name": "Alice",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "description": "hi",
                "location": "nowhere",
                "followers_count": 10,
                "friends_count": 3,
            }
        })
    }

    #[test]
    fn decodes_user() {
        let user = User::from_raw_data(&sample_user()).unwrap();
        assert_eq!(user.id, 1234567890);
        assert_eq!(user.username, "alice");
        assert_eq!(user.followers_count, 10);
    }

    #[test]
    fn missing_field_names_the_path() {
        let mut data = sample_user();
        data["legacy"].as_object_mut().unwrap().remove("screen_name");
        let err = User::from_raw_data(&data).unwrap_err();
        assert_eq!(
            err.to_string(),
            "User: missing field `legacy.screen_name`"
        );
    }

    #[test]
    fn decodes_tweet_with_retweet_linkage() {
        let data = json!({
            "legacy": {
                "id_str": "2",
                "user_id_str": "1",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "full_text": "RT @bob: hello",
                "lang": "en",
                "favorite_count": 0,
                "quote_count": 0,
                "reply_count": 0,
                "retweet_count": 1,
                "retweeted": true,
                "retweeted_status_result": {
                    "result": {
                        "legacy": {
                            "id_str": "1",
                            "user_id_str": "9",
                            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                            "full_text": "hello",
                            "lang": "en",
                            "favorite_count": 5,
                            "quote_count": 0,
                            "reply_count": 0,
                            "retweet_count": 1,
                            "retweeted": false,
                        }
                    }
                }
            }
        });
        let tweet = Tweet::from_raw_data(&data).unwrap();
        assert_eq!(tweet.id, 2);
        let original = tweet.retweeted_tweet.expect("retweet linkage");
        assert_eq!(original.id, 1);
    }

    #[test]
    fn decodes_media_with_expiry() {
        let data = json!({
            "media_id": 710511363345354753u64,
            "media_id_string": "710511363345354753",
            "size": 11065,
            "expires_after_secs": 86400,
            "image": {"image_type": "image/jpeg", "w": 800, "h": 320},
        });
        let media = Media::from_raw_data(&data).unwrap();
        assert_eq!(media.id, 710511363345354753);
        assert_eq!(media.image_width, Some(800));
        assert!(!media.is_expired());
    }

    #[test]
    fn subtask_text_is_found_at_depth() {
        let data = json!({
            "subtask_id": "LoginAcid",
            "enter_text": {
                "header": {
                    "primary_text": {"text": "Check your email"},
                    "secondary_text": {"text": "We sent a code"},
                }
            }
        });
        let subtask = Subtask::from_raw_data(&data).unwrap();
        assert_eq!(subtask.id, "LoginAcid");
        assert_eq!(subtask.primary_text.as_deref(), Some("Check your email"));
        assert_eq!(subtask.secondary_text.as_deref(), Some("We sent a code"));
        assert_eq!(subtask.detail_text, None);
    }

    #[test]
    fn instructions_yield_tweet_payloads_only() {
        let instructions = json!([
            {"type": "TimelineClearCache"},
            {"type": "TimelineAddEntries", "entries": [
                {"entryId": "tweet-1", "content": {"itemContent": {"tweet_results": {"result": {"ok": 1}}}}},
                {"entryId": "cursor-top-2", "content": {}},
            ]}
        ]);
        let tweets = tweets_data_from_instructions(&instructions);
        assert_eq!(tweets.len(), 1);
    }
}
