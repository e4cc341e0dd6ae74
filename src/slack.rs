use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::SlackConfig;
use crate::media::read_limited;
use crate::sync::model::{Bookmark, Channel, ChannelKind, Emoji, Message, Pin, SlackTs, User};
use crate::sync::platform::{Page, PlatformError, PlatformResult, SourcePlatform, check_status};
use crate::utils::AppError;

pub mod command_handler;
pub mod payload;

pub use self::command_handler::{SlackCommand, SlackCommandHandler, SlackCommandOutcome};

const CHANNEL_TYPES: &str = "public_channel,private_channel,im,mpim";
const LIST_PAGE_SIZE: &str = "200";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Read-only Slack Web API client.
///
/// Conversation reads use the user token when one is configured, so direct
/// messages of that user are visible; everything else uses the bot token.
pub struct SlackClient {
    http: reqwest::Client,
    api_url: String,
    bot_token: SecretString,
    user_token: Option<SecretString>,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent("slack-mattermost-sync")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| AppError::Slack(format!("failed to construct HTTP client: {err}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: SecretString::from(config.bot_token.clone()),
            user_token: config.user_token.clone().map(SecretString::from),
        })
    }

    fn reader_token(&self) -> &SecretString {
        self.user_token.as_ref().unwrap_or(&self.bot_token)
    }

    fn method_url(&self, method: &str, query: &[(&str, &str)]) -> PlatformResult<Url> {
        let mut url = Url::parse(&format!("{}/{method}", self.api_url)).map_err(|err| {
            PlatformError::Transport {
                method: method.to_string(),
                reason: format!("invalid api url: {err}"),
            }
        })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn call(
        &self,
        method: &str,
        token: &SecretString,
        query: &[(&str, &str)],
    ) -> PlatformResult<Value> {
        let url = self.method_url(method, query)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|err| PlatformError::Transport {
                method: method.to_string(),
                reason: err.to_string(),
            })?;

        let response = check_status(method, response).await?;
        let value: Value = response.json().await.map_err(|err| PlatformError::Decode {
            method: method.to_string(),
            reason: err.to_string(),
        })?;

        if !value.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let code = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(PlatformError::Api {
                method: method.to_string(),
                code: code.to_string(),
            });
        }
        Ok(value)
    }

    async fn channel_members(&self, channel_id: &str) -> PlatformResult<Vec<String>> {
        let mut members = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("channel", channel_id), ("limit", LIST_PAGE_SIZE)];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }
            let value = self
                .call("conversations.members", self.reader_token(), &query)
                .await?;
            members.extend(
                value
                    .get("members")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned),
            );
            match payload::next_cursor(&value) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(members)
    }
}

fn items<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

#[async_trait]
impl SourcePlatform for SlackClient {
    async fn auth_test(&self) -> PlatformResult<String> {
        let value = self.call("auth.test", &self.bot_token, &[]).await?;
        value
            .get("user_id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| PlatformError::Decode {
                method: "auth.test".to_string(),
                reason: "missing user_id".to_string(),
            })
    }

    async fn list_channels(&self, cursor: Option<&str>) -> PlatformResult<Page<Channel>> {
        let mut query = vec![
            ("types", CHANNEL_TYPES),
            ("limit", LIST_PAGE_SIZE),
            ("exclude_archived", "false"),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let value = self
            .call("conversations.list", self.reader_token(), &query)
            .await?;

        let mut channels = Vec::new();
        for raw in items(&value, "channels") {
            let Some(mut channel) = payload::parse_channel(raw) else {
                warn!("skipping channel without id");
                continue;
            };
            if channel.kind != ChannelKind::Direct {
                match self.channel_members(&channel.id).await {
                    Ok(members) => channel.members = members,
                    Err(PlatformError::Api { code, .. }) => {
                        debug!(channel = %channel.name, "members not readable: {code}");
                    }
                    Err(err) => return Err(err),
                }
            }
            channels.push(channel);
        }
        Ok(Page {
            items: channels,
            next_cursor: payload::next_cursor(&value),
        })
    }

    async fn list_users(&self, cursor: Option<&str>) -> PlatformResult<Page<User>> {
        let mut query = vec![("limit", LIST_PAGE_SIZE)];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let value = self.call("users.list", &self.bot_token, &query).await?;
        Ok(Page {
            items: items(&value, "members")
                .filter_map(payload::parse_user)
                .collect(),
            next_cursor: payload::next_cursor(&value),
        })
    }

    async fn history(
        &self,
        channel_id: &str,
        oldest: &SlackTs,
        cursor: Option<&str>,
        limit: u32,
    ) -> PlatformResult<Page<Message>> {
        let limit = limit.to_string();
        let mut query = vec![
            ("channel", channel_id),
            ("oldest", oldest.as_str()),
            ("inclusive", "true"),
            ("limit", limit.as_str()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let value = self
            .call("conversations.history", self.reader_token(), &query)
            .await?;
        Ok(Page {
            items: items(&value, "messages")
                .filter_map(|raw| payload::parse_message(channel_id, raw))
                .collect(),
            next_cursor: payload::next_cursor(&value),
        })
    }

    async fn replies(
        &self,
        channel_id: &str,
        ts: &SlackTs,
        oldest: &SlackTs,
        cursor: Option<&str>,
    ) -> PlatformResult<Page<Message>> {
        let mut query = vec![
            ("channel", channel_id),
            ("ts", ts.as_str()),
            ("oldest", oldest.as_str()),
            ("inclusive", "true"),
            ("limit", LIST_PAGE_SIZE),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let value = self
            .call("conversations.replies", self.reader_token(), &query)
            .await?;
        Ok(Page {
            items: items(&value, "messages")
                .filter_map(|raw| payload::parse_message(channel_id, raw))
                .collect(),
            next_cursor: payload::next_cursor(&value),
        })
    }

    async fn list_pins(&self, channel_id: &str) -> PlatformResult<Vec<Pin>> {
        let value = self
            .call("pins.list", self.reader_token(), &[("channel", channel_id)])
            .await?;
        Ok(items(&value, "items").filter_map(payload::parse_pin).collect())
    }

    async fn list_bookmarks(&self, channel_id: &str) -> PlatformResult<Vec<Bookmark>> {
        let value = self
            .call(
                "bookmarks.list",
                self.reader_token(),
                &[("channel_id", channel_id)],
            )
            .await?;
        Ok(items(&value, "bookmarks")
            .filter_map(payload::parse_bookmark)
            .collect())
    }

    async fn list_emoji(&self) -> PlatformResult<Vec<Emoji>> {
        let value = self.call("emoji.list", &self.bot_token, &[]).await?;
        Ok(value
            .get("emoji")
            .and_then(Value::as_object)
            .map(payload::parse_emoji_map)
            .unwrap_or_default())
    }

    async fn download_file(&self, url: &str, max_bytes: u64) -> PlatformResult<Vec<u8>> {
        let method = "files.download";
        let response = self
            .http
            .get(url)
            .bearer_auth(self.reader_token().expose_secret())
            .send()
            .await
            .map_err(|err| PlatformError::Transport {
                method: method.to_string(),
                reason: err.to_string(),
            })?;
        let response = check_status(method, response).await?;
        read_limited(response, max_bytes, method).await
    }
}
