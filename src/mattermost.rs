use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::config::MattermostConfig;
use crate::media::normalize_content_type;
use crate::sync::model::{
    ChannelKind, DestChannel, DestPost, DestUser, NewChannel, NewPost, NewUser, SlackTs, UserPatch,
};
use crate::sync::platform::{DestinationPlatform, PlatformError, PlatformResult, check_status};
use crate::utils::AppError;

const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Mattermost REST v4 client acting as the migration bot.
pub struct MattermostClient {
    http: reqwest::Client,
    api_url: String,
    token: SecretString,
    team_name: Option<String>,
    team_id: OnceCell<String>,
    me: OnceCell<DestUser>,
}

impl MattermostClient {
    pub fn new(config: &MattermostConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent("slack-mattermost-sync")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| {
                AppError::Mattermost(format!("failed to construct HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            api_url: format!("{}/api/v4", config.url.trim_end_matches('/')),
            token: SecretString::from(config.bot_token.clone()),
            team_name: config
                .team_name
                .clone()
                .filter(|name| !name.trim().is_empty()),
            team_id: OnceCell::new(),
            me: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> PlatformResult<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.api_url, path.trim_start_matches('/')))
            .map_err(|err| PlatformError::Transport {
                method: path.to_string(),
                reason: format!("invalid url: {err}"),
            })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
    }

    async fn send(&self, label: &str, request: RequestBuilder) -> PlatformResult<reqwest::Response> {
        let response = request.send().await.map_err(|err| PlatformError::Transport {
            method: label.to_string(),
            reason: err.to_string(),
        })?;
        check_status(label, response).await
    }

    async fn decode<T: DeserializeOwned>(
        label: &str,
        response: reqwest::Response,
    ) -> PlatformResult<T> {
        response.json().await.map_err(|err| PlatformError::Decode {
            method: label.to_string(),
            reason: err.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> PlatformResult<T> {
        let url = self.endpoint(path, query)?;
        let response = self.send(path, self.request(Method::GET, url)).await?;
        Self::decode(path, response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> PlatformResult<T> {
        let url = self.endpoint(path, &[])?;
        let response = self
            .send(path, self.request(method, url).json(body))
            .await?;
        Self::decode(path, response).await
    }

    async fn post_empty(&self, path: &str, body: Option<&Value>) -> PlatformResult<()> {
        let url = self.endpoint(path, &[])?;
        let mut request = self.request(Method::POST, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(path, request).await.map(|_| ())
    }

    /// Walks `page=0,1,..` until a page comes back empty.
    async fn paged<T: DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> PlatformResult<Vec<T>> {
        let per_page = PER_PAGE.to_string();
        let mut items = Vec::new();
        for page in 0usize.. {
            let page = page.to_string();
            let mut query = vec![("page", page.as_str()), ("per_page", per_page.as_str())];
            query.extend_from_slice(extra);
            let batch: Vec<T> = self.get_json(path, &query).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }

    async fn posts_paged(&self, path: &str) -> PlatformResult<Vec<DestPost>> {
        let per_page = PER_PAGE.to_string();
        let mut posts = Vec::new();
        for page in 0usize.. {
            let page = page.to_string();
            let value: Value = self
                .get_json(
                    path,
                    &[("page", page.as_str()), ("per_page", per_page.as_str())],
                )
                .await?;
            let batch = parse_post_list(&value);
            if batch.is_empty() {
                break;
            }
            posts.extend(batch);
        }
        Ok(posts)
    }

    /// The configured team, or the first team the bot belongs to.
    pub async fn default_team(&self) -> PlatformResult<&str> {
        self.team_id
            .get_or_try_init(|| async {
                let team: Value = match self.team_name.as_deref() {
                    Some(name) => self.get_json(&format!("teams/name/{name}"), &[]).await?,
                    None => {
                        let teams: Vec<Value> = self.get_json("users/me/teams", &[]).await?;
                        teams.into_iter().next().ok_or_else(|| PlatformError::Api {
                            method: "users/me/teams".to_string(),
                            code: "no_team".to_string(),
                        })?
                    }
                };
                let id = team
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PlatformError::Decode {
                        method: "teams".to_string(),
                        reason: "team without id".to_string(),
                    })?;
                info!(team = %id, "using destination team");
                Ok::<_, PlatformError>(id.to_string())
            })
            .await
            .map(String::as_str)
    }

    pub async fn create_direct_channel(&self, member_ids: &[String]) -> PlatformResult<DestChannel> {
        let me = self.me().await?;
        let pair = direct_pair(&me.id, member_ids);
        self.send_json(Method::POST, "channels/direct", &json!(pair))
            .await
    }

    pub async fn create_group_channel(&self, member_ids: &[String]) -> PlatformResult<DestChannel> {
        self.send_json(Method::POST, "channels/group", &json!(member_ids))
            .await
    }

    async fn upload_part(
        &self,
        label: &str,
        url: Url,
        form: Form,
    ) -> PlatformResult<reqwest::Response> {
        self.send(label, self.request(Method::POST, url).multipart(form))
            .await
    }
}

fn file_part(file_name: &str, bytes: Vec<u8>) -> PlatformResult<Part> {
    let content_type = normalize_content_type(None, file_name, &bytes);
    Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str(&content_type)
        .map_err(|err| PlatformError::Transport {
            method: "multipart".to_string(),
            reason: err.to_string(),
        })
}

/// A direct channel always has two sides; a one-member conversation is
/// paired with the bot itself.
fn direct_pair(me: &str, member_ids: &[String]) -> Vec<String> {
    let mut pair: Vec<String> = member_ids.iter().take(2).cloned().collect();
    if pair.len() < 2 {
        pair.push(me.to_string());
    }
    pair
}

/// Mattermost channel handles are lowercase `a-z0-9-_`, 2 to 64 characters.
fn channel_handle(name: &str) -> String {
    let mut handle: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    handle = handle.trim_matches('-').to_string();
    while handle.chars().count() < 2 {
        handle.push('_');
    }
    handle.chars().take(64).collect()
}

fn parse_post(value: &Value) -> Option<DestPost> {
    let id = value.get("id").and_then(Value::as_str)?.to_string();
    Some(DestPost {
        id,
        slack_ts: value
            .pointer("/props/slack_ts")
            .and_then(Value::as_str)
            .filter(|ts| !ts.is_empty())
            .map(SlackTs::new),
        root_id: value
            .get("root_id")
            .and_then(Value::as_str)
            .filter(|root| !root.is_empty())
            .map(ToOwned::to_owned),
        is_pinned: value
            .get("is_pinned")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Post lists come as `{order: [id..], posts: {id: post}}`.
fn parse_post_list(value: &Value) -> Vec<DestPost> {
    let Some(posts) = value.get("posts").and_then(Value::as_object) else {
        return Vec::new();
    };
    value
        .get("order")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter_map(|id| posts.get(id))
        .filter_map(parse_post)
        .collect()
}

fn channel_type(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Public => "O",
        ChannelKind::Private => "P",
        ChannelKind::Direct => "D",
        ChannelKind::Group => "G",
    }
}

#[async_trait]
impl DestinationPlatform for MattermostClient {
    async fn me(&self) -> PlatformResult<DestUser> {
        self.me
            .get_or_try_init(|| self.get_json("users/me", &[]))
            .await
            .cloned()
    }

    async fn list_users(&self) -> PlatformResult<Vec<DestUser>> {
        self.paged("users", &[]).await
    }

    async fn list_channels(&self) -> PlatformResult<Vec<DestChannel>> {
        let team = self.default_team().await?.to_string();
        let mut channels: Vec<DestChannel> =
            self.paged(&format!("teams/{team}/channels"), &[]).await?;
        // Private channels are only visible through the bot's own memberships.
        let mine: Vec<DestChannel> = self
            .get_json(&format!("users/me/teams/{team}/channels"), &[])
            .await?;
        let mut seen: HashSet<String> = channels.iter().map(|c| c.id.clone()).collect();
        channels.extend(mine.into_iter().filter(|c| seen.insert(c.id.clone())));
        Ok(channels)
    }

    async fn channel_members(&self, channel_id: &str) -> PlatformResult<Vec<String>> {
        let members: Vec<Value> = self
            .paged(&format!("channels/{channel_id}/members"), &[])
            .await?;
        Ok(members
            .iter()
            .filter_map(|member| member.get("user_id").and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .collect())
    }

    async fn create_user(&self, spec: &NewUser) -> PlatformResult<DestUser> {
        let created: DestUser = self
            .send_json(Method::POST, "users", &json!(spec))
            .await?;
        let team = self.default_team().await?.to_string();
        self.post_empty(
            &format!("teams/{team}/members"),
            Some(&json!({"team_id": team, "user_id": created.id})),
        )
        .await?;
        debug!(user = %created.username, "destination user added to team");
        Ok(created)
    }

    async fn update_user(&self, user_id: &str, patch: &UserPatch) -> PlatformResult<DestUser> {
        self.send_json(Method::PUT, &format!("users/{user_id}/patch"), &json!(patch))
            .await
    }

    async fn set_profile_image(
        &self,
        user_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> PlatformResult<()> {
        let path = format!("users/{user_id}/image");
        let form = Form::new().part("image", file_part(file_name, bytes)?);
        let url = self.endpoint(&path, &[])?;
        self.upload_part(&path, url, form).await.map(|_| ())
    }

    async fn create_channel(&self, spec: &NewChannel) -> PlatformResult<DestChannel> {
        match spec.kind {
            ChannelKind::Direct => self.create_direct_channel(&spec.member_ids).await,
            ChannelKind::Group => self.create_group_channel(&spec.member_ids).await,
            kind => {
                let team = self.default_team().await?.to_string();
                self.send_json(
                    Method::POST,
                    "channels",
                    &json!({
                        "team_id": team,
                        "name": channel_handle(&spec.name),
                        "display_name": spec.display_name,
                        "type": channel_type(kind),
                    }),
                )
                .await
            }
        }
    }

    async fn add_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        self.post_empty(
            &format!("channels/{channel_id}/members"),
            Some(&json!({"user_id": user_id})),
        )
        .await
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> PlatformResult<String> {
        let url = self.endpoint("files", &[("channel_id", channel_id), ("filename", file_name)])?;
        let response = self
            .send("files", self.request(Method::POST, url).body(bytes))
            .await?;
        let value: Value = Self::decode("files", response).await?;
        value
            .pointer("/file_infos/0/id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| PlatformError::Decode {
                method: "files".to_string(),
                reason: "missing file_infos".to_string(),
            })
    }

    async fn create_post(&self, post: &NewPost) -> PlatformResult<String> {
        let url = self.endpoint("posts", &[])?;
        let response = self
            .send("posts", self.request(Method::POST, url).json(post))
            .await?;
        if response.status() != StatusCode::CREATED {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Status {
                method: "posts".to_string(),
                status,
                body,
                retry_after: None,
            });
        }
        let value: Value = Self::decode("posts", response).await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| PlatformError::Decode {
                method: "posts".to_string(),
                reason: "missing post id".to_string(),
            })
    }

    async fn channel_posts(&self, channel_id: &str) -> PlatformResult<Vec<DestPost>> {
        self.posts_paged(&format!("channels/{channel_id}/posts"))
            .await
    }

    async fn pinned_posts(&self, channel_id: &str) -> PlatformResult<Vec<DestPost>> {
        let value: Value = self
            .get_json(&format!("channels/{channel_id}/pinned"), &[])
            .await?;
        Ok(parse_post_list(&value))
    }

    async fn pin(&self, post_id: &str) -> PlatformResult<()> {
        self.post_empty(&format!("posts/{post_id}/pin"), None).await
    }

    async fn unpin(&self, post_id: &str) -> PlatformResult<()> {
        self.post_empty(&format!("posts/{post_id}/unpin"), None).await
    }

    async fn update_channel_header(&self, channel_id: &str, header: &str) -> PlatformResult<()> {
        let _: Value = self
            .send_json(
                Method::PUT,
                &format!("channels/{channel_id}"),
                &json!({"id": channel_id, "header": header}),
            )
            .await?;
        Ok(())
    }

    async fn list_emoji(&self) -> PlatformResult<Vec<String>> {
        let emoji: Vec<Value> = self.paged("emoji", &[]).await?;
        Ok(emoji
            .iter()
            .filter_map(|entry| entry.get("name").and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .collect())
    }

    async fn create_emoji(
        &self,
        name: &str,
        creator_id: &str,
        bytes: Vec<u8>,
    ) -> PlatformResult<()> {
        let form = Form::new()
            .part("image", file_part(&format!("{name}.png"), bytes)?)
            .text(
                "emoji",
                json!({"name": name, "creator_id": creator_id}).to_string(),
            );
        let url = self.endpoint("emoji", &[])?;
        self.upload_part("emoji", url, form).await.map(|_| ())
    }
}
