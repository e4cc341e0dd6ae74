use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use thiserror::Error;

use super::model::{
    Bookmark, Channel, DestChannel, DestPost, DestUser, Emoji, Message, NewChannel, NewPost,
    NewUser, Pin, SlackTs, User, UserPatch,
};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{method} returned status {status}: {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    #[error("{method} returned error: {code}")]
    Api { method: String, code: String },
    #[error("failed to decode {method} response: {reason}")]
    Decode { method: String, reason: String },
    #[error("request to {method} failed: {reason}")]
    Transport { method: String, reason: String },
    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
}

impl PlatformError {
    /// Rate limits, timeouts and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Status { status, .. } => *status == 429 || *status >= 500,
            PlatformError::Api { code, .. } => code == "ratelimited" || code == "fatal_error",
            PlatformError::Transport { .. } => true,
            PlatformError::Decode { .. } | PlatformError::TooLarge { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Non-2xx responses become [`PlatformError::Status`]; a 429 carries its
/// `Retry-After` hint.
pub async fn check_status(
    method: &str,
    response: reqwest::Response,
) -> PlatformResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    } else {
        None
    };
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Status {
        method: method.to_string(),
        status: status.as_u16(),
        body,
        retry_after,
    })
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

#[async_trait]
pub trait SourcePlatform: Send + Sync {
    /// Returns the id of the authenticated user.
    async fn auth_test(&self) -> PlatformResult<String>;
    async fn list_channels(&self, cursor: Option<&str>) -> PlatformResult<Page<Channel>>;
    async fn list_users(&self, cursor: Option<&str>) -> PlatformResult<Page<User>>;
    /// Newest-first, inclusive of `oldest`.
    async fn history(
        &self,
        channel_id: &str,
        oldest: &SlackTs,
        cursor: Option<&str>,
        limit: u32,
    ) -> PlatformResult<Page<Message>>;
    /// Oldest-first; the first page starts with the root itself.
    async fn replies(
        &self,
        channel_id: &str,
        ts: &SlackTs,
        oldest: &SlackTs,
        cursor: Option<&str>,
    ) -> PlatformResult<Page<Message>>;
    async fn list_pins(&self, channel_id: &str) -> PlatformResult<Vec<Pin>>;
    async fn list_bookmarks(&self, channel_id: &str) -> PlatformResult<Vec<Bookmark>>;
    async fn list_emoji(&self) -> PlatformResult<Vec<Emoji>>;
    async fn download_file(&self, url: &str, max_bytes: u64) -> PlatformResult<Vec<u8>>;
}

#[async_trait]
pub trait DestinationPlatform: Send + Sync {
    async fn me(&self) -> PlatformResult<DestUser>;
    async fn list_users(&self) -> PlatformResult<Vec<DestUser>>;
    async fn list_channels(&self) -> PlatformResult<Vec<DestChannel>>;
    async fn channel_members(&self, channel_id: &str) -> PlatformResult<Vec<String>>;
    async fn create_user(&self, spec: &NewUser) -> PlatformResult<DestUser>;
    async fn update_user(&self, user_id: &str, patch: &UserPatch) -> PlatformResult<DestUser>;
    async fn set_profile_image(
        &self,
        user_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> PlatformResult<()>;
    async fn create_channel(&self, spec: &NewChannel) -> PlatformResult<DestChannel>;
    async fn add_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()>;
    async fn upload_file(
        &self,
        channel_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> PlatformResult<String>;
    async fn create_post(&self, post: &NewPost) -> PlatformResult<String>;
    /// Full post history of the channel, any order.
    async fn channel_posts(&self, channel_id: &str) -> PlatformResult<Vec<DestPost>>;
    async fn pinned_posts(&self, channel_id: &str) -> PlatformResult<Vec<DestPost>>;
    async fn pin(&self, post_id: &str) -> PlatformResult<()>;
    async fn unpin(&self, post_id: &str) -> PlatformResult<()>;
    async fn update_channel_header(&self, channel_id: &str, header: &str) -> PlatformResult<()>;
    async fn list_emoji(&self) -> PlatformResult<Vec<String>>;
    async fn create_emoji(
        &self,
        name: &str,
        creator_id: &str,
        bytes: Vec<u8>,
    ) -> PlatformResult<()>;
}
