use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::model::{Bookmark, Channel, Message, Pin, SlackTs, User};
use super::platform::{Page, PlatformError, SourcePlatform};
use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    History,
    Replies,
    Users,
    Channels,
    Pins,
    Bookmarks,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::History => "history",
            CallKind::Replies => "replies",
            CallKind::Users => "users",
            CallKind::Channels => "channels",
            CallKind::Pins => "pins",
            CallKind::Bookmarks => "bookmarks",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub short_backoff: Duration,
    pub long_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            short_backoff: Duration::from_millis(config.retry_short_backoff_ms),
            long_backoff: Duration::from_millis(config.retry_long_backoff_ms),
        }
    }

    /// Directory listings are heavier on Slack's rate limits than history reads.
    pub fn backoff_for(&self, kind: CallKind) -> Duration {
        match kind {
            CallKind::Users | CallKind::Channels => self.long_backoff,
            _ => self.short_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            short_backoff: Duration::from_secs(2),
            long_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{kind} fetch failed after {attempts} attempts: {source}")]
    Exhausted {
        kind: CallKind,
        attempts: u32,
        #[source]
        source: PlatformError,
    },
    #[error("{kind} fetch rejected: {source}")]
    Rejected {
        kind: CallKind,
        #[source]
        source: PlatformError,
    },
}

impl FetchError {
    pub fn kind(&self) -> CallKind {
        match self {
            FetchError::Exhausted { kind, .. } | FetchError::Rejected { kind, .. } => *kind,
        }
    }
}

pub struct PaginatedFetcher {
    source: Arc<dyn SourcePlatform>,
    policy: RetryPolicy,
    page_size: u32,
}

impl PaginatedFetcher {
    pub fn new(source: Arc<dyn SourcePlatform>, policy: RetryPolicy, page_size: u32) -> Self {
        Self {
            source,
            policy,
            page_size: page_size.max(1),
        }
    }

    pub fn source(&self) -> &Arc<dyn SourcePlatform> {
        &self.source
    }

    async fn with_retry<T, F, Fut>(&self, kind: CallKind, mut call: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(source) if !source.is_transient() => {
                    return Err(FetchError::Rejected { kind, source });
                }
                Err(source) if attempt >= self.policy.max_attempts => {
                    return Err(FetchError::Exhausted {
                        kind,
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    let backoff = self.policy.backoff_for(kind);
                    let delay = source.retry_after().map_or(backoff, |hint| hint.max(backoff));
                    warn!(
                        kind = kind.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "source call failed, retrying: {source}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One history page since `window_start`, reordered oldest-first.
    pub async fn fetch(
        &self,
        channel_id: &str,
        window_start: &SlackTs,
        cursor: Option<&str>,
    ) -> Result<Page<Message>, FetchError> {
        let mut page = self
            .with_retry(CallKind::History, || {
                self.source
                    .history(channel_id, window_start, cursor, self.page_size)
            })
            .await?;
        page.items.reverse();
        page.next_cursor = normalize_cursor(page.next_cursor);
        Ok(page)
    }

    /// Every message in the window, oldest-first across all pages.
    ///
    /// Pages arrive newest-first, so nothing is returned until the last page is
    /// consumed; a failed page fails the whole window.
    pub async fn history_window(
        &self,
        channel_id: &str,
        window_start: &SlackTs,
    ) -> Result<Vec<Message>, FetchError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch(channel_id, window_start, cursor.as_deref()).await?;
            let next = page.next_cursor;
            if page.items.is_empty() {
                break;
            }
            pages.push(page.items);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut messages: Vec<Message> = pages.into_iter().rev().flatten().collect();
        messages.retain(|message| !message.is_reply());
        debug!(channel = channel_id, count = messages.len(), "history window fetched");
        Ok(messages)
    }

    /// Replies of a thread root, following continuation cursors. The root is dropped.
    pub async fn replies(
        &self,
        channel_id: &str,
        root: &Message,
        window_start: &SlackTs,
    ) -> Result<Vec<Message>, FetchError> {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .with_retry(CallKind::Replies, || {
                    self.source
                        .replies(channel_id, &root.ts, window_start, cursor.as_deref())
                })
                .await?;
            let next = normalize_cursor(page.next_cursor);
            if page.items.is_empty() {
                break;
            }
            replies.extend(page.items.into_iter().filter(|reply| reply.ts != root.ts));
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        replies.sort_by(|a, b| a.ts.cmp(&b.ts));
        if replies.len() < root.reply_count as usize && root.ts.micros() >= window_start.micros() {
            warn!(
                channel = channel_id,
                ts = %root.ts,
                fetched = replies.len(),
                advertised = root.reply_count,
                "thread returned fewer replies than advertised"
            );
        }
        Ok(replies)
    }

    pub async fn all_users(&self) -> Result<Vec<User>, FetchError> {
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .with_retry(CallKind::Users, || self.source.list_users(cursor.as_deref()))
                .await?;
            let next = normalize_cursor(page.next_cursor);
            if page.items.is_empty() {
                break;
            }
            users.extend(page.items);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(users)
    }

    pub async fn all_channels(&self) -> Result<Vec<Channel>, FetchError> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .with_retry(CallKind::Channels, || {
                    self.source.list_channels(cursor.as_deref())
                })
                .await?;
            let next = normalize_cursor(page.next_cursor);
            if page.items.is_empty() {
                break;
            }
            channels.extend(page.items);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(channels)
    }

    pub async fn pins(&self, channel_id: &str) -> Result<Vec<Pin>, FetchError> {
        self.with_retry(CallKind::Pins, || self.source.list_pins(channel_id))
            .await
    }

    pub async fn bookmarks(&self, channel_id: &str) -> Result<Vec<Bookmark>, FetchError> {
        self.with_retry(CallKind::Bookmarks, || self.source.list_bookmarks(channel_id))
            .await
    }
}

fn normalize_cursor(cursor: Option<String>) -> Option<String> {
    cursor.filter(|value| !value.trim().is_empty())
}
