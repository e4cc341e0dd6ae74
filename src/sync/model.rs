use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slack message timestamp, kept verbatim because it doubles as the message id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlackTs(String);

impl SlackTs {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn epoch() -> Self {
        Self::from_datetime(DateTime::<Utc>::default())
    }

    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        let micros = value.timestamp_micros();
        let seconds = micros.div_euclid(1_000_000);
        let fraction = micros.rem_euclid(1_000_000);
        Self(format!("{seconds}.{fraction:06}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Microseconds since the epoch. Unparseable values sort as the epoch.
    pub fn micros(&self) -> i64 {
        let (seconds, fraction) = self.0.split_once('.').unwrap_or((self.0.as_str(), ""));
        let Ok(seconds) = seconds.parse::<i64>() else {
            return 0;
        };
        let digits: String = fraction
            .chars()
            .take_while(char::is_ascii_digit)
            .chain(std::iter::repeat('0'))
            .take(6)
            .collect();
        let fraction = digits.parse::<i64>().unwrap_or(0);
        seconds.saturating_mul(1_000_000).saturating_add(fraction)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros()).unwrap_or_default()
    }
}

impl Ord for SlackTs {
    fn cmp(&self, other: &Self) -> Ordering {
        self.micros()
            .cmp(&other.micros())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SlackTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SlackTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlackTs {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
    Direct,
    Group,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public",
            ChannelKind::Private => "private",
            ChannelKind::Direct => "direct",
            ChannelKind::Group => "group",
        }
    }

    /// Direct and group conversations are addressed by their members, not by a name.
    pub fn is_named(&self) -> bool {
        matches!(self, ChannelKind::Public | ChannelKind::Private)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub title: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_bot: bool,
    pub is_deleted: bool,
    pub avatar_url: Option<String>,
}

impl User {
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub url: String,
    pub mimetype: Option<String>,
}

/// Legacy `attachments` entry; rendered as a quote under the message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyAttachment {
    pub author_id: Option<String>,
    pub text: Option<String>,
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Author {
    User(String),
    Bot {
        bot_id: Option<String>,
        username: Option<String>,
    },
}

impl Author {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Author::User(id) => Some(id),
            Author::Bot { .. } => None,
        }
    }

    /// The raw identifier used when no destination account exists.
    pub fn raw_label(&self) -> String {
        match self {
            Author::User(id) => id.clone(),
            Author::Bot { bot_id, username } => username
                .clone()
                .or_else(|| bot_id.clone())
                .unwrap_or_else(|| "bot".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub ts: SlackTs,
    pub channel_id: String,
    pub author: Author,
    pub text: String,
    pub files: Vec<FileRef>,
    pub attachments: Vec<LegacyAttachment>,
    pub reply_count: u32,
    pub thread_ts: Option<SlackTs>,
    pub replies: Vec<Message>,
}

impl Message {
    pub fn is_thread_root(&self) -> bool {
        self.reply_count > 0
            && self
                .thread_ts
                .as_ref()
                .is_none_or(|thread_ts| thread_ts == &self.ts)
    }

    pub fn is_reply(&self) -> bool {
        self.thread_ts
            .as_ref()
            .is_some_and(|thread_ts| thread_ts != &self.ts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub ts: SlackTs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emoji {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub position: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, rename = "type")]
    pub channel_type: String,
    #[serde(default)]
    pub header: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestPost {
    pub id: String,
    pub slack_ts: Option<SlackTs>,
    pub root_id: Option<String>,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub position: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.nickname.is_none()
            && self.position.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub display_name: String,
    pub kind: ChannelKind,
    /// Destination user ids; used only for direct and group channels.
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostProps {
    pub from_webhook: String,
    pub override_username: String,
    pub username: String,
    pub slack_user_id: String,
    pub slack_user_name: String,
    pub slack_channel_id: String,
    pub slack_channel_name: String,
    pub slack_ts: SlackTs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPost {
    pub channel_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    pub file_ids: Vec<String>,
    pub props: PostProps,
}
