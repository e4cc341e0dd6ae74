//! In-memory platforms and stores for exercising the engine without the network.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::model::{
    Author, Bookmark, Channel, ChannelKind, DestChannel, DestPost, DestUser, Emoji, Message,
    NewChannel, NewPost, NewUser, Pin, SlackTs, User, UserPatch,
};
use super::platform::{
    DestinationPlatform, Page, PlatformError, PlatformResult, SourcePlatform,
};
use crate::db::{CheckpointEntry, CheckpointStore, DatabaseError, ExclusionKind, ExclusionStore};

pub fn message(channel: &str, ts: &str, user: &str, text: &str) -> Message {
    Message {
        ts: SlackTs::new(ts),
        channel_id: channel.to_string(),
        author: Author::User(user.to_string()),
        text: text.to_string(),
        files: Vec::new(),
        attachments: Vec::new(),
        reply_count: 0,
        thread_ts: None,
        replies: Vec::new(),
    }
}

pub fn root_with_replies(channel: &str, ts: &str, user: &str, replies: &[&str]) -> Message {
    let mut root = message(channel, ts, user, &format!("thread {ts}"));
    root.thread_ts = Some(SlackTs::new(ts));
    root.reply_count = replies.len() as u32;
    root.replies = replies
        .iter()
        .map(|reply_ts| {
            let mut reply = message(channel, reply_ts, user, &format!("reply {reply_ts}"));
            reply.thread_ts = Some(SlackTs::new(ts));
            reply
        })
        .collect();
    root
}

pub fn user(id: &str, name: &str, email: Option<&str>) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: email.map(ToOwned::to_owned),
        ..User::default()
    }
}

pub fn channel(id: &str, name: &str, kind: ChannelKind, members: &[&str]) -> Channel {
    Channel {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        members: members.iter().map(|member| member.to_string()).collect(),
    }
}

fn status(method: &str, status: u16) -> PlatformError {
    PlatformError::Status {
        method: method.to_string(),
        status,
        body: String::new(),
        retry_after: None,
    }
}

fn paginate<T>(items: Vec<T>, cursor: Option<&str>, limit: usize) -> Page<T> {
    let offset = cursor.and_then(|cursor| cursor.parse::<usize>().ok()).unwrap_or(0);
    let total = items.len();
    let items: Vec<T> = items.into_iter().skip(offset).take(limit).collect();
    let next = offset + items.len();
    Page {
        items,
        next_cursor: (next < total).then(|| next.to_string()),
    }
}

#[derive(Default)]
struct SourceState {
    channels: Vec<Channel>,
    users: Vec<User>,
    messages: HashMap<String, Vec<Message>>,
    history_failures: HashMap<String, (u32, u16)>,
    history_calls: usize,
    replies_page_size: Option<usize>,
    pins: HashMap<String, Vec<Pin>>,
    bookmarks: HashMap<String, Vec<Bookmark>>,
    emoji: Vec<Emoji>,
    files: HashMap<String, Vec<u8>>,
    downloads: usize,
    reject_auth: bool,
}

/// Slack stand-in. Messages are stored as thread roots with their replies embedded.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn add_channel(&self, id: &str, name: &str) {
        self.add_conversation(channel(id, name, ChannelKind::Public, &[]));
    }

    pub fn add_conversation(&self, channel: Channel) {
        self.state.lock().channels.push(channel);
    }

    pub fn add_user(&self, user: User) {
        self.state.lock().users.push(user);
    }

    pub fn add_message(&self, channel: &str, message: Message) {
        self.state
            .lock()
            .messages
            .entry(channel.to_string())
            .or_default()
            .push(message);
    }

    /// The next `times` history calls for the channel fail with `status`.
    pub fn fail_history(&self, channel: &str, times: u32, status: u16) {
        self.state
            .lock()
            .history_failures
            .insert(channel.to_string(), (times, status));
    }

    pub fn history_calls(&self) -> usize {
        self.state.lock().history_calls
    }

    pub fn set_replies_page_size(&self, size: usize) {
        self.state.lock().replies_page_size = Some(size.max(1));
    }

    pub fn set_pins(&self, channel: &str, pins: &[&str]) {
        self.state.lock().pins.insert(
            channel.to_string(),
            pins.iter().map(|ts| Pin { ts: SlackTs::new(*ts) }).collect(),
        );
    }

    pub fn set_bookmarks(&self, channel: &str, bookmarks: Vec<Bookmark>) {
        self.state
            .lock()
            .bookmarks
            .insert(channel.to_string(), bookmarks);
    }

    pub fn add_file(&self, url: &str, bytes: Vec<u8>) {
        self.state.lock().files.insert(url.to_string(), bytes);
    }

    pub fn forget_file(&self, url: &str) {
        self.state.lock().files.remove(url);
    }

    pub fn downloads(&self) -> usize {
        self.state.lock().downloads
    }

    pub fn add_emoji(&self, name: &str, url: &str, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.emoji.push(Emoji {
            name: name.to_string(),
            url: url.to_string(),
        });
        state.files.insert(url.to_string(), bytes.to_vec());
    }

    pub fn reject_auth(&self) {
        self.state.lock().reject_auth = true;
    }
}

#[async_trait]
impl SourcePlatform for FakeSource {
    async fn auth_test(&self) -> PlatformResult<String> {
        if self.state.lock().reject_auth {
            return Err(PlatformError::Api {
                method: "auth.test".to_string(),
                code: "invalid_auth".to_string(),
            });
        }
        Ok("U0MIGRATOR".to_string())
    }

    async fn list_channels(&self, _cursor: Option<&str>) -> PlatformResult<Page<Channel>> {
        Ok(Page::last(self.state.lock().channels.clone()))
    }

    async fn list_users(&self, _cursor: Option<&str>) -> PlatformResult<Page<User>> {
        Ok(Page::last(self.state.lock().users.clone()))
    }

    async fn history(
        &self,
        channel_id: &str,
        oldest: &SlackTs,
        cursor: Option<&str>,
        limit: u32,
    ) -> PlatformResult<Page<Message>> {
        let mut state = self.state.lock();
        state.history_calls += 1;
        if let Some((remaining, code)) = state.history_failures.get_mut(channel_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(status("conversations.history", *code));
        }

        let mut messages: Vec<Message> = state
            .messages
            .get(channel_id)
            .into_iter()
            .flatten()
            .filter(|message| message.ts.micros() >= oldest.micros())
            .map(|message| Message {
                replies: Vec::new(),
                ..message.clone()
            })
            .collect();
        messages.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(paginate(messages, cursor, limit as usize))
    }

    async fn replies(
        &self,
        channel_id: &str,
        ts: &SlackTs,
        oldest: &SlackTs,
        cursor: Option<&str>,
    ) -> PlatformResult<Page<Message>> {
        let state = self.state.lock();
        let root = state
            .messages
            .get(channel_id)
            .into_iter()
            .flatten()
            .find(|message| &message.ts == ts)
            .ok_or_else(|| PlatformError::Api {
                method: "conversations.replies".to_string(),
                code: "thread_not_found".to_string(),
            })?;

        let mut replies: Vec<Message> = root
            .replies
            .iter()
            .filter(|reply| reply.ts.micros() >= oldest.micros())
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.ts.cmp(&b.ts));
        let mut items = vec![Message {
            replies: Vec::new(),
            ..root.clone()
        }];
        items.extend(replies);

        let limit = state.replies_page_size.unwrap_or(items.len().max(1));
        Ok(paginate(items, cursor, limit))
    }

    async fn list_pins(&self, channel_id: &str) -> PlatformResult<Vec<Pin>> {
        Ok(self
            .state
            .lock()
            .pins
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_bookmarks(&self, channel_id: &str) -> PlatformResult<Vec<Bookmark>> {
        Ok(self
            .state
            .lock()
            .bookmarks
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_emoji(&self) -> PlatformResult<Vec<Emoji>> {
        Ok(self.state.lock().emoji.clone())
    }

    async fn download_file(&self, url: &str, max_bytes: u64) -> PlatformResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.downloads += 1;
        let bytes = state
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| status("files.download", 404))?;
        if bytes.len() as u64 > max_bytes {
            return Err(PlatformError::TooLarge {
                size: bytes.len() as u64,
                limit: max_bytes,
            });
        }
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePost {
    pub id: String,
    pub channel_id: String,
    pub message: String,
    pub root_id: Option<String>,
    pub file_ids: Vec<String>,
    pub slack_ts: Option<String>,
    pub is_pinned: bool,
}

struct FakeUser {
    user: DestUser,
    password: Option<String>,
}

#[derive(Default)]
struct DestState {
    next_id: u64,
    users: Vec<FakeUser>,
    created_users: usize,
    channels: Vec<DestChannel>,
    created_channels: Vec<(String, String)>,
    members: HashMap<String, Vec<String>>,
    posts: Vec<FakePost>,
    create_post_calls: usize,
    failing_posts: Vec<String>,
    uploads: Vec<(String, String, usize)>,
    profile_images: Vec<(String, String)>,
    emoji: Vec<(String, String)>,
}

impl DestState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn push_post(&mut self, post: FakePost) -> String {
        let id = post.id.clone();
        self.posts.push(post);
        id
    }
}

/// Mattermost stand-in with the bot account `mm-bot`.
#[derive(Clone, Default)]
pub struct FakeDestination {
    state: Arc<Mutex<DestState>>,
}

impl FakeDestination {
    pub fn add_user(&self, id: &str, username: &str, email: &str) {
        self.state.lock().users.push(FakeUser {
            user: DestUser {
                id: id.to_string(),
                username: username.to_string(),
                email: email.to_string(),
                ..DestUser::default()
            },
            password: None,
        });
    }

    pub fn add_channel(&self, id: &str, name: &str) {
        self.state.lock().channels.push(DestChannel {
            id: id.to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
            channel_type: "O".to_string(),
            header: String::new(),
        });
    }

    pub fn created_users(&self) -> usize {
        self.state.lock().created_users
    }

    pub fn user_password(&self, username: &str) -> Option<String> {
        self.state
            .lock()
            .users
            .iter()
            .find(|entry| entry.user.username == username)
            .and_then(|entry| entry.password.clone())
    }

    pub fn user_position(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .users
            .iter()
            .find(|entry| entry.user.id == id)
            .map(|entry| entry.user.position.clone())
    }

    /// `(name, type)` of every channel created through the platform.
    pub fn created_channels(&self) -> Vec<(String, String)> {
        self.state.lock().created_channels.clone()
    }

    pub fn channel_id(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .channels
            .iter()
            .find(|channel| channel.name == name)
            .map(|channel| channel.id.clone())
    }

    pub fn members(&self, channel_id: &str) -> Vec<String> {
        self.state
            .lock()
            .members
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed_post(&self, channel_id: &str, slack_ts: Option<&str>, pinned: bool) -> String {
        let mut state = self.state.lock();
        let id = state.next_id("post");
        state.push_post(FakePost {
            id,
            channel_id: channel_id.to_string(),
            message: "seeded".to_string(),
            root_id: None,
            file_ids: Vec::new(),
            slack_ts: slack_ts.map(ToOwned::to_owned),
            is_pinned: pinned,
        })
    }

    pub fn seed_reply(&self, channel_id: &str, root_id: &str, slack_ts: &str) -> String {
        let mut state = self.state.lock();
        let id = state.next_id("post");
        state.push_post(FakePost {
            id,
            channel_id: channel_id.to_string(),
            message: "seeded reply".to_string(),
            root_id: Some(root_id.to_string()),
            file_ids: Vec::new(),
            slack_ts: Some(slack_ts.to_string()),
            is_pinned: false,
        })
    }

    /// Posts of the channel in creation order.
    pub fn posts(&self, channel_id: &str) -> Vec<FakePost> {
        self.state
            .lock()
            .posts
            .iter()
            .filter(|post| post.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn create_post_calls(&self) -> usize {
        self.state.lock().create_post_calls
    }

    /// Post creation fails with a 500 for any message containing `text`.
    pub fn fail_posts_containing(&self, text: &str) {
        self.state.lock().failing_posts.push(text.to_string());
    }

    pub fn clear_post_failures(&self) {
        self.state.lock().failing_posts.clear();
    }

    pub fn pinned_ids(&self, channel_id: &str) -> Vec<String> {
        self.state
            .lock()
            .posts
            .iter()
            .filter(|post| post.channel_id == channel_id && post.is_pinned)
            .map(|post| post.id.clone())
            .collect()
    }

    pub fn header(&self, channel_id: &str) -> Option<String> {
        self.state
            .lock()
            .channels
            .iter()
            .find(|channel| channel.id == channel_id)
            .map(|channel| channel.header.clone())
            .filter(|header| !header.is_empty())
    }

    pub fn uploaded_files(&self) -> Vec<(String, String, usize)> {
        self.state.lock().uploads.clone()
    }

    pub fn profile_images(&self) -> Vec<(String, String)> {
        self.state.lock().profile_images.clone()
    }

    pub fn add_emoji(&self, name: &str) {
        self.state
            .lock()
            .emoji
            .push((name.to_string(), "someone".to_string()));
    }

    pub fn emoji_names(&self) -> Vec<String> {
        self.state
            .lock()
            .emoji
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn emoji_creator(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .emoji
            .iter()
            .find(|(emoji, _)| emoji == name)
            .map(|(_, creator)| creator.clone())
    }

    fn to_dest_post(post: &FakePost) -> DestPost {
        DestPost {
            id: post.id.clone(),
            slack_ts: post.slack_ts.as_deref().map(SlackTs::new),
            root_id: post.root_id.clone(),
            is_pinned: post.is_pinned,
        }
    }

    fn set_pinned(&self, post_id: &str, pinned: bool, method: &str) -> PlatformResult<()> {
        let mut state = self.state.lock();
        let post = state
            .posts
            .iter_mut()
            .find(|post| post.id == post_id)
            .ok_or_else(|| status(method, 404))?;
        post.is_pinned = pinned;
        Ok(())
    }
}

#[async_trait]
impl DestinationPlatform for FakeDestination {
    async fn me(&self) -> PlatformResult<DestUser> {
        Ok(DestUser {
            id: "mm-bot".to_string(),
            username: "migration-bot".to_string(),
            ..DestUser::default()
        })
    }

    async fn list_users(&self) -> PlatformResult<Vec<DestUser>> {
        Ok(self
            .state
            .lock()
            .users
            .iter()
            .map(|entry| entry.user.clone())
            .collect())
    }

    async fn list_channels(&self) -> PlatformResult<Vec<DestChannel>> {
        Ok(self.state.lock().channels.clone())
    }

    async fn channel_members(&self, channel_id: &str) -> PlatformResult<Vec<String>> {
        Ok(self.members(channel_id))
    }

    async fn create_user(&self, spec: &NewUser) -> PlatformResult<DestUser> {
        let mut state = self.state.lock();
        let user = DestUser {
            id: state.next_id("mm-user"),
            username: spec.username.clone(),
            email: spec.email.clone(),
            first_name: spec.first_name.clone(),
            last_name: spec.last_name.clone(),
            nickname: spec.nickname.clone(),
            position: spec.position.clone(),
        };
        state.users.push(FakeUser {
            user: user.clone(),
            password: Some(spec.password.clone()),
        });
        state.created_users += 1;
        Ok(user)
    }

    async fn update_user(&self, user_id: &str, patch: &UserPatch) -> PlatformResult<DestUser> {
        let mut state = self.state.lock();
        let entry = state
            .users
            .iter_mut()
            .find(|entry| entry.user.id == user_id)
            .ok_or_else(|| status("users/patch", 404))?;
        let user = &mut entry.user;
        if let Some(value) = &patch.first_name {
            user.first_name = value.clone();
        }
        if let Some(value) = &patch.last_name {
            user.last_name = value.clone();
        }
        if let Some(value) = &patch.nickname {
            user.nickname = value.clone();
        }
        if let Some(value) = &patch.position {
            user.position = value.clone();
        }
        Ok(user.clone())
    }

    async fn set_profile_image(
        &self,
        user_id: &str,
        file_name: &str,
        _bytes: Vec<u8>,
    ) -> PlatformResult<()> {
        self.state
            .lock()
            .profile_images
            .push((user_id.to_string(), file_name.to_string()));
        Ok(())
    }

    async fn create_channel(&self, spec: &NewChannel) -> PlatformResult<DestChannel> {
        let mut state = self.state.lock();
        let channel_type = match spec.kind {
            ChannelKind::Public => "O",
            ChannelKind::Private => "P",
            ChannelKind::Direct => "D",
            ChannelKind::Group => "G",
        };
        let id = if spec.kind.is_named() {
            format!("mm-{}", spec.name)
        } else {
            state.next_id("mm-conversation")
        };
        let channel = DestChannel {
            id: id.clone(),
            name: spec.name.clone(),
            display_name: spec.display_name.clone(),
            channel_type: channel_type.to_string(),
            header: String::new(),
        };
        state.channels.push(channel.clone());
        state
            .created_channels
            .push((spec.name.clone(), channel_type.to_string()));
        if !spec.member_ids.is_empty() {
            state.members.insert(id, spec.member_ids.clone());
        }
        Ok(channel)
    }

    async fn add_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock();
        let members = state.members.entry(channel_id.to_string()).or_default();
        if !members.iter().any(|member| member == user_id) {
            members.push(user_id.to_string());
        }
        Ok(())
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> PlatformResult<String> {
        let mut state = self.state.lock();
        state
            .uploads
            .push((channel_id.to_string(), file_name.to_string(), bytes.len()));
        Ok(state.next_id("file"))
    }

    async fn create_post(&self, post: &NewPost) -> PlatformResult<String> {
        let mut state = self.state.lock();
        state.create_post_calls += 1;
        if state
            .failing_posts
            .iter()
            .any(|text| post.message.contains(text.as_str()))
        {
            return Err(status("posts", 500));
        }
        let id = state.next_id("post");
        Ok(state.push_post(FakePost {
            id,
            channel_id: post.channel_id.clone(),
            message: post.message.clone(),
            root_id: post.root_id.clone(),
            file_ids: post.file_ids.clone(),
            slack_ts: Some(post.props.slack_ts.as_str().to_string()),
            is_pinned: false,
        }))
    }

    async fn channel_posts(&self, channel_id: &str) -> PlatformResult<Vec<DestPost>> {
        Ok(self
            .state
            .lock()
            .posts
            .iter()
            .filter(|post| post.channel_id == channel_id)
            .map(Self::to_dest_post)
            .collect())
    }

    async fn pinned_posts(&self, channel_id: &str) -> PlatformResult<Vec<DestPost>> {
        Ok(self
            .state
            .lock()
            .posts
            .iter()
            .filter(|post| post.channel_id == channel_id && post.is_pinned)
            .map(Self::to_dest_post)
            .collect())
    }

    async fn pin(&self, post_id: &str) -> PlatformResult<()> {
        self.set_pinned(post_id, true, "posts/pin")
    }

    async fn unpin(&self, post_id: &str) -> PlatformResult<()> {
        self.set_pinned(post_id, false, "posts/unpin")
    }

    async fn update_channel_header(&self, channel_id: &str, header: &str) -> PlatformResult<()> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .iter_mut()
            .find(|channel| channel.id == channel_id)
            .ok_or_else(|| status("channels", 404))?;
        channel.header = header.to_string();
        Ok(())
    }

    async fn list_emoji(&self) -> PlatformResult<Vec<String>> {
        Ok(self.emoji_names())
    }

    async fn create_emoji(
        &self,
        name: &str,
        creator_id: &str,
        _bytes: Vec<u8>,
    ) -> PlatformResult<()> {
        self.state
            .lock()
            .emoji
            .push((name.to_string(), creator_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<BTreeMap<String, CheckpointEntry>>,
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn list_checkpoint_entries(&self) -> Result<Vec<CheckpointEntry>, DatabaseError> {
        Ok(self.entries.lock().values().cloned().collect())
    }

    async fn set_checkpoint(
        &self,
        channel_key: &str,
        synced_at: &str,
    ) -> Result<(), DatabaseError> {
        self.entries.lock().insert(
            channel_key.to_string(),
            CheckpointEntry {
                channel_key: channel_key.to_string(),
                synced_at: synced_at.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_checkpoint(&self, channel_key: &str) -> Result<(), DatabaseError> {
        self.entries.lock().remove(channel_key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryExclusionStore {
    entries: Mutex<Vec<(ExclusionKind, String)>>,
}

#[async_trait]
impl ExclusionStore for MemoryExclusionStore {
    async fn list_exclusions(&self, kind: ExclusionKind) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(entry_kind, _)| *entry_kind == kind)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn add_exclusion(&self, kind: ExclusionKind, name: &str) -> Result<bool, DatabaseError> {
        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|(entry_kind, entry)| *entry_kind == kind && entry == name)
        {
            return Ok(false);
        }
        entries.push((kind, name.to_string()));
        Ok(true)
    }

    async fn remove_exclusion(
        &self,
        kind: ExclusionKind,
        name: &str,
    ) -> Result<bool, DatabaseError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_kind, entry)| !(*entry_kind == kind && entry == name));
        Ok(entries.len() != before)
    }
}
