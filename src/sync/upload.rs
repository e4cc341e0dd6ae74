use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::counter::RunCounter;
use super::exclusions::ExclusionSet;
use super::identity::{IdentityResolver, ResolveError};
use super::model::{Author, Channel, DestPost, Message, NewPost, PostProps, SlackTs};
use super::platform::{DestinationPlatform, PlatformError, SourcePlatform};
use super::translator::{compose_body, mentioned_users, translate, with_provenance};
use crate::media::MediaTransfer;

/// Source timestamps already present in a destination channel, with their post ids.
#[derive(Debug, Default, Clone)]
pub struct DedupIndex {
    posts: HashMap<SlackTs, String>,
}

impl DedupIndex {
    pub fn from_posts(posts: Vec<DestPost>) -> Self {
        let mut index = Self::default();
        for post in posts {
            if let Some(ts) = post.slack_ts {
                index.posts.entry(ts).or_insert(post.id);
            }
        }
        index
    }

    pub fn contains(&self, ts: &SlackTs) -> bool {
        self.posts.contains_key(ts)
    }

    pub fn post_id(&self, ts: &SlackTs) -> Option<&str> {
        self.posts.get(ts).map(String::as_str)
    }

    pub fn insert(&mut self, ts: SlackTs, post_id: String) {
        self.posts.insert(ts, post_id);
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

/// State of one channel for the duration of a run.
#[derive(Debug)]
pub struct ChannelContext {
    pub source: Channel,
    dest_id: Option<String>,
    unresolved: Option<String>,
    dedup: DedupIndex,
    first_failure: Option<SlackTs>,
}

impl ChannelContext {
    pub fn new(source: Channel) -> Self {
        Self {
            source,
            dest_id: None,
            unresolved: None,
            dedup: DedupIndex::default(),
            first_failure: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.dest_id.is_some()
    }

    pub fn dest_id(&self) -> Option<&str> {
        self.dest_id.as_deref()
    }

    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    /// Oldest thread anchor whose destination write failed in this run.
    pub fn first_failure(&self) -> Option<&SlackTs> {
        self.first_failure.as_ref()
    }

    fn record_failure(&mut self, anchor: &SlackTs) {
        if self
            .first_failure
            .as_ref()
            .is_none_or(|current| anchor < current)
        {
            self.first_failure = Some(anchor.clone());
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelOpenError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Resolution already failed earlier in this run.
    #[error("{0}")]
    Unresolved(String),
    #[error("failed to load destination history: {0}")]
    History(#[source] PlatformError),
}

impl ChannelOpenError {
    /// A member or author has no destination identity; messages are dropped, not retried.
    /// Destination write errors are not in this class and hold the checkpoint.
    pub fn is_unresolved(&self) -> bool {
        match self {
            Self::Resolve(ResolveError::Destination { .. }) | Self::History(_) => false,
            Self::Resolve(_) | Self::Unresolved(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Posted(String),
    /// Already on the destination; carries the existing post id.
    Skipped(String),
    /// Author is excluded from the migration.
    Excluded,
    /// Resolution failed; counted as an error, the checkpoint is not held back.
    Dropped,
    /// A destination write failed; counted as an error and recorded on the context.
    Failed,
}

/// Posts Slack messages into Mattermost exactly once per source timestamp.
pub struct UploadEngine<'run> {
    source: &'run dyn SourcePlatform,
    dest: &'run dyn DestinationPlatform,
    identity: &'run mut IdentityResolver,
    media: MediaTransfer,
    counter: &'run RunCounter,
    exclusions: &'run ExclusionSet,
}

impl<'run> UploadEngine<'run> {
    pub fn new(
        source: &'run dyn SourcePlatform,
        dest: &'run dyn DestinationPlatform,
        identity: &'run mut IdentityResolver,
        media: MediaTransfer,
        counter: &'run RunCounter,
        exclusions: &'run ExclusionSet,
    ) -> Self {
        Self {
            source,
            dest,
            identity,
            media,
            counter,
            exclusions,
        }
    }

    pub fn identity(&self) -> &IdentityResolver {
        self.identity
    }

    /// Resolves the destination channel and reads its history into the dedup index.
    /// Returns the destination channel id.
    pub async fn open(&mut self, ctx: &mut ChannelContext) -> Result<String, ChannelOpenError> {
        if let Some(dest_id) = &ctx.dest_id {
            return Ok(dest_id.clone());
        }
        if let Some(reason) = &ctx.unresolved {
            return Err(ChannelOpenError::Unresolved(reason.clone()));
        }

        let dest_id = match self.identity.resolve_channel(&ctx.source).await {
            Ok(dest_id) => dest_id,
            Err(err) => {
                let err = ChannelOpenError::from(err);
                if err.is_unresolved() {
                    ctx.unresolved = Some(err.to_string());
                }
                return Err(err);
            }
        };
        let posts = self
            .dest
            .channel_posts(&dest_id)
            .await
            .map_err(ChannelOpenError::History)?;
        ctx.dedup = DedupIndex::from_posts(posts);
        debug!(
            channel = %ctx.source.name,
            known = ctx.dedup.len(),
            "dedup index loaded"
        );
        ctx.dest_id = Some(dest_id.clone());
        Ok(dest_id)
    }

    /// Uploads a message and then its replies under the resulting post.
    pub async fn upload(&mut self, ctx: &mut ChannelContext, message: &Message) -> UploadOutcome {
        let outcome = self.upload_single(ctx, message, None, &message.ts).await;
        let root_post_id = match &outcome {
            UploadOutcome::Posted(id) | UploadOutcome::Skipped(id) => id.clone(),
            _ => return outcome,
        };

        for reply in &message.replies {
            self.upload_single(ctx, reply, Some(&root_post_id), &message.ts)
                .await;
        }
        outcome
    }

    /// Uploads one message without touching its replies. `anchor` is the timestamp
    /// recorded on the context if a destination write fails.
    pub async fn upload_single(
        &mut self,
        ctx: &mut ChannelContext,
        message: &Message,
        root_id: Option<&str>,
        anchor: &SlackTs,
    ) -> UploadOutcome {
        let channel_id = match self.open(ctx).await {
            Ok(channel_id) => channel_id,
            Err(err) if err.is_unresolved() => {
                error!(channel = %ctx.source.name, ts = %message.ts, "message dropped: {err}");
                self.counter.error();
                return UploadOutcome::Dropped;
            }
            Err(err) => {
                error!(channel = %ctx.source.name, ts = %message.ts, "{err}");
                self.counter.error();
                ctx.record_failure(anchor);
                return UploadOutcome::Failed;
            }
        };

        if let Some(existing) = ctx.dedup.post_id(&message.ts) {
            debug!(channel = %ctx.source.name, ts = %message.ts, "already migrated");
            self.counter.skipped();
            return UploadOutcome::Skipped(existing.to_string());
        }

        let (author_id, author_name, display_name) = match &message.author {
            Author::User(source_id) => {
                let (name, label) = match self.identity.source_user(source_id) {
                    Some(user) => (user.name.clone(), user.label().to_string()),
                    None => (source_id.clone(), source_id.clone()),
                };
                if !self.exclusions.is_allowed_user(&name) {
                    debug!(user = %name, ts = %message.ts, "author excluded");
                    return UploadOutcome::Excluded;
                }
                match self.identity.resolve_user(source_id).await {
                    Ok(dest_id) => (dest_id, name, label),
                    Err(err) => {
                        error!(channel = %ctx.source.name, ts = %message.ts, "message dropped: {err}");
                        self.counter.error();
                        return UploadOutcome::Dropped;
                    }
                }
            }
            Author::Bot { .. } => {
                let raw = message.author.raw_label();
                (None, raw.clone(), raw)
            }
        };

        if let Some(author) = &author_id {
            self.ensure_member(&channel_id, author).await;
        }
        for mentioned in mentioned_users(&message.text) {
            if !ctx.source.members.contains(&mentioned) {
                continue;
            }
            if let Ok(Some(user)) = self.identity.resolve_user(&mentioned).await {
                self.ensure_member(&channel_id, &user).await;
            }
        }

        let mut file_ids = Vec::with_capacity(message.files.len());
        for file in &message.files {
            match self
                .media
                .transfer(self.source, self.dest, &channel_id, file)
                .await
            {
                Ok(Some(file_id)) => {
                    self.counter.file_uploaded();
                    file_ids.push(file_id);
                }
                Ok(None) => {}
                Err(err) => {
                    error!(file = %file.name, ts = %message.ts, "attachment failed: {err}");
                    self.counter.error();
                }
            }
        }

        let body = translate(
            &compose_body(&message.text, &message.attachments),
            &*self.identity,
        );
        let post = NewPost {
            channel_id: channel_id.clone(),
            message: with_provenance(&body, &message.ts),
            root_id: root_id.map(ToOwned::to_owned),
            file_ids,
            props: PostProps {
                from_webhook: "true".to_string(),
                override_username: display_name.clone(),
                username: display_name,
                slack_user_id: message
                    .author
                    .user_id()
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| message.author.raw_label()),
                slack_user_name: author_name,
                slack_channel_id: ctx.source.id.clone(),
                slack_channel_name: ctx.source.name.clone(),
                slack_ts: message.ts.clone(),
            },
        };

        match self.dest.create_post(&post).await {
            Ok(post_id) => {
                ctx.dedup.insert(message.ts.clone(), post_id.clone());
                self.counter.message_posted();
                info!(channel = %ctx.source.name, ts = %message.ts, post = %post_id, "message migrated");
                UploadOutcome::Posted(post_id)
            }
            Err(err) => {
                error!(channel = %ctx.source.name, ts = %message.ts, "post failed: {err}");
                self.counter.error();
                ctx.record_failure(anchor);
                UploadOutcome::Failed
            }
        }
    }

    async fn ensure_member(&mut self, channel_id: &str, user_id: &str) {
        match self.identity.ensure_member(channel_id, user_id).await {
            Ok(true) => debug!(channel = channel_id, user = user_id, "member added"),
            Ok(false) => {}
            Err(err) => {
                warn!(channel = channel_id, user = user_id, "membership failed: {err}");
                self.counter.error();
            }
        }
    }
}
