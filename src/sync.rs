use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::config::SyncConfig;
use crate::media::MediaTransfer;
use crate::utils::AppError;

pub mod backfill;
pub mod checkpoint;
pub mod counter;
pub mod emoji;
pub mod exclusions;
pub mod fetch;
pub mod identity;
pub mod lock;
pub mod model;
pub mod pins;
pub mod platform;
pub mod threads;
pub mod translator;
pub mod upload;
pub mod users;

#[cfg(test)]
pub mod testing;

pub use self::checkpoint::{ALL_CHANNELS, CheckpointService};
pub use self::counter::{RunCounter, RunHistory, RunSummary};
pub use self::exclusions::{ExclusionService, ExclusionSet};
pub use self::lock::{ChannelLockService, LockError};
pub use self::platform::{DestinationPlatform, SourcePlatform};
pub use self::users::ProfileSyncOptions;

use self::backfill::ThreadBackfill;
use self::emoji::EmojiSync;
use self::fetch::{PaginatedFetcher, RetryPolicy};
use self::identity::IdentityResolver;
use self::model::{Channel, SlackTs};
use self::pins::PinReconciler;
use self::threads::ThreadReconstructor;
use self::upload::{ChannelContext, UploadEngine};
use self::users::UserProfileSync;

/// Which channels a run touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFilter {
    All,
    Channels(BTreeSet<String>),
}

impl ResourceFilter {
    /// `all` (or nothing) selects every channel; otherwise a comma or space
    /// separated list of channel names, with an optional leading `#`.
    pub fn parse(raw: &str) -> Self {
        let names: BTreeSet<String> = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .map(|name| name.trim().trim_start_matches('#'))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() || names.contains(ALL_CHANNELS) {
            ResourceFilter::All
        } else {
            ResourceFilter::Channels(names)
        }
    }

    pub fn includes(&self, channel_name: &str) -> bool {
        match self {
            ResourceFilter::All => true,
            ResourceFilter::Channels(names) => names.contains(channel_name),
        }
    }
}

impl fmt::Display for ResourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceFilter::All => f.write_str(ALL_CHANNELS),
            ResourceFilter::Channels(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub filter: ResourceFilter,
    pub session_id: String,
}

impl RunRequest {
    /// A request under a fresh session id.
    pub fn new(filter: ResourceFilter) -> Self {
        Self {
            filter,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_session(filter: ResourceFilter, session_id: impl Into<String>) -> Self {
        Self {
            filter,
            session_id: session_id.into(),
        }
    }
}

/// Drives one migration run per request.
///
/// Runs may execute concurrently; the channel lock service and the checkpoint
/// service are the only state they share.
pub struct SyncEngine {
    source: Arc<dyn SourcePlatform>,
    dest: Arc<dyn DestinationPlatform>,
    checkpoints: Arc<CheckpointService>,
    exclusions: Arc<ExclusionService>,
    locks: Arc<ChannelLockService>,
    config: SyncConfig,
    history: Mutex<RunHistory>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn SourcePlatform>,
        dest: Arc<dyn DestinationPlatform>,
        checkpoints: Arc<CheckpointService>,
        exclusions: Arc<ExclusionService>,
        locks: Arc<ChannelLockService>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            dest,
            checkpoints,
            exclusions,
            locks,
            config,
            history: Mutex::new(RunHistory::default()),
        }
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointService> {
        &self.checkpoints
    }

    pub fn exclusions(&self) -> &Arc<ExclusionService> {
        &self.exclusions
    }

    pub fn locks(&self) -> &Arc<ChannelLockService> {
        &self.locks
    }

    pub fn history(&self) -> RunHistory {
        self.history.lock().clone()
    }

    fn fetcher(&self) -> PaginatedFetcher {
        PaginatedFetcher::new(
            self.source.clone(),
            RetryPolicy::from_config(&self.config),
            self.config.history_page_size,
        )
    }

    async fn check_credentials(&self) -> Result<(), AppError> {
        let source_user = self
            .source
            .auth_test()
            .await
            .map_err(|err| AppError::Auth(format!("slack: {err}")))?;
        let dest_user = self
            .dest
            .me()
            .await
            .map_err(|err| AppError::Auth(format!("mattermost: {err}")))?;
        debug!(slack = %source_user, mattermost = %dest_user.username, "credentials accepted");
        Ok(())
    }

    /// Migrates every selected channel. Only credential, listing and storage
    /// failures escape; everything else ends up in the error tally.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary, AppError> {
        let result = self.run_channels(&request).await;
        match &result {
            Ok(summary) => self.history.lock().record(summary),
            Err(err) => {
                error!(session = %request.session_id, "sync run aborted: {err}");
                self.history.lock().record_failure();
            }
        }
        result
    }

    /// Runs the whole selection every `interval` until the task is aborted.
    pub fn spawn_schedule(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(60)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let request = RunRequest::new(ResourceFilter::All);
                if let Ok(summary) = self.run(request).await {
                    info!("scheduled run finished\n{summary}");
                }
            }
        })
    }

    async fn run_channels(&self, request: &RunRequest) -> Result<RunSummary, AppError> {
        info!(session = %request.session_id, filter = %request.filter, "sync run started");
        self.check_credentials().await?;

        let fetcher = self.fetcher();
        let users = fetcher
            .all_users()
            .await
            .map_err(|err| AppError::Slack(err.to_string()))?;
        let channels = fetcher
            .all_channels()
            .await
            .map_err(|err| AppError::Slack(err.to_string()))?;
        let exclusions = self.exclusions.snapshot().await?;

        let selected: Vec<Channel> = channels
            .iter()
            .filter(|channel| request.filter.includes(&channel.name))
            .filter(|channel| {
                let allowed = exclusions.is_allowed_channel(&channel.name);
                if !allowed {
                    debug!(channel = %channel.name, "channel excluded");
                }
                allowed
            })
            .cloned()
            .collect();
        info!(
            session = %request.session_id,
            channels = selected.len(),
            users = users.len(),
            "source listing loaded"
        );

        let mut identity = IdentityResolver::load(
            self.dest.clone(),
            self.config.default_password.clone(),
            users.clone(),
            channels,
        )
        .await
        .map_err(|err| AppError::Mattermost(err.to_string()))?;

        let counter = RunCounter::new();
        for channel in selected {
            let _guard = match self.locks.guard(&channel.name, &request.session_id) {
                Ok(guard) => guard,
                Err(LockError::AlreadyLocked { holder, .. }) => {
                    info!(
                        channel = %channel.name,
                        holder = %holder,
                        "channel is being synced by another session, skipped"
                    );
                    continue;
                }
            };

            let span = info_span!("channel", channel = %channel.name, session = %request.session_id);
            let result = self
                .sync_channel(&fetcher, &mut identity, &counter, &exclusions, channel)
                .instrument(span)
                .await;
            if let Err(err) = result {
                error!(session = %request.session_id, "channel sync failed: {err:#}");
                counter.error();
            }
        }

        if self.config.user_profiles {
            let options = ProfileSyncOptions {
                images: self.config.profile_images,
                ..ProfileSyncOptions::default()
            };
            if let Err(err) = UserProfileSync::new(self.source.as_ref(), self.dest.as_ref(), &counter)
                .run(&users, &options)
                .await
            {
                warn!(session = %request.session_id, "profile sync failed: {err}");
                counter.error();
            }
        }

        if self.config.emoji
            && let Err(err) = EmojiSync::new(self.source.as_ref(), self.dest.as_ref(), &counter)
                .run(self.config.emoji_limit)
                .await
        {
            warn!(session = %request.session_id, "emoji sync failed: {err}");
            counter.error();
        }

        counter.users_added(identity.created_users());
        let summary = counter.summary();
        info!(
            session = %request.session_id,
            messages = summary.messages,
            files = summary.files,
            users = summary.users,
            channels = summary.channels,
            pins = summary.pins,
            errors = summary.errors,
            skipped = summary.skipped,
            updated = summary.updated,
            "sync run finished"
        );
        Ok(summary)
    }

    async fn sync_channel(
        &self,
        fetcher: &PaginatedFetcher,
        identity: &mut IdentityResolver,
        counter: &RunCounter,
        exclusions: &ExclusionSet,
        channel: Channel,
    ) -> anyhow::Result<()> {
        let window_start = self
            .checkpoints
            .window_start(&channel.name)
            .await
            .context("reading checkpoint")?;
        let mut messages = fetcher
            .history_window(&channel.id, &window_start)
            .await
            .context("fetching history")?;
        ThreadReconstructor::new(fetcher)
            .expand_all(&channel.id, &mut messages, &window_start)
            .await
            .context("fetching thread replies")?;
        debug!(window_start = %window_start, messages = messages.len(), "window loaded");

        let mut engine = UploadEngine::new(
            self.source.as_ref(),
            self.dest.as_ref(),
            identity,
            MediaTransfer::new(self.config.max_file_size),
            counter,
            exclusions,
        );
        let mut ctx = ChannelContext::new(channel);
        let reconciling = self.config.pins || self.config.bookmarks;
        if messages.is_empty() && !reconciling {
            counter.channel_synced();
            return Ok(());
        }
        match engine.open(&mut ctx).await {
            Ok(_) => {}
            Err(err) if err.is_unresolved() => {
                warn!("destination channel unresolved, messages will be dropped: {err}");
            }
            Err(err) => return Err(err).context("opening destination channel"),
        }

        for chunk in messages.chunks(self.config.checkpoint_chunk_size.max(1)) {
            for message in chunk {
                engine.upload(&mut ctx, message).await;
            }
            let Some(last) = chunk.last() else {
                continue;
            };
            let target = checkpoint_target(&last.ts, ctx.first_failure());
            self.checkpoints
                .advance(&ctx.source.name, &target)
                .await
                .context("advancing checkpoint")?;
        }

        if !ctx.is_open() {
            return Ok(());
        }

        if let Err(err) = ThreadBackfill::new(fetcher, self.config.thread_backfill_days)
            .run(&mut engine, &mut ctx, &window_start)
            .await
        {
            warn!("thread backfill failed: {err}");
            counter.error();
        }
        drop(engine);

        let reconciler = PinReconciler::new(fetcher, self.dest.as_ref(), counter);
        if self.config.pins
            && let Err(err) = reconciler.reconcile(&ctx).await
        {
            warn!("pin reconciliation failed: {err}");
            counter.error();
        }
        if self.config.bookmarks
            && let Err(err) = reconciler
                .sync_bookmarks(&ctx, &self.config.bookmark_header_pattern)
                .await
        {
            warn!("bookmark sync failed: {err}");
            counter.error();
        }

        counter.channel_synced();
        Ok(())
    }

    /// Copies profile fields onto existing destination accounts.
    pub async fn sync_profiles(&self, options: ProfileSyncOptions) -> Result<RunSummary, AppError> {
        self.check_credentials().await?;
        let users = self
            .fetcher()
            .all_users()
            .await
            .map_err(|err| AppError::Slack(err.to_string()))?;
        let counter = RunCounter::new();
        UserProfileSync::new(self.source.as_ref(), self.dest.as_ref(), &counter)
            .run(&users, &options)
            .await
            .map_err(|err| AppError::Mattermost(err.to_string()))?;
        Ok(counter.summary())
    }

    pub async fn sync_emoji(&self, limit: Option<usize>) -> Result<RunSummary, AppError> {
        self.check_credentials().await?;
        let counter = RunCounter::new();
        EmojiSync::new(self.source.as_ref(), self.dest.as_ref(), &counter)
            .run(limit)
            .await
            .map_err(|err| AppError::Mattermost(err.to_string()))?;
        Ok(counter.summary())
    }
}

/// The checkpoint may not pass a message whose destination write failed.
fn checkpoint_target(last: &SlackTs, first_failure: Option<&SlackTs>) -> SlackTs {
    match first_failure {
        Some(failed) if failed.micros() < last.micros() => failed.clone(),
        _ => last.clone(),
    }
}
