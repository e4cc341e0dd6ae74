use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::counter::RunCounter;
use super::fetch::{FetchError, PaginatedFetcher};
use super::model::{Bookmark, SlackTs};
use super::platform::{DestinationPlatform, PlatformError};
use super::upload::ChannelContext;
use crate::utils::formatting::{apply_pattern_string, truncate_chars};

/// Mattermost rejects channel headers longer than this.
pub const MAX_HEADER_CHARS: usize = 1024;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("destination call failed: {0}")]
    Destination(#[from] PlatformError),
    #[error("channel {0} has no destination counterpart yet")]
    NotOpen(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PinReport {
    pub pinned: usize,
    pub unpinned: usize,
    /// Source pins whose message is not on the destination yet.
    pub missing: usize,
}

pub struct PinReconciler<'a> {
    fetcher: &'a PaginatedFetcher,
    dest: &'a dyn DestinationPlatform,
    counter: &'a RunCounter,
}

impl<'a> PinReconciler<'a> {
    pub fn new(
        fetcher: &'a PaginatedFetcher,
        dest: &'a dyn DestinationPlatform,
        counter: &'a RunCounter,
    ) -> Self {
        Self {
            fetcher,
            dest,
            counter,
        }
    }

    /// Converges the destination pin set toward the source pin set.
    ///
    /// Relies on the context's dedup index to find destination posts by source
    /// timestamp. Destination pins without a source timestamp are left alone.
    pub async fn reconcile(&self, ctx: &ChannelContext) -> Result<PinReport, ReconcileError> {
        let channel_id = ctx
            .dest_id()
            .ok_or_else(|| ReconcileError::NotOpen(ctx.source.name.clone()))?;

        let source_pins: HashSet<SlackTs> = self
            .fetcher
            .pins(&ctx.source.id)
            .await?
            .into_iter()
            .map(|pin| pin.ts)
            .collect();
        let dest_pins: HashMap<SlackTs, String> = self
            .dest
            .pinned_posts(channel_id)
            .await?
            .into_iter()
            .filter_map(|post| post.slack_ts.map(|ts| (ts, post.id)))
            .collect();

        let mut report = PinReport::default();
        for (ts, post_id) in &dest_pins {
            if source_pins.contains(ts) {
                continue;
            }
            match self.dest.unpin(post_id).await {
                Ok(()) => {
                    debug!(channel = %ctx.source.name, ts = %ts, "unpinned");
                    self.counter.pin_changed();
                    report.unpinned += 1;
                }
                Err(err) => {
                    warn!(channel = %ctx.source.name, ts = %ts, "unpin failed: {err}");
                    self.counter.error();
                }
            }
        }

        for ts in &source_pins {
            if dest_pins.contains_key(ts) {
                continue;
            }
            let Some(post_id) = ctx.dedup().post_id(ts) else {
                debug!(channel = %ctx.source.name, ts = %ts, "pinned message not migrated yet");
                report.missing += 1;
                continue;
            };
            match self.dest.pin(post_id).await {
                Ok(()) => {
                    debug!(channel = %ctx.source.name, ts = %ts, "pinned");
                    self.counter.pin_changed();
                    report.pinned += 1;
                }
                Err(err) => {
                    warn!(channel = %ctx.source.name, ts = %ts, "pin failed: {err}");
                    self.counter.error();
                }
            }
        }

        if report.pinned + report.unpinned > 0 {
            info!(
                channel = %ctx.source.name,
                pinned = report.pinned,
                unpinned = report.unpinned,
                "pins reconciled"
            );
        }
        Ok(report)
    }

    /// Overwrites the destination header with every current source bookmark.
    /// An empty bookmark list leaves the header untouched.
    pub async fn sync_bookmarks(
        &self,
        ctx: &ChannelContext,
        pattern: &str,
    ) -> Result<bool, ReconcileError> {
        let channel_id = ctx
            .dest_id()
            .ok_or_else(|| ReconcileError::NotOpen(ctx.source.name.clone()))?;

        let bookmarks = self.fetcher.bookmarks(&ctx.source.id).await?;
        if bookmarks.is_empty() {
            return Ok(false);
        }

        let header = render_bookmark_header(&bookmarks, pattern);
        self.dest.update_channel_header(channel_id, &header).await?;
        info!(channel = %ctx.source.name, bookmarks = bookmarks.len(), "channel header replaced");
        Ok(true)
    }
}

pub fn render_bookmark_header(bookmarks: &[Bookmark], pattern: &str) -> String {
    let header: String = bookmarks
        .iter()
        .map(|bookmark| {
            apply_pattern_string(
                pattern,
                &[("title", bookmark.title.as_str()), ("link", bookmark.link.as_str())],
            )
        })
        .collect();
    truncate_chars(&header, MAX_HEADER_CHARS).to_string()
}
