use chrono::Duration;
use tracing::{debug, info};

use super::fetch::{FetchError, PaginatedFetcher};
use super::model::SlackTs;
use super::threads::ThreadReconstructor;
use super::upload::{ChannelContext, UploadEngine, UploadOutcome};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub roots: usize,
    pub replies_posted: usize,
}

/// Catches up replies added to threads whose root predates the current window.
pub struct ThreadBackfill<'a> {
    fetcher: &'a PaginatedFetcher,
    days: u32,
}

impl<'a> ThreadBackfill<'a> {
    pub fn new(fetcher: &'a PaginatedFetcher, days: u32) -> Self {
        Self { fetcher, days }
    }

    pub async fn run(
        &self,
        engine: &mut UploadEngine<'_>,
        ctx: &mut ChannelContext,
        window_start: &SlackTs,
    ) -> Result<BackfillReport, FetchError> {
        let mut report = BackfillReport::default();
        if self.days == 0 || window_start.micros() == 0 {
            return Ok(report);
        }

        let since = SlackTs::from_datetime(
            window_start.to_datetime() - Duration::days(i64::from(self.days)),
        );
        let channel_id = ctx.source.id.clone();
        let roots: Vec<_> = self
            .fetcher
            .history_window(&channel_id, &since)
            .await?
            .into_iter()
            .filter(|message| {
                message.ts.micros() < window_start.micros() && message.is_thread_root()
            })
            .collect();

        let threads = ThreadReconstructor::new(self.fetcher);
        for root in roots {
            let Some(root_post_id) = ctx.dedup().post_id(&root.ts).map(ToOwned::to_owned) else {
                debug!(channel = %ctx.source.name, ts = %root.ts, "thread root not migrated, no backfill");
                continue;
            };
            report.roots += 1;

            let replies = threads.expand(&channel_id, &root, &since).await?;
            for reply in replies
                .iter()
                .filter(|reply| !ctx.dedup().contains(&reply.ts))
                .cloned()
                .collect::<Vec<_>>()
            {
                if let UploadOutcome::Posted(_) = engine
                    .upload_single(ctx, &reply, Some(&root_post_id), &root.ts)
                    .await
                {
                    report.replies_posted += 1;
                }
            }
        }

        if report.replies_posted > 0 {
            info!(
                channel = %ctx.source.name,
                roots = report.roots,
                replies = report.replies_posted,
                "thread backfill finished"
            );
        }
        Ok(report)
    }
}
