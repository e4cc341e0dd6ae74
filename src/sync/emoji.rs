use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::counter::RunCounter;
use super::platform::{DestinationPlatform, PlatformError, SourcePlatform};

/// Custom emoji images are small; anything larger is not an emoji.
const MAX_EMOJI_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmojiReport {
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
}

pub struct EmojiSync<'a> {
    source: &'a dyn SourcePlatform,
    dest: &'a dyn DestinationPlatform,
    counter: &'a RunCounter,
}

impl<'a> EmojiSync<'a> {
    pub fn new(
        source: &'a dyn SourcePlatform,
        dest: &'a dyn DestinationPlatform,
        counter: &'a RunCounter,
    ) -> Self {
        Self {
            source,
            dest,
            counter,
        }
    }

    /// Creates every source emoji whose name the destination lacks. `limit`
    /// bounds the number of creations; `None` means no bound.
    pub async fn run(&self, limit: Option<usize>) -> Result<EmojiReport, PlatformError> {
        let creator = self.dest.me().await?;
        let present: HashSet<String> = self.dest.list_emoji().await?.into_iter().collect();
        let mut report = EmojiReport::default();

        for emoji in self.source.list_emoji().await? {
            if limit.is_some_and(|limit| report.created >= limit) {
                debug!(limit = ?limit, "emoji limit reached");
                break;
            }
            if present.contains(&emoji.name) {
                report.existing += 1;
                continue;
            }

            let created = match self.source.download_file(&emoji.url, MAX_EMOJI_BYTES).await {
                Ok(bytes) => self.dest.create_emoji(&emoji.name, &creator.id, bytes).await,
                Err(err) => Err(err),
            };
            match created {
                Ok(()) => {
                    debug!(emoji = %emoji.name, "emoji created");
                    report.created += 1;
                }
                Err(err) => {
                    warn!(emoji = %emoji.name, "emoji copy failed: {err}");
                    self.counter.error();
                    report.failed += 1;
                }
            }
        }

        info!(
            created = report.created,
            existing = report.existing,
            failed = report.failed,
            "emoji sync finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeDestination, FakeSource};

    #[tokio::test]
    async fn only_missing_emoji_are_created_up_to_the_limit() {
        let source = FakeSource::default();
        source.add_emoji("party", "https://emoji.example/party.png", b"png1");
        source.add_emoji("shipit", "https://emoji.example/shipit.png", b"png2");
        source.add_emoji("yak", "https://emoji.example/yak.png", b"png3");
        let dest = FakeDestination::default();
        dest.add_emoji("party");

        let counter = RunCounter::new();
        let report = EmojiSync::new(&source, &dest, &counter)
            .run(Some(1))
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.existing, 1);
        assert_eq!(dest.emoji_names(), vec!["party".to_string(), "shipit".to_string()]);
        assert_eq!(dest.emoji_creator("shipit").as_deref(), Some("mm-bot"));
    }

    #[tokio::test]
    async fn download_failures_are_counted() {
        let source = FakeSource::default();
        source.add_emoji("ghost", "https://emoji.example/missing.png", b"");
        source.forget_file("https://emoji.example/missing.png");
        let dest = FakeDestination::default();

        let counter = RunCounter::new();
        let report = EmojiSync::new(&source, &dest, &counter).run(None).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(counter.summary().errors, 1);
        assert!(dest.emoji_names().is_empty());
    }
}
