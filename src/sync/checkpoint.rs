use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::model::SlackTs;
use crate::db::{CheckpointStore, DatabaseError};

/// Key of the fallback entry used by channels without their own checkpoint.
pub const ALL_CHANNELS: &str = "all";

pub fn format_checkpoint(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and a bare `YYYY-MM-DD`, all as UTC.
pub fn parse_checkpoint(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

/// Mutex-guarded access to the persisted per-channel watermarks.
pub struct CheckpointService {
    store: Arc<dyn CheckpointStore>,
    write_lock: Mutex<()>,
}

impl CheckpointService {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn effective(checkpoints: &BTreeMap<String, String>, channel: &str) -> SlackTs {
        let raw = checkpoints
            .get(channel)
            .or_else(|| checkpoints.get(ALL_CHANNELS));
        match raw {
            Some(raw) => match parse_checkpoint(raw) {
                Some(value) => SlackTs::from_datetime(value),
                None => {
                    warn!(channel, value = %raw, "unreadable checkpoint, starting from the epoch");
                    SlackTs::epoch()
                }
            },
            None => SlackTs::epoch(),
        }
    }

    /// Lower bound of the fetch window: the channel entry, else `all`, else the epoch.
    pub async fn window_start(&self, channel: &str) -> Result<SlackTs, DatabaseError> {
        let checkpoints = self.store.read_checkpoints().await?;
        Ok(Self::effective(&checkpoints, channel))
    }

    /// Moves the channel watermark to `ts` if that is strictly newer.
    pub async fn advance(&self, channel: &str, ts: &SlackTs) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let checkpoints = self.store.read_checkpoints().await?;
        let current = Self::effective(&checkpoints, channel);
        if ts.micros() <= current.micros() {
            return Ok(false);
        }

        self.store
            .set_checkpoint(channel, &format_checkpoint(ts.to_datetime()))
            .await?;
        info!(channel, ts = %ts, "checkpoint advanced");
        Ok(true)
    }

    /// Operator override; may move the watermark backwards.
    pub async fn set(&self, channel: &str, value: DateTime<Utc>) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.store
            .set_checkpoint(channel, &format_checkpoint(value))
            .await?;
        info!(channel, value = %value, "checkpoint set");
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<BTreeMap<String, String>, DatabaseError> {
        self.store.read_checkpoints().await
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::sync::testing::MemoryCheckpointStore;

    #[test_case("2024-03-01T10:00:00Z", 1_709_287_200; "rfc3339")]
    #[test_case("2024-03-01 10:00:00", 1_709_287_200; "legacy format")]
    #[test_case("1970-01-01", 0; "date only")]
    fn parses_checkpoint_formats(raw: &str, seconds: i64) {
        assert_eq!(parse_checkpoint(raw).map(|value| value.timestamp()), Some(seconds));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_checkpoint("yesterday").is_none());
    }

    #[tokio::test]
    async fn window_falls_back_to_all_then_epoch() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let service = CheckpointService::new(store.clone());
        assert_eq!(service.window_start("general").await.unwrap(), SlackTs::epoch());

        store.set_checkpoint("all", "1970-01-01T00:01:40Z").await.unwrap();
        assert_eq!(service.window_start("general").await.unwrap().micros(), 100_000_000);

        store.set_checkpoint("general", "1970-01-01 00:03:20").await.unwrap();
        assert_eq!(service.window_start("general").await.unwrap().micros(), 200_000_000);
        assert_eq!(service.window_start("random").await.unwrap().micros(), 100_000_000);
    }

    #[tokio::test]
    async fn advance_is_monotonic() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let service = CheckpointService::new(store.clone());

        assert!(service.advance("general", &SlackTs::new("200")).await.unwrap());
        assert!(!service.advance("general", &SlackTs::new("100")).await.unwrap());
        assert!(!service.advance("general", &SlackTs::new("200")).await.unwrap());

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot["general"], "1970-01-01T00:03:20.000000Z");
    }

    #[tokio::test]
    async fn set_can_rewind() {
        let store = Arc::new(MemoryCheckpointStore::default());
        let service = CheckpointService::new(store);
        service.advance("general", &SlackTs::new("500")).await.unwrap();

        service
            .set("general", DateTime::<Utc>::default())
            .await
            .unwrap();
        assert_eq!(service.window_start("general").await.unwrap(), SlackTs::epoch());
    }
}
