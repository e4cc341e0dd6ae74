use std::collections::BTreeMap;

use async_trait::async_trait;

use super::DatabaseError;
use super::models::{CheckpointEntry, ExclusionKind};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn list_checkpoint_entries(&self) -> Result<Vec<CheckpointEntry>, DatabaseError>;
    async fn set_checkpoint(&self, channel_key: &str, synced_at: &str)
    -> Result<(), DatabaseError>;
    async fn delete_checkpoint(&self, channel_key: &str) -> Result<(), DatabaseError>;

    async fn read_checkpoints(&self) -> Result<BTreeMap<String, String>, DatabaseError> {
        Ok(self
            .list_checkpoint_entries()
            .await?
            .into_iter()
            .map(|entry| (entry.channel_key, entry.synced_at))
            .collect())
    }

    /// Last writer wins for every key present in `checkpoints`; other keys are left alone.
    async fn write_checkpoints(
        &self,
        checkpoints: &BTreeMap<String, String>,
    ) -> Result<(), DatabaseError> {
        for (channel_key, synced_at) in checkpoints {
            self.set_checkpoint(channel_key, synced_at).await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait ExclusionStore: Send + Sync {
    async fn list_exclusions(&self, kind: ExclusionKind) -> Result<Vec<String>, DatabaseError>;
    /// Returns `false` when the name was already excluded.
    async fn add_exclusion(&self, kind: ExclusionKind, name: &str) -> Result<bool, DatabaseError>;
    /// Returns `false` when the name was not excluded.
    async fn remove_exclusion(
        &self,
        kind: ExclusionKind,
        name: &str,
    ) -> Result<bool, DatabaseError>;
}
