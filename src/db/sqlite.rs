use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DatabaseError;
use super::models::{CheckpointEntry, ExclusionKind};
use crate::db::schema_sqlite::{sync_checkpoints, sync_exclusions};

// Helper function to convert DateTime to ISO string for SQLite
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Helper function to parse ISO string to DateTime
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

// SQLite uses i32 for INTEGER primary keys
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sync_checkpoints)]
struct DbCheckpoint {
    #[allow(dead_code)]
    id: i32,
    channel_key: String,
    synced_at: String,
    updated_at: String,
}

impl DbCheckpoint {
    fn to_entry(&self) -> Result<CheckpointEntry, DatabaseError> {
        Ok(CheckpointEntry {
            channel_key: self.channel_key.clone(),
            synced_at: self.synced_at.clone(),
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = sync_checkpoints)]
struct NewCheckpoint<'a> {
    channel_key: &'a str,
    synced_at: &'a str,
    updated_at: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = sync_checkpoints)]
struct UpdateCheckpoint<'a> {
    synced_at: &'a str,
    updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = sync_exclusions)]
struct NewExclusion<'a> {
    kind: &'a str,
    name: &'a str,
    created_at: String,
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

async fn with_connection<T, F>(db_path: Arc<String>, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = establish_connection(&db_path)?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct SqliteCheckpointStore {
    db_path: Arc<String>,
}

impl SqliteCheckpointStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::CheckpointStore for SqliteCheckpointStore {
    async fn list_checkpoint_entries(&self) -> Result<Vec<CheckpointEntry>, DatabaseError> {
        with_connection(self.db_path.clone(), |conn| {
            use crate::db::schema_sqlite::sync_checkpoints::dsl::*;
            let rows = sync_checkpoints
                .order(channel_key.asc())
                .select(DbCheckpoint::as_select())
                .load::<DbCheckpoint>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            rows.iter().map(DbCheckpoint::to_entry).collect()
        })
        .await
    }

    async fn set_checkpoint(
        &self,
        channel_key: &str,
        synced_at: &str,
    ) -> Result<(), DatabaseError> {
        let key = channel_key.to_string();
        let value = synced_at.to_string();
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::sync_checkpoints::dsl;

            let now = datetime_to_string(&Utc::now());
            let updated = diesel::update(
                dsl::sync_checkpoints.filter(dsl::channel_key.eq(&key)),
            )
            .set(UpdateCheckpoint {
                synced_at: &value,
                updated_at: now.clone(),
            })
            .execute(conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if updated == 0 {
                diesel::insert_into(sync_checkpoints::table)
                    .values(&NewCheckpoint {
                        channel_key: &key,
                        synced_at: &value,
                        updated_at: now,
                    })
                    .execute(conn)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
            }
            Ok(())
        })
        .await
    }

    async fn delete_checkpoint(&self, channel_key: &str) -> Result<(), DatabaseError> {
        let key = channel_key.to_string();
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::sync_checkpoints::dsl;
            diesel::delete(dsl::sync_checkpoints.filter(dsl::channel_key.eq(key)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

pub struct SqliteExclusionStore {
    db_path: Arc<String>,
}

impl SqliteExclusionStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::ExclusionStore for SqliteExclusionStore {
    async fn list_exclusions(&self, exclusion: ExclusionKind) -> Result<Vec<String>, DatabaseError> {
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::sync_exclusions::dsl::*;
            sync_exclusions
                .filter(kind.eq(exclusion.as_str()))
                .order(id.asc())
                .select(name)
                .load::<String>(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn add_exclusion(
        &self,
        exclusion: ExclusionKind,
        excluded_name: &str,
    ) -> Result<bool, DatabaseError> {
        let excluded_name = excluded_name.to_string();
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::sync_exclusions::dsl;

            let existing: i64 = dsl::sync_exclusions
                .filter(dsl::kind.eq(exclusion.as_str()))
                .filter(dsl::name.eq(&excluded_name))
                .count()
                .get_result(conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            if existing > 0 {
                return Ok(false);
            }

            diesel::insert_into(sync_exclusions::table)
                .values(&NewExclusion {
                    kind: exclusion.as_str(),
                    name: &excluded_name,
                    created_at: datetime_to_string(&Utc::now()),
                })
                .execute(conn)
                .map(|_| true)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn remove_exclusion(
        &self,
        exclusion: ExclusionKind,
        excluded_name: &str,
    ) -> Result<bool, DatabaseError> {
        let excluded_name = excluded_name.to_string();
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::sync_exclusions::dsl;
            diesel::delete(
                dsl::sync_exclusions
                    .filter(dsl::kind.eq(exclusion.as_str()))
                    .filter(dsl::name.eq(excluded_name)),
            )
            .execute(conn)
            .map(|removed| removed > 0)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::db::{CheckpointStore, DatabaseManager, ExclusionStore};

    async fn migrated_path(dir: &tempfile::TempDir) -> Arc<String> {
        let path = dir.path().join("sync.db").to_string_lossy().to_string();
        DatabaseManager::migrate_sqlite(&path).await.unwrap();
        Arc::new(path)
    }

    #[tokio::test]
    async fn checkpoint_set_overwrites_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::new(migrated_path(&dir).await);

        store.set_checkpoint("general", "1970-01-01T00:01:40.000000Z").await.unwrap();
        store.set_checkpoint("general", "1970-01-01T00:03:20.000000Z").await.unwrap();
        store.set_checkpoint("all", "1970-01-01T00:00:00.000000Z").await.unwrap();

        let checkpoints = store.read_checkpoints().await.unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints["general"], "1970-01-01T00:03:20.000000Z");
    }

    #[tokio::test]
    async fn write_checkpoints_leaves_other_keys_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::new(migrated_path(&dir).await);
        store.set_checkpoint("random", "2024-01-01T00:00:00.000000Z").await.unwrap();

        let mut batch = BTreeMap::new();
        batch.insert("general".to_string(), "2024-02-01T00:00:00.000000Z".to_string());
        store.write_checkpoints(&batch).await.unwrap();

        let checkpoints = store.read_checkpoints().await.unwrap();
        assert_eq!(checkpoints.len(), 2);

        store.delete_checkpoint("random").await.unwrap();
        let checkpoints = store.read_checkpoints().await.unwrap();
        assert!(!checkpoints.contains_key("random"));
    }

    #[tokio::test]
    async fn exclusions_are_unique_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteExclusionStore::new(migrated_path(&dir).await);

        assert!(store.add_exclusion(ExclusionKind::Channel, "random").await.unwrap());
        assert!(!store.add_exclusion(ExclusionKind::Channel, "random").await.unwrap());
        assert!(store.add_exclusion(ExclusionKind::User, "random").await.unwrap());

        let channels = store.list_exclusions(ExclusionKind::Channel).await.unwrap();
        assert_eq!(channels, vec!["random".to_string()]);

        assert!(store.remove_exclusion(ExclusionKind::Channel, "random").await.unwrap());
        assert!(!store.remove_exclusion(ExclusionKind::Channel, "random").await.unwrap());
        assert!(store.list_exclusions(ExclusionKind::Channel).await.unwrap().is_empty());
        assert_eq!(store.list_exclusions(ExclusionKind::User).await.unwrap().len(), 1);
    }
}
