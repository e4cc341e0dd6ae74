use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use super::DatabaseError;
use super::models::{CheckpointEntry, ExclusionKind};
use crate::db::manager::Pool;
use crate::db::schema::{sync_checkpoints, sync_exclusions};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sync_checkpoints)]
struct DbCheckpoint {
    #[allow(dead_code)]
    id: i64,
    channel_key: String,
    synced_at: String,
    updated_at: DateTime<Utc>,
}

impl From<DbCheckpoint> for CheckpointEntry {
    fn from(value: DbCheckpoint) -> Self {
        Self {
            channel_key: value.channel_key,
            synced_at: value.synced_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = sync_checkpoints)]
struct NewCheckpoint<'a> {
    channel_key: &'a str,
    synced_at: &'a str,
    updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = sync_exclusions)]
struct NewExclusion<'a> {
    kind: &'a str,
    name: &'a str,
    created_at: DateTime<Utc>,
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct PostgresCheckpointStore {
    pool: Pool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::CheckpointStore for PostgresCheckpointStore {
    async fn list_checkpoint_entries(&self) -> Result<Vec<CheckpointEntry>, DatabaseError> {
        with_connection(self.pool.clone(), |conn| {
            use crate::db::schema::sync_checkpoints::dsl::*;
            sync_checkpoints
                .order(channel_key.asc())
                .select(DbCheckpoint::as_select())
                .load::<DbCheckpoint>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
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
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sync_checkpoints::dsl;
            let now = Utc::now();
            diesel::insert_into(sync_checkpoints::table)
                .values(&NewCheckpoint {
                    channel_key: &key,
                    synced_at: &value,
                    updated_at: now,
                })
                .on_conflict(dsl::channel_key)
                .do_update()
                .set((dsl::synced_at.eq(&value), dsl::updated_at.eq(now)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_checkpoint(&self, channel_key: &str) -> Result<(), DatabaseError> {
        let key = channel_key.to_string();
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sync_checkpoints::dsl;
            diesel::delete(dsl::sync_checkpoints.filter(dsl::channel_key.eq(key)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

pub struct PostgresExclusionStore {
    pool: Pool,
}

impl PostgresExclusionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::ExclusionStore for PostgresExclusionStore {
    async fn list_exclusions(&self, exclusion: ExclusionKind) -> Result<Vec<String>, DatabaseError> {
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sync_exclusions::dsl::*;
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
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sync_exclusions::dsl;
            diesel::insert_into(sync_exclusions::table)
                .values(&NewExclusion {
                    kind: exclusion.as_str(),
                    name: &excluded_name,
                    created_at: Utc::now(),
                })
                .on_conflict((dsl::kind, dsl::name))
                .do_nothing()
                .execute(conn)
                .map(|inserted| inserted > 0)
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
        with_connection(self.pool.clone(), move |conn| {
            use crate::db::schema::sync_exclusions::dsl;
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
