//! PostgreSQL-backed snapshot store.
//!
//! Each component owns one row in `engine_snapshots`; saves are single-row
//! upserts, which PostgreSQL applies atomically.

use std::{future::Future, pin::Pin};

use sqlx::PgPool;

use super::SnapshotStore;
use crate::error::Result;

/// Snapshot store writing to a PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    /// Wraps an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the snapshot table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_snapshots (
                key TEXT PRIMARY KEY,
                body BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl SnapshotStore for PostgresSnapshotStore {
    fn load<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>> {
        Box::pin(async move {
            let body: Option<Vec<u8>> =
                sqlx::query_scalar("SELECT body FROM engine_snapshots WHERE key = $1")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(body)
        })
    }

    fn save<'a>(
        &'a self,
        key: &'a str,
        snapshot: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO engine_snapshots (key, body, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (key) DO UPDATE
                SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(key)
            .bind(snapshot)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }
}
