use super::OutputHandler;
use crate::error::{Error, Result};
use crate::metrics::StatisticsSnapshot;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;

/// Appends each statistics window as a row of `table_name`.
pub struct SqliteOutput {
    pool: SqlitePool,
    table_name: String,
    initialized: bool,
}

impl SqliteOutput {
    pub async fn new(path: PathBuf, table_name: String) -> Result<Self> {
        if !table_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config(format!("Invalid table name: {}", table_name)));
        }

        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&conn_str).await?;

        Ok(Self {
            pool,
            table_name,
            initialized: false,
        })
    }

    async fn ensure_table(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                recorded_at TEXT NOT NULL,
                window_seconds REAL NOT NULL,
                polls INTEGER NOT NULL,
                queues_checked INTEGER NOT NULL,
                state_changes INTEGER NOT NULL,
                migration_jobs INTEGER NOT NULL,
                messages_migrated INTEGER NOT NULL,
                min_poll_ms INTEGER NOT NULL,
                max_poll_ms INTEGER NOT NULL,
                avg_poll_ms INTEGER NOT NULL,
                total_poll_ms INTEGER NOT NULL
            )",
            self.table_name
        );
        sqlx::query(&query).execute(&self.pool).await?;

        self.initialized = true;
        Ok(())
    }
}

#[async_trait]
impl OutputHandler for SqliteOutput {
    async fn write(&mut self, snapshot: &StatisticsSnapshot) -> Result<()> {
        self.ensure_table().await?;

        let query = format!(
            "INSERT INTO {} (recorded_at, window_seconds, polls, queues_checked, state_changes,
                migration_jobs, messages_migrated, min_poll_ms, max_poll_ms, avg_poll_ms, total_poll_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            self.table_name
        );

        sqlx::query(&query)
            .bind(snapshot.recorded_at.to_rfc3339())
            .bind(snapshot.window_seconds)
            .bind(snapshot.polls as i64)
            .bind(snapshot.queues_checked as i64)
            .bind(snapshot.state_changes as i64)
            .bind(snapshot.migration_jobs as i64)
            .bind(snapshot.messages_migrated as i64)
            .bind(snapshot.min_poll_ms as i64)
            .bind(snapshot.max_poll_ms as i64)
            .bind(snapshot.avg_poll_ms as i64)
            .bind(snapshot.total_poll_ms as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
