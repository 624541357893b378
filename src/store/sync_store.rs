//! Persistence of retry items and per-flow sync watermarks

use super::db::{from_millis, from_millis_opt, to_millis};
use crate::api::ErrorCategory;
use crate::correlation::CorrelationId;
use crate::sync::types::SyncType;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

/// A failed sync item awaiting background reprocessing
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRetryItem {
    pub id: i64,
    pub sync_type: SyncType,
    pub item_id: String,
    pub item_type: String,
    /// JSON-encoded `SyncPayload`
    pub payload: String,
    pub last_error: String,
    pub error_category: ErrorCategory,
    pub correlation_id: CorrelationId,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every write; updates are conditional on the value read
    pub row_version: i64,
}

impl SyncRetryItem {
    /// Unresolved but out of attempts; needs manual reconciliation
    pub fn is_exhausted(&self) -> bool {
        !self.is_resolved && self.retry_count >= self.max_retries
    }
}

#[derive(Debug, Clone)]
pub struct NewRetryItem {
    pub sync_type: SyncType,
    pub item_id: String,
    pub item_type: String,
    pub payload: String,
    pub last_error: String,
    pub error_category: ErrorCategory,
    pub correlation_id: CorrelationId,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
}

/// Selection of retry items for listing
#[derive(Debug, Clone, Default)]
pub struct RetryItemFilter {
    pub sync_type: Option<SyncType>,
    pub resolved: Option<bool>,
    /// Only items whose next attempt is at or before this instant
    pub due_before: Option<DateTime<Utc>>,
    /// `Some(true)` for out-of-budget items only, `Some(false)` for items still under budget
    pub exhausted: Option<bool>,
    pub limit: Option<u32>,
}

impl RetryItemFilter {
    pub fn pending() -> Self {
        Self {
            resolved: Some(false),
            exhausted: Some(false),
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            resolved: Some(false),
            exhausted: Some(true),
            ..Self::default()
        }
    }
}

/// Storage interface for the retry queue and sync watermarks
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Queue an item. A pending item for the same flow and entity is refreshed
    /// in place instead of duplicated; its retry budget is kept. Items whose
    /// budget is spent are left alone and the new failure gets a fresh row.
    async fn insert_retry_item(&self, item: &NewRetryItem) -> Result<i64>;

    async fn get_retry_item(&self, id: i64) -> Result<Option<SyncRetryItem>>;

    /// Items eligible for reprocessing at `now`, oldest due first
    async fn due_retry_items(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<SyncRetryItem>>;

    async fn retry_items(&self, filter: &RetryItemFilter) -> Result<Vec<SyncRetryItem>>;

    /// Write back a mutated item. Returns `false` when the row changed since
    /// it was read.
    async fn update_retry_item(&self, item: &SyncRetryItem) -> Result<bool>;

    /// Delete resolved items resolved before `cutoff`
    async fn purge_resolved(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn get_sync_state(&self, sync_type: SyncType) -> Result<Option<DateTime<Utc>>>;

    /// Move the watermark forward. Never moves it backward; returns the stored value.
    async fn advance_sync_state(&self, sync_type: SyncType, at: DateTime<Utc>) -> Result<DateTime<Utc>>;
}

/// SQLite implementation
#[derive(Debug, Clone)]
pub struct SqliteSyncStore {
    pool: SqlitePool,
}

const RETRY_COLUMNS: &str = "id, sync_type, item_id, item_type, payload, last_error, error_category, \
     correlation_id, retry_count, max_retries, next_retry_at, is_resolved, resolved_at, \
     created_at, updated_at, row_version";

impl SqliteSyncStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn insert_retry_item(&self, item: &NewRetryItem) -> Result<i64> {
        let now = to_millis(Utc::now());
        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM sync_retry_items
            WHERE sync_type = ? AND item_id = ? AND is_resolved = 0 AND retry_count < max_retries
            LIMIT 1
            "#,
        )
        .bind(item.sync_type.as_str())
        .bind(&item.item_id)
        .fetch_optional(&mut *tx)
        .await
        .with_context(|| format!("Failed to look up retry item for '{}'", item.item_id))?;

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE sync_retry_items
                    SET payload = ?, last_error = ?, error_category = ?, correlation_id = ?,
                        next_retry_at = ?, updated_at = ?, row_version = row_version + 1
                    WHERE id = ?
                    "#,
                )
                .bind(&item.payload)
                .bind(&item.last_error)
                .bind(item.error_category.as_str())
                .bind(item.correlation_id.as_str())
                .bind(to_millis(item.next_retry_at))
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to refresh retry item {}", id))?;
                id
            }
            None => sqlx::query(
                r#"
                INSERT INTO sync_retry_items (
                    sync_type, item_id, item_type, payload, last_error, error_category,
                    correlation_id, retry_count, max_retries, next_retry_at, is_resolved,
                    created_at, updated_at, row_version
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 0, ?, ?, 0)
                "#,
            )
            .bind(item.sync_type.as_str())
            .bind(&item.item_id)
            .bind(&item.item_type)
            .bind(&item.payload)
            .bind(&item.last_error)
            .bind(item.error_category.as_str())
            .bind(item.correlation_id.as_str())
            .bind(item.max_retries as i64)
            .bind(to_millis(item.next_retry_at))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert retry item for '{}'", item.item_id))?
            .last_insert_rowid(),
        };

        tx.commit().await.context("Failed to commit retry item")?;
        Ok(id)
    }

    async fn get_retry_item(&self, id: i64) -> Result<Option<SyncRetryItem>> {
        let row = sqlx::query(&format!("SELECT {} FROM sync_retry_items WHERE id = ?", RETRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get retry item {}", id))?;

        row.map(parse_retry_row).transpose()
    }

    async fn due_retry_items(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<SyncRetryItem>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM sync_retry_items
            WHERE is_resolved = 0 AND retry_count < max_retries AND next_retry_at <= ?
            ORDER BY next_retry_at ASC, id ASC
            LIMIT ?
            "#,
            RETRY_COLUMNS
        ))
        .bind(to_millis(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to select due retry items")?;

        rows.into_iter().map(parse_retry_row).collect()
    }

    async fn retry_items(&self, filter: &RetryItemFilter) -> Result<Vec<SyncRetryItem>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM sync_retry_items WHERE 1 = 1", RETRY_COLUMNS));

        if let Some(sync_type) = filter.sync_type {
            query.push(" AND sync_type = ").push_bind(sync_type.as_str());
        }
        if let Some(resolved) = filter.resolved {
            query.push(" AND is_resolved = ").push_bind(resolved as i64);
        }
        if let Some(due_before) = filter.due_before {
            query.push(" AND next_retry_at <= ").push_bind(to_millis(due_before));
        }
        match filter.exhausted {
            Some(true) => {
                query.push(" AND retry_count >= max_retries");
            }
            Some(false) => {
                query.push(" AND retry_count < max_retries");
            }
            None => {}
        }
        query.push(" ORDER BY next_retry_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list retry items")?;

        rows.into_iter().map(parse_retry_row).collect()
    }

    async fn update_retry_item(&self, item: &SyncRetryItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_retry_items
            SET last_error = ?, error_category = ?, retry_count = ?, next_retry_at = ?,
                is_resolved = ?, resolved_at = ?, updated_at = ?, row_version = row_version + 1
            WHERE id = ? AND row_version = ?
            "#,
        )
        .bind(&item.last_error)
        .bind(item.error_category.as_str())
        .bind(item.retry_count as i64)
        .bind(to_millis(item.next_retry_at))
        .bind(item.is_resolved)
        .bind(item.resolved_at.map(to_millis))
        .bind(to_millis(Utc::now()))
        .bind(item.id)
        .bind(item.row_version)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update retry item {}", item.id))?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_resolved(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_retry_items WHERE is_resolved = 1 AND resolved_at < ?")
            .bind(to_millis(cutoff))
            .execute(&self.pool)
            .await
            .context("Failed to purge resolved retry items")?;

        Ok(result.rows_affected())
    }

    async fn get_sync_state(&self, sync_type: SyncType) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = sqlx::query_scalar("SELECT last_sync_at FROM sync_state WHERE sync_type = ?")
            .bind(sync_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get sync state for {}", sync_type))?;

        from_millis_opt(millis)
    }

    async fn advance_sync_state(&self, sync_type: SyncType, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let now = to_millis(Utc::now());
        let stored: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_state (sync_type, last_sync_at, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(sync_type) DO UPDATE SET
                last_sync_at = MAX(sync_state.last_sync_at, excluded.last_sync_at),
                updated_at = excluded.updated_at
            RETURNING last_sync_at
            "#,
        )
        .bind(sync_type.as_str())
        .bind(to_millis(at))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to advance sync state for {}", sync_type))?;

        from_millis(stored)
    }
}

fn parse_retry_row(row: SqliteRow) -> Result<SyncRetryItem> {
    let sync_type: String = row.try_get("sync_type")?;
    let category: String = row.try_get("error_category")?;
    let correlation_id: String = row.try_get("correlation_id")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;

    Ok(SyncRetryItem {
        id: row.try_get("id")?,
        sync_type: sync_type.parse().map_err(anyhow::Error::msg)?,
        item_id: row.try_get("item_id")?,
        item_type: row.try_get("item_type")?,
        payload: row.try_get("payload")?,
        last_error: row.try_get("last_error")?,
        error_category: category.parse().unwrap_or(ErrorCategory::Unknown),
        correlation_id: CorrelationId::from_string(correlation_id),
        retry_count: u32::try_from(retry_count).context("Negative retry_count")?,
        max_retries: u32::try_from(max_retries).context("Negative max_retries")?,
        next_retry_at: from_millis(row.try_get("next_retry_at")?)?,
        is_resolved: row.try_get("is_resolved")?,
        resolved_at: from_millis_opt(row.try_get("resolved_at")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        row_version: row.try_get("row_version")?,
    })
}
