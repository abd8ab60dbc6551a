//! SQLite implementation of `TransmissionRepository`
//!
//! State transitions are single conditional `UPDATE`s so concurrent workers
//! on separate pool connections cannot both win a claim. The partial unique
//! index on `item_id` backs enqueue idempotency.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsync_core::TransmissionRepository;
use mailsync_domain::{MailSyncError, Priority, Result, TransmissionRecord, TransmissionStatus};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;
use tracing::{debug, warn};

use super::codec::{
    count_to_u64, from_millis, opt_from_millis, opt_millis, parse_json, parse_text, to_millis,
    to_u32, usize_to_i64,
};
use super::manager::{map_sql_error, DbManager};
use crate::errors::map_join_error;

const RECORD_COLUMNS: &str = "id, item_id, account_id, status, priority, payload_json, endpoint,
    retry_count, max_retries, next_retry_at, last_error, response_status,
    created_at, updated_at, started_at, completed_at";

const RECORD_INSERT_SQL: &str = "INSERT OR IGNORE INTO transmissions (
        id, item_id, account_id, status, priority, priority_rank, payload_json, endpoint,
        retry_count, max_retries, next_retry_at, last_error, response_status,
        created_at, updated_at, started_at, completed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)";

const RECORD_UPDATE_SQL: &str = "UPDATE transmissions SET
        status = ?1, priority = ?2, priority_rank = ?3, payload_json = ?4, endpoint = ?5,
        retry_count = ?6, max_retries = ?7, next_retry_at = ?8, last_error = ?9,
        response_status = ?10, updated_at = ?11, started_at = ?12, completed_at = ?13
    WHERE id = ?14";

/// Rows a record must match to be claimable at `?1` (epoch millis).
const READY_PREDICATE: &str = "(status = 'pending'
        OR (status = 'retrying' AND (next_retry_at IS NULL OR next_retry_at <= ?1)))";

/// Transmission queue on the shared pool
pub struct SqliteTransmissionRepository {
    db: Arc<DbManager>,
}

impl SqliteTransmissionRepository {
    /// Repository over a pool whose schema is already applied
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, filter: &'static str, key: String) -> Result<Option<TransmissionRecord>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Option<TransmissionRecord>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM transmissions WHERE {filter} LIMIT 1"),
                params![key],
                map_record_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn count_grouped<K>(&self, column: &'static str) -> Result<BTreeMap<K, u64>>
    where
        K: std::str::FromStr<Err = String> + Ord + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<BTreeMap<K, u64>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {column}, COUNT(*) FROM transmissions GROUP BY {column}"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map([], |row| {
                    let raw: String = row.get(0)?;
                    Ok((parse_text::<K>(0, &raw)?, count_to_u64(row.get(1)?)))
                })
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<BTreeMap<_, _>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl TransmissionRepository for SqliteTransmissionRepository {
    async fn insert(&self, record: &TransmissionRecord) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let record = record.clone();
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let payload = serde_json::to_string(&record.payload)?;
            let inserted = conn
                .execute(
                    RECORD_INSERT_SQL,
                    params![
                        record.id,
                        record.item_id,
                        record.account_id,
                        record.status.as_str(),
                        record.priority.as_str(),
                        record.priority.rank(),
                        payload,
                        record.endpoint,
                        record.retry_count,
                        record.max_retries,
                        opt_millis(record.next_retry_at),
                        record.last_error,
                        record.response_status,
                        to_millis(record.created_at),
                        to_millis(record.updated_at),
                        opt_millis(record.started_at),
                        opt_millis(record.completed_at),
                    ],
                )
                .map_err(map_sql_error)?;
            if inserted == 0 {
                debug!(item_id = %record.item_id, "active transmission exists; insert skipped");
            }
            Ok(inserted == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, id: &str) -> Result<Option<TransmissionRecord>> {
        self.fetch_one("id = ?1", id.to_string()).await
    }

    async fn find_active_for_item(&self, item_id: &str) -> Result<Option<TransmissionRecord>> {
        self.fetch_one(
            "item_id = ?1 AND status IN ('pending', 'in_progress', 'retrying')",
            item_id.to_string(),
        )
        .await
    }

    async fn update(&self, record: &TransmissionRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        let record = record.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let payload = serde_json::to_string(&record.payload)?;
            let changed = conn
                .execute(
                    RECORD_UPDATE_SQL,
                    params![
                        record.status.as_str(),
                        record.priority.as_str(),
                        record.priority.rank(),
                        payload,
                        record.endpoint,
                        record.retry_count,
                        record.max_retries,
                        opt_millis(record.next_retry_at),
                        record.last_error,
                        record.response_status,
                        to_millis(record.updated_at),
                        opt_millis(record.started_at),
                        opt_millis(record.completed_at),
                        record.id,
                    ],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(MailSyncError::NotFound(format!("transmission {}", record.id)));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn refresh_queued(
        &self,
        item_id: &str,
        payload: &serde_json::Value,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let item_id = item_id.to_string();
        let payload = serde_json::to_string(payload)?;
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    "UPDATE transmissions
                     SET payload_json = ?1,
                         priority = CASE WHEN ?3 > priority_rank THEN ?2 ELSE priority END,
                         priority_rank = MAX(priority_rank, ?3),
                         updated_at = ?4
                     WHERE item_id = ?5 AND status IN ('pending', 'retrying')",
                    params![payload, priority.as_str(), priority.rank(), to_millis(now), item_id],
                )
                .map_err(map_sql_error)?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    &format!(
                        "UPDATE transmissions
                         SET status = 'in_progress', started_at = ?1, updated_at = ?1
                         WHERE id = ?2 AND {READY_PREDICATE}"
                    ),
                    params![to_millis(now), id],
                )
                .map_err(map_sql_error)?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn cancel(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let reason = reason.to_string();
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    "UPDATE transmissions
                     SET status = 'cancelled', last_error = ?1, next_retry_at = NULL,
                         completed_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND status IN ('pending', 'retrying')",
                    params![reason, to_millis(now), id],
                )
                .map_err(map_sql_error)?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn reset_failed(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<TransmissionRecord>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<TransmissionRecord>> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            let reset = {
                // OR IGNORE skips failed records whose item already has a
                // newer active record.
                let mut stmt = tx
                    .prepare(&format!(
                        "UPDATE OR IGNORE transmissions
                         SET status = 'pending', retry_count = 0, next_retry_at = NULL,
                             last_error = NULL, completed_at = NULL, updated_at = ?1
                         WHERE id IN (
                             SELECT id FROM transmissions WHERE status = 'failed'
                             ORDER BY updated_at ASC LIMIT ?2
                         )
                         RETURNING {RECORD_COLUMNS}"
                    ))
                    .map_err(map_sql_error)?;
                let rows = stmt
                    .query_map(params![to_millis(now), usize_to_i64(limit)], map_record_row)
                    .map_err(map_sql_error)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)?
            };
            tx.commit().map_err(map_sql_error)?;
            Ok(reset)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn recover_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<u64> {
            let conn = db.get_connection()?;
            let recovered = conn
                .execute(
                    "UPDATE transmissions SET status = 'pending', updated_at = ?1
                     WHERE status = 'in_progress' AND started_at < ?2",
                    params![to_millis(Utc::now()), to_millis(started_before)],
                )
                .map_err(map_sql_error)?;
            if recovered > 0 {
                warn!(recovered, "stale in-progress transmissions returned to pending");
            }
            Ok(recovered as u64)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        account_id: Option<&str>,
    ) -> Result<Vec<TransmissionRecord>> {
        let db = Arc::clone(&self.db);
        let account_id = account_id.map(str::to_string);
        task::spawn_blocking(move || -> Result<Vec<TransmissionRecord>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM transmissions
                     WHERE {READY_PREDICATE} AND (?2 IS NULL OR account_id = ?2)
                     ORDER BY priority_rank DESC, created_at ASC, id ASC
                     LIMIT ?3"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(
                    params![to_millis(now), account_id, usize_to_i64(limit)],
                    map_record_row,
                )
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn count_by_status(&self) -> Result<BTreeMap<TransmissionStatus, u64>> {
        self.count_grouped("status").await
    }

    async fn count_by_priority(&self) -> Result<BTreeMap<Priority, u64>> {
        self.count_grouped("priority").await
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<u64> {
            let conn = db.get_connection()?;
            let deleted = conn
                .execute(
                    "DELETE FROM transmissions
                     WHERE status IN ('success', 'failed', 'cancelled') AND updated_at < ?1",
                    params![to_millis(cutoff)],
                )
                .map_err(map_sql_error)?;
            Ok(deleted as u64)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<TransmissionRecord> {
    let status: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let response_status: Option<i64> = row.get(11)?;

    Ok(TransmissionRecord {
        id: row.get(0)?,
        item_id: row.get(1)?,
        account_id: row.get(2)?,
        status: parse_text(3, &status)?,
        priority: parse_text(4, &priority)?,
        payload: parse_json(5, &payload)?,
        endpoint: row.get(6)?,
        retry_count: to_u32(7, row.get(7)?)?,
        max_retries: to_u32(8, row.get(8)?)?,
        next_retry_at: opt_from_millis(9, row.get(9)?)?,
        last_error: row.get(10)?,
        response_status: response_status.and_then(|s| u16::try_from(s).ok()),
        created_at: from_millis(12, row.get(12)?)?,
        updated_at: from_millis(13, row.get(13)?)?,
        started_at: opt_from_millis(14, row.get(14)?)?,
        completed_at: opt_from_millis(15, row.get(15)?)?,
    })
}
