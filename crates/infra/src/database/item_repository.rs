//! SQLite implementation of `ItemRepository`

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mailsync_core::ItemRepository;
use mailsync_domain::{Item, MailSyncError, MessageFields, ProcessingStatus, Result};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio::task;
use tracing::debug;

use super::codec::{
    count_to_u64, from_millis, parse_json, parse_text, to_millis, to_u32, usize_to_i64,
};
use super::manager::{map_sql_error, DbManager};
use crate::errors::map_join_error;

const ITEM_COLUMNS: &str = "id, account_id, remote_key, change_kind, processing_status,
    retry_count, message_json, processing_error, created_at, updated_at";

// The conflict target keeps the stored id so transmission records stay
// linked to the first row seen for a remote key.
const ITEM_UPSERT_SQL: &str = "INSERT INTO items (
        id, account_id, remote_key, change_kind, processing_status,
        retry_count, message_json, processing_error, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(account_id, remote_key) DO UPDATE SET
        change_kind = excluded.change_kind,
        processing_status = excluded.processing_status,
        retry_count = excluded.retry_count,
        message_json = excluded.message_json,
        processing_error = excluded.processing_error,
        updated_at = excluded.updated_at";

/// Keys per `IN (...)` lookup; stays under SQLite's bound-parameter limit.
const LOOKUP_CHUNK: usize = 500;

/// Detected-item store on the shared pool
pub struct SqliteItemRepository {
    db: Arc<DbManager>,
}

impl SqliteItemRepository {
    /// Repository on the shared pool
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ItemRepository for SqliteItemRepository {
    async fn find_by_remote_keys(
        &self,
        account_id: &str,
        remote_keys: &[String],
    ) -> Result<HashMap<String, Item>> {
        if remote_keys.is_empty() {
            return Ok(HashMap::new());
        }

        let db = Arc::clone(&self.db);
        let account_id = account_id.to_string();
        let remote_keys = remote_keys.to_vec();
        task::spawn_blocking(move || -> Result<HashMap<String, Item>> {
            let conn = db.get_connection()?;
            let mut found = HashMap::with_capacity(remote_keys.len());

            for chunk in remote_keys.chunks(LOOKUP_CHUNK) {
                let placeholders = (0..chunk.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT {ITEM_COLUMNS} FROM items
                     WHERE account_id = ?1 AND remote_key IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
                let bound = std::iter::once(account_id.as_str())
                    .chain(chunk.iter().map(String::as_str));
                let rows =
                    stmt.query_map(params_from_iter(bound), map_item_row).map_err(map_sql_error)?;
                for item in rows {
                    let item = item.map_err(map_sql_error)?;
                    found.insert(item.remote_key.clone(), item);
                }
            }

            Ok(found)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn upsert_batch(&self, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let db = Arc::clone(&self.db);
        let items = items.to_vec();
        task::spawn_blocking(move || -> Result<()> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            {
                let mut stmt = tx.prepare(ITEM_UPSERT_SQL).map_err(map_sql_error)?;
                for item in &items {
                    let message_json =
                        item.message.as_ref().map(serde_json::to_string).transpose()?;
                    stmt.execute(params![
                        item.id,
                        item.account_id,
                        item.remote_key,
                        item.change_kind.as_str(),
                        item.processing_status.as_str(),
                        item.retry_count,
                        message_json,
                        item.processing_error,
                        to_millis(item.created_at),
                        to_millis(item.updated_at),
                    ])
                    .map_err(map_sql_error)?;
                }
            }
            tx.commit().map_err(map_sql_error)?;
            debug!(count = items.len(), "items upserted");
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, id: &str) -> Result<Option<Item>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        task::spawn_blocking(move || -> Result<Option<Item>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id],
                map_item_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn set_processing_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let error = error.map(str::to_string);
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    "UPDATE items SET processing_status = ?1, processing_error = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![status.as_str(), error, to_millis(Utc::now()), id],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(MailSyncError::NotFound(format!("item {id}")));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn count_for_account(&self, account_id: &str) -> Result<u64> {
        let db = Arc::clone(&self.db);
        let account_id = account_id.to_string();
        task::spawn_blocking(move || -> Result<u64> {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM items WHERE account_id = ?1",
                    params![account_id],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(count_to_u64(count))
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_by_status(
        &self,
        account_id: Option<&str>,
        status: ProcessingStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Item>> {
        let db = Arc::clone(&self.db);
        let account_id = account_id.map(str::to_string);
        task::spawn_blocking(move || -> Result<Vec<Item>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items
                     WHERE processing_status = ?1 AND (?2 IS NULL OR account_id = ?2)
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?3 OFFSET ?4"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(
                    params![status.as_str(), account_id, usize_to_i64(limit), usize_to_i64(offset)],
                    map_item_row,
                )
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn count_by_status(&self, account_id: Option<&str>, status: ProcessingStatus) -> Result<u64> {
        let db = Arc::clone(&self.db);
        let account_id = account_id.map(str::to_string);
        task::spawn_blocking(move || -> Result<u64> {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM items
                     WHERE processing_status = ?1 AND (?2 IS NULL OR account_id = ?2)",
                    params![status.as_str(), account_id],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(count_to_u64(count))
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_item_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let change_kind: String = row.get(3)?;
    let processing_status: String = row.get(4)?;
    let message_json: Option<String> = row.get(6)?;

    Ok(Item {
        id: row.get(0)?,
        account_id: row.get(1)?,
        remote_key: row.get(2)?,
        change_kind: parse_text(3, &change_kind)?,
        processing_status: parse_text(4, &processing_status)?,
        retry_count: to_u32(5, row.get(5)?)?,
        message: message_json.map(|raw| parse_json::<MessageFields>(6, &raw)).transpose()?,
        processing_error: row.get(7)?,
        created_at: from_millis(8, row.get(8)?)?,
        updated_at: from_millis(9, row.get(9)?)?,
    })
}
