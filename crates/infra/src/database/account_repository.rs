//! SQLite implementation of `AccountRepository`

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsync_core::AccountRepository;
use mailsync_domain::{Account, AccountStatus, Credential, MailSyncError, Result};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;

use super::codec::{from_millis, opt_from_millis, opt_millis, parse_text, to_millis, to_u32};
use super::manager::{map_sql_error, DbManager};
use crate::errors::map_join_error;

const ACCOUNT_COLUMNS: &str = "id, user_id, email, display_name, status, sync_enabled,
    access_token, refresh_token, token_expires_at, delta_cursor, cursor_version,
    last_sync_at, last_error, error_count, created_at, updated_at";

const ACCOUNT_UPSERT_SQL: &str = "INSERT INTO accounts (
        id, user_id, email, display_name, status, sync_enabled,
        access_token, refresh_token, token_expires_at, delta_cursor, cursor_version,
        last_sync_at, last_error, error_count, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
    ON CONFLICT(id) DO UPDATE SET
        user_id = excluded.user_id,
        email = excluded.email,
        display_name = excluded.display_name,
        status = excluded.status,
        sync_enabled = excluded.sync_enabled,
        access_token = excluded.access_token,
        refresh_token = excluded.refresh_token,
        token_expires_at = excluded.token_expires_at,
        delta_cursor = excluded.delta_cursor,
        cursor_version = excluded.cursor_version,
        last_sync_at = excluded.last_sync_at,
        last_error = excluded.last_error,
        error_count = excluded.error_count,
        updated_at = excluded.updated_at";

/// Account store on the shared pool
pub struct SqliteAccountRepository {
    db: Arc<DbManager>,
}

impl SqliteAccountRepository {
    /// Repository on the shared pool
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn query_list(&self, filter: &'static str, param: Option<i64>) -> Result<Vec<Account>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<Account>> {
            let conn = db.get_connection()?;
            let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts {filter} ORDER BY email ASC");
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let rows = match param {
                Some(value) => stmt.query_map(params![value], map_account_row),
                None => stmt.query_map([], map_account_row),
            }
            .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Run one UPDATE on `id`; zero affected rows means the account is gone.
    async fn update_one<F>(&self, id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&rusqlite::Connection, &str) -> rusqlite::Result<usize> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let changed = update(&conn, &id).map_err(map_sql_error)?;
            if changed == 0 {
                return Err(not_found(&id));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn get(&self, id: &str) -> Result<Option<Account>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        task::spawn_blocking(move || -> Result<Option<Account>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id],
                map_account_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self) -> Result<Vec<Account>> {
        self.query_list("", None).await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Account>> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<Vec<Account>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 ORDER BY email ASC"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt.query_map(params![user_id], map_account_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_active_sync_enabled(&self) -> Result<Vec<Account>> {
        self.query_list("WHERE status = 'active' AND sync_enabled = 1", None).await
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Account>> {
        self.query_list(
            "WHERE status = 'active' AND token_expires_at IS NOT NULL AND token_expires_at <= ?1",
            Some(to_millis(before)),
        )
        .await
    }

    async fn save(&self, account: &Account) -> Result<()> {
        let db = Arc::clone(&self.db);
        let account = account.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let credential = account.credential.as_ref();
            conn.execute(
                ACCOUNT_UPSERT_SQL,
                params![
                    account.id,
                    account.user_id,
                    account.email,
                    account.display_name,
                    account.status.as_str(),
                    account.sync_enabled,
                    credential.map(|c| c.access_token.as_str()),
                    credential.and_then(|c| c.refresh_token.as_deref()),
                    credential.map(|c| to_millis(c.expires_at)),
                    account.delta_cursor,
                    account.cursor_version,
                    opt_millis(account.last_sync_at),
                    account.last_error,
                    account.error_count,
                    to_millis(account.created_at),
                    to_millis(Utc::now()),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update_credential(&self, id: &str, credential: &Credential) -> Result<()> {
        let credential = credential.clone();
        self.update_one(id, move |conn, id| {
            conn.execute(
                "UPDATE accounts
                 SET access_token = ?1, refresh_token = ?2, token_expires_at = ?3,
                     error_count = 0, last_error = NULL, updated_at = ?4
                 WHERE id = ?5",
                params![
                    credential.access_token,
                    credential.refresh_token,
                    to_millis(credential.expires_at),
                    to_millis(Utc::now()),
                    id,
                ],
            )
        })
        .await
    }

    async fn record_error(
        &self,
        id: &str,
        error: &str,
        status: Option<AccountStatus>,
    ) -> Result<u32> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let error = error.to_string();
        task::spawn_blocking(move || -> Result<u32> {
            let conn = db.get_connection()?;
            let count: Option<i64> = conn
                .query_row(
                    "UPDATE accounts
                     SET error_count = error_count + 1, last_error = ?1,
                         status = COALESCE(?2, status), updated_at = ?3
                     WHERE id = ?4
                     RETURNING error_count",
                    params![error, status.map(|s| s.as_str()), to_millis(Utc::now()), id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sql_error)?;
            let count = count.ok_or_else(|| not_found(&id))?;
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
        .await
        .map_err(map_join_error)?
    }

    async fn clear_errors(&self, id: &str) -> Result<()> {
        self.update_one(id, |conn, id| {
            conn.execute(
                "UPDATE accounts SET error_count = 0, last_error = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![to_millis(Utc::now()), id],
            )
        })
        .await
    }

    async fn set_activation(&self, id: &str, status: AccountStatus, sync_enabled: bool) -> Result<()> {
        self.update_one(id, move |conn, id| {
            conn.execute(
                "UPDATE accounts SET status = ?1, sync_enabled = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), sync_enabled, to_millis(Utc::now()), id],
            )
        })
        .await
    }

    async fn advance_cursor(
        &self,
        id: &str,
        expected_version: i64,
        cursor: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let cursor = cursor.map(str::to_string);
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    "UPDATE accounts
                     SET delta_cursor = ?1, cursor_version = cursor_version + 1,
                         last_sync_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND cursor_version = ?4",
                    params![cursor, to_millis(synced_at), id, expected_version],
                )
                .map_err(map_sql_error)?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn touch_last_sync(&self, id: &str, synced_at: DateTime<Utc>) -> Result<()> {
        self.update_one(id, move |conn, id| {
            conn.execute(
                "UPDATE accounts SET last_sync_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![to_millis(synced_at), id],
            )
        })
        .await
    }

    async fn reset_cursor(&self, id: &str) -> Result<i64> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        task::spawn_blocking(move || -> Result<i64> {
            let conn = db.get_connection()?;
            let version: Option<i64> = conn
                .query_row(
                    "UPDATE accounts
                     SET delta_cursor = NULL, cursor_version = cursor_version + 1, updated_at = ?1
                     WHERE id = ?2
                     RETURNING cursor_version",
                    params![to_millis(Utc::now()), id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sql_error)?;
            version.ok_or_else(|| not_found(&id))
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_account_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let status: String = row.get(4)?;
    let access_token: Option<String> = row.get(6)?;
    let expires_at: Option<i64> = row.get(8)?;

    let credential = match (access_token, expires_at) {
        (Some(access_token), Some(expires_at)) => Some(Credential {
            access_token,
            refresh_token: row.get(7)?,
            expires_at: from_millis(8, expires_at)?,
        }),
        _ => None,
    };

    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        status: parse_text(4, &status)?,
        sync_enabled: row.get(5)?,
        credential,
        delta_cursor: row.get(9)?,
        cursor_version: row.get(10)?,
        last_sync_at: opt_from_millis(11, row.get(11)?)?,
        last_error: row.get(12)?,
        error_count: to_u32(13, row.get(13)?)?,
        created_at: from_millis(14, row.get(14)?)?,
        updated_at: from_millis(15, row.get(15)?)?,
    })
}

fn not_found(id: &str) -> MailSyncError {
    MailSyncError::NotFound(format!("account {id}"))
}
