//! Conversions from external infrastructure errors into `MailSyncError`.

use mailsync_domain::MailSyncError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use tokio::task::JoinError;

/// Newtype that keeps foreign-error conversions on the infrastructure side.
///
/// Convert with `MailSyncError::from(InfraError::from(err))`.
#[derive(Debug)]
pub struct InfraError(pub MailSyncError);

impl From<InfraError> for MailSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<MailSyncError> for InfraError {
    fn from(value: MailSyncError) -> Self {
        Self(value)
    }
}

trait IntoMailSyncError {
    fn into_mailsync(self) -> MailSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → MailSyncError */
/* -------------------------------------------------------------------------- */

impl IntoMailSyncError for SqlError {
    fn into_mailsync(self) -> MailSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        MailSyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        MailSyncError::Database("database is locked".into())
                    }
                    // SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
                    (ErrorCode::ConstraintViolation, 2067 | 1555) => {
                        MailSyncError::Conflict(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        MailSyncError::Database("foreign key constraint violation".into())
                    }
                    _ => MailSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => MailSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                MailSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                MailSyncError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidPath(path) => MailSyncError::Config(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => MailSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        Self(value.into_mailsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → MailSyncError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        Self(MailSyncError::Database(format!("connection pool error: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → MailSyncError */
/* -------------------------------------------------------------------------- */

impl IntoMailSyncError for HttpError {
    fn into_mailsync(self) -> MailSyncError {
        if self.is_timeout() {
            return MailSyncError::Timeout("HTTP request timed out".into());
        }

        if self.is_connect() {
            return MailSyncError::Transient("HTTP connection failure".into());
        }

        if self.is_decode() {
            return MailSyncError::Transient(format!("malformed response body: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => MailSyncError::Authentication(message),
                429 => MailSyncError::rate_limited(message, None),
                400..=499 => MailSyncError::Rejected { status: code, message },
                _ => MailSyncError::Transient(message),
            };
        }

        if self.is_builder() {
            return MailSyncError::Config(format!("invalid HTTP request: {self}"));
        }

        MailSyncError::Transient(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        Self(value.into_mailsync())
    }
}

/* -------------------------------------------------------------------------- */
/* Blocking tasks */
/* -------------------------------------------------------------------------- */

/// Map a failed `spawn_blocking` join into an internal error.
pub fn map_join_error(err: JoinError) -> MailSyncError {
    if err.is_cancelled() {
        MailSyncError::Internal("database task cancelled".into())
    } else {
        MailSyncError::Internal(format!("database task panicked: {err}"))
    }
}
