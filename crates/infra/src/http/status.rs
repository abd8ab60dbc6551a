//! HTTP status and header interpretation shared by every adapter

use std::time::Duration;

use chrono::{DateTime, Utc};
use mailsync_domain::MailSyncError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

/// Longest body excerpt carried in an error message
const BODY_EXCERPT_CHARS: usize = 256;

/// Parse `Retry-After` as delta-seconds or an HTTP-date.
///
/// A date in the past yields a zero delay.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

/// Map a non-success status to the error taxonomy.
///
/// 401/403 are authentication failures, 429 is rate limiting, any other
/// 4xx is a rejection and everything else is transient.
pub fn error_for_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> MailSyncError {
    let code = status.as_u16();
    let message = describe(status, body);

    match code {
        401 | 403 => MailSyncError::Authentication(message),
        429 => MailSyncError::rate_limited(message, retry_after),
        400..=499 => MailSyncError::Rejected { status: code, message },
        _ => MailSyncError::Transient(message),
    }
}

fn describe(status: StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {} {reason}", status.as_u16())
    } else {
        let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
        format!("HTTP {} {reason}: {excerpt}", status.as_u16())
    }
}
