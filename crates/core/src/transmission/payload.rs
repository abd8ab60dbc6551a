//! Sink request bodies and response classification

use mailsync_domain::{Item, MailSyncError, Result};
use serde_json::json;

use super::ports::SinkResponse;

/// Longest response body excerpt kept in error messages
const BODY_EXCERPT_LEN: usize = 256;

/// JSON body delivered to the sink for one item
pub fn build_payload(item: &Item) -> serde_json::Value {
    json!({
        "item_id": item.id,
        "account_id": item.account_id,
        "remote_key": item.remote_key,
        "change_kind": item.change_kind.as_str(),
        "detected_at": item.updated_at.to_rfc3339(),
        "message": item.message,
    })
}

/// Whether `payload` already carries the item's current change.
///
/// `detected_at` is left out: status writes move the item's timestamp
/// without changing what the sink would receive.
pub fn carries_current_change(payload: &serde_json::Value, item: &Item) -> bool {
    let current = build_payload(item);
    ["change_kind", "message"].iter().all(|key| payload.get(key) == current.get(key))
}

/// Map a sink response onto the error taxonomy.
///
/// 2xx passes through; 401/403 is an authentication failure, 429 a rate
/// limit carrying `Retry-After`, 5xx transient and any other status a
/// rejection.
pub fn classify_response(response: SinkResponse) -> Result<SinkResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let excerpt = excerpt(&response.body);
    let status = response.status;
    Err(match status {
        401 | 403 => MailSyncError::Authentication(format!("sink returned {status}: {excerpt}")),
        429 => MailSyncError::rate_limited(format!("sink returned 429: {excerpt}"), response.retry_after),
        500..=599 => MailSyncError::Transient(format!("sink returned {status}: {excerpt}")),
        _ => MailSyncError::Rejected { status, message: excerpt },
    })
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
