//! Graph wire types

use chrono::{DateTime, Utc};
use mailsync_domain::{MessageFields, RawChange};
use serde::Deserialize;

/// One page of a `messages/delta` response
#[derive(Debug, Deserialize)]
pub(super) struct DeltaPage {
    #[serde(default)]
    pub value: Vec<DeltaMessage>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeltaMessage {
    pub id: String,
    #[serde(rename = "@removed")]
    pub removed: Option<serde_json::Value>,
    pub subject: Option<String>,
    pub from: Option<Recipient>,
    pub sender: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    pub received_date_time: Option<DateTime<Utc>>,
    pub body_preview: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub has_attachments: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Recipient {
    pub email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
pub(super) struct EmailAddress {
    pub address: Option<String>,
}

impl Recipient {
    fn address(&self) -> Option<String> {
        self.email_address
            .as_ref()
            .and_then(|e| e.address.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
    }
}

impl From<DeltaMessage> for RawChange {
    fn from(message: DeltaMessage) -> Self {
        if message.removed.is_some() {
            return Self::removal(message.id);
        }

        let from = message.from.as_ref().or(message.sender.as_ref()).and_then(Recipient::address);
        let fields = MessageFields {
            subject: message.subject.filter(|s| !s.trim().is_empty()),
            from,
            to: message.to_recipients.iter().filter_map(Recipient::address).collect(),
            received_at: message.received_date_time,
            body_preview: message.body_preview,
            is_read: message.is_read,
            has_attachments: message.has_attachments,
        };
        Self::message(message.id, fields)
    }
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// OAuth error body (`{"error": "invalid_grant", ...}`)
#[derive(Debug, Deserialize)]
pub(super) struct OAuthErrorBody {
    pub error: String,
    pub error_description: Option<String>,
}
