//! `MailboxApi` over Graph `messages/delta`

use async_trait::async_trait;
use mailsync_core::MailboxApi;
use mailsync_domain::constants::MAX_DELTA_PAGES;
use mailsync_domain::{DeltaBatch, GraphConfig, MailSyncError, RawChange, Result};
use reqwest::Method;
use tracing::{debug, warn};

use super::types::DeltaPage;
use crate::http::{error_for_status, parse_retry_after, HttpClient};

const MAX_PAGE_SIZE_HEADER: &str = "odata.maxpagesize=50";
const ID_TYPE_HEADER: &str = r#"IdType="ImmutableId""#;
const SELECT_FIELDS: &str =
    "subject,from,sender,toRecipients,receivedDateTime,bodyPreview,isRead,hasAttachments";

/// Delta queries against one folder of each user's mailbox.
///
/// The cursor handed back is the provider's `@odata.deltaLink`, a complete
/// URL that is requested as-is on the next call.
#[derive(Clone)]
pub struct GraphMailbox {
    client: HttpClient,
    api_base: String,
    folder: String,
    max_pages: usize,
}

impl GraphMailbox {
    /// Mailbox reader for `config.mail_folder`
    pub fn new(client: HttpClient, config: &GraphConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            folder: config.mail_folder.clone(),
            max_pages: MAX_DELTA_PAGES,
        }
    }

    /// Cap on pages followed in one call
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    fn initial_url(&self, mailbox: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| MailSyncError::Config(format!("invalid graph api_base: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| MailSyncError::Config("graph api_base cannot be a base URL".into()))?
            .extend(["users", mailbox, "mailFolders", &self.folder, "messages", "delta"]);
        url.query_pairs_mut().append_pair("$select", SELECT_FIELDS);
        Ok(url)
    }

    async fn fetch_page(&self, url: &str, access_token: &str) -> Result<DeltaPage> {
        let request = self
            .client
            .request(Method::GET, url)
            .bearer_auth(access_token)
            .header("Prefer", MAX_PAGE_SIZE_HEADER)
            .header("Prefer", ID_TYPE_HEADER);
        let response = self.client.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body, retry_after));
        }

        response
            .json::<DeltaPage>()
            .await
            .map_err(|e| MailSyncError::Transient(format!("malformed delta page: {e}")))
    }
}

#[async_trait]
impl MailboxApi for GraphMailbox {
    async fn fetch_delta(
        &self,
        mailbox: &str,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<DeltaBatch> {
        let mut url = match cursor {
            Some(link) => link.to_string(),
            None => self.initial_url(mailbox)?.to_string(),
        };
        let mut batch = DeltaBatch::default();

        for page_number in 1..=self.max_pages {
            let page = self.fetch_page(&url, access_token).await?;
            debug!(mailbox, page = page_number, changes = page.value.len(), "delta page received");
            batch.changes.extend(page.value.into_iter().map(RawChange::from));

            if let Some(delta_link) = page.delta_link {
                batch.next_cursor = Some(delta_link);
                return Ok(batch);
            }
            match page.next_link {
                Some(next) => url = next,
                None => return Ok(batch),
            }
        }

        // Resume from the unfinished page on the next call.
        warn!(mailbox, max_pages = self.max_pages, "delta page limit reached");
        batch.next_cursor = Some(url);
        Ok(batch)
    }
}
