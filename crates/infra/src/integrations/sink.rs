//! `SinkApi` over plain HTTP

use async_trait::async_trait;
use mailsync_core::{SinkApi, SinkResponse};
use mailsync_domain::{MailSyncError, Result, SinkConfig};
use reqwest::Method;
use tracing::debug;

use crate::http::{parse_retry_after, HttpClient};

const API_KEY_HEADER: &str = "X-API-Key";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const FALLBACK_ENDPOINT: &str = "/items";

/// Posts transmission payloads as JSON to the downstream service.
///
/// Every HTTP answer is handed back as a [`SinkResponse`]; deciding what a
/// status means is left to the pipeline.
pub struct HttpSink {
    client: HttpClient,
    base_url: String,
    api_key: Option<String>,
    default_endpoint: String,
}

impl HttpSink {
    /// # Errors
    /// Returns `MailSyncError::Config` when `base_url` is empty.
    pub fn new(client: HttpClient, config: &SinkConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(MailSyncError::Config("sink.base_url must be set".into()));
        }
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            default_endpoint: config
                .default_endpoint
                .clone()
                .unwrap_or_else(|| FALLBACK_ENDPOINT.to_string()),
        })
    }

    fn url_for(&self, endpoint: Option<&str>) -> String {
        let endpoint = endpoint.unwrap_or(&self.default_endpoint);
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl SinkApi for HttpSink {
    async fn send(
        &self,
        payload: &serde_json::Value,
        endpoint: Option<&str>,
        idempotency_key: &str,
    ) -> Result<SinkResponse> {
        let url = self.url_for(endpoint);
        let mut request = self
            .client
            .request(Method::POST, &url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = self.client.send(request).await?;
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        debug!(status, idempotency_key, "sink answered");

        Ok(SinkResponse { status, body, retry_after })
    }
}
