//! `IdentityProvider` over the Microsoft identity platform (OAuth 2.0
//! authorization code flow)

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use mailsync_core::IdentityProvider;
use mailsync_domain::{Credential, GraphConfig, MailSyncError, Result};
use reqwest::{Method, Url};
use tracing::{debug, warn};

use super::types::{OAuthErrorBody, TokenResponse};
use crate::http::{error_for_status, parse_retry_after, HttpClient};

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth token endpoint of the Microsoft identity platform
pub struct GraphIdentity {
    client: HttpClient,
    authorize_url: String,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    scope: String,
}

impl GraphIdentity {
    /// Client for the configured tenant
    pub fn new(client: HttpClient, config: &GraphConfig) -> Self {
        let base = format!("{}/{}/oauth2/v2.0", config.authority.trim_end_matches('/'), config.tenant);
        Self {
            client,
            authorize_url: format!("{base}/authorize"),
            token_url: format!("{base}/token"),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scopes.join(" "),
        }
    }

    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<Credential> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", self.scope.as_str()),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        form.extend_from_slice(grant);

        let request = self.client.request(Method::POST, &self.token_url).form(&form);
        let response = self.client.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(token_error(status, &body, retry_after));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailSyncError::Transient(format!("malformed token response: {e}")))?;
        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).max(0);

        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        })
    }
}

/// `invalid_grant` means the refresh token is revoked or expired; the
/// account cannot recover without a new authorization.
fn token_error(
    status: reqwest::StatusCode,
    body: &str,
    retry_after: Option<std::time::Duration>,
) -> MailSyncError {
    if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(body) {
        if oauth.error == "invalid_grant" {
            let description = oauth.error_description.unwrap_or_else(|| oauth.error.clone());
            warn!(%status, "identity provider rejected the grant");
            return MailSyncError::InvalidGrant(description);
        }
    }
    error_for_status(status, body, retry_after)
}

#[async_trait]
impl IdentityProvider for GraphIdentity {
    fn authorization_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_mode", "query"),
                ("scope", self.scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| MailSyncError::Config(format!("invalid authority URL: {e}")))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential> {
        debug!("exchanging authorization code");
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        debug!("refreshing access token");
        self.request_token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn identity_for(authority: &str) -> GraphIdentity {
        let config = GraphConfig {
            authority: authority.to_string(),
            tenant: "contoso".to_string(),
            client_id: "client-123".to_string(),
            client_secret: Some("s3cret".to_string()),
            ..GraphConfig::default()
        };
        GraphIdentity::new(HttpClient::new().expect("client"), &config)
    }

    #[test]
    fn authorization_url_carries_client_and_state() {
        let identity = identity_for("https://login.example.com/");
        let url = Url::parse(&identity.authorization_url("xyz").expect("url")).expect("parses");

        assert_eq!(url.path(), "/contoso/oauth2/v2.0/authorize");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["scope"], "offline_access Mail.Read");
    }

    /// Validates a refresh round against the token endpoint.
    ///
    /// Assertions:
    /// - The form carries the refresh grant and client secret.
    /// - `expires_in` becomes an absolute expiry.
    /// - A rotated refresh token is returned.
    #[tokio::test]
    async fn refresh_posts_grant_and_parses_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 1800,
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let before = Utc::now();
        let credential =
            identity_for(&server.uri()).refresh("old-refresh").await.expect("refreshed");

        assert_eq!(credential.access_token, "new-access");
        assert_eq!(credential.refresh_token.as_deref(), Some("new-refresh"));
        assert!(credential.expires_at >= before + ChronoDuration::seconds(1800));
    }

    #[tokio::test]
    async fn exchange_code_defaults_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "first" })),
            )
            .mount(&server)
            .await;

        let credential =
            identity_for(&server.uri()).exchange_code("auth-code").await.expect("exchanged");

        assert_eq!(credential.access_token, "first");
        assert!(credential.refresh_token.is_none());
        assert!(credential.expires_at > Utc::now() + ChronoDuration::seconds(3500));
    }

    /// Validates token endpoint failures.
    ///
    /// Assertions:
    /// - `invalid_grant` maps to `InvalidGrant`.
    /// - Other 400 bodies are rejections.
    /// - 503 is transient.
    #[tokio::test]
    async fn token_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=revoked"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70008: token expired",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=malformed"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_request",
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=later"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let identity = identity_for(&server.uri());
        assert!(matches!(
            identity.refresh("revoked").await,
            Err(MailSyncError::InvalidGrant(m)) if m.contains("AADSTS70008")
        ));
        assert!(matches!(
            identity.refresh("malformed").await,
            Err(MailSyncError::Rejected { status: 400, .. })
        ));
        assert!(matches!(identity.refresh("later").await, Err(MailSyncError::Transient(_))));
    }
}
