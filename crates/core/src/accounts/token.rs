//! Credential validation and refresh

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mailsync_common::ResiliencePolicy;
use mailsync_domain::constants::DEFAULT_TOKEN_SAFETY_WINDOW_SECS;
use mailsync_domain::{
    Account, AccountFailure, AccountStatus, Credential, MailSyncError, Result,
    TokenRefreshSummary,
};
use tracing::{debug, info, instrument, warn};

use super::ports::{AccountRepository, IdentityProvider};

/// Keeps account credentials usable
///
/// Every identity provider call runs under the `identity-provider` policy.
/// An invalid grant is never retried: the account is moved to `error` and
/// stays out of automatic sync until it is re-authorized.
pub struct TokenLifecycleManager {
    accounts: Arc<dyn AccountRepository>,
    identity: Arc<dyn IdentityProvider>,
    policy: ResiliencePolicy,
    safety_window: Duration,
}

impl TokenLifecycleManager {
    /// Manager with the default safety window; `policy` guards every call
    /// to the identity provider.
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        identity: Arc<dyn IdentityProvider>,
        policy: ResiliencePolicy,
    ) -> Self {
        Self {
            accounts,
            identity,
            policy,
            safety_window: Duration::from_secs(DEFAULT_TOKEN_SAFETY_WINDOW_SECS),
        }
    }

    /// Refresh credentials expiring within `window` instead of the default 5 minutes
    #[must_use]
    pub fn with_safety_window(mut self, window: Duration) -> Self {
        self.safety_window = window;
        self
    }

    /// Lead time before expiry at which a credential is refreshed
    pub fn safety_window(&self) -> Duration {
        self.safety_window
    }

    /// Return `account` with a credential that stays valid for at least the
    /// safety window, refreshing it first if needed.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn ensure_valid(&self, account: &Account) -> Result<Account> {
        let credential = self.require_credential(account).await?;
        if !credential.expires_within(self.safety_window, Utc::now()) {
            return Ok(account.clone());
        }
        debug!(expires_at = %credential.expires_at, "credential inside safety window, refreshing");
        self.refresh_account(account, credential).await
    }

    /// Refresh regardless of expiry. Used after the mailbox rejects a token
    /// that still looked valid.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn force_refresh(&self, account: &Account) -> Result<Account> {
        let credential = self.require_credential(account).await?;
        self.refresh_account(account, credential).await
    }

    /// Refresh every active account whose token expires within `window`.
    ///
    /// One account failing does not stop the sweep.
    #[instrument(skip(self))]
    pub async fn refresh_expiring(&self, window: Duration) -> Result<TokenRefreshSummary> {
        let horizon = Utc::now()
            + chrono::Duration::from_std(window)
                .map_err(|_| MailSyncError::Validation("refresh window too large".into()))?;
        let candidates = self.accounts.list_expiring(horizon).await?;

        let mut summary = TokenRefreshSummary { checked: candidates.len(), ..Default::default() };
        for account in candidates {
            let Some(credential) = account.credential.clone() else {
                continue;
            };
            match self.refresh_account(&account, credential).await {
                Ok(_) => summary.refreshed += 1,
                Err(err) => {
                    summary.failed += 1;
                    if err.is_fatal_for_account() {
                        summary.deactivated += 1;
                    }
                    summary
                        .failures
                        .push(AccountFailure { account_id: account.id.clone(), error: err.to_string() });
                }
            }
        }

        info!(
            checked = summary.checked,
            refreshed = summary.refreshed,
            failed = summary.failed,
            "token refresh sweep finished"
        );
        Ok(summary)
    }

    /// Authorization URL for (re-)connecting an account
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        self.identity.authorization_url(state)
    }

    /// Finish an authorization code flow for an existing account.
    ///
    /// Stores the new credential and re-activates the account if it was in
    /// `error` or `expired`.
    #[instrument(skip(self, code))]
    pub async fn complete_authorization(&self, account_id: &str, code: &str) -> Result<Account> {
        let mut account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| MailSyncError::NotFound(format!("account {account_id}")))?;

        let identity = Arc::clone(&self.identity);
        let credential = self
            .policy
            .execute(|| {
                let identity = Arc::clone(&identity);
                let code = code.to_string();
                async move { identity.exchange_code(&code).await }
            })
            .await
            .map_err(MailSyncError::from)?;

        account.credential = Some(credential);
        if matches!(account.status, AccountStatus::Error | AccountStatus::Expired) {
            account.status = AccountStatus::Active;
        }
        account.error_count = 0;
        account.last_error = None;
        account.updated_at = Utc::now();
        self.accounts.save(&account).await?;

        info!(account_id, "account authorized");
        Ok(account)
    }

    async fn require_credential(&self, account: &Account) -> Result<Credential> {
        if let Some(credential) = &account.credential {
            return Ok(credential.clone());
        }
        let err = MailSyncError::Fatal("no credential stored; authorization required".into());
        self.mark_error(account, &err).await;
        Err(err)
    }

    async fn refresh_account(&self, account: &Account, current: Credential) -> Result<Account> {
        let Some(refresh_token) = current.refresh_token.clone() else {
            let err = MailSyncError::InvalidGrant("no refresh token stored".into());
            self.mark_error(account, &err).await;
            return Err(err);
        };

        let identity = Arc::clone(&self.identity);
        let result = self
            .policy
            .execute(|| {
                let identity = Arc::clone(&identity);
                let refresh_token = refresh_token.clone();
                async move { identity.refresh(&refresh_token).await }
            })
            .await
            .map_err(MailSyncError::from);

        match result {
            Ok(mut credential) => {
                if credential.refresh_token.is_none() {
                    credential.refresh_token = Some(refresh_token);
                }
                self.accounts.update_credential(&account.id, &credential).await?;
                debug!(account_id = %account.id, expires_at = %credential.expires_at, "credential refreshed");

                let mut refreshed = account.clone();
                refreshed.credential = Some(credential);
                refreshed.error_count = 0;
                refreshed.last_error = None;
                Ok(refreshed)
            }
            Err(err) => {
                if err.is_fatal_for_account() {
                    self.mark_error(account, &err).await;
                } else {
                    warn!(account_id = %account.id, error = %err, "credential refresh failed");
                }
                Err(err)
            }
        }
    }

    async fn mark_error(&self, account: &Account, err: &MailSyncError) {
        warn!(account_id = %account.id, error = %err, "account requires re-authorization");
        if let Err(store_err) = self
            .accounts
            .record_error(&account.id, &err.to_string(), Some(AccountStatus::Error))
            .await
        {
            tracing::error!(account_id = %account.id, error = %store_err, "failed to mark account as error");
        }
    }
}
