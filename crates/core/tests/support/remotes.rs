//! Scripted fakes for the identity provider, the mailbox and the sink

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mailsync_core::{IdentityProvider, MailboxApi, SinkApi, SinkResponse};
use mailsync_domain::{Credential, DeltaBatch, MailSyncError, Result as DomainResult};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Credential valid for one hour
pub fn fresh_credential(tag: &str) -> Credential {
    Credential {
        access_token: format!("access-{tag}"),
        refresh_token: Some(format!("refresh-{tag}")),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

/// Identity provider answering per refresh token.
///
/// Unknown tokens get a fresh credential; scripted ones get the scripted
/// result every time.
#[derive(Default, Clone)]
pub struct FakeIdentity {
    scripted: Arc<Mutex<HashMap<String, MailSyncError>>>,
    refresh_calls: Arc<AtomicU32>,
}

impl FakeIdentity {
    pub fn fail_refresh(&self, refresh_token: &str, error: MailSyncError) {
        self.scripted.lock().insert(refresh_token.to_string(), error);
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn authorization_url(&self, state: &str) -> DomainResult<String> {
        Ok(format!("https://login.example.com/authorize?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> DomainResult<Credential> {
        if code == "bad-code" {
            return Err(MailSyncError::InvalidGrant("code expired".into()));
        }
        Ok(fresh_credential(code))
    }

    async fn refresh(&self, refresh_token: &str) -> DomainResult<Credential> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.scripted.lock().get(refresh_token) {
            return Err(error.clone());
        }
        Ok(Credential {
            access_token: format!("refreshed-{refresh_token}"),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// Mailbox returning queued responses per mailbox address.
///
/// An empty queue answers with no changes and the last cursor seen.
#[derive(Default, Clone)]
pub struct FakeMailbox {
    queued: Arc<Mutex<HashMap<String, VecDeque<DomainResult<DeltaBatch>>>>>,
    calls: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
}

impl FakeMailbox {
    pub fn push(&self, mailbox: &str, response: DomainResult<DeltaBatch>) {
        self.queued.lock().entry(mailbox.to_string()).or_default().push_back(response);
    }

    /// `(mailbox, access_token, cursor)` per call
    pub fn calls(&self) -> Vec<(String, String, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MailboxApi for FakeMailbox {
    async fn fetch_delta(
        &self,
        mailbox: &str,
        access_token: &str,
        cursor: Option<&str>,
    ) -> DomainResult<DeltaBatch> {
        self.calls.lock().push((
            mailbox.to_string(),
            access_token.to_string(),
            cursor.map(str::to_string),
        ));
        let next = self.queued.lock().get_mut(mailbox).and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| {
            Ok(DeltaBatch { changes: Vec::new(), next_cursor: cursor.map(str::to_string) })
        })
    }
}

/// Signals that a held send started, and releases it.
type SendGate = (oneshot::Sender<()>, oneshot::Receiver<()>);

/// Sink returning queued responses, then 200.
#[derive(Default, Clone)]
pub struct FakeSink {
    queued: Arc<Mutex<VecDeque<DomainResult<SinkResponse>>>>,
    sent: Arc<Mutex<Vec<String>>>,
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
    gate: Arc<Mutex<Option<SendGate>>>,
}

impl FakeSink {
    pub fn push(&self, response: DomainResult<SinkResponse>) {
        self.queued.lock().push_back(response);
    }

    pub fn push_status(&self, status: u16, times: usize) {
        for _ in 0..times {
            self.push(Ok(SinkResponse::new(status, "")));
        }
    }

    /// Idempotency keys of every send, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Bodies of every send, in order
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().clone()
    }

    /// Park the next send until the returned sender fires. The receiver
    /// resolves once that send has started.
    pub fn hold_next_send(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock() = Some((started_tx, release_rx));
        (started_rx, release_tx)
    }
}

#[async_trait]
impl SinkApi for FakeSink {
    async fn send(
        &self,
        payload: &serde_json::Value,
        _endpoint: Option<&str>,
        idempotency_key: &str,
    ) -> DomainResult<SinkResponse> {
        self.sent.lock().push(idempotency_key.to_string());
        self.payloads.lock().push(payload.clone());
        let gate = self.gate.lock().take();
        if let Some((started, release)) = gate {
            let _ = started.send(());
            let _ = release.await;
        }
        let next = self.queued.lock().pop_front();
        next.unwrap_or_else(|| Ok(SinkResponse::new(200, "{\"ok\":true}")))
    }
}
