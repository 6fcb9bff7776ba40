//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use scadenze_notifier::{
    channels::{
        ChannelInfo, EmailTransport, MulticastReport, PushMessage, PushTransport, TokenResult,
    },
    store::{DeadlineDocument, NotificationRecord, RecordOutcome},
    templates::EmailContent,
    DeadlineStore, InMemoryStore, NotifierConfig, NotifierError, NotifierManager, RawDeadline,
    Result, UserProfile,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn deadline(kind: &str, due: &str, emails: &[&str]) -> RawDeadline {
    RawDeadline {
        kind: Some(kind.to_string()),
        due_date: Some(due.to_string()),
        emails: Some(emails.iter().map(|e| e.to_string()).collect()),
        status: Some("active".to_string()),
        ..RawDeadline::default()
    }
}

pub fn manager(
    store: Arc<dyn DeadlineStore>,
    push: Option<Arc<dyn PushTransport>>,
    email: Option<Arc<dyn EmailTransport>>,
) -> NotifierManager {
    NotifierManager::with_components(NotifierConfig::default(), store, push, email).unwrap()
}

/// Email transport that keeps every message it was asked to send.
#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<(String, EmailContent)>>,
    pub failing: HashSet<String>,
}

impl RecordingEmail {
    pub fn failing_for(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(to, _)| to.clone())
            .collect()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, content)| content.subject.clone())
            .collect()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send_email(&self, to: &str, content: &EmailContent) -> Result<()> {
        if self.failing.contains(to) {
            return Err(NotifierError::email("mailbox unavailable"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), content.clone()));
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn channel_info(&self) -> ChannelInfo {
        ChannelInfo {
            name: "email".to_string(),
            description: "recording email".to_string(),
            enabled: true,
        }
    }
}

/// Push transport that accepts only the listed tokens.
#[derive(Default)]
pub struct FakePush {
    pub accepted: HashSet<String>,
    pub sent: Mutex<Vec<(Vec<String>, PushMessage)>>,
}

impl FakePush {
    pub fn accepting(tokens: &[&str]) -> Self {
        Self {
            accepted: tokens.iter().map(|t| t.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl PushTransport for FakePush {
    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<MulticastReport> {
        self.sent
            .lock()
            .unwrap()
            .push((tokens.to_vec(), message.clone()));
        let responses = tokens
            .iter()
            .map(|token| {
                let accepted = self.accepted.contains(token);
                TokenResult {
                    token: token.clone(),
                    error: (!accepted).then(|| "UNREGISTERED".to_string()),
                    unregistered: !accepted,
                }
            })
            .collect();
        Ok(MulticastReport { responses })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn channel_info(&self) -> ChannelInfo {
        ChannelInfo {
            name: "push".to_string(),
            description: "fake push".to_string(),
            enabled: true,
        }
    }
}

/// In-memory store that can fail listing for chosen users or refuse every record.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub broken_users: HashSet<String>,
    pub refuse_records: bool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            broken_users: HashSet::new(),
            refuse_records: false,
        }
    }
}

#[async_trait]
impl DeadlineStore for FlakyStore {
    async fn list_user_ids(&self) -> Result<Vec<String>> {
        self.inner.list_user_ids().await
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        self.inner.get_user(uid).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        self.inner.find_user_by_email(email).await
    }

    async fn list_deadlines(&self, uid: &str) -> Result<Vec<DeadlineDocument>> {
        if self.broken_users.contains(uid) {
            return Err(NotifierError::store("deadline query failed"));
        }
        self.inner.list_deadlines(uid).await
    }

    async fn record_notification(&self, record: &NotificationRecord) -> Result<RecordOutcome> {
        if self.refuse_records {
            return Ok(RecordOutcome::Conflict {
                current: record.expected_last_sent,
            });
        }
        self.inner.record_notification(record).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}
