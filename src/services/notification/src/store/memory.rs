//! In-memory deadline store for local runs and tests

use crate::error::{NotifierError, Result};
use crate::store::{DeadlineDocument, DeadlineStore, NotificationRecord, RecordOutcome};

use async_trait::async_trait;
use scadenze_shared::{RawDeadline, RawUserProfile, UserProfile};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<BTreeMap<String, RawUserProfile>>,
    deadlines: RwLock<BTreeMap<(String, String), RawDeadline>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, uid: impl Into<String>, profile: RawUserProfile) {
        self.users.write().await.insert(uid.into(), profile);
    }

    pub async fn insert_deadline(
        &self,
        owner_id: impl Into<String>,
        id: impl Into<String>,
        deadline: RawDeadline,
    ) {
        self.deadlines
            .write()
            .await
            .insert((owner_id.into(), id.into()), deadline);
    }

    pub async fn deadline(&self, owner_id: &str, id: &str) -> Option<RawDeadline> {
        self.deadlines
            .read()
            .await
            .get(&(owner_id.to_string(), id.to_string()))
            .cloned()
    }

    /// Load users and deadlines from a JSON seed:
    /// `{"users": {uid: {..., "scadenze": {id: {...}}}}}`.
    pub async fn from_seed(seed: &serde_json::Value) -> Result<Self> {
        let store = Self::new();
        let users = seed
            .get("users")
            .and_then(|u| u.as_object())
            .ok_or_else(|| NotifierError::validation("seed", "missing users object"))?;

        for (uid, user) in users {
            let mut user = user.clone();
            let deadlines = user
                .as_object_mut()
                .and_then(|u| u.remove("scadenze"))
                .unwrap_or_default();
            store
                .insert_user(uid.clone(), serde_json::from_value(user)?)
                .await;

            if let Some(deadlines) = deadlines.as_object() {
                for (id, deadline) in deadlines {
                    store
                        .insert_deadline(uid.clone(), id.clone(), serde_json::from_value(deadline.clone())?)
                        .await;
                }
            }
        }
        Ok(store)
    }
}

#[async_trait]
impl DeadlineStore for InMemoryStore {
    async fn list_user_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.users.read().await.keys().cloned().collect();
        // Owners may exist only through their deadlines.
        for (owner, _) in self.deadlines.read().await.keys() {
            if !ids.contains(owner) {
                ids.push(owner.clone());
            }
        }
        Ok(ids)
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        Ok(self
            .users
            .read()
            .await
            .get(uid)
            .cloned()
            .map(|raw| raw.migrate(uid)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|(_, raw)| raw.email.as_deref() == Some(email))
            .map(|(uid, raw)| raw.clone().migrate(uid.clone())))
    }

    async fn list_deadlines(&self, uid: &str) -> Result<Vec<DeadlineDocument>> {
        Ok(self
            .deadlines
            .read()
            .await
            .iter()
            .filter(|((owner, _), _)| owner == uid)
            .map(|((owner, id), data)| DeadlineDocument {
                id: id.clone(),
                owner_id: owner.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn record_notification(&self, record: &NotificationRecord) -> Result<RecordOutcome> {
        let mut deadlines = self.deadlines.write().await;
        let key = (record.owner_id.clone(), record.deadline_id.clone());
        let stored = deadlines.get_mut(&key).ok_or_else(|| {
            NotifierError::not_found(format!(
                "deadline {}/{}",
                record.owner_id, record.deadline_id
            ))
        })?;

        let current = record.current_last_sent(stored);
        if current != record.expected_last_sent {
            debug!(deadline = %record.deadline_id, ?current, "Last-sent date moved, not recording");
            return Ok(RecordOutcome::Conflict { current });
        }

        let logs = stored.notification_logs.get_or_insert_with(Vec::new);
        for log in &record.logs {
            logs.push(serde_json::to_value(log)?);
        }
        stored.last_notification_sent = Some(record.last_sent_value());
        stored.last_notification_date = Some(record.last_date_value());
        Ok(RecordOutcome::Recorded)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
