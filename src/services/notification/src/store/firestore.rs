//! Firestore REST adapter
//!
//! Talks to the Firestore v1 REST API with `reqwest`. The conditional
//! bookkeeping write reads the deadline, compares its last-sent date and
//! commits with an `updateTime` precondition, retrying when another writer
//! touched the document in between.

use crate::auth::{google_token_provider, AccessTokenProvider, DATASTORE_SCOPE};
use crate::config::FirestoreConfig;
use crate::error::{NotifierError, Result};
use crate::store::value::{decode_fields, encode_value};
use crate::store::{
    DeadlineDocument, DeadlineStore, NotificationRecord, RecordOutcome,
};

use async_trait::async_trait;
use reqwest::StatusCode;
use scadenze_shared::{RawDeadline, RawUserProfile, UserProfile};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const USERS: &str = "users";
const DEADLINES: &str = "scadenze";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    update_time: Option<String>,
}

impl Document {
    /// Last path segment of the document name.
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(decode_fields(&self.fields))?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    document: Option<Document>,
}

/// Deadline store backed by Cloud Firestore
pub struct FirestoreStore {
    config: FirestoreConfig,
    client: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl FirestoreStore {
    pub fn new(config: &FirestoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let tokens = google_token_provider(&config.auth, &[DATASTORE_SCOPE], client.clone())?;
        info!(project = %config.project_id, database = %config.database_id, "Firestore store initialized");
        Ok(Self::with_token_provider(config, client, tokens))
    }

    pub fn with_token_provider(
        config: &FirestoreConfig,
        client: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            config: config.clone(),
            client,
            tokens,
        }
    }

    fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/{}",
            self.config.project_id, self.config.database_id
        )
    }

    /// Full resource name of a document, as used in write requests.
    fn document_name(&self, path: &str) -> String {
        format!("{}/documents/{}", self.database_path(), path)
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.database_path(),
            suffix
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.tokens.access_token().await?;
        Ok(request.bearer_auth(token).send().await?)
    }

    async fn error_from(response: reqwest::Response) -> NotifierError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        NotifierError::external_service("firestore", format!("{}: {}", status, body))
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        let response = self
            .send(self.client.get(self.url(&format!("/documents/{}", path))))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(response.json().await?)),
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Every document of a collection, following page tokens.
    async fn list_documents(&self, collection: &str, show_missing: bool) -> Result<Vec<Document>> {
        let url = self.url(&format!("/documents/{}", collection));
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", self.config.page_size.to_string())];
            if show_missing {
                query.push(("showMissing", "true".to_string()));
            }
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let response = self.send(self.client.get(&url).query(&query)).await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }
            let page: ListResponse = response.json().await?;
            debug!(collection, count = page.documents.len(), "Listed documents page");
            documents.extend(page.documents);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(documents)
    }

    async fn commit(&self, writes: Value) -> Result<StatusCode> {
        let response = self
            .send(
                self.client
                    .post(self.url("/documents:commit"))
                    .json(&json!({ "writes": writes })),
            )
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        if is_precondition_failure(status, &body) {
            return Ok(status);
        }
        Err(NotifierError::external_service(
            "firestore",
            format!("{}: {}", status, body),
        ))
    }
}

/// The document changed between the read and the commit.
fn is_precondition_failure(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && body.contains("FAILED_PRECONDITION"))
}

#[async_trait]
impl DeadlineStore for FirestoreStore {
    async fn list_user_ids(&self) -> Result<Vec<String>> {
        let documents = self.list_documents(USERS, true).await?;
        Ok(documents.iter().map(|d| d.id().to_string()).collect())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        match self.get_document(&format!("{}/{}", USERS, uid)).await? {
            Some(document) => {
                let raw: RawUserProfile = document.decode()?;
                Ok(Some(raw.migrate(uid)))
            }
            None => Ok(None),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": USERS }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "email" },
                        "op": "EQUAL",
                        "value": { "stringValue": email }
                    }
                },
                "limit": 1
            }
        });

        let response = self
            .send(self.client.post(self.url("/documents:runQuery")).json(&query))
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let results: Vec<QueryResult> = response.json().await?;
        match results.into_iter().find_map(|r| r.document) {
            Some(document) => {
                let raw: RawUserProfile = document.decode()?;
                Ok(Some(raw.migrate(document.id())))
            }
            None => Ok(None),
        }
    }

    async fn list_deadlines(&self, uid: &str) -> Result<Vec<DeadlineDocument>> {
        let documents = self
            .list_documents(&format!("{}/{}/{}", USERS, uid, DEADLINES), false)
            .await?;

        let mut deadlines = Vec::with_capacity(documents.len());
        for document in documents {
            match document.decode::<RawDeadline>() {
                Ok(data) => deadlines.push(DeadlineDocument {
                    id: document.id().to_string(),
                    owner_id: uid.to_string(),
                    data,
                }),
                Err(e) => {
                    warn!(owner = %uid, document = %document.id(), error = %e, "Unreadable deadline document skipped");
                }
            }
        }
        Ok(deadlines)
    }

    async fn record_notification(&self, record: &NotificationRecord) -> Result<RecordOutcome> {
        let path = format!(
            "{}/{}/{}/{}",
            USERS, record.owner_id, DEADLINES, record.deadline_id
        );
        let logs = record
            .logs
            .iter()
            .map(|log| serde_json::to_value(log).map(|v| encode_value(&v)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for attempt in 1..=self.config.max_commit_attempts {
            let document = self
                .get_document(&path)
                .await?
                .ok_or_else(|| NotifierError::not_found(format!("deadline {}", path)))?;

            let raw: RawDeadline = document.decode()?;
            let current = record.current_last_sent(&raw);
            if current != record.expected_last_sent {
                return Ok(RecordOutcome::Conflict { current });
            }

            let mut write = json!({
                "update": {
                    "name": self.document_name(&path),
                    "fields": {
                        "lastNotificationSent": { "stringValue": record.last_sent_value() },
                        "lastNotificationDate": { "stringValue": record.last_date_value() }
                    }
                },
                "updateMask": {
                    "fieldPaths": ["lastNotificationSent", "lastNotificationDate"]
                },
                "updateTransforms": [{
                    "fieldPath": "notificationLogs",
                    "appendMissingElements": { "values": logs }
                }]
            });
            if let Some(update_time) = &document.update_time {
                write["currentDocument"] = json!({ "updateTime": update_time });
            }

            let status = self.commit(json!([write])).await?;
            if status.is_success() {
                debug!(deadline = %record.deadline_id, attempt, "Recorded notification");
                return Ok(RecordOutcome::Recorded);
            }
            warn!(deadline = %record.deadline_id, attempt, "Deadline changed during record, retrying");
        }

        Err(NotifierError::conflict(format!(
            "deadline {} kept changing after {} attempts",
            path, self.config.max_commit_attempts
        )))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.tokens.access_token().await.is_ok())
    }
}
