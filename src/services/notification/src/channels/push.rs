//! Push notification channel implementation using FCM HTTP v1

use crate::auth::{google_token_provider, AccessTokenProvider, FIREBASE_MESSAGING_SCOPE};
use crate::channels::{ChannelInfo, MulticastReport, PushMessage, PushTransport, TokenResult};
use crate::config::PushConfig;
use crate::error::{NotifierError, Result};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// FCM channel sending one request per device token
#[derive(Clone)]
pub struct FcmChannel {
    config: PushConfig,
    client: reqwest::Client,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl FcmChannel {
    /// Create a new push channel with the given configuration
    pub fn new(config: &PushConfig) -> Result<Self> {
        info!("Initializing push channel");

        if !config.enabled {
            return Err(NotifierError::config("Push channel is disabled"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let tokens = google_token_provider(&config.auth, &[FIREBASE_MESSAGING_SCOPE], client.clone())?;

        info!(project = %config.project_id, "Push channel initialized successfully");
        Ok(Self::with_token_provider(config, client, tokens))
    }

    pub fn with_token_provider(
        config: &PushConfig,
        client: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            config: config.clone(),
            client,
            tokens,
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/projects/{}/messages:send",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id
        )
    }

    async fn send_one(&self, bearer: &str, token: &str, message: &PushMessage) -> TokenResult {
        let payload = json!({
            "message": {
                "token": token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
            }
        });

        let response = match self
            .client
            .post(self.send_url())
            .bearer_auth(bearer)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return TokenResult {
                    token: token.to_string(),
                    error: Some(e.to_string()),
                    unregistered: false,
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(token = %mask(token), "FCM accepted message");
            return TokenResult {
                token: token.to_string(),
                error: None,
                unregistered: false,
            };
        }

        let body = response.text().await.unwrap_or_default();
        let unregistered = status == reqwest::StatusCode::NOT_FOUND
            || body.contains("UNREGISTERED")
            || body.contains("registration-token-not-registered");
        TokenResult {
            token: token.to_string(),
            error: Some(format!("FCM returned {}: {}", status, body)),
            unregistered,
        }
    }
}

/// Shorten a device token for logs.
fn mask(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    format!("{}…", head)
}

#[async_trait]
impl PushTransport for FcmChannel {
    async fn send_multicast(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<MulticastReport> {
        if tokens.is_empty() {
            return Err(NotifierError::push("No device tokens for recipient"));
        }

        let bearer = self.tokens.access_token().await?;
        let responses = join_all(
            tokens
                .iter()
                .map(|token| self.send_one(&bearer, token, message)),
        )
        .await;

        let report = MulticastReport { responses };
        if report.failure_count() > 0 {
            warn!(
                success = report.success_count(),
                failure = report.failure_count(),
                "Push multicast partially failed"
            );
        }
        Ok(report)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.tokens.access_token().await.is_ok())
    }

    fn channel_info(&self) -> ChannelInfo {
        ChannelInfo {
            name: "Push".to_string(),
            description: "Firebase Cloud Messaging".to_string(),
            enabled: self.config.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::config::GoogleAuthConfig;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(base_url: String) -> PushConfig {
        PushConfig {
            enabled: true,
            project_id: "scadenze-test".to_string(),
            base_url,
            auth: GoogleAuthConfig::default(),
            timeout_seconds: 5,
        }
    }

    fn create_test_message() -> PushMessage {
        PushMessage {
            title: "Il Bollo AB123CD".to_string(),
            body: "Il bollo dell'auto targata AB123CD e in scadenza con data 05/03/2025"
                .to_string(),
            data: HashMap::from([
                ("scadenzaId".to_string(), "d1".to_string()),
                ("ownerId".to_string(), "u1".to_string()),
            ]),
        }
    }

    fn channel(server: &MockServer) -> FcmChannel {
        FcmChannel::with_token_provider(
            &create_test_config(server.uri()),
            reqwest::Client::new(),
            Arc::new(StaticTokenProvider::new("test-token")),
        )
    }

    #[tokio::test]
    async fn test_multicast_counts_per_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/scadenze-test/messages:send"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({"message": {"token": "good"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/scadenze-test/messages/1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"message": {"token": "stale"}})))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"status": "NOT_FOUND", "details": [{"errorCode": "UNREGISTERED"}]}
            })))
            .mount(&server)
            .await;

        let report = channel(&server)
            .send_multicast(
                &["good".to_string(), "stale".to_string()],
                &create_test_message(),
            )
            .await
            .unwrap();

        assert_eq!(report.success_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.unregistered_tokens(), vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn test_payload_carries_deadline_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "message": {
                    "notification": {"title": "Il Bollo AB123CD"},
                    "data": {"scadenzaId": "d1", "ownerId": "u1"}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "m"})))
            .expect(1)
            .mount(&server)
            .await;

        let report = channel(&server)
            .send_multicast(&["t1".to_string()], &create_test_message())
            .await
            .unwrap();
        assert_eq!(report.success_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_token_list_is_error() {
        let server = MockServer::start().await;
        let result = channel(&server)
            .send_multicast(&[], &create_test_message())
            .await;
        assert!(matches!(result, Err(NotifierError::Push { .. })));
    }

    #[test]
    fn test_disabled_channel_is_rejected() {
        let mut config = create_test_config("http://localhost".to_string());
        config.enabled = false;
        assert!(FcmChannel::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_channel_info() {
        let server = MockServer::start().await;
        let info = channel(&server).channel_info();
        assert_eq!(info.name, "Push");
        assert!(info.enabled);
    }
}
