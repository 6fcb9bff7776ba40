//! OAuth2 access tokens for Google APIs
//!
//! Firestore and FCM authenticate with a service account (signed JWT bearer
//! grant). Gmail SMTP uses a refresh-token grant. Tokens are cached until
//! shortly before they expire.

use crate::config::{GoogleAuthConfig, OAuthRefreshConfig};
use crate::error::{NotifierError, Result};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
pub const FIREBASE_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Tokens are refreshed this long before their stated expiry.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// Source of bearer tokens for outbound API calls
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, for emulators and tests
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Token cache shared by the grant implementations.
#[derive(Debug, Default)]
struct TokenCache {
    inner: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    async fn get(&self) -> Option<String> {
        let guard = self.inner.read().await;
        guard
            .as_ref()
            .filter(|t| t.expires_at > Utc::now())
            .map(|t| t.value.clone())
    }

    async fn put(&self, response: &TokenResponse) {
        let lifetime = (response.expires_in - EXPIRY_MARGIN_SECONDS).max(0);
        *self.inner.write().await = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(lifetime),
        });
    }
}

async fn exchange(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = client.post(token_url).form(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NotifierError::auth(format!(
            "Token endpoint returned {}: {}",
            status, body
        )));
    }
    Ok(response.json::<TokenResponse>().await?)
}

// ============================================================================
// Service account (JWT bearer grant)
// ============================================================================

/// Fields of a Google service account key file that the grant needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    token_url: String,
    client: reqwest::Client,
    cache: TokenCache,
}

impl ServiceAccountTokenProvider {
    pub fn new(
        key: ServiceAccountKey,
        scopes: &[&str],
        token_url: Option<String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let token_url = token_url
            .or_else(|| key.token_uri.clone())
            .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string());

        Ok(Self {
            key,
            encoding_key,
            scope: scopes.join(" "),
            token_url,
            client,
            cache: TokenCache::default(),
        })
    }

    pub fn from_file(
        path: &str,
        scopes: &[&str],
        token_url: Option<String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NotifierError::config(format!("Cannot read service account file {}: {}", path, e))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)?;
        Self::new(key, scopes, token_url, client)
    }

    fn assertion(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.token_url,
            iat: now,
            exp: now + 3600,
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )?)
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cache.get().await {
            return Ok(token);
        }

        debug!(account = %self.key.client_email, "Requesting service account token");
        let assertion = self.assertion()?;
        let response = exchange(
            &self.client,
            &self.token_url,
            &[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &assertion),
            ],
        )
        .await?;
        self.cache.put(&response).await;
        Ok(response.access_token)
    }
}

// ============================================================================
// Refresh token grant
// ============================================================================

pub struct RefreshTokenProvider {
    config: OAuthRefreshConfig,
    client: reqwest::Client,
    cache: TokenCache,
}

impl RefreshTokenProvider {
    pub fn new(config: OAuthRefreshConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for RefreshTokenProvider {
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cache.get().await {
            return Ok(token);
        }

        debug!("Refreshing OAuth2 access token");
        let response = exchange(
            &self.client,
            &self.config.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("refresh_token", &self.config.refresh_token),
            ],
        )
        .await?;
        self.cache.put(&response).await;
        Ok(response.access_token)
    }
}

/// Build the token provider described by a Google auth configuration.
pub fn google_token_provider(
    config: &GoogleAuthConfig,
    scopes: &[&str],
    client: reqwest::Client,
) -> Result<Arc<dyn AccessTokenProvider>> {
    if let Some(token) = config.static_token.as_deref().filter(|t| !t.is_empty()) {
        info!("Using static access token");
        return Ok(Arc::new(StaticTokenProvider::new(token)));
    }

    match config.service_account_file.as_deref().filter(|f| !f.is_empty()) {
        Some(path) => Ok(Arc::new(ServiceAccountTokenProvider::from_file(
            path,
            scopes,
            config.token_url.clone(),
            client,
        )?)),
        None => Err(NotifierError::config(
            "No Google credentials configured (service_account_file or static_token)",
        )),
    }
}
