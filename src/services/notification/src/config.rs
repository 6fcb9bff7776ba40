//! Configuration module for the deadline notifier
//!
//! This module provides configuration structures and defaults for the sweep,
//! the delivery channels and the Firestore connection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Admin HTTP server configuration
    pub server: ServerConfig,

    /// Firestore connection
    pub firestore: FirestoreConfig,

    /// Email (SMTP) channel configuration
    pub email: EmailConfig,

    /// Push (FCM) channel configuration
    pub push: PushConfig,

    /// Daily sweep scheduling
    pub scheduler: SchedulerConfig,

    /// Reminder rule defaults and catalog additions
    pub rules: RulesConfig,

    /// Message templates
    pub templates: TemplateConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Log output configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
}

/// Google OAuth2 credentials shared by Firestore and FCM.
///
/// A static token wins over a service account; emulators accept the static
/// token `owner`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleAuthConfig {
    pub service_account_file: Option<String>,
    pub static_token: Option<String>,
    pub token_url: Option<String>,
}

impl GoogleAuthConfig {
    pub fn is_configured(&self) -> bool {
        self.static_token.as_deref().is_some_and(|t| !t.is_empty())
            || self
                .service_account_file
                .as_deref()
                .is_some_and(|f| !f.is_empty())
    }
}

/// Firestore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database_id: String,
    pub base_url: String,
    pub auth: GoogleAuthConfig,
    pub page_size: u32,
    pub timeout_seconds: u64,
    /// Attempts of the conditional last-sent update before giving up
    pub max_commit_attempts: u32,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_use_tls: bool,
    pub smtp_username: String,
    /// Plain password, used only when no OAuth2 refresh token is configured
    pub smtp_password: String,
    pub oauth: Option<OAuthRefreshConfig>,
    pub from_email: String,
    pub from_name: String,
    pub reply_to: Option<String>,
    pub timeout_seconds: u64,
}

/// OAuth2 refresh-token credentials for XOAUTH2 SMTP login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthRefreshConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_url: String,
}

/// Push notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub enabled: bool,
    pub project_id: String,
    pub base_url: String,
    pub auth: GoogleAuthConfig,
    pub timeout_seconds: u64,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Five-field cron expression
    pub cron: String,
    /// IANA timezone used for the trigger and for "today"
    pub timezone: String,
    pub run_on_start: bool,
}

/// Rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    pub default_first_alert_days: u32,
    pub default_repeat_days: u32,
    /// Missing after layering when the defaults carry an empty list
    #[serde(default)]
    pub catalog: Vec<CatalogEntryConfig>,
}

/// Extra rule catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntryConfig {
    pub object: String,
    pub first_alert_days: u32,
    pub repeat_days: u32,
    #[serde(default)]
    pub has_vehicle: bool,
    #[serde(default)]
    pub phrases: Vec<String>,
}

/// Template configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub email_subject: String,
    pub email_body: String,
    pub push_title: String,
    pub push_body: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            firestore: FirestoreConfig::default(),
            email: EmailConfig::default(),
            push: PushConfig::default(),
            scheduler: SchedulerConfig::default(),
            rules: RulesConfig::default(),
            templates: TemplateConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8087,
            timeout_seconds: 120,
        }
    }
}

fn default_project_id() -> String {
    std::env::var("FIRESTORE_PROJECT_ID")
        .or_else(|_| std::env::var("GOOGLE_CLOUD_PROJECT"))
        .unwrap_or_else(|_| "scadenze".to_string())
}

fn default_google_auth() -> GoogleAuthConfig {
    GoogleAuthConfig {
        service_account_file: std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok(),
        static_token: None,
        token_url: None,
    }
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        // The emulator speaks plain HTTP and accepts the "owner" token.
        let (base_url, auth) = match std::env::var("FIRESTORE_EMULATOR_HOST") {
            Ok(host) => (
                format!("http://{}/v1", host),
                GoogleAuthConfig {
                    static_token: Some("owner".to_string()),
                    ..GoogleAuthConfig::default()
                },
            ),
            Err(_) => (
                "https://firestore.googleapis.com/v1".to_string(),
                default_google_auth(),
            ),
        };

        Self {
            project_id: default_project_id(),
            database_id: "(default)".to_string(),
            base_url,
            auth,
            page_size: 300,
            timeout_seconds: 30,
            max_commit_attempts: 3,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        let oauth = match (
            std::env::var("GMAIL_CLIENT_ID"),
            std::env::var("GMAIL_CLIENT_SECRET"),
            std::env::var("GMAIL_REFRESH_TOKEN"),
        ) {
            (Ok(client_id), Ok(client_secret), Ok(refresh_token)) => Some(OAuthRefreshConfig {
                client_id,
                client_secret,
                refresh_token,
                token_url: "https://oauth2.googleapis.com/token".to_string(),
            }),
            _ => None,
        };

        Self {
            enabled: std::env::var("SMTP_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            smtp_host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            smtp_port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "465".to_string())
                .parse()
                .unwrap_or(465),
            smtp_use_tls: true,
            smtp_username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            oauth,
            from_email: std::env::var("FROM_EMAIL").unwrap_or_default(),
            from_name: std::env::var("FROM_NAME").unwrap_or_else(|_| "Scadenze".to_string()),
            reply_to: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: std::env::var("FCM_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            project_id: default_project_id(),
            base_url: "https://fcm.googleapis.com/v1".to_string(),
            auth: default_google_auth(),
            timeout_seconds: 30,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 8 * * *".to_string(),
            timezone: "Europe/Rome".to_string(),
            run_on_start: false,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            default_first_alert_days: 14,
            default_repeat_days: 7,
            catalog: Vec::new(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            email_subject: "[SCADENZA] {{subject}}".to_string(),
            email_body: concat!(
                "Gentile {{#if holder}}{{holder}}{{else}}cliente{{/if}},\n\n",
                "ti ricordiamo che {{body}}.\n\n",
                "Tipo: {{kind}}\n",
                "Scadenza: {{due_date}}\n",
                "{{#if notes}}Note: {{notes}}\n{{/if}}"
            )
            .to_string(),
            push_title: "{{subject}}".to_string(),
            push_body: "{{body}}".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "scadenze".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "scadenze_notifier=info,tower_http=info".to_string(),
        }
    }
}

impl NotifierConfig {
    /// Load configuration from environment variables and config file
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = config::Config::builder();

        // Start with default configuration
        cfg = cfg.add_source(config::Config::try_from(&NotifierConfig::default())?);

        // Add config file if it exists
        if let Ok(config_file) = std::env::var("SCADENZE_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_file).required(false));
        }

        // Environment variables win over the file
        cfg = cfg.add_source(
            config::Environment::with_prefix("SCADENZE")
                .separator("__")
                .try_parsing(true),
        );

        cfg.build()?.try_deserialize()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.firestore.project_id.trim().is_empty() {
            return Err("Firestore project id is required".to_string());
        }

        if self.firestore.max_commit_attempts == 0 {
            return Err("Firestore commit attempts must be greater than 0".to_string());
        }

        if self.scheduler.cron.trim().is_empty() {
            return Err("Scheduler cron expression is required".to_string());
        }

        if self.scheduler.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(format!(
                "Unknown scheduler timezone: {}",
                self.scheduler.timezone
            ));
        }

        if self.rules.default_first_alert_days == 0 || self.rules.default_repeat_days == 0 {
            return Err("Default rule values must be greater than 0".to_string());
        }

        for entry in &self.rules.catalog {
            if entry.first_alert_days == 0 || entry.repeat_days == 0 {
                return Err(format!(
                    "Catalog entry '{}' must have positive rule values",
                    entry.object
                ));
            }
        }

        if self.email.enabled {
            if self.email.smtp_host.is_empty() {
                return Err("SMTP host is required when email is enabled".to_string());
            }
            if self.email.from_email.is_empty() {
                return Err("From email is required when email is enabled".to_string());
            }
            if self.email.smtp_username.is_empty() {
                return Err("SMTP username is required when email is enabled".to_string());
            }
            if self.email.oauth.is_none() && self.email.smtp_password.is_empty() {
                return Err(
                    "SMTP password or OAuth2 credentials are required when email is enabled"
                        .to_string(),
                );
            }
        }

        if self.push.enabled {
            if self.push.project_id.trim().is_empty() {
                return Err("FCM project id is required when push is enabled".to_string());
            }
            if !self.push.auth.is_configured() {
                return Err("Google credentials are required when push is enabled".to_string());
            }
        }

        Ok(())
    }

    /// Get timeout duration for the specified operation
    pub fn get_timeout(&self, operation: &str) -> Duration {
        let seconds = match operation {
            "email" => self.email.timeout_seconds,
            "push" => self.push.timeout_seconds,
            "firestore" => self.firestore.timeout_seconds,
            "server" => self.server.timeout_seconds,
            _ => 30,
        };
        Duration::from_secs(seconds)
    }

    /// Check if a channel is enabled
    pub fn is_channel_enabled(&self, channel: &str) -> bool {
        match channel {
            "email" => self.email.enabled,
            "push" => self.push.enabled,
            _ => false,
        }
    }
}
