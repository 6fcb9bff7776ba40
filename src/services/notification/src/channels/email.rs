//! Email notification channel implementation using SMTP

use crate::auth::{AccessTokenProvider, RefreshTokenProvider};
use crate::channels::{ChannelInfo, EmailTransport};
use crate::config::EmailConfig;
use crate::error::{NotifierError, Result};
use crate::templates::EmailContent;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        PoolConfig,
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type SmtpTransport = AsyncSmtpTransport<Tokio1Executor>;

/// How the channel logs in to the SMTP server.
#[derive(Clone)]
enum SmtpLogin {
    /// Pooled transport built once with a fixed password
    Password(SmtpTransport),
    /// XOAUTH2 with a short-lived access token, so the transport is rebuilt per send
    OAuth(Arc<dyn AccessTokenProvider>),
}

/// Email channel for sending reminders via SMTP
#[derive(Clone)]
pub struct EmailChannel {
    config: EmailConfig,
    login: SmtpLogin,
    from_mailbox: Mailbox,
}

impl EmailChannel {
    /// Create a new email channel with the given configuration
    pub fn new(config: &EmailConfig, client: reqwest::Client) -> Result<Self> {
        let tokens = config.oauth.clone().map(|oauth| {
            Arc::new(RefreshTokenProvider::new(oauth, client)) as Arc<dyn AccessTokenProvider>
        });
        Self::with_token_provider(config, tokens)
    }

    pub fn with_token_provider(
        config: &EmailConfig,
        tokens: Option<Arc<dyn AccessTokenProvider>>,
    ) -> Result<Self> {
        info!("Initializing email channel");

        let from_mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| NotifierError::config(format!("Invalid from email address: {}", e)))?;

        let login = match tokens {
            Some(tokens) => SmtpLogin::OAuth(tokens),
            None => {
                let creds =
                    Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
                let transport = Self::transport_builder(config)?
                    .credentials(creds)
                    .pool_config(PoolConfig::new().max_size(4).min_idle(0))
                    .build();
                SmtpLogin::Password(transport)
            }
        };

        info!(host = %config.smtp_host, port = config.smtp_port, "Email channel initialized successfully");

        Ok(Self {
            config: config.clone(),
            login,
            from_mailbox,
        })
    }

    fn transport_builder(
        config: &EmailConfig,
    ) -> Result<lettre::transport::smtp::AsyncSmtpTransportBuilder> {
        // Port 465 wraps the whole session in TLS; other TLS ports upgrade with STARTTLS.
        let builder = if !config.smtp_use_tls {
            SmtpTransport::builder_dangerous(&config.smtp_host)
        } else if config.smtp_port == 465 {
            SmtpTransport::relay(&config.smtp_host)
                .map_err(|e| NotifierError::config(format!("Failed to create SMTP relay: {}", e)))?
        } else {
            SmtpTransport::starttls_relay(&config.smtp_host)
                .map_err(|e| NotifierError::config(format!("Failed to create SMTP relay: {}", e)))?
        };

        Ok(builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds))))
    }

    async fn transport(&self) -> Result<SmtpTransport> {
        match &self.login {
            SmtpLogin::Password(transport) => Ok(transport.clone()),
            SmtpLogin::OAuth(tokens) => {
                let access_token = tokens.access_token().await?;
                debug!("Building XOAUTH2 SMTP transport");
                Ok(Self::transport_builder(&self.config)?
                    .credentials(Credentials::new(
                        self.config.smtp_username.clone(),
                        access_token,
                    ))
                    .authentication(vec![Mechanism::Xoauth2])
                    .build())
            }
        }
    }

    /// Build a plain-text email message for one recipient
    fn build_message(&self, content: &EmailContent, recipient_email: &str) -> Result<Message> {
        let to_mailbox = recipient_email
            .parse::<Mailbox>()
            .map_err(|e| NotifierError::email(format!("Invalid recipient email: {}", e)))?;

        let mut message_builder = Message::builder()
            .from(self.from_mailbox.clone())
            .to(to_mailbox)
            .subject(content.subject.as_str());

        if let Some(ref reply_to) = self.config.reply_to {
            let reply_to_mailbox = reply_to
                .parse::<Mailbox>()
                .map_err(|e| NotifierError::email(format!("Invalid reply-to email: {}", e)))?;
            message_builder = message_builder.reply_to(reply_to_mailbox);
        }

        message_builder
            .header(ContentType::TEXT_PLAIN)
            .body(content.body.clone())
            .map_err(|e| NotifierError::email(format!("Failed to build email message: {}", e)))
    }
}

#[async_trait]
impl EmailTransport for EmailChannel {
    async fn send_email(&self, to: &str, content: &EmailContent) -> Result<()> {
        let message = self.build_message(content, to)?;
        let transport = self.transport().await?;

        match transport.send(message).await {
            Ok(_response) => {
                info!(recipient = %to, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                error!(recipient = %to, error = %e, "Failed to send email");
                Err(NotifierError::email(format!("SMTP error: {}", e)))
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let transport = match self.transport().await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Email channel health check failed: {}", e);
                return Ok(false);
            }
        };

        match transport.test_connection().await {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!("Email channel health check failed: not connected");
                Ok(false)
            }
            Err(e) => {
                error!("Email channel health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn channel_info(&self) -> ChannelInfo {
        let description = match self.login {
            SmtpLogin::Password(_) => "SMTP email (password login)",
            SmtpLogin::OAuth(_) => "SMTP email (XOAUTH2)",
        };
        ChannelInfo {
            name: "Email".to_string(),
            description: description.to_string(),
            enabled: self.config.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthRefreshConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config() -> EmailConfig {
        EmailConfig {
            enabled: true,
            smtp_host: "localhost".to_string(),
            smtp_port: 2525,
            smtp_use_tls: false,
            smtp_username: "noreply@example.com".to_string(),
            smtp_password: "secret".to_string(),
            oauth: None,
            from_email: "noreply@example.com".to_string(),
            from_name: "Scadenze".to_string(),
            reply_to: Some("support@example.com".to_string()),
            timeout_seconds: 5,
        }
    }

    fn create_test_content() -> EmailContent {
        EmailContent {
            subject: "[SCADENZA] Il Bollo AB123CD".to_string(),
            body: "ti ricordiamo che il bollo e in scadenza".to_string(),
        }
    }

    #[tokio::test]
    async fn test_email_channel_creation() {
        let channel = EmailChannel::new(&create_test_config(), reqwest::Client::new());
        assert!(channel.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_from_address() {
        let mut config = create_test_config();
        config.from_email = "not an address".to_string();
        assert!(matches!(
            EmailChannel::new(&config, reqwest::Client::new()),
            Err(NotifierError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_message() {
        let channel = EmailChannel::new(&create_test_config(), reqwest::Client::new()).unwrap();
        let message = channel
            .build_message(&create_test_content(), "mario@example.com")
            .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [SCADENZA] Il Bollo AB123CD"));
        assert!(raw.contains("To: mario@example.com"));
        assert!(raw.contains("Reply-To: support@example.com"));
    }

    #[tokio::test]
    async fn test_invalid_recipient() {
        let channel = EmailChannel::new(&create_test_config(), reqwest::Client::new()).unwrap();
        let result = channel.build_message(&create_test_content(), "manual");
        assert!(matches!(result, Err(NotifierError::Email { .. })));
    }

    #[tokio::test]
    async fn test_oauth_transport_fetches_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.smtp",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = create_test_config();
        config.oauth = Some(OAuthRefreshConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
            token_url: format!("{}/token", server.uri()),
        });

        let channel = EmailChannel::new(&config, reqwest::Client::new()).unwrap();
        assert!(channel.transport().await.is_ok());
        assert_eq!(channel.channel_info().description, "SMTP email (XOAUTH2)");
    }

    #[tokio::test]
    async fn test_channel_info() {
        let channel = EmailChannel::new(&create_test_config(), reqwest::Client::new()).unwrap();
        let info = channel.channel_info();
        assert_eq!(info.name, "Email");
        assert!(info.enabled);
    }
}
