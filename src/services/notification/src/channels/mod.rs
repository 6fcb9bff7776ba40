//! Notification channels module
//!
//! This module contains the delivery transports:
//! - Push channel (Firebase Cloud Messaging HTTP v1)
//! - Email channel (SMTP, XOAUTH2 or password login)

use crate::error::Result;
use crate::templates::EmailContent;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

pub mod email;
pub mod push;

pub use email::EmailChannel;
pub use push::FcmChannel;

/// Push message sent to every device token of a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

/// Result of sending to one device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub token: String,
    pub error: Option<String>,
    /// The token is no longer registered and can be dropped from the profile
    pub unregistered: bool,
}

impl TokenResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-token outcome of a multicast send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MulticastReport {
    pub responses: Vec<TokenResult>,
}

impl MulticastReport {
    pub fn success_count(&self) -> usize {
        self.responses.iter().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.responses.len() - self.success_count()
    }

    pub fn unregistered_tokens(&self) -> Vec<String> {
        self.responses
            .iter()
            .filter(|r| r.unregistered)
            .map(|r| r.token.clone())
            .collect()
    }
}

/// Push delivery to device tokens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Send one message to every token; per-token failures are reported, not raised
    async fn send_multicast(&self, tokens: &[String], message: &PushMessage)
        -> Result<MulticastReport>;

    /// Check if the channel is ready to send
    async fn health_check(&self) -> Result<bool>;

    fn channel_info(&self) -> ChannelInfo;
}

/// Email delivery to one address
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(&self, to: &str, content: &EmailContent) -> Result<()>;

    /// Check if the channel is ready to send
    async fn health_check(&self) -> Result<bool>;

    fn channel_info(&self) -> ChannelInfo;
}

/// Information about a notification channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub description: String,
    pub enabled: bool,
}
