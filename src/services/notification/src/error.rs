//! Error handling for the deadline notifier
//!
//! This module defines all error types that can occur in the notifier and the
//! conversions from the libraries it talks to.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for notifier operations
pub type Result<T> = std::result::Result<T, NotifierError>;

/// Main error type for the notifier
#[derive(Error, Debug)]
pub enum NotifierError {
    /// Document store errors (Firestore or in-memory)
    #[error("Store error: {message}")]
    Store { message: String },

    /// Email delivery errors
    #[error("Email error: {message}")]
    Email { message: String },

    /// Push notification errors
    #[error("Push notification error: {message}")]
    Push { message: String },

    /// Template processing errors
    #[error("Template error: {message}")]
    Template { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// OAuth2 token acquisition errors
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Not found errors
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Conflict errors (e.g., a sweep already running)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Network/connection errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// External service errors
    #[error("External service error: {service}: {message}")]
    ExternalService { service: String, message: String },

    /// Scheduler errors
    #[error("Scheduler error: {message}")]
    Scheduler { message: String },

    /// Internal service errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NotifierError {
    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            NotifierError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            NotifierError::Email { .. } => StatusCode::BAD_GATEWAY,
            NotifierError::Push { .. } => StatusCode::BAD_GATEWAY,
            NotifierError::Template { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            NotifierError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            NotifierError::Validation { .. } => StatusCode::BAD_REQUEST,
            NotifierError::Auth { .. } => StatusCode::BAD_GATEWAY,
            NotifierError::NotFound { .. } => StatusCode::NOT_FOUND,
            NotifierError::Conflict { .. } => StatusCode::CONFLICT,
            NotifierError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            NotifierError::Network { .. } => StatusCode::BAD_GATEWAY,
            NotifierError::Serialization { .. } => StatusCode::BAD_REQUEST,
            NotifierError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            NotifierError::Scheduler { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            NotifierError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            NotifierError::Store { .. } => "STORE_ERROR",
            NotifierError::Email { .. } => "EMAIL_ERROR",
            NotifierError::Push { .. } => "PUSH_ERROR",
            NotifierError::Template { .. } => "TEMPLATE_ERROR",
            NotifierError::Config { .. } => "CONFIG_ERROR",
            NotifierError::Validation { .. } => "VALIDATION_ERROR",
            NotifierError::Auth { .. } => "AUTH_ERROR",
            NotifierError::NotFound { .. } => "NOT_FOUND",
            NotifierError::Conflict { .. } => "CONFLICT",
            NotifierError::Timeout { .. } => "TIMEOUT",
            NotifierError::Network { .. } => "NETWORK_ERROR",
            NotifierError::Serialization { .. } => "SERIALIZATION_ERROR",
            NotifierError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            NotifierError::Scheduler { .. } => "SCHEDULER_ERROR",
            NotifierError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is transient
    ///
    /// Transient failures are retried by the next daily sweep; nothing retries
    /// within a run.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifierError::Store { .. } => true,
            NotifierError::Email { .. } => true,
            NotifierError::Push { .. } => true,
            NotifierError::Template { .. } => false,
            NotifierError::Config { .. } => false,
            NotifierError::Validation { .. } => false,
            NotifierError::Auth { .. } => true,
            NotifierError::NotFound { .. } => false,
            NotifierError::Conflict { .. } => false,
            NotifierError::Timeout { .. } => true,
            NotifierError::Network { .. } => true,
            NotifierError::Serialization { .. } => false,
            NotifierError::ExternalService { .. } => true,
            NotifierError::Scheduler { .. } => false,
            NotifierError::Internal { .. } => true,
        }
    }
}

impl IntoResponse for NotifierError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

// Conversion implementations for external error types

impl From<lettre::error::Error> for NotifierError {
    fn from(err: lettre::error::Error) -> Self {
        NotifierError::Email {
            message: err.to_string(),
        }
    }
}

impl From<lettre::transport::smtp::Error> for NotifierError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotifierError::Email {
            message: err.to_string(),
        }
    }
}

impl From<lettre::address::AddressError> for NotifierError {
    fn from(err: lettre::address::AddressError) -> Self {
        NotifierError::Validation {
            field: "email".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for NotifierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NotifierError::Timeout {
                operation: "HTTP request".to_string(),
            }
        } else if err.is_connect() {
            NotifierError::Network {
                message: err.to_string(),
            }
        } else {
            NotifierError::ExternalService {
                service: "HTTP".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for NotifierError {
    fn from(err: serde_json::Error) -> Self {
        NotifierError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<handlebars::RenderError> for NotifierError {
    fn from(err: handlebars::RenderError) -> Self {
        NotifierError::Template {
            message: err.to_string(),
        }
    }
}

impl From<handlebars::TemplateError> for NotifierError {
    fn from(err: handlebars::TemplateError) -> Self {
        NotifierError::Template {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for NotifierError {
    fn from(err: config::ConfigError) -> Self {
        NotifierError::Config {
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for NotifierError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        NotifierError::Auth {
            message: err.to_string(),
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for NotifierError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        NotifierError::Scheduler {
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for NotifierError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        NotifierError::Timeout {
            operation: err.to_string(),
        }
    }
}

// Utility functions for creating specific error types

impl NotifierError {
    /// Create a store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an email error
    pub fn email<S: Into<String>>(message: S) -> Self {
        Self::Email {
            message: message.into(),
        }
    }

    /// Create a push notification error
    pub fn push<S: Into<String>>(message: S) -> Self {
        Self::Push {
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template<S: Into<String>>(message: S) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S1: Into<String>, S2: Into<String>>(field: S1, message: S2) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an external service error
    pub fn external_service<S1: Into<String>, S2: Into<String>>(service: S1, message: S2) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a scheduler error
    pub fn scheduler<S: Into<String>>(message: S) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
