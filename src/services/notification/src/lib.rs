//! # Scadenze Notifier
//!
//! Daily reminder sweep for the Scadenze deadline tracker:
//! - Walks every user's deadlines stored in Firestore
//! - Decides which deadlines are due for a reminder today
//! - Delivers reminders by push (FCM), falling back to email (SMTP)
//! - Records each delivery on the deadline with an optimistic guard
//!
//! ## Features
//!
//! - **Rule catalog**: per-object first-alert and repeat intervals with user overrides
//! - **Legacy migration**: old deadline documents are read and normalized on the fly
//! - **Channel fallback**: push first, email when no device accepted the message
//! - **Scheduling**: cron-driven sweep evaluated in the Europe/Rome calendar
//! - **Admin API**: manual sweeps, dry runs, per-user previews, health and metrics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scadenze_notifier::{NotifierConfig, NotifierService, SweepOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NotifierConfig::from_env()?;
//!     let service = NotifierService::new(config).await?;
//!
//!     let report = service.run_sweep(None, SweepOptions { dry_run: true }).await?;
//!     println!("{} deadlines would be notified", report.notified);
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod auth;
pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod manager;
pub mod metrics;
pub mod routes;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod templates;

pub use channels::{EmailTransport, PushTransport};
pub use config::NotifierConfig;
pub use dispatcher::{ChannelDispatcher, DispatchOutcome};
pub use driver::{SweepDriver, SweepOptions, SweepReport};
pub use error::{NotifierError, Result};
pub use manager::{HealthReport, NotifierManager};
pub use rules::{Decision, Reminder, RuleCatalog};
pub use store::{DeadlineStore, FirestoreStore, InMemoryStore};

// Re-export shared types for convenience
pub use scadenze_shared::types::{
    Deadline, DeadlineStatus, DeliveryChannel, NotificationLog, NotificationPreferences,
    RawDeadline, UserProfile,
};

use chrono::NaiveDate;

/// Entry point that owns the notifier manager
#[derive(Clone)]
pub struct NotifierService {
    manager: Arc<NotifierManager>,
}

impl NotifierService {
    /// Create a service backed by Firestore
    pub async fn new(config: NotifierConfig) -> Result<Self> {
        let manager = Arc::new(NotifierManager::new(config).await?);
        Ok(Self { manager })
    }

    /// Create a service around an existing store
    pub fn with_store(config: NotifierConfig, store: Arc<dyn DeadlineStore>) -> Result<Self> {
        let manager = Arc::new(NotifierManager::with_store(config, store)?);
        Ok(Self { manager })
    }

    /// Run one sweep for `date`, or for today in the configured timezone
    pub async fn run_sweep(
        &self,
        date: Option<NaiveDate>,
        options: SweepOptions,
    ) -> Result<SweepReport> {
        self.manager.run_sweep(date, options).await
    }

    /// Reminders that would fire for one user
    pub async fn pending_for_user(
        &self,
        uid: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Reminder>> {
        self.manager.pending_for_user(uid, date).await
    }

    /// HTTP router for the admin API
    pub fn router(&self) -> axum::Router {
        routes::create_router(self.manager.clone())
    }

    /// Get the notifier manager for advanced operations
    pub fn manager(&self) -> Arc<NotifierManager> {
        self.manager.clone()
    }

    pub async fn health_check(&self) -> HealthReport {
        self.manager.health().await
    }
}
