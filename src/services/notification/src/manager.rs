//! Notifier manager
//!
//! Builds the store, the channels, the dispatcher and the sweep driver from
//! configuration and exposes the operations used by the HTTP surface and the
//! CLI.

use crate::channels::{ChannelInfo, EmailChannel, EmailTransport, FcmChannel, PushTransport};
use crate::config::NotifierConfig;
use crate::dispatcher::ChannelDispatcher;
use crate::driver::{SweepDriver, SweepOptions, SweepReport};
use crate::error::{NotifierError, Result};
use crate::metrics::NotifierMetrics;
use crate::rules::{Reminder, RuleCatalog};
use crate::scheduler::{today_in, SweepScheduler};
use crate::store::{DeadlineStore, FirestoreStore};
use crate::templates::MessageTemplates;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Health of one delivery channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealth {
    #[serde(flatten)]
    pub info: ChannelInfo,
    pub healthy: bool,
}

/// Short view of the last sweep for health output.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub run_id: String,
    pub date: NaiveDate,
    pub notified: usize,
    pub failed: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: chrono::DateTime<Utc>,
    pub store: bool,
    pub channels: Vec<ChannelHealth>,
    pub sweep_running: bool,
    pub last_sweep: Option<SweepSummary>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store
    }
}

pub struct NotifierManager {
    config: NotifierConfig,
    store: Arc<dyn DeadlineStore>,
    push: Option<Arc<dyn PushTransport>>,
    email: Option<Arc<dyn EmailTransport>>,
    driver: Arc<SweepDriver>,
    metrics: NotifierMetrics,
    timezone: Tz,
}

impl NotifierManager {
    /// Build everything from configuration, using Firestore as the store
    pub async fn new(config: NotifierConfig) -> Result<Self> {
        config.validate().map_err(NotifierError::config)?;
        let store: Arc<dyn DeadlineStore> = Arc::new(FirestoreStore::new(&config.firestore)?);
        Self::with_store(config, store)
    }

    /// Build the channels from configuration around an existing store
    pub fn with_store(config: NotifierConfig, store: Arc<dyn DeadlineStore>) -> Result<Self> {
        let push: Option<Arc<dyn PushTransport>> = if config.push.enabled {
            Some(Arc::new(FcmChannel::new(&config.push)?))
        } else {
            info!("Push channel disabled");
            None
        };

        let email: Option<Arc<dyn EmailTransport>> = if config.email.enabled {
            let client = reqwest::Client::builder()
                .timeout(config.get_timeout("email"))
                .build()?;
            Some(Arc::new(EmailChannel::new(&config.email, client)?))
        } else {
            info!("Email channel disabled");
            None
        };

        Self::with_components(config, store, push, email)
    }

    /// Assemble the manager from ready-made parts
    pub fn with_components(
        config: NotifierConfig,
        store: Arc<dyn DeadlineStore>,
        push: Option<Arc<dyn PushTransport>>,
        email: Option<Arc<dyn EmailTransport>>,
    ) -> Result<Self> {
        let timezone: Tz = config.scheduler.timezone.parse().map_err(|e| {
            NotifierError::config(format!(
                "Unknown timezone {}: {}",
                config.scheduler.timezone, e
            ))
        })?;

        let metrics = NotifierMetrics::new(&config.metrics)?;
        let templates = Arc::new(MessageTemplates::new(&config.templates)?);
        let catalog = Arc::new(RuleCatalog::from_config(&config.rules));

        let dispatcher = Arc::new(
            ChannelDispatcher::new(store.clone(), push.clone(), email.clone(), templates)
                .with_metrics(metrics.clone()),
        );
        if !dispatcher.has_push() && !dispatcher.has_email() {
            warn!("No delivery channel configured, reminders will not be delivered");
        }

        let driver = Arc::new(
            SweepDriver::new(store.clone(), catalog, dispatcher)
                .with_metrics(metrics.clone())
                .with_timezone(timezone),
        );

        info!(timezone = %timezone, "Notifier manager initialized");
        Ok(Self {
            config,
            store,
            push,
            email,
            driver,
            metrics,
            timezone,
        })
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn driver(&self) -> Arc<SweepDriver> {
        self.driver.clone()
    }

    /// Today's date in the scheduler timezone
    pub fn today(&self) -> NaiveDate {
        today_in(self.timezone)
    }

    pub fn scheduler(&self) -> Result<SweepScheduler> {
        SweepScheduler::new(&self.config.scheduler, self.driver.clone())
    }

    /// Run a sweep now, for `date` or today
    pub async fn run_sweep(
        &self,
        date: Option<NaiveDate>,
        options: SweepOptions,
    ) -> Result<SweepReport> {
        let date = date.unwrap_or_else(|| self.today());
        self.driver.run_sweep(date, options).await
    }

    /// Reminders that would fire for a user, for `date` or today
    pub async fn pending_for_user(
        &self,
        uid: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Reminder>> {
        let date = date.unwrap_or_else(|| self.today());
        self.driver.pending_for_user(uid, date).await
    }

    pub async fn last_sweep(&self) -> Option<SweepReport> {
        self.driver.last_report().await
    }

    pub fn render_metrics(&self) -> Result<String> {
        self.metrics.render()
    }

    pub async fn health(&self) -> HealthReport {
        let store = match self.store.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Store health check failed: {}", e);
                false
            }
        };

        let mut channels = Vec::new();
        if let Some(push) = &self.push {
            channels.push(ChannelHealth {
                info: push.channel_info(),
                healthy: push.health_check().await.unwrap_or(false),
            });
        }
        if let Some(email) = &self.email {
            channels.push(ChannelHealth {
                info: email.channel_info(),
                healthy: email.health_check().await.unwrap_or(false),
            });
        }

        let last_sweep = self.driver.last_report().await.map(|r| SweepSummary {
            run_id: r.run_id.to_string(),
            date: r.date,
            notified: r.notified,
            failed: r.failed,
            conflicts: r.conflicts,
        });

        HealthReport {
            status: if store { "healthy" } else { "unhealthy" },
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
            store,
            channels,
            sweep_running: self.driver.is_running(),
            last_sweep,
        }
    }
}
