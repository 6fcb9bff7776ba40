//! Scheduled driver
//!
//! One sweep walks every user and every deadline, evaluates the rules,
//! dispatches reminders recipient by recipient and records each notified
//! deadline once. A failing user or deadline is logged and counted without
//! stopping the sweep; failing to list users aborts it.

use crate::dispatcher::{ChannelDispatcher, Delivery};
use crate::error::{NotifierError, Result};
use crate::logger::NotificationLogger;
use crate::metrics::NotifierMetrics;
use crate::rules::{evaluate, pending_reminders, Decision, Reminder, RuleCatalog};
use crate::store::{DeadlineDocument, DeadlineStore, RecordOutcome};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use scadenze_shared::{Deadline, NotificationPreferences, DEFAULT_CALENDAR_TZ};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOptions {
    /// Evaluate and report without dispatching or recording
    pub dry_run: bool,
}

/// A deadline that fired during the sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepNotification {
    pub owner_id: String,
    pub deadline_id: String,
    pub subject: String,
    pub days_left: i64,
    pub deliveries: Vec<Delivery>,
    pub recorded: bool,
}

/// Counters and details of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub users: usize,
    pub evaluated: usize,
    /// Deadlines recorded as notified (would fire, on a dry run)
    pub notified: usize,
    /// Deadlines that fired but reached no recipient
    pub undelivered: usize,
    pub waiting: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub notifications: Vec<SweepNotification>,
}

impl SweepReport {
    fn new(date: NaiveDate, options: SweepOptions) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            date,
            dry_run: options.dry_run,
            started_at: Utc::now(),
            finished_at: None,
            users: 0,
            evaluated: 0,
            notified: 0,
            undelivered: 0,
            waiting: 0,
            skipped: 0,
            failed: 0,
            conflicts: 0,
            notifications: Vec::new(),
        }
    }
}

/// Clears the running flag when the sweep ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SweepDriver {
    store: Arc<dyn DeadlineStore>,
    catalog: Arc<RuleCatalog>,
    dispatcher: Arc<ChannelDispatcher>,
    logger: NotificationLogger,
    metrics: Option<NotifierMetrics>,
    timezone: Tz,
    running: AtomicBool,
    last_report: RwLock<Option<SweepReport>>,
}

impl SweepDriver {
    pub fn new(
        store: Arc<dyn DeadlineStore>,
        catalog: Arc<RuleCatalog>,
        dispatcher: Arc<ChannelDispatcher>,
    ) -> Self {
        Self {
            logger: NotificationLogger::new(store.clone()),
            store,
            catalog,
            dispatcher,
            metrics: None,
            timezone: DEFAULT_CALENDAR_TZ,
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: NotifierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Calendar used to read stored dates and to record sends
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self.logger = self.logger.with_timezone(timezone);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }

    /// Run one sweep for `today`. Fails fast when another sweep is in progress.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self, today: NaiveDate, options: SweepOptions) -> Result<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NotifierError::conflict("A sweep is already running"));
        }
        let _guard = RunGuard(&self.running);

        let started = Instant::now();
        let mut report = SweepReport::new(today, options);
        info!(run_id = %report.run_id, dry_run = options.dry_run, "Sweep started");

        let user_ids = match self.store.list_user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(run_id = %report.run_id, error = %e, "Cannot list users, sweep aborted");
                self.observe("failed", started);
                return Err(e);
            }
        };

        for uid in &user_ids {
            report.users += 1;
            if let Err(e) = self.process_user(uid, today, options, &mut report).await {
                report.failed += 1;
                error!(
                    run_id = %report.run_id,
                    owner = %uid,
                    error = %e,
                    retryable = e.is_retryable(),
                    "User processing failed"
                );
            }
        }

        report.finished_at = Some(Utc::now());
        self.observe("completed", started);
        info!(
            run_id = %report.run_id,
            users = report.users,
            evaluated = report.evaluated,
            notified = report.notified,
            undelivered = report.undelivered,
            waiting = report.waiting,
            skipped = report.skipped,
            failed = report.failed,
            conflicts = report.conflicts,
            "Sweep finished"
        );

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    fn observe(&self, result: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(result, started.elapsed().as_secs_f64());
        }
    }

    async fn process_user(
        &self,
        uid: &str,
        today: NaiveDate,
        options: SweepOptions,
        report: &mut SweepReport,
    ) -> Result<()> {
        let preferences = self
            .store
            .get_user(uid)
            .await?
            .map(|profile| profile.preferences)
            .unwrap_or_default();
        let documents = self.store.list_deadlines(uid).await?;
        debug!(owner = %uid, deadlines = documents.len(), "Evaluating user");

        for document in documents {
            let deadline_id = document.id.clone();
            if let Err(e) = self
                .process_deadline(document, today, &preferences, options, report)
                .await
            {
                report.failed += 1;
                error!(owner = %uid, deadline = %deadline_id, error = %e, "Deadline processing failed");
            }
        }
        Ok(())
    }

    async fn process_deadline(
        &self,
        document: DeadlineDocument,
        today: NaiveDate,
        owner: &NotificationPreferences,
        options: SweepOptions,
        report: &mut SweepReport,
    ) -> Result<()> {
        report.evaluated += 1;
        let decision = match document.data.migrate(document.id, document.owner_id, self.timezone) {
            Ok(deadline) => evaluate(today, &deadline, &self.catalog),
            Err(reason) => Decision::Skip(reason),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(decision.label());
        }

        let reminder = match decision {
            Decision::Notify(reminder) => reminder,
            Decision::Wait(reason) => {
                report.waiting += 1;
                debug!(?reason, "Deadline not due for a reminder");
                return Ok(());
            }
            Decision::Skip(reason) => {
                report.skipped += 1;
                debug!(%reason, "Deadline skipped");
                return Ok(());
            }
        };

        if options.dry_run {
            report.notified += 1;
            report.notifications.push(SweepNotification {
                owner_id: reminder.owner_id.clone(),
                deadline_id: reminder.deadline_id.clone(),
                subject: reminder.subject.clone(),
                days_left: reminder.days_left,
                deliveries: Vec::new(),
                recorded: false,
            });
            return Ok(());
        }

        let deliveries = self.deliver(&reminder, owner).await;
        let outcome = self
            .logger
            .record(&reminder, &deliveries, Utc::now(), today)
            .await?;

        let recorded = match outcome {
            Some(RecordOutcome::Recorded) => {
                report.notified += 1;
                true
            }
            Some(RecordOutcome::Conflict { .. }) => {
                report.conflicts += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_conflict();
                }
                false
            }
            None => {
                report.undelivered += 1;
                warn!(
                    owner = %reminder.owner_id,
                    deadline = %reminder.deadline_id,
                    "No recipient reached, will retry on the next run"
                );
                false
            }
        };

        report.notifications.push(SweepNotification {
            owner_id: reminder.owner_id,
            deadline_id: reminder.deadline_id,
            subject: reminder.subject,
            days_left: reminder.days_left,
            deliveries,
            recorded,
        });
        Ok(())
    }

    /// Dispatch to every recipient in order.
    async fn deliver(&self, reminder: &Reminder, owner: &NotificationPreferences) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(reminder.recipients.len());
        for recipient in &reminder.recipients {
            let outcome = self.dispatcher.dispatch(recipient, reminder, owner).await;
            deliveries.push(Delivery {
                recipient: recipient.clone(),
                outcome,
            });
        }
        deliveries
    }

    /// Reminders that would fire for one user on `today`, without side effects.
    pub async fn pending_for_user(&self, uid: &str, today: NaiveDate) -> Result<Vec<Reminder>> {
        let deadlines: Vec<Deadline> = self
            .store
            .list_deadlines(uid)
            .await?
            .into_iter()
            .filter_map(|d| d.data.migrate(d.id, d.owner_id, self.timezone).ok())
            .collect();
        Ok(pending_reminders(today, &deadlines, &self.catalog))
    }
}
