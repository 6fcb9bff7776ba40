//! Sweep scheduler
//!
//! Runs the daily sweep from a cron expression evaluated on the wall clock of
//! the configured timezone. The job scheduler itself ticks in UTC once a
//! minute; each tick checks the local schedule, so "08:00" stays 08:00 in
//! Rome across daylight saving changes. "Today" for each run is the calendar
//! date in that timezone.

use crate::config::SchedulerConfig;
use crate::driver::{SweepDriver, SweepOptions};
use crate::error::{NotifierError, Result};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

/// UTC tick of the underlying job, every minute on the minute.
const TICK: &str = "0 * * * * *";
const TICK_SECONDS: i64 = 60;

/// Current calendar date in `tz`.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// The cron parser wants a seconds field in front of the usual five.
pub fn with_seconds_field(cron: &str) -> String {
    let cron = cron.trim();
    if cron.split_whitespace().count() == 5 {
        format!("0 {}", cron)
    } else {
        cron.to_string()
    }
}

/// A cron schedule read on the local clock of a timezone.
#[derive(Debug, Clone)]
pub struct LocalSchedule {
    schedule: Schedule,
    timezone: Tz,
}

impl LocalSchedule {
    pub fn parse(cron: &str, timezone: Tz) -> Result<Self> {
        let schedule = Schedule::from_str(&with_seconds_field(cron)).map_err(|e| {
            NotifierError::scheduler(format!("Invalid cron expression '{}': {}", cron, e))
        })?;
        Ok(Self { schedule, timezone })
    }

    /// First trigger strictly after `after`, as a UTC instant
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|local| local.with_timezone(&Utc))
    }

    /// Whether a trigger falls in the tick window ending at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_after(now - Duration::seconds(TICK_SECONDS))
            .is_some_and(|next| next <= now)
    }
}

/// Run a sweep for today and log the result; overlapping triggers are skipped.
pub async fn run_scheduled_sweep(driver: &SweepDriver, tz: Tz, options: SweepOptions) {
    let today = today_in(tz);
    match driver.run_sweep(today, options).await {
        Ok(report) => info!(
            run_id = %report.run_id,
            date = %report.date,
            notified = report.notified,
            failed = report.failed,
            "Scheduled sweep completed"
        ),
        Err(NotifierError::Conflict { message }) => {
            warn!(date = %today, "Scheduled sweep skipped: {}", message)
        }
        Err(e) => error!(date = %today, error = %e, "Scheduled sweep failed"),
    }
}

/// Cron-driven trigger for the sweep driver
#[derive(Clone)]
pub struct SweepScheduler {
    config: SchedulerConfig,
    timezone: Tz,
    options: SweepOptions,
    driver: Arc<SweepDriver>,
    scheduler: Arc<RwLock<Option<JobScheduler>>>,
    is_running: Arc<RwLock<bool>>,
}

impl SweepScheduler {
    pub fn new(config: &SchedulerConfig, driver: Arc<SweepDriver>) -> Result<Self> {
        let timezone: Tz = config.timezone.parse().map_err(|e| {
            NotifierError::config(format!("Unknown timezone {}: {}", config.timezone, e))
        })?;

        Ok(Self {
            config: config.clone(),
            timezone,
            options: SweepOptions::default(),
            driver,
            scheduler: Arc::new(RwLock::new(None)),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    pub fn with_options(mut self, options: SweepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Register the cron job and start ticking
    pub async fn start(&self) -> Result<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(NotifierError::scheduler("Scheduler is already running"));
        }

        if !self.config.enabled {
            info!("Scheduler disabled, sweeps run only on demand");
            return Ok(());
        }

        let schedule = LocalSchedule::parse(&self.config.cron, self.timezone)?;
        let next_run = schedule.next_after(Utc::now());
        let driver = self.driver.clone();
        let tz = self.timezone;
        let options = self.options;
        let job = Job::new_async(TICK, move |_id, _scheduler| {
            let driver = driver.clone();
            let schedule = schedule.clone();
            Box::pin(async move {
                let now = Utc::now();
                if schedule.is_due(now) {
                    run_scheduled_sweep(&driver, tz, options).await;
                } else {
                    debug!(%now, "No sweep due at this tick");
                }
            })
        })?;

        let scheduler = JobScheduler::new().await?;
        scheduler.add(job).await?;
        scheduler.start().await?;
        *self.scheduler.write().await = Some(scheduler);
        *is_running = true;

        info!(
            cron = %self.config.cron,
            timezone = %self.timezone,
            next_run = ?next_run,
            "Sweep scheduler started"
        );

        if self.config.run_on_start {
            let driver = self.driver.clone();
            let options = self.options;
            tokio::spawn(async move {
                run_scheduled_sweep(&driver, tz, options).await;
            });
        }

        Ok(())
    }

    /// Stop the cron job
    pub async fn stop(&self) -> Result<()> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(());
        }

        if let Some(mut scheduler) = self.scheduler.write().await.take() {
            scheduler.shutdown().await?;
        }
        *is_running = false;

        info!("Sweep scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateConfig;
    use crate::dispatcher::ChannelDispatcher;
    use crate::rules::RuleCatalog;
    use crate::store::InMemoryStore;
    use crate::templates::MessageTemplates;

    fn create_test_config() -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            cron: "0 8 * * *".to_string(),
            timezone: "Europe/Rome".to_string(),
            run_on_start: false,
        }
    }

    fn driver() -> Arc<SweepDriver> {
        let store = Arc::new(InMemoryStore::new());
        let templates = Arc::new(MessageTemplates::new(&TemplateConfig::default()).unwrap());
        let dispatcher = Arc::new(ChannelDispatcher::new(store.clone(), None, None, templates));
        Arc::new(SweepDriver::new(
            store,
            Arc::new(RuleCatalog::builtin()),
            dispatcher,
        ))
    }

    #[test]
    fn test_seconds_field_is_prepended() {
        assert_eq!(with_seconds_field("0 8 * * *"), "0 0 8 * * *");
        assert_eq!(with_seconds_field("30 0 8 * * *"), "30 0 8 * * *");
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, sec: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(y, m, d, h, min, sec).unwrap()
    }

    #[test]
    fn test_trigger_hour_follows_local_clock() {
        let schedule = LocalSchedule::parse("0 8 * * *", chrono_tz::Europe::Rome).unwrap();

        // CET in winter, CEST in summer.
        assert_eq!(
            schedule.next_after(utc(2025, 1, 15, 0, 0, 0)),
            Some(utc(2025, 1, 15, 7, 0, 0))
        );
        assert_eq!(
            schedule.next_after(utc(2025, 7, 15, 0, 0, 0)),
            Some(utc(2025, 7, 15, 6, 0, 0))
        );
        // Day of the spring-forward change.
        assert_eq!(
            schedule.next_after(utc(2025, 3, 30, 0, 0, 0)),
            Some(utc(2025, 3, 30, 6, 0, 0))
        );
        // Already past 08:00 local, so tomorrow.
        assert_eq!(
            schedule.next_after(utc(2025, 1, 15, 7, 30, 0)),
            Some(utc(2025, 1, 16, 7, 0, 0))
        );
    }

    #[test]
    fn test_tick_is_due_only_at_local_trigger() {
        let schedule = LocalSchedule::parse("0 8 * * *", chrono_tz::Europe::Rome).unwrap();

        assert!(schedule.is_due(utc(2025, 1, 15, 7, 0, 2)));
        assert!(!schedule.is_due(utc(2025, 1, 15, 8, 0, 2)));
        assert!(!schedule.is_due(utc(2025, 1, 15, 7, 1, 2)));
        assert!(schedule.is_due(utc(2025, 7, 15, 6, 0, 0)));
        assert!(!schedule.is_due(utc(2025, 7, 15, 7, 0, 0)));

        let utc_schedule = LocalSchedule::parse("0 8 * * *", chrono_tz::UTC).unwrap();
        assert!(utc_schedule.is_due(utc(2025, 1, 15, 8, 0, 1)));
    }

    #[test]
    fn test_invalid_cron_expression() {
        assert!(matches!(
            LocalSchedule::parse("every morning", chrono_tz::Europe::Rome),
            Err(NotifierError::Scheduler { .. })
        ));
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let mut config = create_test_config();
        config.timezone = "Atlantis/Capital".to_string();
        assert!(matches!(
            SweepScheduler::new(&config, driver()),
            Err(NotifierError::Config { .. })
        ));
    }

    #[test]
    fn test_today_in_timezone() {
        let tz: Tz = "Europe/Rome".parse().unwrap();
        let today = today_in(tz);
        let utc_today = Utc::now().date_naive();
        assert!((today - utc_today).num_days().abs() <= 1);
    }

    #[tokio::test]
    async fn test_start_stop_scheduler() {
        let scheduler = SweepScheduler::new(&create_test_config(), driver()).unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        assert!(scheduler.start().await.is_err());

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_invalid_cron_fails_to_start() {
        let mut config = create_test_config();
        config.cron = "every morning".to_string();
        let scheduler = SweepScheduler::new(&config, driver()).unwrap();
        assert!(scheduler.start().await.is_err());
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_does_not_run() {
        let mut config = create_test_config();
        config.enabled = false;
        let scheduler = SweepScheduler::new(&config, driver()).unwrap();
        scheduler.start().await.unwrap();
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_scheduled_sweep_records_report() {
        let driver = driver();
        run_scheduled_sweep(&driver, "UTC".parse().unwrap(), SweepOptions::default()).await;
        assert!(driver.last_report().await.is_some());
    }
}
