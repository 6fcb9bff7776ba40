//! Deadline store
//!
//! Users live at `users/{uid}` and their deadlines at
//! `users/{uid}/scadenze/{id}`. The notifier reads both and writes back only
//! the last-sent bookkeeping and the notification log.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use scadenze_shared::{NotificationLog, RawDeadline, UserProfile};

pub mod firestore;
pub mod memory;
pub mod value;

pub use firestore::FirestoreStore;
pub use memory::InMemoryStore;

/// A deadline document together with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineDocument {
    pub id: String,
    pub owner_id: String,
    pub data: RawDeadline,
}

/// Bookkeeping written once per notified deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord {
    pub owner_id: String,
    pub deadline_id: String,
    /// Last-sent date seen when the deadline was evaluated
    pub expected_last_sent: Option<NaiveDate>,
    pub logs: Vec<NotificationLog>,
    pub sent_at: DateTime<Utc>,
    pub date: NaiveDate,
    /// Calendar the sweep date belongs to
    pub timezone: Tz,
}

impl NotificationRecord {
    /// `lastNotificationSent` value, RFC 3339 in UTC.
    ///
    /// The local time of day comes from `sent_at` but the local calendar day is
    /// always the sweep date, so reading it back in `timezone` yields the day
    /// evaluated. For a sweep of today this is `sent_at` itself.
    pub fn last_sent_value(&self) -> String {
        let local_time = self.sent_at.with_timezone(&self.timezone).time();
        self.timezone
            .from_local_datetime(&self.date.and_time(local_time))
            .earliest()
            .or_else(|| {
                // Skipped by a DST change; noon always exists.
                self.date
                    .and_hms_opt(12, 0, 0)
                    .and_then(|noon| self.timezone.from_local_datetime(&noon).earliest())
            })
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or(self.sent_at)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    /// Last-sent date of a stored document, read in this record's calendar.
    pub fn current_last_sent(&self, stored: &RawDeadline) -> Option<NaiveDate> {
        stored.last_sent_date(self.timezone)
    }

    /// `lastNotificationDate` value, `YYYY-MM-DD`.
    pub fn last_date_value(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Result of the conditional bookkeeping write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The stored last-sent date no longer matches; another run got there first
    Conflict { current: Option<NaiveDate> },
}

/// Persistence used by the sweep
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadlineStore: Send + Sync {
    /// Ids of every user document, including documents that only hold sub-collections
    async fn list_user_ids(&self) -> Result<Vec<String>>;

    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>>;

    /// Every deadline document of a user; status filtering happens after migration
    async fn list_deadlines(&self, uid: &str) -> Result<Vec<DeadlineDocument>>;

    /// Append the logs and move the last-sent date in one atomic write,
    /// only if the stored last-sent date still equals `expected_last_sent`
    async fn record_notification(&self, record: &NotificationRecord) -> Result<RecordOutcome>;

    async fn health_check(&self) -> Result<bool>;
}
