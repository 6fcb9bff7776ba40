//! Notification logger
//!
//! Writes the audit trail and the last-sent bookkeeping once per notified
//! deadline, after every recipient has been processed.

use crate::dispatcher::Delivery;
use crate::error::Result;
use crate::rules::Reminder;
use crate::store::{DeadlineStore, NotificationRecord, RecordOutcome};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use scadenze_shared::{NotificationLog, DEFAULT_CALENDAR_TZ};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct NotificationLogger {
    store: Arc<dyn DeadlineStore>,
    timezone: Tz,
}

impl NotificationLogger {
    pub fn new(store: Arc<dyn DeadlineStore>) -> Self {
        Self {
            store,
            timezone: DEFAULT_CALENDAR_TZ,
        }
    }

    /// Calendar in which sweep dates and stored last-sent values are read
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// One log entry per delivered recipient. Empty when nothing was delivered.
    pub fn entries(deliveries: &[Delivery], sent_at: DateTime<Utc>) -> Vec<NotificationLog> {
        deliveries
            .iter()
            .filter_map(|d| {
                d.outcome
                    .channel()
                    .map(|channel| NotificationLog::new(sent_at, d.recipient.clone(), channel))
            })
            .collect()
    }

    /// Record the deliveries of `reminder`.
    ///
    /// Returns `None` without touching the store when nothing was delivered,
    /// so the next run retries.
    pub async fn record(
        &self,
        reminder: &Reminder,
        deliveries: &[Delivery],
        sent_at: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Option<RecordOutcome>> {
        let logs = Self::entries(deliveries, sent_at);
        if logs.is_empty() {
            return Ok(None);
        }

        let record = NotificationRecord {
            owner_id: reminder.owner_id.clone(),
            deadline_id: reminder.deadline_id.clone(),
            expected_last_sent: reminder.observed_last_sent,
            logs,
            sent_at,
            date: today,
            timezone: self.timezone,
        };

        let outcome = self.store.record_notification(&record).await?;
        match outcome {
            RecordOutcome::Recorded => info!(
                owner = %record.owner_id,
                deadline = %record.deadline_id,
                entries = record.logs.len(),
                "Notification recorded"
            ),
            RecordOutcome::Conflict { current } => warn!(
                owner = %record.owner_id,
                deadline = %record.deadline_id,
                expected = ?record.expected_last_sent,
                current = ?current,
                "Deadline already notified by an overlapping run, possible duplicate send"
            ),
        }
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchOutcome;
    use crate::rules::Trigger;
    use crate::store::MockDeadlineStore;
    use chrono::TimeZone;
    use scadenze_shared::DeliveryChannel;

    fn reminder(observed: Option<NaiveDate>) -> Reminder {
        Reminder {
            deadline_id: "d1".to_string(),
            owner_id: "u1".to_string(),
            kind: "Il Bollo".to_string(),
            subject: "Il Bollo".to_string(),
            body: "e in scadenza con data 05/03/2025".to_string(),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            days_left: 4,
            final_notice: false,
            recipients: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            holder: None,
            notes: None,
            observed_last_sent: observed,
            trigger: Trigger::Urgency,
        }
    }

    fn deliveries() -> Vec<Delivery> {
        vec![
            Delivery {
                recipient: "a@example.com".to_string(),
                outcome: DispatchOutcome::Push {
                    delivered: 1,
                    failed: 0,
                },
            },
            Delivery {
                recipient: "b@example.com".to_string(),
                outcome: DispatchOutcome::None { attempted: 2 },
            },
            Delivery {
                recipient: "c@example.com".to_string(),
                outcome: DispatchOutcome::Email,
            },
        ]
    }

    #[test]
    fn test_entries_only_for_delivered_recipients() {
        let sent_at = Utc.with_ymd_and_hms(2025, 3, 1, 7, 0, 0).unwrap();
        let entries = NotificationLogger::entries(&deliveries(), sent_at);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].recipient, "a@example.com");
        assert_eq!(entries[0].channel, DeliveryChannel::Push);
        assert_eq!(entries[1].recipient, "c@example.com");
        assert_eq!(entries[1].channel, DeliveryChannel::Email);
    }

    #[tokio::test]
    async fn test_record_writes_once_with_observed_value() {
        let observed = NaiveDate::from_ymd_opt(2025, 2, 22);
        let mut store = MockDeadlineStore::new();
        store
            .expect_record_notification()
            .withf(move |record| {
                record.expected_last_sent == observed
                    && record.logs.len() == 2
                    && record.last_date_value() == "2025-03-01"
                    && record.timezone == chrono_tz::UTC
            })
            .times(1)
            .returning(|_| Ok(RecordOutcome::Recorded));

        let logger = NotificationLogger::new(Arc::new(store)).with_timezone(chrono_tz::UTC);
        let sent_at = Utc.with_ymd_and_hms(2025, 3, 1, 7, 0, 0).unwrap();
        let outcome = logger
            .record(
                &reminder(observed),
                &deliveries(),
                sent_at,
                NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, Some(RecordOutcome::Recorded));
    }

    #[tokio::test]
    async fn test_nothing_delivered_leaves_store_untouched() {
        let mut store = MockDeadlineStore::new();
        store.expect_record_notification().never();

        let logger = NotificationLogger::new(Arc::new(store));
        let failed = vec![Delivery {
            recipient: "a@example.com".to_string(),
            outcome: DispatchOutcome::None { attempted: 1 },
        }];
        let outcome = logger
            .record(
                &reminder(None),
                &failed,
                Utc::now(),
                NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }
}
