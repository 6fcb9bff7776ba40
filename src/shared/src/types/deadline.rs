//! Deadline ("scadenza") records
//!
//! `RawDeadline` mirrors the document stored under `users/{uid}/scadenze/{id}`
//! with every field optional and the legacy aliases still found in old data.
//! `RawDeadline::migrate` turns it into a `Deadline`, the only shape the
//! notifier evaluates.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Schema version written by the current migration.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Calendar used for due dates when no other timezone is configured.
pub const DEFAULT_CALENDAR_TZ: Tz = chrono_tz::Europe::Rome;

// ============================================================================
// ENUMS
// ============================================================================

/// Lifecycle status of a deadline. Only `Active` deadlines are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlineStatus {
    Active,
    Completed,
    Archived,
}

impl Default for DeadlineStatus {
    fn default() -> Self {
        DeadlineStatus::Active
    }
}

impl FromStr for DeadlineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(DeadlineStatus::Active),
            "completed" => Ok(DeadlineStatus::Completed),
            "archived" => Ok(DeadlineStatus::Archived),
            _ => Err(format!("Invalid deadline status: {}", s)),
        }
    }
}

impl fmt::Display for DeadlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeadlineStatus::Active => "active",
            DeadlineStatus::Completed => "completed",
            DeadlineStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Channel a reminder was delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Push,
    Email,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Push => "push",
            DeliveryChannel::Email => "email",
        }
    }
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a document cannot be turned into a notifiable deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("deadline has no valid due date")]
    MissingDueDate,

    #[error("deadline has no recipients")]
    NoRecipients,

    #[error("deadline is {0}")]
    Inactive(DeadlineStatus),
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// One entry of the append-only `notificationLogs` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLog {
    /// RFC 3339 UTC timestamp
    pub sent_at: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub channel: DeliveryChannel,
}

impl NotificationLog {
    pub fn new(sent_at: DateTime<Utc>, recipient: impl Into<String>, channel: DeliveryChannel) -> Self {
        Self {
            sent_at: sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            recipient: recipient.into(),
            channel,
        }
    }
}

// ============================================================================
// RAW DOCUMENT
// ============================================================================

/// An integer that older clients stored either as a number or as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlexibleInt {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FlexibleInt {
    /// Strictly positive value, read the way `parseInt` reads it.
    ///
    /// Zero, negatives and unparseable text all yield `None`, which callers
    /// treat as "unset" and replace with a default.
    pub fn positive(&self) -> Option<u32> {
        let value = match self {
            FlexibleInt::Int(v) => *v,
            FlexibleInt::Float(v) if v.is_finite() => v.trunc() as i64,
            FlexibleInt::Float(_) => return None,
            FlexibleInt::Text(s) => {
                let s = s.trim_start();
                let (negative, digits) = match s.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, s.strip_prefix('+').unwrap_or(s)),
                };
                let digits: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
                let parsed: i64 = digits.parse().ok()?;
                if negative {
                    -parsed
                } else {
                    parsed
                }
            }
        };

        if value > 0 {
            u32::try_from(value).ok()
        } else {
            None
        }
    }
}

/// Deadline document exactly as persisted, legacy fields included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeadline {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub name: Option<String>,
    pub notes: Option<String>,
    #[serde(rename = "email_testo_selezionato")]
    pub template_phrase: Option<String>,
    #[serde(rename = "veicolo_targa")]
    pub vehicle_plate: Option<String>,
    #[serde(rename = "veicolo_modello")]
    pub vehicle_model: Option<String>,
    pub due_date: Option<String>,
    /// Due date written by the first clients, read when `dueDate` is absent
    pub date: Option<String>,
    pub status: Option<String>,
    pub completed: Option<bool>,
    pub notification_days_before: Option<FlexibleInt>,
    pub notification_frequency: Option<FlexibleInt>,
    pub last_notification_sent: Option<String>,
    pub last_notification_date: Option<String>,
    pub emails: Option<Vec<String>>,
    pub whatsapp_enabled: Option<bool>,
    pub notification_logs: Option<Vec<serde_json::Value>>,
    pub schema_version: Option<u32>,
}

impl RawDeadline {
    /// Calendar date of the last send in `tz`; `lastNotificationSent` wins over the legacy field.
    pub fn last_sent_date(&self, tz: Tz) -> Option<NaiveDate> {
        self.last_notification_sent
            .as_deref()
            .and_then(|v| parse_calendar_date(v, tz))
            .or_else(|| {
                self.last_notification_date
                    .as_deref()
                    .and_then(|v| parse_calendar_date(v, tz))
            })
    }

    /// Due date in `tz`, from `dueDate` or the legacy `date` field.
    pub fn due_date_in(&self, tz: Tz) -> Option<NaiveDate> {
        self.due_date
            .as_deref()
            .and_then(|v| parse_calendar_date(v, tz))
            .or_else(|| self.date.as_deref().and_then(|v| parse_calendar_date(v, tz)))
    }

    /// Migrate a stored document into a typed `Deadline`.
    ///
    /// Dates are read as calendar days in `tz`. Documents without a usable
    /// due date or without recipients cannot be notified and are reported
    /// through `SkipReason`.
    pub fn migrate(
        self,
        id: impl Into<String>,
        owner_id: impl Into<String>,
        tz: Tz,
    ) -> Result<Deadline, SkipReason> {
        let due_date = self.due_date_in(tz).ok_or(SkipReason::MissingDueDate)?;
        let last_sent = self.last_sent_date(tz);

        let recipients: Vec<String> = self
            .emails
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty() && e != "-" && e != "manual")
            .collect();
        if recipients.is_empty() {
            return Err(SkipReason::NoRecipients);
        }

        let status = match (self.status.as_deref(), self.completed) {
            (Some(s), _) => s.parse().unwrap_or(DeadlineStatus::Archived),
            (None, Some(true)) => DeadlineStatus::Completed,
            (None, _) => DeadlineStatus::Active,
        };

        let notification_logs = self
            .notification_logs
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();

        let kind = non_blank(self.kind).unwrap_or_default();
        let title = non_blank(self.title).unwrap_or_else(|| kind.clone());

        Ok(Deadline {
            id: id.into(),
            owner_id: owner_id.into(),
            kind,
            title,
            holder: non_blank(self.name),
            notes: non_blank(self.notes),
            template_phrase: non_blank(self.template_phrase),
            detail: non_blank(self.vehicle_plate).or_else(|| non_blank(self.vehicle_model)),
            due_date,
            status,
            first_alert_days: self
                .notification_days_before
                .as_ref()
                .and_then(FlexibleInt::positive),
            repeat_days: self
                .notification_frequency
                .as_ref()
                .and_then(FlexibleInt::positive),
            last_sent,
            recipients,
            whatsapp_enabled: self.whatsapp_enabled.unwrap_or(false),
            notification_logs,
            schema_version: CURRENT_SCHEMA_VERSION,
            source_schema_version: self.schema_version.unwrap_or(1),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a stored date into a calendar date in `tz`.
///
/// Plain `YYYY-MM-DD` values are taken as they are. RFC 3339 timestamps are
/// instants, so they are converted to `tz` before the day is read: midnight
/// in Rome is stored as 23:00 UTC of the previous day. Timestamps without an
/// offset are already local.
pub fn parse_calendar_date(value: &str, tz: Tz) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&tz).date_naive());
    }
    let head = value.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

// ============================================================================
// TYPED RECORD
// ============================================================================

/// First-alert window and repeat interval, both in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleParameters {
    pub first_alert_days: u32,
    pub repeat_days: u32,
}

impl Default for RuleParameters {
    fn default() -> Self {
        Self {
            first_alert_days: 14,
            repeat_days: 7,
        }
    }
}

/// A tracked obligation with its notification bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deadline {
    pub id: String,
    pub owner_id: String,
    pub kind: String,
    pub title: String,
    pub holder: Option<String>,
    pub notes: Option<String>,
    pub template_phrase: Option<String>,
    /// Free-text detail such as a vehicle plate or document reference
    pub detail: Option<String>,
    pub due_date: NaiveDate,
    pub status: DeadlineStatus,
    /// `None` when the document leaves the window unset
    pub first_alert_days: Option<u32>,
    /// `None` when the document leaves the interval unset
    pub repeat_days: Option<u32>,
    pub last_sent: Option<NaiveDate>,
    pub recipients: Vec<String>,
    pub whatsapp_enabled: bool,
    pub notification_logs: Vec<NotificationLog>,
    pub schema_version: u32,
    pub source_schema_version: u32,
}

impl Deadline {
    pub fn is_active(&self) -> bool {
        self.status == DeadlineStatus::Active
    }

    /// Name used for subjects: the title, or the type when no title was set.
    pub fn object_name(&self) -> &str {
        if self.title.is_empty() {
            &self.kind
        } else {
            &self.title
        }
    }
}
