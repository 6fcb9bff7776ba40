//! Reminder rules
//!
//! Decides, for a given calendar day, whether a deadline must be notified and
//! builds the reminder text. Everything here is pure: no I/O, no clock.
//!
//! A deadline is inside its alert window when `0 <= days_left <= first_alert`.
//! Inside the window it fires when any of these holds, unless it was already
//! notified today:
//!
//! - it was never notified and `days_left < first_alert` (late creation),
//! - it is due today (final notice),
//! - `(first_alert - days_left) % repeat == 0` (regular repeat).
//!
//! Past-due deadlines are outside the window and never fire.

use crate::config::RulesConfig;
use chrono::NaiveDate;
use scadenze_shared::{Deadline, RuleParameters, SkipReason};
use serde::Serialize;
use std::collections::HashMap;

/// Subject prefix used on the due date.
pub const FINAL_NOTICE_PREFIX: &str = "ULTIMO AVVISO";

/// Rule preset for one kind of deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub object: String,
    pub parameters: RuleParameters,
    pub has_vehicle: bool,
    pub phrases: Vec<String>,
}

impl CatalogEntry {
    fn new(object: &str, first_alert_days: u32, repeat_days: u32, phrases: &[&str]) -> Self {
        Self {
            object: object.to_string(),
            parameters: RuleParameters {
                first_alert_days,
                repeat_days,
            },
            has_vehicle: true,
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Phrase for documents that never stored one, when the choice is unambiguous.
    pub fn default_phrase(&self) -> Option<&str> {
        match self.phrases.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// Known deadline kinds and the fallback rule parameters.
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    defaults: RuleParameters,
    entries: HashMap<String, CatalogEntry>,
}

impl RuleCatalog {
    /// Catalog with the built-in vehicle deadline kinds.
    pub fn builtin() -> Self {
        let entries = [
            CatalogEntry::new(
                "La Revisione Moto",
                14,
                7,
                &["la revisione del motociclo targato"],
            ),
            CatalogEntry::new(
                "L'Assicurazione",
                14,
                7,
                &[
                    "l'assicurazione del motociclo targato",
                    "l'assicurazione dell'auto targata",
                ],
            ),
            CatalogEntry::new(
                "La Revisione Auto",
                14,
                7,
                &["la revisione dell'auto targata"],
            ),
            CatalogEntry::new(
                "Il Bollo",
                14,
                7,
                &[
                    "Il bollo del motociclo targato",
                    "Il bollo dell'auto targata",
                    "Il bollo del carrello targato",
                ],
            ),
            CatalogEntry::new(
                "Il Tagliando",
                7,
                7,
                &[
                    "Il tagliando del motociclo targato",
                    "Il tagliando dell'auto targata",
                ],
            ),
            CatalogEntry::new("L'Olio motore", 14, 7, &["Olio motore da controllare"]),
            CatalogEntry::new(
                "Il Comodato d'uso",
                28,
                7,
                &["Il comodato d'uso dell'auto targata"],
            ),
        ];

        Self {
            defaults: RuleParameters::default(),
            entries: entries
                .into_iter()
                .map(|e| (normalize_object(&e.object), e))
                .collect(),
        }
    }

    /// Built-in catalog extended and overridden by configuration.
    pub fn from_config(config: &RulesConfig) -> Self {
        let mut catalog = Self::builtin();
        catalog.defaults = RuleParameters {
            first_alert_days: config.default_first_alert_days,
            repeat_days: config.default_repeat_days,
        };
        for entry in &config.catalog {
            catalog.insert(CatalogEntry {
                object: entry.object.clone(),
                parameters: RuleParameters {
                    first_alert_days: entry.first_alert_days,
                    repeat_days: entry.repeat_days,
                },
                has_vehicle: entry.has_vehicle,
                phrases: entry.phrases.clone(),
            });
        }
        catalog
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        self.entries.insert(normalize_object(&entry.object), entry);
    }

    pub fn defaults(&self) -> RuleParameters {
        self.defaults
    }

    pub fn get(&self, object: &str) -> Option<&CatalogEntry> {
        self.entries.get(&normalize_object(object))
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Entry for the deadline's title, then for its type.
    pub fn entry_for(&self, deadline: &Deadline) -> Option<&CatalogEntry> {
        self.get(&deadline.title)
            .or_else(|| self.get(&deadline.kind))
    }

    /// Effective parameters: the document's own values, then the catalog
    /// entry for its title or type, then the defaults.
    pub fn parameters_for(&self, deadline: &Deadline) -> RuleParameters {
        let preset = self
            .entry_for(deadline)
            .map(|e| e.parameters)
            .unwrap_or(self.defaults);

        RuleParameters {
            first_alert_days: deadline.first_alert_days.unwrap_or(preset.first_alert_days),
            repeat_days: deadline.repeat_days.unwrap_or(preset.repeat_days),
        }
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Catalog keys ignore case and the typographic apostrophe used by old forms.
fn normalize_object(object: &str) -> String {
    object.trim().replace('\u{2019}', "'").to_lowercase()
}

// ============================================================================
// Evaluation
// ============================================================================

/// A reminder that must be sent today.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    pub deadline_id: String,
    pub owner_id: String,
    pub kind: String,
    pub subject: String,
    pub body: String,
    pub due_date: NaiveDate,
    pub days_left: i64,
    pub final_notice: bool,
    pub recipients: Vec<String>,
    pub holder: Option<String>,
    pub notes: Option<String>,
    /// Last-sent date observed at evaluation, used to guard the update
    pub observed_last_sent: Option<NaiveDate>,
    pub trigger: Trigger,
}

/// Which rule made a reminder fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Urgency,
    FinalNotice,
    Repeat,
}

/// Why an evaluable deadline does not fire today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    BeforeWindow,
    PastDue,
    SentToday,
    OffSchedule,
}

/// Outcome of evaluating one deadline.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Notify(Reminder),
    Wait(WaitReason),
    Skip(SkipReason),
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Notify(_) => "notify",
            Decision::Wait(_) => "wait",
            Decision::Skip(_) => "skip",
        }
    }
}

/// Whole days from `today` to `due_date`, negative once past due.
pub fn days_until(today: NaiveDate, due_date: NaiveDate) -> i64 {
    (due_date - today).num_days()
}

/// Decide whether the rule fires, given the day count and the last send.
///
/// `repeat_days` of zero is treated as one.
pub fn should_notify(
    today: NaiveDate,
    days_left: i64,
    parameters: RuleParameters,
    last_sent: Option<NaiveDate>,
) -> Result<Trigger, WaitReason> {
    let first_alert = i64::from(parameters.first_alert_days);
    let repeat = i64::from(parameters.repeat_days.max(1));

    if days_left < 0 {
        return Err(WaitReason::PastDue);
    }
    if days_left > first_alert {
        return Err(WaitReason::BeforeWindow);
    }
    if last_sent == Some(today) {
        return Err(WaitReason::SentToday);
    }

    if last_sent.is_none() && days_left < first_alert {
        return Ok(Trigger::Urgency);
    }
    if days_left == 0 {
        return Ok(Trigger::FinalNotice);
    }
    let days_in_window = first_alert - days_left;
    if days_in_window >= 0 && days_in_window % repeat == 0 {
        return Ok(Trigger::Repeat);
    }

    Err(WaitReason::OffSchedule)
}

/// Render a date as `DD/MM/YYYY`.
pub fn format_due_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Reminder body: phrase, detail, then the due date.
///
/// The detail is skipped when the phrase already mentions it.
pub fn build_body(phrase: Option<&str>, detail: Option<&str>, date_text: &str) -> String {
    let mut body = phrase.unwrap_or_default().to_string();
    if let Some(detail) = detail.filter(|d| !d.is_empty()) {
        if !body.contains(detail) {
            body.push(' ');
            body.push_str(detail);
        }
    }
    body.push_str(" e in scadenza con data ");
    body.push_str(date_text);
    body.trim().to_string()
}

/// Reminder subject: object name followed by the detail.
///
/// Unlike the body, the detail is always appended, even when the object name
/// already carries it.
pub fn build_subject(object: &str, detail: Option<&str>) -> String {
    let mut subject = object.to_string();
    if let Some(detail) = detail.filter(|d| !d.is_empty()) {
        subject.push(' ');
        subject.push_str(detail);
    }
    subject.trim().to_string()
}

/// Evaluate one deadline for `today`.
pub fn evaluate(today: NaiveDate, deadline: &Deadline, catalog: &RuleCatalog) -> Decision {
    if !deadline.is_active() {
        return Decision::Skip(SkipReason::Inactive(deadline.status));
    }
    if deadline.recipients.is_empty() {
        return Decision::Skip(SkipReason::NoRecipients);
    }

    let parameters = catalog.parameters_for(deadline);
    let days_left = days_until(today, deadline.due_date);

    let trigger = match should_notify(today, days_left, parameters, deadline.last_sent) {
        Ok(trigger) => trigger,
        Err(reason) => return Decision::Wait(reason),
    };

    let final_notice = days_left == 0;
    let entry = catalog.entry_for(deadline);
    // Kinds without a vehicle never carry the plate.
    let detail = deadline
        .detail
        .as_deref()
        .filter(|_| entry.map_or(true, |e| e.has_vehicle));
    let phrase = deadline
        .template_phrase
        .as_deref()
        .or_else(|| entry.and_then(CatalogEntry::default_phrase));

    let mut subject = build_subject(deadline.object_name(), detail);
    if final_notice {
        subject = format!("{} {}", FINAL_NOTICE_PREFIX, subject);
    }
    let body = build_body(phrase, detail, &format_due_date(deadline.due_date));

    Decision::Notify(Reminder {
        deadline_id: deadline.id.clone(),
        owner_id: deadline.owner_id.clone(),
        kind: deadline.kind.clone(),
        subject,
        body,
        due_date: deadline.due_date,
        days_left,
        final_notice,
        recipients: deadline.recipients.clone(),
        holder: deadline.holder.clone(),
        notes: deadline.notes.clone(),
        observed_last_sent: deadline.last_sent,
        trigger,
    })
}

/// Reminders that would fire today for a set of deadlines.
pub fn pending_reminders<'a, I>(today: NaiveDate, deadlines: I, catalog: &RuleCatalog) -> Vec<Reminder>
where
    I: IntoIterator<Item = &'a Deadline>,
{
    deadlines
        .into_iter()
        .filter_map(|d| match evaluate(today, d, catalog) {
            Decision::Notify(reminder) => Some(reminder),
            _ => None,
        })
        .collect()
}
