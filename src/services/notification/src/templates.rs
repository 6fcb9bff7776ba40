//! Message templates
//!
//! Renders the outbound email and push texts for a reminder with Handlebars.
//! Output is plain text, so HTML escaping is disabled.

use crate::config::TemplateConfig;
use crate::error::Result;
use crate::rules::{format_due_date, Reminder};

use handlebars::Handlebars;
use serde_json::json;
use tracing::info;

const EMAIL_SUBJECT: &str = "email_subject";
const EMAIL_BODY: &str = "email_body";
const PUSH_TITLE: &str = "push_title";
const PUSH_BODY: &str = "push_body";

/// Rendered plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

/// Rendered push notification text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushContent {
    pub title: String,
    pub body: String,
}

/// Compiled message templates
pub struct MessageTemplates {
    handlebars: Handlebars<'static>,
}

impl MessageTemplates {
    pub fn new(config: &TemplateConfig) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars.register_template_string(EMAIL_SUBJECT, &config.email_subject)?;
        handlebars.register_template_string(EMAIL_BODY, &config.email_body)?;
        handlebars.register_template_string(PUSH_TITLE, &config.push_title)?;
        handlebars.register_template_string(PUSH_BODY, &config.push_body)?;

        info!("Message templates compiled");
        Ok(Self { handlebars })
    }

    fn context(reminder: &Reminder, recipient: &str) -> serde_json::Value {
        json!({
            "subject": reminder.subject,
            "body": reminder.body,
            "kind": reminder.kind,
            "due_date": format_due_date(reminder.due_date),
            "days_left": reminder.days_left,
            "final_notice": reminder.final_notice,
            "holder": reminder.holder,
            "notes": reminder.notes,
            "recipient": recipient,
        })
    }

    pub fn render_email(&self, reminder: &Reminder, recipient: &str) -> Result<EmailContent> {
        let data = Self::context(reminder, recipient);
        Ok(EmailContent {
            subject: self.handlebars.render(EMAIL_SUBJECT, &data)?.trim().to_string(),
            body: self.handlebars.render(EMAIL_BODY, &data)?,
        })
    }

    pub fn render_push(&self, reminder: &Reminder, recipient: &str) -> Result<PushContent> {
        let data = Self::context(reminder, recipient);
        Ok(PushContent {
            title: self.handlebars.render(PUSH_TITLE, &data)?.trim().to_string(),
            body: self.handlebars.render(PUSH_BODY, &data)?.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifierError;
    use crate::rules::Trigger;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn reminder() -> Reminder {
        Reminder {
            deadline_id: "d1".to_string(),
            owner_id: "u1".to_string(),
            kind: "Il Bollo".to_string(),
            subject: "Il Bollo AB123CD".to_string(),
            body: "Il bollo dell'auto targata AB123CD e in scadenza con data 05/03/2025"
                .to_string(),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            days_left: 7,
            final_notice: false,
            recipients: vec!["a@example.com".to_string()],
            holder: Some("Mario Rossi".to_string()),
            notes: Some("Pagare online".to_string()),
            observed_last_sent: None,
            trigger: Trigger::Repeat,
        }
    }

    #[test]
    fn test_default_email_rendering() {
        let templates = MessageTemplates::new(&TemplateConfig::default()).unwrap();
        let email = templates.render_email(&reminder(), "a@example.com").unwrap();

        assert_eq!(email.subject, "[SCADENZA] Il Bollo AB123CD");
        assert!(email.body.starts_with("Gentile Mario Rossi,"));
        assert!(email.body.contains("dell'auto targata AB123CD"));
        assert!(email.body.contains("Scadenza: 05/03/2025"));
        assert!(email.body.contains("Note: Pagare online"));
    }

    #[test]
    fn test_missing_optional_fields() {
        let templates = MessageTemplates::new(&TemplateConfig::default()).unwrap();
        let mut reminder = reminder();
        reminder.holder = None;
        reminder.notes = None;

        let email = templates.render_email(&reminder, "a@example.com").unwrap();
        assert!(email.body.starts_with("Gentile cliente,"));
        assert!(!email.body.contains("Note:"));
    }

    #[test]
    fn test_push_rendering() {
        let templates = MessageTemplates::new(&TemplateConfig::default()).unwrap();
        let push = templates.render_push(&reminder(), "a@example.com").unwrap();
        assert_eq!(push.title, "Il Bollo AB123CD");
        assert_eq!(
            push.body,
            "Il bollo dell'auto targata AB123CD e in scadenza con data 05/03/2025"
        );
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let config = TemplateConfig {
            email_subject: "{{#if subject}}unterminated".to_string(),
            ..TemplateConfig::default()
        };
        assert!(matches!(
            MessageTemplates::new(&config),
            Err(NotifierError::Template { .. })
        ));
    }
}
