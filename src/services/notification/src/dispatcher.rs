//! Channel dispatcher
//!
//! Delivers one reminder to one recipient: push first when the recipient has
//! a profile with push enabled and device tokens, then email when push did
//! not deliver and the deadline owner allows the email fallback. Transport
//! errors are logged and swallowed; the next daily run is the retry.

use crate::channels::{EmailTransport, PushMessage, PushTransport};
use crate::metrics::NotifierMetrics;
use crate::rules::Reminder;
use crate::store::DeadlineStore;
use crate::templates::MessageTemplates;

use scadenze_shared::{DeliveryChannel, NotificationPreferences};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened when dispatching to one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// At least one device accepted the push
    Push { delivered: usize, failed: usize },
    Email,
    /// Nothing was delivered; `attempted` counts the channels that were tried
    None { attempted: usize },
}

impl DispatchOutcome {
    pub fn channel(&self) -> Option<DeliveryChannel> {
        match self {
            DispatchOutcome::Push { .. } => Some(DeliveryChannel::Push),
            DispatchOutcome::Email => Some(DeliveryChannel::Email),
            DispatchOutcome::None { .. } => None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.channel().is_some()
    }
}

/// Dispatch result for one recipient of a reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub recipient: String,
    pub outcome: DispatchOutcome,
}

pub struct ChannelDispatcher {
    store: Arc<dyn DeadlineStore>,
    push: Option<Arc<dyn PushTransport>>,
    email: Option<Arc<dyn EmailTransport>>,
    templates: Arc<MessageTemplates>,
    metrics: Option<NotifierMetrics>,
}

impl ChannelDispatcher {
    pub fn new(
        store: Arc<dyn DeadlineStore>,
        push: Option<Arc<dyn PushTransport>>,
        email: Option<Arc<dyn EmailTransport>>,
        templates: Arc<MessageTemplates>,
    ) -> Self {
        Self {
            store,
            push,
            email,
            templates,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: NotifierMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn has_push(&self) -> bool {
        self.push.is_some()
    }

    pub fn has_email(&self) -> bool {
        self.email.is_some()
    }

    fn count_failure(&self, channel: DeliveryChannel) {
        if let Some(metrics) = &self.metrics {
            metrics.record_delivery_failure(channel.as_str());
        }
    }

    fn count_delivery(&self, channel: DeliveryChannel) {
        if let Some(metrics) = &self.metrics {
            metrics.record_delivery(channel.as_str());
        }
    }

    /// Deliver `reminder` to `recipient`, honouring the owner's fallback preference.
    pub async fn dispatch(
        &self,
        recipient: &str,
        reminder: &Reminder,
        owner: &NotificationPreferences,
    ) -> DispatchOutcome {
        let mut attempted = 0;

        if let Some(push) = &self.push {
            let profile = match self.store.find_user_by_email(recipient).await {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(recipient, error = %e, "Recipient lookup failed, push unavailable");
                    None
                }
            };

            if let Some(profile) = profile.filter(|p| p.accepts_push()) {
                attempted += 1;
                match self.send_push(push.as_ref(), &profile.fcm_tokens, recipient, reminder).await {
                    Some(outcome) => {
                        self.count_delivery(DeliveryChannel::Push);
                        return outcome;
                    }
                    None => self.count_failure(DeliveryChannel::Push),
                }
            } else {
                debug!(recipient, "No push-enabled profile for recipient");
            }
        }

        if !owner.email_fallback {
            debug!(recipient, deadline = %reminder.deadline_id, "Owner disabled email fallback");
            return DispatchOutcome::None { attempted };
        }

        let Some(email) = &self.email else {
            debug!(recipient, "Email channel not configured");
            return DispatchOutcome::None { attempted };
        };

        attempted += 1;
        let content = match self.templates.render_email(reminder, recipient) {
            Ok(content) => content,
            Err(e) => {
                warn!(recipient, error = %e, "Email rendering failed");
                self.count_failure(DeliveryChannel::Email);
                return DispatchOutcome::None { attempted };
            }
        };

        match email.send_email(recipient, &content).await {
            Ok(()) => {
                info!(recipient, deadline = %reminder.deadline_id, "Reminder sent by email");
                self.count_delivery(DeliveryChannel::Email);
                DispatchOutcome::Email
            }
            Err(e) => {
                warn!(recipient, deadline = %reminder.deadline_id, error = %e, "Email delivery failed");
                self.count_failure(DeliveryChannel::Email);
                DispatchOutcome::None { attempted }
            }
        }
    }

    /// `Some` when at least one device accepted the message.
    async fn send_push(
        &self,
        push: &dyn PushTransport,
        tokens: &[String],
        recipient: &str,
        reminder: &Reminder,
    ) -> Option<DispatchOutcome> {
        let content = match self.templates.render_push(reminder, recipient) {
            Ok(content) => content,
            Err(e) => {
                warn!(recipient, error = %e, "Push rendering failed");
                return None;
            }
        };
        let message = PushMessage {
            title: content.title,
            body: content.body,
            data: HashMap::from([
                ("scadenzaId".to_string(), reminder.deadline_id.clone()),
                ("ownerId".to_string(), reminder.owner_id.clone()),
            ]),
        };

        match push.send_multicast(tokens, &message).await {
            Ok(report) if report.success_count() > 0 => {
                info!(
                    recipient,
                    deadline = %reminder.deadline_id,
                    delivered = report.success_count(),
                    failed = report.failure_count(),
                    "Reminder sent by push"
                );
                Some(DispatchOutcome::Push {
                    delivered: report.success_count(),
                    failed: report.failure_count(),
                })
            }
            Ok(report) => {
                warn!(
                    recipient,
                    failed = report.failure_count(),
                    stale_tokens = report.unregistered_tokens().len(),
                    "No device accepted the push"
                );
                None
            }
            Err(e) => {
                warn!(recipient, error = %e, "Push delivery failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{MockEmailTransport, MockPushTransport, MulticastReport, TokenResult};
    use crate::config::TemplateConfig;
    use crate::error::NotifierError;
    use crate::rules::Trigger;
    use crate::store::MockDeadlineStore;
    use chrono::NaiveDate;
    use scadenze_shared::UserProfile;

    fn reminder() -> Reminder {
        Reminder {
            deadline_id: "d1".to_string(),
            owner_id: "owner".to_string(),
            kind: "Il Bollo".to_string(),
            subject: "Il Bollo AB123CD".to_string(),
            body: "Il bollo dell'auto targata AB123CD e in scadenza con data 05/03/2025"
                .to_string(),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
            days_left: 7,
            final_notice: false,
            recipients: vec!["a@example.com".to_string()],
            holder: None,
            notes: None,
            observed_last_sent: None,
            trigger: Trigger::Repeat,
        }
    }

    fn profile(push_enabled: bool, tokens: &[&str]) -> UserProfile {
        UserProfile {
            uid: "r1".to_string(),
            email: Some("a@example.com".to_string()),
            fcm_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            preferences: NotificationPreferences {
                push_enabled,
                email_fallback: true,
            },
        }
    }

    fn report(ok: usize, failed: usize) -> MulticastReport {
        let mut responses = Vec::new();
        for i in 0..ok {
            responses.push(TokenResult {
                token: format!("ok{}", i),
                error: None,
                unregistered: false,
            });
        }
        for i in 0..failed {
            responses.push(TokenResult {
                token: format!("bad{}", i),
                error: Some("UNREGISTERED".to_string()),
                unregistered: true,
            });
        }
        MulticastReport { responses }
    }

    fn store_with(found: Option<UserProfile>) -> Arc<dyn DeadlineStore> {
        let mut store = MockDeadlineStore::new();
        store
            .expect_find_user_by_email()
            .returning(move |_| Ok(found.clone()));
        Arc::new(store)
    }

    fn templates() -> Arc<MessageTemplates> {
        Arc::new(MessageTemplates::new(&TemplateConfig::default()).unwrap())
    }

    fn owner(email_fallback: bool) -> NotificationPreferences {
        NotificationPreferences {
            push_enabled: true,
            email_fallback,
        }
    }

    #[tokio::test]
    async fn test_push_success_skips_email() {
        let mut push = MockPushTransport::new();
        push.expect_send_multicast()
            .withf(|tokens, message| {
                tokens.len() == 2 && message.data.get("scadenzaId").map(String::as_str) == Some("d1")
            })
            .times(1)
            .returning(|_, _| Ok(report(1, 1)));
        let mut email = MockEmailTransport::new();
        email.expect_send_email().never();

        let dispatcher = ChannelDispatcher::new(
            store_with(Some(profile(true, &["t1", "t2"]))),
            Some(Arc::new(push)),
            Some(Arc::new(email)),
            templates(),
        );

        let outcome = dispatcher
            .dispatch("a@example.com", &reminder(), &owner(true))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Push {
                delivered: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_failed_push_falls_back_to_email() {
        let mut push = MockPushTransport::new();
        push.expect_send_multicast()
            .returning(|_, _| Ok(report(0, 2)));
        let mut email = MockEmailTransport::new();
        email
            .expect_send_email()
            .withf(|to, content| {
                to.eq("a@example.com") && content.subject == "[SCADENZA] Il Bollo AB123CD"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = ChannelDispatcher::new(
            store_with(Some(profile(true, &["t1", "t2"]))),
            Some(Arc::new(push)),
            Some(Arc::new(email)),
            templates(),
        );

        let outcome = dispatcher
            .dispatch("a@example.com", &reminder(), &owner(true))
            .await;
        assert_eq!(outcome, DispatchOutcome::Email);
    }

    #[tokio::test]
    async fn test_push_disabled_goes_straight_to_email() {
        let mut push = MockPushTransport::new();
        push.expect_send_multicast().never();
        let mut email = MockEmailTransport::new();
        email.expect_send_email().times(1).returning(|_, _| Ok(()));

        let dispatcher = ChannelDispatcher::new(
            store_with(Some(profile(false, &["t1"]))),
            Some(Arc::new(push)),
            Some(Arc::new(email)),
            templates(),
        );

        let outcome = dispatcher
            .dispatch("a@example.com", &reminder(), &owner(true))
            .await;
        assert_eq!(outcome, DispatchOutcome::Email);
    }

    #[tokio::test]
    async fn test_unknown_recipient_gets_email_at_raw_address() {
        let mut email = MockEmailTransport::new();
        email
            .expect_send_email()
            .withf(|to, _| to.eq("stranger@example.com"))
            .times(1)
            .returning(|_, _| Ok(()));

        let dispatcher = ChannelDispatcher::new(
            store_with(None),
            Some(Arc::new(MockPushTransport::new())),
            Some(Arc::new(email)),
            templates(),
        );

        let outcome = dispatcher
            .dispatch("stranger@example.com", &reminder(), &owner(true))
            .await;
        assert_eq!(outcome, DispatchOutcome::Email);
    }

    #[tokio::test]
    async fn test_owner_without_fallback_gets_none() {
        let mut push = MockPushTransport::new();
        push.expect_send_multicast()
            .returning(|_, _| Err(NotifierError::push("FCM unavailable")));
        let mut email = MockEmailTransport::new();
        email.expect_send_email().never();

        let dispatcher = ChannelDispatcher::new(
            store_with(Some(profile(true, &["t1"]))),
            Some(Arc::new(push)),
            Some(Arc::new(email)),
            templates(),
        );

        let outcome = dispatcher
            .dispatch("a@example.com", &reminder(), &owner(false))
            .await;
        assert_eq!(outcome, DispatchOutcome::None { attempted: 1 });
        assert!(!outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_email_error_is_swallowed() {
        let mut email = MockEmailTransport::new();
        email
            .expect_send_email()
            .returning(|_, _| Err(NotifierError::email("SMTP error: 421")));

        let dispatcher =
            ChannelDispatcher::new(store_with(None), None, Some(Arc::new(email)), templates());

        let outcome = dispatcher
            .dispatch("a@example.com", &reminder(), &owner(true))
            .await;
        assert_eq!(outcome, DispatchOutcome::None { attempted: 1 });
    }

    #[tokio::test]
    async fn test_no_channels_configured() {
        let dispatcher = ChannelDispatcher::new(store_with(None), None, None, templates());
        let outcome = dispatcher
            .dispatch("a@example.com", &reminder(), &owner(true))
            .await;
        assert_eq!(outcome, DispatchOutcome::None { attempted: 0 });
    }

    #[test]
    fn test_outcome_channel() {
        assert_eq!(
            DispatchOutcome::Push {
                delivered: 1,
                failed: 0
            }
            .channel(),
            Some(DeliveryChannel::Push)
        );
        assert_eq!(DispatchOutcome::Email.channel(), Some(DeliveryChannel::Email));
        assert_eq!(DispatchOutcome::None { attempted: 2 }.channel(), None);
    }
}
