//! User profile (`users/{uid}`)
//!
//! The notifier only reads profiles: the contact email, the push device
//! tokens and the two delivery preferences.

use serde::{Deserialize, Serialize};

/// Profile document as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUserProfile {
    pub email: Option<String>,
    #[serde(rename = "fcmTokens")]
    pub fcm_tokens: Option<Vec<String>>,
    /// Single-token field written by older clients
    #[serde(rename = "fcmToken")]
    pub fcm_token: Option<String>,
    pub prefs_push: Option<bool>,
    pub prefs_email_sharing: Option<bool>,
}

impl RawUserProfile {
    pub fn migrate(self, uid: impl Into<String>) -> UserProfile {
        let mut fcm_tokens: Vec<String> = Vec::new();
        let candidates = self
            .fcm_tokens
            .unwrap_or_default()
            .into_iter()
            .chain(self.fcm_token);
        for token in candidates {
            let token = token.trim().to_string();
            if !token.is_empty() && !fcm_tokens.contains(&token) {
                fcm_tokens.push(token);
            }
        }

        UserProfile {
            uid: uid.into(),
            email: self
                .email
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            fcm_tokens,
            preferences: NotificationPreferences {
                // Unset preferences count as enabled.
                push_enabled: self.prefs_push.unwrap_or(true),
                email_fallback: self.prefs_email_sharing.unwrap_or(true),
            },
        }
    }
}

/// Delivery preferences of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub push_enabled: bool,
    pub email_fallback: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            push_enabled: true,
            email_fallback: true,
        }
    }
}

/// Typed user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub email: Option<String>,
    pub fcm_tokens: Vec<String>,
    pub preferences: NotificationPreferences,
}

impl UserProfile {
    /// Whether a push attempt makes sense for this user.
    pub fn accepts_push(&self) -> bool {
        self.preferences.push_enabled && !self.fcm_tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_tokens_are_merged_and_deduplicated() {
        let raw: RawUserProfile = serde_json::from_value(json!({
            "email": "owner@example.com",
            "fcmTokens": ["t1", "t2", "t1", " "],
            "fcmToken": "t2"
        }))
        .unwrap();
        let profile = raw.migrate("u1");

        assert_eq!(profile.fcm_tokens, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(profile.email.as_deref(), Some("owner@example.com"));
        assert!(profile.accepts_push());
    }

    #[test]
    fn test_preferences_default_to_enabled() {
        let profile = RawUserProfile::default().migrate("u1");
        assert_eq!(profile.preferences, NotificationPreferences::default());
        assert!(!profile.accepts_push());
    }

    #[test]
    fn test_push_disabled_by_preference() {
        let raw: RawUserProfile = serde_json::from_value(json!({
            "fcmTokens": ["t1"],
            "prefs_push": false,
            "prefs_email_sharing": false
        }))
        .unwrap();
        let profile = raw.migrate("u1");
        assert!(!profile.accepts_push());
        assert!(!profile.preferences.email_fallback);
    }
}
