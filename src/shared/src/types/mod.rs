//! Shared type definitions for the Scadenze platform
//!
//! Firestore documents are read into the loosely-typed `Raw*` structs and then
//! migrated into the strongly-typed records every service works with.

pub mod deadline;
pub mod user;

pub use deadline::{
    parse_calendar_date, Deadline, DeadlineStatus, DeliveryChannel, FlexibleInt, NotificationLog,
    RawDeadline, RuleParameters, SkipReason, CURRENT_SCHEMA_VERSION, DEFAULT_CALENDAR_TZ,
};
pub use user::{NotificationPreferences, RawUserProfile, UserProfile};
