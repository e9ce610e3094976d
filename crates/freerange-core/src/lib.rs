//! Core domain model for FreeRangeNotify.
//!
//! This crate holds the entities shared by every other layer of the service:
//! notifications and their lifecycle state machine, users and preference
//! resolution, applications (tenants), the admission policy evaluator,
//! recurrence rules, template rendering, configuration, and the error
//! taxonomy. It deliberately contains no I/O: stores, queues, providers,
//! and the HTTP surface live in the sibling crates and depend on this one.

pub mod config;
pub mod error;
pub mod models;
pub mod policy;
pub mod recurrence;
pub mod template;

pub use error::{ErrorCode, NotifyError, NotifyResult, PolicyRejection};
pub use models::{
    Application, AppSettings, CategoryPreference, Channel, ChannelDefaults, Device,
    Notification, NotificationContent, NotificationStatus, Platform, Preferences, Presence,
    PresenceStatus, Priority, QueueItem, QuietHours, RecurrenceState, Template,
    TokenPlacement, User, ValidationConfig, ValidationMethod,
};
pub use policy::{AdmissionRequest, PolicyEvaluator, QuotaCounter};
pub use recurrence::RecurrenceRule;
