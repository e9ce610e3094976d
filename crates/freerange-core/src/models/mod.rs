//! Domain entities and enumerations.

mod application;
mod notification;
mod presence;
mod template;
mod user;

pub use application::{
    Application, AppSettings, ChannelDefaults, TokenPlacement, ValidationConfig,
    ValidationMethod,
};
pub use notification::{
    Channel, Notification, NotificationContent, NotificationStatus, Priority, QueueItem,
    RecurrenceState,
};
pub use presence::{Presence, PresenceStatus};
pub use template::Template;
pub use user::{CategoryPreference, Device, Platform, Preferences, QuietHours, User};
