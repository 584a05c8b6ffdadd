pub mod avatar;
pub mod config;
pub mod correlate;
pub mod dispatch;
pub mod format;
pub mod notify;
pub mod profile;
pub mod transport;

pub use avatar::AvatarCache;
pub use config::{Config, ConfigError};
pub use correlate::{WaitOutcome, Waiters};
pub use dispatch::{Dispatcher, NOTIFICATIONS_SUB_ID};
pub use format::{format_message, Notification};
pub use notify::{NotificationSink, NotifySendSink};
pub use profile::{Profile, ProfileResolver, ProfileStore};
pub use transport::{pump_events, Incoming, RelayTransport, Subscriber};
