mod notification;
mod session;

pub use notification::{Notification, NotificationKind, RawNotification};
pub use session::{watch_percentage, PlaybackPosition, WatchSession, WatchingListEntry};
