pub mod center;
pub mod store;
pub mod notification;


pub use center::NotificationCenter;
pub use store::NotificationLog;
pub use notification::{Notification, NotificationKind, Priority};
