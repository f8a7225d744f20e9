//! User-facing notification sink and the in-memory notification store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Severity of a notification.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Success,
    Info,
    Warning,
    Danger,
}

impl Variant {
    /// Whether the variant denotes a problem the user should act on.
    pub fn is_problem(self) -> bool {
        matches!(self, Self::Warning | Self::Danger)
    }
}

/// A single notification raised by the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub variant: Variant,
    pub hidden: bool,
    pub auto_dismiss: bool,
}

impl Notification {
    pub fn new(variant: Variant, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: None,
            category: None,
            variant,
            hidden: false,
            auto_dismiss: false,
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_auto_dismiss(mut self, auto_dismiss: bool) -> Self {
        self.auto_dismiss = auto_dismiss;
        self
    }
}

/// Destination for notifications raised by the channel.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notification: Notification);

    fn success(&self, title: &str, message: Option<String>) {
        self.notify(Notification::new(Variant::Success, title).with_message(message));
    }

    fn info(&self, title: &str, message: Option<String>) {
        self.notify(Notification::new(Variant::Info, title).with_message(message));
    }

    fn warning(&self, title: &str, message: Option<String>) {
        self.notify(Notification::new(Variant::Warning, title).with_message(message));
    }

    fn danger(&self, title: &str, message: Option<String>) {
        self.notify(Notification::new(Variant::Danger, title).with_message(message));
    }
}

impl<T: NotificationSink> NotificationSink for Arc<T> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification);
    }
}

/// Notification as kept by [`Notifications`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredNotification {
    /// Unique, increasing key.
    pub key: u64,
    /// Milliseconds since the Unix epoch when the notification was raised.
    pub timestamp_ms: u64,
    pub read: bool,
    pub notification: Notification,
}

/// In-memory notification store with a live feed.
///
/// Cloning shares the same store.
#[derive(Clone, Debug, Default)]
pub struct Notifications {
    inner: Arc<NotificationsInner>,
}

#[derive(Debug, Default)]
struct NotificationsInner {
    next_key: AtomicU64,
    entries: RwLock<Vec<StoredNotification>>,
    feeds: RwLock<Vec<mpsc::UnboundedSender<StoredNotification>>>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live feed of notifications raised after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoredNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut feeds) = self.inner.feeds.write() {
            feeds.push(tx);
        }
        rx
    }

    /// Every stored notification, oldest first.
    pub fn all(&self) -> Vec<StoredNotification> {
        self.filtered(|_| true)
    }

    /// Notifications not flagged hidden.
    pub fn visible(&self) -> Vec<StoredNotification> {
        self.filtered(|entry| !entry.notification.hidden)
    }

    /// Visible notifications not yet marked read.
    pub fn unread(&self) -> Vec<StoredNotification> {
        self.filtered(|entry| !entry.notification.hidden && !entry.read)
    }

    /// Warning and danger notifications.
    pub fn problems(&self) -> Vec<StoredNotification> {
        self.filtered(|entry| entry.notification.variant.is_problem())
    }

    /// Marks one notification read. Returns `false` for an unknown key.
    pub fn mark_read(&self, key: u64) -> bool {
        let Ok(mut entries) = self.inner.entries.write() else {
            return false;
        };
        match entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                entry.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) {
        if let Ok(mut entries) = self.inner.entries.write() {
            entries.iter_mut().for_each(|entry| entry.read = true);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.inner.entries.write() {
            entries.clear();
        }
    }

    fn filtered(&self, keep: impl Fn(&StoredNotification) -> bool) -> Vec<StoredNotification> {
        self.inner
            .entries
            .read()
            .map(|entries| entries.iter().filter(|e| keep(e)).cloned().collect())
            .unwrap_or_default()
    }
}

impl NotificationSink for Notifications {
    fn notify(&self, notification: Notification) {
        let stored = StoredNotification {
            key: self.inner.next_key.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: now_ms(),
            read: false,
            notification,
        };

        if let Ok(mut entries) = self.inner.entries.write() {
            entries.push(stored.clone());
        }
        if let Ok(mut feeds) = self.inner.feeds.write() {
            feeds.retain(|feed| feed.send(stored.clone()).is_ok());
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::{Notification, NotificationSink, Notifications, Variant};

    #[test]
    fn helpers_store_with_expected_variant() {
        let store = Notifications::new();
        store.info("a", None);
        store.danger("b", Some("detail".to_string()));
        store.success("c", None);

        let all = store.all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].notification.variant, Variant::Info);
        assert_eq!(all[1].notification.variant, Variant::Danger);
        assert_eq!(all[1].notification.message.as_deref(), Some("detail"));
        assert!(all[0].key < all[1].key && all[1].key < all[2].key);
    }

    #[test]
    fn hidden_notifications_are_not_unread() {
        let store = Notifications::new();
        store.notify(Notification::new(Variant::Info, "quiet").with_hidden(true));
        store.warning("loud", None);

        assert_eq!(store.all().len(), 2);
        assert_eq!(store.visible().len(), 1);
        assert_eq!(store.unread().len(), 1);
        assert_eq!(store.problems().len(), 1);
    }

    #[test]
    fn mark_read_and_clear() {
        let store = Notifications::new();
        store.info("one", None);
        store.info("two", None);
        let first = store.all()[0].key;

        assert!(store.mark_read(first));
        assert!(!store.mark_read(999));
        assert_eq!(store.unread().len(), 1);

        store.mark_all_read();
        assert!(store.unread().is_empty());

        store.clear();
        assert!(store.all().is_empty());
    }

    #[test]
    fn feed_receives_new_notifications_only() {
        let store = Notifications::new();
        store.info("before", None);
        let mut feed = store.subscribe();
        store.info("after", None);

        let received = feed.try_recv().expect("one notification");
        assert_eq!(received.notification.title, "after");
        assert!(feed.try_recv().is_err());
    }
}
