//! Fan-out of inbound messages to category subscribers and notifications.

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::trace;

use crate::channel::categories::CategoryRegistry;
use crate::channel::proto::NotificationMessage;
use crate::notifications::{Notification, NotificationSink, Variant};

struct Subscriber {
    category: String,
    tx: mpsc::UnboundedSender<NotificationMessage>,
}

/// Routes every inbound message exactly once to each interested party.
///
/// Cloning shares the subscriber list and the category table.
#[derive(Clone)]
pub struct MessageDistributor {
    registry: Arc<CategoryRegistry>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl MessageDistributor {
    pub fn new(registry: Arc<CategoryRegistry>) -> Self {
        Self {
            registry,
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    /// Messages of exactly `category`, from now on.
    ///
    /// The feed is unbounded so a slow consumer never causes a drop; it ends
    /// when the distributor and every clone of it are gone.
    pub fn subscribe(&self, category: impl Into<String>) -> CategoryMessages {
        let category = category.into();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(Subscriber {
                category: category.clone(),
                tx,
            });
        }
        CategoryMessages { category, rx }
    }

    /// Number of live subscribers for `category`.
    pub fn subscriber_count(&self, category: &str) -> usize {
        self.subscribers
            .read()
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|s| s.category == category && !s.tx.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Raises the category notification (or the fallback) and delivers the
    /// message to every subscriber of its category.
    pub fn dispatch<N>(&self, message: NotificationMessage, sink: &N)
    where
        N: NotificationSink + ?Sized,
    {
        let category = message.category().to_string();

        match self.registry.get(&category) {
            Some(descriptor) => {
                if let Some(body) = descriptor.render(&message) {
                    sink.notify(
                        Notification::new(descriptor.variant, descriptor.title)
                            .with_message(Some(body))
                            .with_category(category.clone())
                            .with_hidden(descriptor.hidden),
                    );
                }
            }
            None => {
                trace!(event = "uncategorized_message", category = %category);
                sink.notify(
                    Notification::new(Variant::Success, category.clone())
                        .with_category(category.clone()),
                );
            }
        }

        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.retain(|subscriber| {
                if subscriber.category != category {
                    return !subscriber.tx.is_closed();
                }
                subscriber.tx.send(message.clone()).is_ok()
            });
        }
    }
}

impl std::fmt::Debug for MessageDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDistributor")
            .field("categories", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Live feed of one category's messages.
#[derive(Debug)]
pub struct CategoryMessages {
    category: String,
    rx: mpsc::UnboundedReceiver<NotificationMessage>,
}

impl CategoryMessages {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub async fn recv(&mut self) -> Option<NotificationMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<NotificationMessage> {
        self.rx.try_recv().ok()
    }
}
