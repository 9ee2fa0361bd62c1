//! In-process notification channel.
//!
//! [`LocalChannel`] is the [`NotificationChannel`] used by the nmcli backend:
//! the radio side calls [`LocalChannel::deliver`] when a scan cycle completes
//! and every current subscriber is invoked on the delivering thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::ChannelError;
use crate::platform::{NotificationChannel, NotificationHandler, ScanNotification, SubscriptionHandle};

#[derive(Default)]
pub struct LocalChannel {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Arc<NotificationHandler>>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a notification to every current subscriber.
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, notification: ScanNotification) -> usize {
        // Handlers run outside the lock so they may unsubscribe.
        let handlers: Vec<Arc<NotificationHandler>> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        if handlers.is_empty() {
            debug!(action = %notification.action, "notification delivered with no subscribers");
        }
        for handler in &handlers {
            handler(notification.clone());
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl NotificationChannel for LocalChannel {
    fn subscribe(&self, handler: NotificationHandler) -> Result<SubscriptionHandle, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(handler));
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        Ok(())
    }
}
