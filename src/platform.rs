//! Collaborator contracts supplied by the host platform.
//!
//! The coordinator never talks to a radio driver directly. It goes through
//! [`RadioControl`] for the radio, [`NotificationChannel`] for the
//! scan-completion notification and [`PermissionCheck`] for the access
//! capability gate.

use std::collections::BTreeSet;

use crate::error::{ChannelError, NotificationError};
use crate::scan::NetworkObservation;

/// Action tag carried by a scan-completion notification.
pub const SCAN_RESULTS_AVAILABLE_ACTION: &str = "wifi.scan-results-available";

/// Radio operations used by a scan attempt.
///
/// All calls are blocking; `current_results` may be slow and is run off the
/// async executor by the coordinator.
pub trait RadioControl: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Asks the platform to start a scan cycle. Returns whether the request
    /// was accepted.
    fn trigger_scan(&self) -> bool;

    /// Results of the last completed scan cycle, in platform order.
    /// `None` when the result store could not be read.
    fn current_results(&self) -> Option<Vec<NetworkObservation>>;
}

/// Access capability gate checked before a scan is admitted.
pub trait PermissionCheck: Send + Sync {
    /// Names of required capabilities that are not granted.
    fn missing_capabilities(&self) -> BTreeSet<String>;

    fn has_required_capability(&self) -> bool {
        self.missing_capabilities().is_empty()
    }
}

/// Payload delivered by the platform once per completed scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanNotification {
    pub action: String,
    pub results_updated: Option<bool>,
}

impl ScanNotification {
    /// A well-formed scan-completion notification.
    pub fn scan_completed(results_updated: bool) -> Self {
        Self {
            action: SCAN_RESULTS_AVAILABLE_ACTION.to_string(),
            results_updated: Some(results_updated),
        }
    }

    /// Returns the results-updated flag if this is a well-formed,
    /// correctly tagged scan-completion notification.
    pub fn validate(&self) -> Result<bool, NotificationError> {
        if self.action != SCAN_RESULTS_AVAILABLE_ACTION {
            return Err(NotificationError::UnexpectedAction(self.action.clone()));
        }
        self.results_updated
            .ok_or(NotificationError::MissingResultsFlag)
    }
}

/// Ownership token for an active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Callback invoked by the channel on delivery. May run on any thread.
pub type NotificationHandler = Box<dyn Fn(ScanNotification) + Send + Sync>;

/// Subscribable scan-completion notification source.
///
/// Implementations must not invoke the handler from inside `subscribe`.
/// `unsubscribe` of an unknown or already released handle is a no-op.
pub trait NotificationChannel: Send + Sync {
    fn subscribe(&self, handler: NotificationHandler) -> Result<SubscriptionHandle, ChannelError>;

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError>;
}
