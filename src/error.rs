use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single scan attempt.
///
/// Admission failures (`RadioDisabled`, `PermissionDenied`, `RuntimeUnavailable`,
/// `AlreadyInProgress`, `SubscriptionFailed`, `TriggerFailed`, and `ScanFailed`
/// when the trigger call panics) are returned synchronously by
/// [`ScanCoordinator::request_scan`](crate::ScanCoordinator::request_scan); the
/// remaining kinds resolve the pending completion later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("WiFi is not enabled. Please enable WiFi first.")]
    RadioDisabled,

    #[error("Required permissions not granted: {}", join_missing(.missing))]
    PermissionDenied { missing: BTreeSet<String> },

    #[error("Scan requested outside a Tokio runtime")]
    RuntimeUnavailable,

    #[error("WiFi scan is already in progress")]
    AlreadyInProgress,

    #[error("Failed to subscribe to scan notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to start WiFi scan. Please check if WiFi is enabled and try again.")]
    TriggerFailed,

    #[error("WiFi scan failed: {0}")]
    ScanFailed(String),

    #[error("No scan results available")]
    NoResultsAvailable,

    #[error("Scan timeout - no results received within {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Scan aborted: coordinator shut down while the scan was in progress")]
    Aborted,
}

/// Discriminant of [`ScanError`], without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanErrorKind {
    RadioDisabled,
    PermissionDenied,
    RuntimeUnavailable,
    AlreadyInProgress,
    SubscriptionFailed,
    TriggerFailed,
    ScanFailed,
    NoResultsAvailable,
    Timeout,
    Aborted,
}

impl ScanError {
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            ScanError::RadioDisabled => ScanErrorKind::RadioDisabled,
            ScanError::PermissionDenied { .. } => ScanErrorKind::PermissionDenied,
            ScanError::RuntimeUnavailable => ScanErrorKind::RuntimeUnavailable,
            ScanError::AlreadyInProgress => ScanErrorKind::AlreadyInProgress,
            ScanError::SubscriptionFailed(_) => ScanErrorKind::SubscriptionFailed,
            ScanError::TriggerFailed => ScanErrorKind::TriggerFailed,
            ScanError::ScanFailed(_) => ScanErrorKind::ScanFailed,
            ScanError::NoResultsAvailable => ScanErrorKind::NoResultsAvailable,
            ScanError::Timeout(_) => ScanErrorKind::Timeout,
            ScanError::Aborted => ScanErrorKind::Aborted,
        }
    }

    /// Stable wire code for this failure, paired with the display message.
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}

impl ScanErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ScanErrorKind::RadioDisabled => "WIFI_DISABLED",
            ScanErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ScanErrorKind::RuntimeUnavailable => "NO_RUNTIME",
            ScanErrorKind::AlreadyInProgress => "ALREADY_SCANNING",
            ScanErrorKind::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            ScanErrorKind::TriggerFailed => "TRIGGER_FAILED",
            ScanErrorKind::ScanFailed => "SCAN_FAILED",
            ScanErrorKind::NoResultsAvailable => "NO_RESULTS",
            ScanErrorKind::Timeout => "SCAN_TIMEOUT",
            ScanErrorKind::Aborted => "ABORTED",
        }
    }
}

fn join_missing(missing: &BTreeSet<String>) -> String {
    missing.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

/// Errors raised by a [`NotificationChannel`](crate::platform::NotificationChannel).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Subscription rejected: {0}")]
    SubscribeRejected(String),

    #[error("Failed to release subscription {id}: {reason}")]
    UnsubscribeFailed { id: u64, reason: String },
}

/// Reasons a delivered notification is not a usable scan-completion payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Received unexpected notification action: {0}")]
    UnexpectedAction(String),

    #[error("Notification is missing the results-updated flag")]
    MissingResultsFlag,
}

/// Errors from the NetworkManager backend.
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("No WiFi interface found")]
    NoWifiInterfaceFound,

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Failed to execute nmcli: {0}")]
    NmcliExecution(String),

    #[error("Failed to parse nmcli output: {0}")]
    NmcliParse(String),
}
