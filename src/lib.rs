//! WiFi Scan Coordination Library
//!
//! This library manages WiFi scans whose completion is reported
//! asynchronously by the platform. Exactly one scan may be in flight at a
//! time; its completion notification races a timeout, and a successful
//! result is delivered both to the caller and to a broadcast event stream.
//!
//! # Modules
//!
//! - [`coordinator`] - Single-flight scan coordination
//! - [`platform`] - Radio, notification and permission contracts
//! - [`channel`] - In-process notification channel
//! - [`scan`] - Scan result types and channel derivation
//! - [`nmcli`] - NetworkManager backend
//! - [`interface`] - WiFi interface discovery
//! - [`connection`] - Current connection info
//! - [`config`] - Configuration file
//! - [`error`] - Error types
//! - [`server`] - HTTP scan endpoint and event stream
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wifi_scan::{CoordinatorConfig, LocalChannel, NmcliPermissions, NmcliRadio, ScanCoordinator};
//!
//! # async fn run() {
//! let channel = Arc::new(LocalChannel::new());
//! let radio = Arc::new(NmcliRadio::new("wlan0", Arc::clone(&channel)));
//! let coordinator = ScanCoordinator::new(
//!     radio,
//!     channel,
//!     Arc::new(NmcliPermissions::new()),
//!     CoordinatorConfig::default(),
//! );
//!
//! let networks = coordinator.scan().await.expect("Scan failed");
//! wifi_scan::scan::display_networks(&networks);
//! # }
//! ```

/// In-process notification channel.
///
/// [`LocalChannel`] fans scan notifications out to subscribed handlers.
pub mod channel;

/// Configuration file handling.
///
/// TOML under the user config directory, with defaults for every field.
pub mod config;

/// Current connection info for a WiFi interface.
///
/// Read from `nmcli device show` plus the in-use access point row.
pub mod connection;

/// Single-flight scan coordination.
///
/// Admission, the notification/deadline race, result fan-out and teardown.
pub mod coordinator;

/// Error types.
///
/// Scan attempt failures with wire codes, plus channel and nmcli errors.
pub mod error;

/// WiFi interface discovery.
///
/// Lists NetworkManager WiFi devices and resolves the one to scan on.
pub mod interface;

/// NetworkManager backend.
///
/// Radio control, scan results and permissions through `nmcli` subprocesses.
pub mod nmcli;

/// Collaborator contracts for the coordinator.
///
/// Radio control, notification channel and permission check traits.
pub mod platform;

/// Scan result types.
///
/// [`NetworkObservation`], channel derivation and table rendering.
pub mod scan;

/// HTTP server.
///
/// A scan endpoint, the scan result SSE stream and a small web page.
pub mod server;

pub use channel::LocalChannel;
pub use coordinator::{CoordinatorConfig, PendingScan, ScanCoordinator, ScanOutcome};
pub use error::{ChannelError, NotificationError, RadioError, ScanError, ScanErrorKind};
pub use nmcli::{NmcliPermissions, NmcliRadio};
pub use platform::{
    NotificationChannel, NotificationHandler, PermissionCheck, RadioControl, ScanNotification,
    SubscriptionHandle,
};
pub use scan::{channel_from_frequency, NetworkObservation};
