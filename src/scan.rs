//! Scan result types and rendering.
//!
//! A [`NetworkObservation`] is one access point seen during a scan cycle.
//! Observations are kept in the order the platform reported them; nothing
//! here sorts or de-duplicates.
//!
//! # Example
//!
//! ```
//! use wifi_scan::scan::{channel_from_frequency, NetworkObservation};
//!
//! let ap = NetworkObservation::new("RoboDog-AP", "aa:bb:cc:dd:ee:ff", -48, "[WPA2-PSK-CCMP]", 2437);
//! assert_eq!(ap.channel, 6);
//! assert_eq!(channel_from_frequency(5180), 36);
//! ```

use serde::{Deserialize, Serialize};

/// An access point observed during a scan cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkObservation {
    /// Network name. Empty for hidden networks.
    pub ssid: String,

    /// Link-layer address of the access point.
    pub bssid: String,

    /// Received signal level in dBm, typically negative.
    pub signal_level: i32,

    /// Security/protocol descriptor as reported by the platform (opaque).
    pub capabilities: String,

    #[serde(rename = "frequencyMHz")]
    pub frequency_mhz: u32,

    /// Derived from `frequency_mhz`, 0 when the band is unknown.
    pub channel: u32,
}

impl NetworkObservation {
    /// Builds an observation, deriving the channel from the frequency.
    pub fn new(
        ssid: impl Into<String>,
        bssid: impl Into<String>,
        signal_level: i32,
        capabilities: impl Into<String>,
        frequency_mhz: u32,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: bssid.into(),
            signal_level,
            capabilities: capabilities.into(),
            frequency_mhz,
            channel: channel_from_frequency(frequency_mhz),
        }
    }
}

/// Maps a centre frequency in MHz to its WiFi channel number.
///
/// - 2.4 GHz (2412..=2484): `(freq - 2412) / 5 + 1`
/// - 5 GHz (5170..=5825): `(freq - 5170) / 5 + 34`
/// - anything else: `0` (unknown band)
pub fn channel_from_frequency(frequency_mhz: u32) -> u32 {
    match frequency_mhz {
        2412..=2484 => (frequency_mhz - 2412) / 5 + 1,
        5170..=5825 => (frequency_mhz - 5170) / 5 + 34,
        _ => 0,
    }
}

/// Prints observations as a table, in the order given.
///
/// ```text
/// SSID                             BSSID              SIGNAL      CH  SECURITY
/// ------------------------------------------------------------------------------
/// MyHomeNetwork                    aa:bb:cc:dd:ee:01  -45 dBm ████  6 WPA2
/// ```
pub fn display_networks(networks: &[NetworkObservation]) {
    if networks.is_empty() {
        println!("No networks found.");
        return;
    }

    println!(
        "{:<32} {:<18} {:>11} {:>3}  {}",
        "SSID", "BSSID", "SIGNAL", "CH", "SECURITY"
    );
    println!("{}", "-".repeat(78));

    for network in networks {
        println!(
            "{:<32} {:<18} {:>4} dBm {} {:>3}  {}",
            truncate_ssid(&network.ssid, 32),
            network.bssid,
            network.signal_level,
            signal_to_bar(network.signal_level),
            network.channel,
            network.capabilities
        );
    }
}

/// Truncates an SSID to `max_len` characters, appending "..." when cut.
fn truncate_ssid(ssid: &str, max_len: usize) -> String {
    if ssid.chars().count() > max_len {
        let kept: String = ssid.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    } else if ssid.is_empty() {
        "(hidden)".to_string()
    } else {
        ssid.to_string()
    }
}

/// Four-segment signal indicator for a dBm level.
fn signal_to_bar(signal_level: i32) -> &'static str {
    match signal_level {
        -55.. => "████",
        -65..=-56 => "███░",
        -75..=-66 => "██░░",
        -85..=-76 => "█░░░",
        _ => "░░░░",
    }
}
