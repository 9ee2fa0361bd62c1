//! NetworkManager backend.
//!
//! Implements the platform contracts on top of the `nmcli` command-line tool:
//! [`NmcliRadio`] is the [`RadioControl`] and [`NmcliPermissions`] is the
//! [`PermissionCheck`]. Scan completion is signalled on a [`LocalChannel`].
//!
//! # Requirements
//!
//! - NetworkManager must be installed and running
//! - The `nmcli` command must be available in PATH
//!
//! # Commands Executed
//!
//! ```bash
//! nmcli radio wifi [on|off]
//! nmcli device wifi rescan ifname <interface>
//! nmcli -t -f SSID,BSSID,SIGNAL,FREQ,SECURITY device wifi list ifname <interface> --rescan no
//! nmcli -t -f PERMISSION,VALUE general permissions
//! ```

use std::collections::BTreeSet;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::channel::LocalChannel;
use crate::error::RadioError;
use crate::platform::{PermissionCheck, RadioControl, ScanNotification};
use crate::scan::NetworkObservation;

/// Permission NetworkManager requires for on-demand scans.
pub const WIFI_SCAN_PERMISSION: &str = "org.freedesktop.NetworkManager.wifi.scan";

/// Delay between an accepted rescan and the completion notification.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Runs nmcli with `args` and returns stdout, or the stderr text as an error.
pub(crate) fn run(args: &[&str]) -> Result<String> {
    let output = Command::new("nmcli")
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute nmcli {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RadioError::NmcliExecution(stderr.trim().to_string()).into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Splits one line of terse (`-t`) output into fields.
///
/// Colons inside values are escaped as `\:` and backslashes as `\\`.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Converts NetworkManager's 0-100 signal quality to an approximate dBm level.
pub fn quality_to_dbm(quality: u8) -> i32 {
    i32::from(quality.min(100)) / 2 - 100
}

/// Parses one `SSID:BSSID:SIGNAL:FREQ:SECURITY` line.
fn parse_observation(line: &str) -> Result<NetworkObservation, RadioError> {
    let fields = split_terse(line);
    if fields.len() < 5 {
        return Err(RadioError::NmcliParse(format!(
            "expected 5 fields, got {}: {}",
            fields.len(),
            line
        )));
    }

    let quality: u8 = fields[2]
        .trim()
        .parse()
        .map_err(|_| RadioError::NmcliParse(format!("bad signal '{}'", fields[2])))?;

    // FREQ is printed with a unit, e.g. "2412 MHz".
    let frequency: u32 = fields[3]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| RadioError::NmcliParse(format!("bad frequency '{}'", fields[3])))?;

    Ok(NetworkObservation::new(
        fields[0].clone(),
        fields[1].clone(),
        quality_to_dbm(quality),
        fields[4..].join(":"),
        frequency,
    ))
}

/// Parses the full wifi list output, skipping lines that do not parse.
pub fn parse_wifi_list(stdout: &str) -> Vec<NetworkObservation> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_observation(line) {
            Ok(observation) => Some(observation),
            Err(e) => {
                warn!(error = %e, "skipping wifi list line");
                None
            }
        })
        .collect()
}

/// Returns whether the WiFi radio is switched on.
pub fn radio_enabled() -> Result<bool> {
    let stdout = run(&["radio", "wifi"])?;
    match stdout.trim() {
        "enabled" => Ok(true),
        "disabled" => Ok(false),
        other => Err(RadioError::NmcliParse(format!("unexpected radio state '{}'", other)).into()),
    }
}

/// Switches the WiFi radio on or off.
pub fn set_radio_enabled(enabled: bool) -> Result<()> {
    run(&["radio", "wifi", if enabled { "on" } else { "off" }])?;
    Ok(())
}

/// [`RadioControl`] backed by nmcli for a single interface.
pub struct NmcliRadio {
    interface: String,
    channel: Arc<LocalChannel>,
    settle_delay: Duration,
}

impl NmcliRadio {
    pub fn new(interface: impl Into<String>, channel: Arc<LocalChannel>) -> Self {
        Self {
            interface: interface.into(),
            channel,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl RadioControl for NmcliRadio {
    fn is_enabled(&self) -> bool {
        radio_enabled().unwrap_or_else(|e| {
            error!(error = %e, "failed to query radio state");
            false
        })
    }

    fn trigger_scan(&self) -> bool {
        if let Err(e) = run(&["device", "wifi", "rescan", "ifname", self.interface.as_str()]) {
            error!(interface = %self.interface, error = %e, "rescan request rejected");
            return false;
        }

        // NetworkManager finishes the rescan asynchronously; report completion
        // once it has had time to settle.
        let channel = Arc::clone(&self.channel);
        let delay = self.settle_delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            channel.deliver(ScanNotification::scan_completed(true));
        });
        true
    }

    fn current_results(&self) -> Option<Vec<NetworkObservation>> {
        let args = [
            "-t",
            "-f",
            "SSID,BSSID,SIGNAL,FREQ,SECURITY",
            "device",
            "wifi",
            "list",
            "ifname",
            self.interface.as_str(),
            "--rescan",
            "no",
        ];
        match run(&args) {
            Ok(stdout) => {
                let networks = parse_wifi_list(&stdout);
                debug!(interface = %self.interface, count = networks.len(), "read scan results");
                Some(networks)
            }
            Err(e) => {
                warn!(interface = %self.interface, error = %e, "scan results unavailable");
                None
            }
        }
    }
}

/// One NetworkManager permission and its grant value (`yes`, `no`, `auth`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEntry {
    pub name: String,
    pub value: String,
}

impl PermissionEntry {
    pub fn granted(&self) -> bool {
        self.value == "yes"
    }
}

/// Parses `PERMISSION:VALUE` lines.
pub fn parse_permissions(stdout: &str) -> Vec<PermissionEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            match fields.as_slice() {
                [name, value, ..] if !name.is_empty() => Some(PermissionEntry {
                    name: name.clone(),
                    value: value.trim().to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// [`PermissionCheck`] backed by `nmcli general permissions`.
pub struct NmcliPermissions {
    required: BTreeSet<String>,
}

impl Default for NmcliPermissions {
    fn default() -> Self {
        Self {
            required: [WIFI_SCAN_PERMISSION.to_string()].into_iter().collect(),
        }
    }
}

impl NmcliPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// All WiFi-related permissions and their values.
    pub fn report(&self) -> Result<Vec<PermissionEntry>> {
        let stdout = run(&["-t", "-f", "PERMISSION,VALUE", "general", "permissions"])?;
        Ok(parse_permissions(&stdout)
            .into_iter()
            .filter(|entry| entry.name.contains(".wifi") || entry.name.contains("enable-disable-wifi"))
            .collect())
    }

    fn missing_from(&self, entries: &[PermissionEntry]) -> BTreeSet<String> {
        self.required
            .iter()
            .filter(|name| !entries.iter().any(|entry| &entry.name == *name && entry.granted()))
            .cloned()
            .collect()
    }
}

impl PermissionCheck for NmcliPermissions {
    fn missing_capabilities(&self) -> BTreeSet<String> {
        match run(&["-t", "-f", "PERMISSION,VALUE", "general", "permissions"]) {
            Ok(stdout) => self.missing_from(&parse_permissions(&stdout)),
            Err(e) => {
                error!(error = %e, "failed to query NetworkManager permissions");
                self.required.clone()
            }
        }
    }
}
