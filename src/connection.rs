//! Current connection info.
//!
//! Queries NetworkManager for what a WiFi interface is connected to right
//! now: device state, active profile, IP configuration and, when associated,
//! the SSID and signal of the access point in use.
//!
//! # Commands Executed
//! ```bash
//! nmcli -t device show <interface>
//! nmcli -t -f IN-USE,SSID,SIGNAL device wifi list ifname <interface> --rescan no
//! ```

use anyhow::Result;
use serde::Serialize;

use crate::nmcli;

/// Connection status of a WiFi interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// The name of the network interface (e.g., "wlan0").
    pub interface: String,

    /// Raw state string from nmcli (e.g., "100 (connected)").
    pub state: String,

    /// Active connection profile, None when disconnected.
    pub connection: Option<String>,

    /// IPv4 address with CIDR suffix.
    pub ip_address: Option<String>,

    pub gateway: Option<String>,

    /// SSID of the access point in use.
    pub ssid: Option<String>,

    /// Signal of the access point in use, in dBm.
    pub signal_level: Option<i32>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

/// Retrieves the connection status for the specified interface.
pub fn status(interface: &str) -> Result<ConnectionStatus> {
    let stdout = nmcli::run(&["-t", "device", "show", interface])?;
    let mut status = parse_device_show(interface, &stdout);

    if status.is_connected() {
        let list = nmcli::run(&[
            "-t",
            "-f",
            "IN-USE,SSID,SIGNAL",
            "device",
            "wifi",
            "list",
            "ifname",
            interface,
            "--rescan",
            "no",
        ])?;
        if let Some((ssid, signal_level)) = parse_in_use(&list) {
            status.ssid = Some(ssid);
            status.signal_level = Some(signal_level);
        }
    }

    Ok(status)
}

fn parse_device_show(interface: &str, stdout: &str) -> ConnectionStatus {
    let mut status = ConnectionStatus {
        interface: interface.to_string(),
        state: "unknown".to_string(),
        connection: None,
        ip_address: None,
        gateway: None,
        ssid: None,
        signal_level: None,
    };

    for line in stdout.lines() {
        // Split on first colon only (value might contain colons)
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let present = !value.is_empty() && value != "--";

        match key {
            "GENERAL.STATE" => status.state = value.to_string(),
            "GENERAL.CONNECTION" if present => status.connection = Some(value.to_string()),
            "IP4.ADDRESS[1]" if present => status.ip_address = Some(value.to_string()),
            "IP4.GATEWAY" if present => status.gateway = Some(value.to_string()),
            _ => {}
        }
    }

    status
}

/// Finds the row marked `*` in an `IN-USE,SSID,SIGNAL` listing.
fn parse_in_use(stdout: &str) -> Option<(String, i32)> {
    stdout.lines().find_map(|line| {
        let fields = nmcli::split_terse(line);
        match fields.as_slice() {
            [in_use, ssid, signal, ..] if in_use == "*" => {
                let quality: u8 = signal.trim().parse().ok()?;
                Some((ssid.clone(), nmcli::quality_to_dbm(quality)))
            }
            _ => None,
        }
    })
}

/// Prints connection status in a human-readable format.
///
/// ```text
/// Interface: wlan0
/// State:     100 (connected)
/// Connected: HomeNetwork
/// SSID:      HomeNetwork (-52 dBm)
/// IP:        192.168.1.23/24
/// Gateway:   192.168.1.1
/// ```
pub fn display_status(status: &ConnectionStatus) {
    println!("Interface: {}", status.interface);
    println!("State:     {}", status.state);

    match status.connection {
        Some(ref conn) => println!("Connected: {}", conn),
        None => println!("Connected: (none)"),
    }

    if let Some(ref ssid) = status.ssid {
        match status.signal_level {
            Some(level) => println!("SSID:      {} ({} dBm)", ssid, level),
            None => println!("SSID:      {}", ssid),
        }
    }

    if let Some(ref ip) = status.ip_address {
        println!("IP:        {}", ip);
    }

    if let Some(ref gw) = status.gateway {
        println!("Gateway:   {}", gw);
    }
}
