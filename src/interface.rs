use anyhow::Result;

use crate::error::RadioError;
use crate::nmcli;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiInterface {
    pub name: String,
    pub state: String,
}

/// List all WiFi interfaces known to NetworkManager
pub fn list_wifi_interfaces() -> Result<Vec<WifiInterface>> {
    let stdout = nmcli::run(&["-t", "-f", "DEVICE,TYPE,STATE", "device"])?;
    Ok(parse_device_list(&stdout))
}

fn parse_device_list(stdout: &str) -> Vec<WifiInterface> {
    stdout
        .lines()
        .filter_map(|line| {
            let parts = nmcli::split_terse(line);
            if parts.len() >= 3 && parts[1] == "wifi" {
                Some(WifiInterface {
                    name: parts[0].clone(),
                    state: parts[2].clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Get a specific interface by name, verifying it's a WiFi interface
pub fn get_interface(name: &str) -> Result<WifiInterface> {
    list_wifi_interfaces()?
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| RadioError::InterfaceNotFound(name.to_string()).into())
}

/// Resolve interface: explicit name, then the configured default, then the
/// first WiFi device
pub fn resolve_interface(interface: Option<&str>, default: Option<&str>) -> Result<WifiInterface> {
    match interface.or(default) {
        Some(name) => get_interface(name),
        None => list_wifi_interfaces()?
            .into_iter()
            .next()
            .ok_or_else(|| RadioError::NoWifiInterfaceFound.into()),
    }
}
