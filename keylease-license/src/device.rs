//! Device identity for license binding.
//!
//! The license server binds a key to the hardware address of this machine,
//! so the identifier must come out the same on every run. It is derived from
//! the first non-loopback network interface that carries a hardware address
//! and is rendered as upper-case hex without separators (`AA11BB22CC33`).

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Supplies the stable identifier of this device.
pub trait DeviceIdProvider: Send + Sync {
    /// Returns the device identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::IdentityUnavailable`] if no identifier can be derived.
    fn device_id(&self) -> LicenseResult<String>;
}

/// Derives the device id from the local hardware (MAC) address.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareDeviceId;

impl DeviceIdProvider for HardwareDeviceId {
    fn device_id(&self) -> LicenseResult<String> {
        hardware_address().ok_or_else(|| {
            LicenseError::IdentityUnavailable(
                "no network interface with a hardware address".to_string(),
            )
        })
    }
}

/// A preconfigured device id, for overrides and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDeviceId(String);

impl FixedDeviceId {
    /// Creates a provider that always returns `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl DeviceIdProvider for FixedDeviceId {
    fn device_id(&self) -> LicenseResult<String> {
        if self.0.trim().is_empty() {
            return Err(LicenseError::IdentityUnavailable(
                "configured device id is empty".to_string(),
            ));
        }
        Ok(self.0.clone())
    }
}

/// Information about the current device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Operating system name.
    pub os_name: String,
    /// Operating system version.
    pub os_version: String,
    /// Hostname.
    pub hostname: String,
    /// CPU architecture.
    pub arch: String,
}

impl DeviceInfo {
    /// Collects information about the current device.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            os_name: env::consts::OS.to_string(),
            os_version: get_os_version(),
            hostname: get_hostname(),
            arch: env::consts::ARCH.to_string(),
        }
    }
}

/// Normalizes a textual hardware address (`aa:bb:cc:dd:ee:ff`,
/// `AA-BB-CC-DD-EE-FF` or bare hex) to upper-case hex without separators.
///
/// Returns `None` for malformed input and for the all-zero address.
#[must_use]
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .trim_matches('"')
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if hex.chars().all(|c| c == '0') {
        return None;
    }
    Some(hex.to_ascii_uppercase())
}

/// Picks the first usable address from `(interface, address)` pairs.
///
/// Loopback interfaces are skipped and the remaining candidates are ordered
/// by interface name so the choice does not depend on enumeration order.
#[must_use]
pub fn select_hardware_address<'a, I>(interfaces: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut candidates: Vec<(&str, String)> = interfaces
        .into_iter()
        .filter(|(name, _)| !is_loopback(name))
        .filter_map(|(name, addr)| normalize_mac(addr).map(|mac| (name, mac)))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(b.0));
    candidates.into_iter().next().map(|(_, mac)| mac)
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_ascii_lowercase().contains("loopback")
}

/// Reads the hardware address of this machine (platform-specific).
fn hardware_address() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        // Physical interfaces expose a `device` link; prefer those over
        // bridges and virtual links.
        let entries = std::fs::read_dir("/sys/class/net").ok()?;
        let mut physical = Vec::new();
        let mut virtual_ = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(addr) = std::fs::read_to_string(entry.path().join("address")) else {
                continue;
            };
            if entry.path().join("device").exists() {
                physical.push((name, addr));
            } else {
                virtual_.push((name, addr));
            }
        }
        select_hardware_address(physical.iter().map(|(n, a)| (n.as_str(), a.as_str())))
            .or_else(|| {
                select_hardware_address(virtual_.iter().map(|(n, a)| (n.as_str(), a.as_str())))
            })
    }

    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("ifconfig").output().ok()?;
        let text = String::from_utf8(output.stdout).ok()?;
        let mut pairs = Vec::new();
        let mut current = String::new();
        for line in text.lines() {
            if !line.starts_with(char::is_whitespace) {
                current = line.split(':').next().unwrap_or_default().to_string();
            } else if let Some(addr) = line.trim().strip_prefix("ether ") {
                pairs.push((current.clone(), addr.trim().to_string()));
            }
        }
        select_hardware_address(pairs.iter().map(|(n, a)| (n.as_str(), a.as_str())))
    }

    #[cfg(target_os = "windows")]
    {
        // `getmac /fo csv /nh` prints `"AA-BB-CC-DD-EE-FF","\Device\Tcpip_{...}"`
        let output = std::process::Command::new("getmac")
            .args(["/fo", "csv", "/nh"])
            .output()
            .ok()?;
        let text = String::from_utf8(output.stdout).ok()?;
        let pairs: Vec<(String, String)> = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split(',');
                let addr = fields.next()?.to_string();
                let name = fields.next().unwrap_or_default().to_string();
                Some((name, addr))
            })
            .collect();
        select_hardware_address(pairs.iter().map(|(n, a)| (n.as_str(), a.as_str())))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gets the OS version string.
fn get_os_version() -> String {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "windows")]
    {
        "windows".to_string()
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("VERSION_ID="))
                    .map(|l| {
                        l.trim_start_matches("VERSION_ID=")
                            .trim_matches('"')
                            .to_string()
                    })
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        "unknown".to_string()
    }
}
