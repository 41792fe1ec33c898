//! GPU Detection for Linux
//!
//! Two-pass filter over the PCI bus:
//! 1. `lspci` lines whose description names the vendor
//! 2. `lspci -n -s <bus>` class code must be VGA (0x0300) or 3D (0x0302)
//!
//! The second pass exists because the vendor also ships non-display functions
//! (USB-C controllers, audio) that must not count as a GPU.

use serde::Serialize;

use crate::runner::{args, CommandRunner};

/// PCI class code for a VGA-compatible display controller
const CLASS_VGA: u16 = 0x0300;
/// PCI class code for a 3D controller
const CLASS_3D: u16 = 0x0302;

/// Display-class classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Vga,
    #[serde(rename = "3d")]
    ThreeD,
    Other,
}

impl DeviceClass {
    pub fn from_class_code(code: u16) -> Self {
        match code {
            CLASS_VGA => DeviceClass::Vga,
            CLASS_3D => DeviceClass::ThreeD,
            _ => DeviceClass::Other,
        }
    }

    pub fn is_display(&self) -> bool {
        matches!(self, DeviceClass::Vga | DeviceClass::ThreeD)
    }
}

/// A PCI function found during the scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuDevice {
    pub bus_address: String,
    pub description: String,
    pub vendor_match: bool,
    pub device_class: DeviceClass,
}

impl GpuDevice {
    pub fn is_target(&self) -> bool {
        self.vendor_match && self.device_class.is_display()
    }
}

/// Qualifying GPUs on this host
#[derive(Debug, Clone, Default, Serialize)]
pub struct HardwareInventory {
    pub devices: Vec<GpuDevice>,
    /// Set when the bus could not be enumerated at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_error: Option<String>,
}

impl HardwareInventory {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Scan the PCI bus for qualifying `vendor` GPUs
pub async fn scan_hardware(runner: &dyn CommandRunner, vendor: &str) -> HardwareInventory {
    let listing = match runner.run("lspci", &[]).await {
        Ok(outcome) if outcome.success() => outcome.stdout,
        Ok(outcome) => {
            return HardwareInventory {
                devices: Vec::new(),
                query_error: Some(format!("lspci exited with {:?}: {}", outcome.exit_code, outcome.tail(3))),
            };
        }
        Err(e) => {
            return HardwareInventory {
                devices: Vec::new(),
                query_error: Some(e.to_string()),
            };
        }
    };

    let vendor_lower = vendor.to_lowercase();
    let mut devices = Vec::new();

    for (bus_address, description) in listing.lines().filter_map(split_lspci_line) {
        if !description.to_lowercase().contains(&vendor_lower) {
            continue;
        }

        let device_class = match query_class_code(runner, bus_address).await {
            Some(code) => DeviceClass::from_class_code(code),
            None => {
                tracing::warn!(bus = bus_address, "Could not read PCI class code; ignoring device");
                DeviceClass::Other
            }
        };

        let device = GpuDevice {
            bus_address: bus_address.to_string(),
            description: description.to_string(),
            vendor_match: true,
            device_class,
        };

        if device.is_target() {
            tracing::info!(bus = %device.bus_address, class = ?device.device_class, "Found GPU: {}", device.description);
            devices.push(device);
        } else {
            tracing::debug!(bus = %device.bus_address, "Skipping non-display {} function: {}", vendor, device.description);
        }
    }

    HardwareInventory {
        devices,
        query_error: None,
    }
}

/// "00:1e.0 3D controller: NVIDIA Corporation GK210GL [Tesla K80] (rev a1)"
fn split_lspci_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (bus, rest) = line.split_once(char::is_whitespace)?;
    Some((bus, rest.trim()))
}

/// `lspci -n -s 00:1e.0` -> "00:1e.0 0302: 10de:102d (rev a1)" -> 0x0302
async fn query_class_code(runner: &dyn CommandRunner, bus_address: &str) -> Option<u16> {
    let outcome = runner
        .run("lspci", &args(&["-n", "-s", bus_address]))
        .await
        .ok()
        .filter(|o| o.success())?;
    parse_class_code(&outcome.stdout)
}

fn parse_class_code(numeric_line: &str) -> Option<u16> {
    let token = numeric_line.lines().next()?.split_whitespace().nth(1)?;
    u16::from_str_radix(token.trim_end_matches(':'), 16).ok()
}
