//! Hardware Detection Module
//!
//! Read-only probes of the host: distribution, PCI GPUs and loaded drivers.
//! Probes never fail; they report what they observed.

pub mod gpu;
pub mod host;
pub mod modules;

use serde::Serialize;

pub use gpu::{scan_hardware, DeviceClass, GpuDevice, HardwareInventory};
pub use host::{identify_host, Distribution, HostProfile};
pub use modules::{scan_loaded_drivers, DriverState};

/// Answer of a presence probe. A failed query is never reported as absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    Found,
    NotFound,
    QueryFailed(String),
}

impl Detection {
    pub fn from_presence(present: bool) -> Self {
        if present {
            Detection::Found
        } else {
            Detection::NotFound
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Detection::Found)
    }
}
