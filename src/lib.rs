//! gpuprov: two-phase NVIDIA driver provisioning for Linux hosts.

pub mod commands;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod runner;
pub mod setup;
pub mod state;

pub use commands::provision::{PhaseReport, Provisioner};
pub use commands::{Invocation, Phase};
pub use config::Config;
pub use error::{ProvisionError, ProvisionResult};
