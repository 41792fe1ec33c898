//! Setup Module
//!
//! Host mutations: driver exclusion, prerequisites, boot image, and the
//! NVIDIA driver download and install.

pub mod blacklist;
pub mod downloader;
pub mod driver;
pub mod initramfs;
pub mod packages;
pub mod paths;
pub mod version;
