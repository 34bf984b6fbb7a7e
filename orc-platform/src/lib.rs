//! Per-OS device enumeration (feeding C7's location set) and the
//! system inventory (C11).
//!
//! Grounded in the teacher's `platform/src/lib.rs`: one `DeviceManager`
//! implementation selected per `cfg(target_os)`, re-exported under a
//! single name so callers never match on the target platform
//! themselves.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "macos")]
pub mod macos;

pub mod inventory;

#[cfg(target_os = "linux")]
pub use linux::LinuxDeviceManager as PlatformDeviceManager;

#[cfg(target_os = "windows")]
pub use windows::WindowsDeviceManager as PlatformDeviceManager;

#[cfg(target_os = "macos")]
pub use macos::MacOSDeviceManager as PlatformDeviceManager;

pub use inventory::{collect, CurrentUser, NetworkAdapter, PhysicalDriveEntry, ProfileEntry, SystemIdentity};
