//! Physical-drive/volume discovery contract shared by `orc-platform`'s
//! per-OS device managers and `orc-collect`'s location set (C7) and
//! system inventory (C11).
//!
//! Grounded in the teacher's `moses-core::{Device, DeviceInfo,
//! DeviceManager}` (`core/src/lib.rs`), generalized from "is this safe
//! to format" to "what can be read from this host for collection":
//! `is_safe_to_format`/`FormatOptions` are dropped (this pipeline never
//! writes to a target volume, per the read-only non-goal in §1), and
//! `check_permissions` is kept because §4.11's `elevated-flag` needs the
//! same privilege check the teacher used to gate destructive operations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub device_type: DeviceType,
    pub mount_points: Vec<PathBuf>,
    pub is_removable: bool,
    pub is_system: bool,
    pub filesystem: Option<String>,
    pub serial: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    HardDisk,
    Ssd,
    Usb,
    SdCard,
    OpticalDrive,
    Virtual,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: Device,
    pub label: Option<String>,
    pub used_space: Option<u64>,
    pub free_space: Option<u64>,
    pub partitions: Vec<Partition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub id: String,
    pub size: u64,
    pub filesystem: Option<String>,
    pub mount_point: Option<PathBuf>,
}

/// Fed into §4.11's `elevated-flag`: whether the current process can
/// open a physical drive for raw sector reads, only a mounted volume
/// handle, or neither.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PermissionLevel {
    ReadOnly,
    MountedOnly,
    RawDevice,
}

/// Per-OS device enumeration, implemented by `orc-platform`. `orc-core`
/// only owns the contract so `orc-collect::location` can depend on it
/// without pulling in any OS-specific code.
#[async_trait::async_trait]
pub trait DeviceManager: Send + Sync {
    async fn enumerate_devices(&self) -> crate::Result<Vec<Device>>;
    async fn get_device_info(&self, device: &Device) -> crate::Result<DeviceInfo>;
    async fn check_permissions(&self, device: &Device) -> crate::Result<PermissionLevel>;
}
