//! Windows device enumeration, grounded in the teacher's
//! `platform/src/windows/device.rs`: shells out to PowerShell's
//! `Get-Disk`/`Get-Partition`/`Get-WmiObject Win32_DiskDrive` cmdlets
//! rather than calling `DeviceIoControl` directly, matching the
//! teacher's choice to keep the device-enumeration layer
//! dependency-light. `elevated()` below is grounded in the teacher's
//! `windows/elevation.rs::is_elevated`, reused unmodified since the
//! raw-handle check needed for §4.11's `elevated-flag` is identical
//! whether the process goes on to format or to collect.

use std::path::PathBuf;
use std::process::Command;

use orc_core::{Device, DeviceInfo, DeviceManager, DeviceType, Partition, PermissionLevel, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WindowsDisk {
    #[serde(rename = "Number")]
    number: u32,
    #[serde(rename = "FriendlyName")]
    friendly_name: Option<String>,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "BusType")]
    bus_type: Option<String>,
    #[serde(rename = "MediaType")]
    media_type: Option<String>,
    #[serde(rename = "IsSystem")]
    is_system: bool,
    #[serde(rename = "IsBoot")]
    is_boot: bool,
}

#[derive(Debug, Deserialize)]
struct WindowsPartition {
    #[serde(rename = "DriveLetter")]
    drive_letter: Option<String>,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "PartitionNumber")]
    partition_number: u32,
    #[serde(rename = "Type")]
    partition_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WmiDiskDrive {
    #[serde(rename = "DeviceID")]
    device_id: String,
    #[serde(rename = "Model")]
    model: Option<String>,
    #[serde(rename = "MediaType")]
    media_type: Option<String>,
    #[serde(rename = "InterfaceType")]
    interface_type: Option<String>,
}

pub struct WindowsDeviceManager;

impl WindowsDeviceManager {
    fn get_device_type(bus_type: Option<&str>, media_type: Option<&str>, interface_type: Option<&str>) -> DeviceType {
        if let Some(bus) = bus_type {
            match bus.to_uppercase().as_str() {
                "USB" => return DeviceType::Usb,
                "SD" | "MMC" => return DeviceType::SdCard,
                _ => {}
            }
        }
        if interface_type.map(|i| i.eq_ignore_ascii_case("usb")).unwrap_or(false) {
            return DeviceType::Usb;
        }
        if let Some(media) = media_type {
            let media_lower = media.to_lowercase();
            if media_lower.contains("removable") || media_lower.contains("external") {
                return DeviceType::Usb;
            }
            if media_lower.contains("fixed") {
                if bus_type.map(|b| b.eq_ignore_ascii_case("nvme")).unwrap_or(false) {
                    return DeviceType::Ssd;
                }
                return DeviceType::HardDisk;
            }
        }
        DeviceType::Unknown
    }

    fn is_removable(media_type: Option<&str>, bus_type: Option<&str>) -> bool {
        if let Some(media) = media_type {
            if media.to_lowercase().contains("removable") || media.to_lowercase().contains("external") {
                return true;
            }
        }
        bus_type.map(|b| matches!(b.to_uppercase().as_str(), "USB" | "SD" | "MMC")).unwrap_or(false)
    }

    fn run_powershell_json<T: serde::de::DeserializeOwned>(command: &str) -> Result<Vec<T>> {
        let output = Command::new("powershell.exe")
            .args(["-NoProfile", "-Command", command])
            .output()
            .map_err(|e| orc_core::OrcError::Other(format!("failed to run PowerShell: {e}")))?;
        if !output.status.success() {
            return Err(orc_core::OrcError::Other("PowerShell command failed".into()));
        }
        let json_str = String::from_utf8_lossy(&output.stdout);
        let trimmed = json_str.trim();
        if trimmed.is_empty() {
            return Ok(vec![]);
        }
        if trimmed.starts_with('[') {
            serde_json::from_str(trimmed).map_err(orc_core::OrcError::Serialization)
        } else {
            let single: T = serde_json::from_str(trimmed).map_err(orc_core::OrcError::Serialization)?;
            Ok(vec![single])
        }
    }

    fn get_partitions(disk_number: u32) -> Vec<Partition> {
        let command = format!(
            "Get-Partition | Where-Object {{$_.DiskNumber -eq {disk_number}}} | Select-Object DiskNumber, PartitionNumber, DriveLetter, Size, Type | ConvertTo-Json"
        );
        let partitions: Vec<WindowsPartition> = Self::run_powershell_json(&command).unwrap_or_default();
        partitions
            .into_iter()
            .map(|p| {
                let mount_point = p.drive_letter.map(|letter| PathBuf::from(format!("{letter}:")));
                Partition { id: format!("Partition{}", p.partition_number), size: p.size, filesystem: p.partition_type, mount_point }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl DeviceManager for WindowsDeviceManager {
    async fn enumerate_devices(&self) -> Result<Vec<Device>> {
        let disks: Vec<WindowsDisk> = Self::run_powershell_json(
            "Get-Disk | Select-Object Number, FriendlyName, Size, BusType, MediaType, IsSystem, IsBoot | ConvertTo-Json",
        )?;
        let wmi_drives: Vec<WmiDiskDrive> = Self::run_powershell_json(
            "Get-WmiObject Win32_DiskDrive | Select-Object DeviceID, Model, MediaType, InterfaceType | ConvertTo-Json",
        )
        .unwrap_or_default();

        let mut devices = Vec::new();
        for disk in disks {
            let wmi = wmi_drives.iter().find(|d| d.device_id == format!(r"\\.\PHYSICALDRIVE{}", disk.number));
            let partitions = Self::get_partitions(disk.number);
            let mount_points: Vec<PathBuf> = partitions.iter().filter_map(|p| p.mount_point.clone()).collect();

            let name = wmi
                .and_then(|w| w.model.clone())
                .or(disk.friendly_name)
                .unwrap_or_else(|| format!("Disk {}", disk.number));
            let device_type = Self::get_device_type(
                disk.bus_type.as_deref(),
                wmi.and_then(|w| w.media_type.as_deref()).or(disk.media_type.as_deref()),
                wmi.and_then(|w| w.interface_type.as_deref()),
            );
            let is_removable = Self::is_removable(
                wmi.and_then(|w| w.media_type.as_deref()).or(disk.media_type.as_deref()),
                disk.bus_type.as_deref(),
            );

            devices.push(Device {
                id: format!(r"\\.\PHYSICALDRIVE{}", disk.number),
                name,
                size: disk.size,
                device_type,
                mount_points,
                is_removable,
                is_system: disk.is_system || disk.is_boot,
                filesystem: None,
                serial: None,
            });
        }

        devices.sort_by(|a, b| match (a.is_removable, b.is_removable) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.id.cmp(&b.id),
        });
        Ok(devices)
    }

    async fn get_device_info(&self, device: &Device) -> Result<DeviceInfo> {
        let disk_number: u32 = device
            .id
            .trim_start_matches(r"\\.\PHYSICALDRIVE")
            .parse()
            .map_err(|_| orc_core::OrcError::Other("invalid device id".into()))?;
        let partitions = Self::get_partitions(disk_number);
        let filesystem = partitions.first().and_then(|p| p.filesystem.clone());
        Ok(DeviceInfo { device: device.clone(), filesystem, label: None, used_space: None, free_space: None, partitions })
    }

    async fn check_permissions(&self, _device: &Device) -> Result<PermissionLevel> {
        if elevated() {
            Ok(PermissionLevel::RawDevice)
        } else {
            Ok(PermissionLevel::MountedOnly)
        }
    }
}

/// Whether the current process token carries `TokenIsElevated`
/// (§4.11's `elevated-flag`).
#[cfg(target_os = "windows")]
pub fn elevated() -> bool {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let process = GetCurrentProcess();
        let mut token_handle = windows::Win32::Foundation::HANDLE::default();
        if OpenProcessToken(process, TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }
        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut return_length = 0u32;
        let result = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );
        let _ = CloseHandle(token_handle);
        result.is_ok() && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(target_os = "windows"))]
pub fn elevated() -> bool {
    false
}
