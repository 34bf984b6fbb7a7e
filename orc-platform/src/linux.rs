//! Linux device enumeration, grounded in the teacher's
//! `platform/src/linux/device.rs`: shells out to `lsblk` for the
//! primary listing, falls back to `/sys/block` when `lsblk` is
//! unavailable, and reads `/proc/mounts` for mount points. Generalized
//! from "can I format this" to "can I open this for raw sector reads",
//! so `is_safe_to_format`/write-oriented checks are dropped and
//! `check_permissions` reports a three-way [`PermissionLevel`] instead
//! of a yes/no.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use orc_core::{Device, DeviceInfo, DeviceManager, DeviceType, Partition, PermissionLevel, Result};

pub struct LinuxDeviceManager;

impl LinuxDeviceManager {
    fn is_removable(device_name: &str) -> bool {
        let path = format!("/sys/block/{device_name}/removable");
        fs::read_to_string(path).map(|c| c.trim() == "1").unwrap_or(false)
    }

    fn get_device_type(device_name: &str) -> DeviceType {
        if Self::is_removable(device_name) {
            if device_name.starts_with("mmcblk") {
                return DeviceType::SdCard;
            }
            return DeviceType::Usb;
        }
        let rotational_path = format!("/sys/block/{device_name}/queue/rotational");
        let is_rotational = fs::read_to_string(rotational_path).map(|c| c.trim() == "1").unwrap_or(true);
        if is_rotational {
            DeviceType::HardDisk
        } else {
            DeviceType::Ssd
        }
    }

    fn get_mount_points(device_path: &str) -> Vec<PathBuf> {
        let mut mount_points = Vec::new();
        if let Ok(mounts) = fs::read_to_string("/proc/mounts") {
            for line in mounts.lines() {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 && parts[0].starts_with(device_path) {
                    mount_points.push(PathBuf::from(parts[1]));
                }
            }
        }
        mount_points
    }

    fn is_system_disk(device_path: &str, mount_points: &[PathBuf]) -> bool {
        for mount in mount_points {
            let path_str = mount.to_string_lossy();
            if path_str == "/"
                || path_str == "/boot"
                || path_str == "/boot/efi"
                || path_str.starts_with("/sys")
                || path_str.starts_with("/proc")
            {
                return true;
            }
        }
        fs::read_to_string("/proc/cmdline").map(|c| c.contains(device_path)).unwrap_or(false)
    }

    fn get_device_model(device_name: &str) -> String {
        if let Ok(model) = fs::read_to_string(format!("/sys/block/{device_name}/device/model")) {
            return model.trim().to_string();
        }
        if let Ok(vendor) = fs::read_to_string(format!("/sys/block/{device_name}/device/vendor")) {
            return vendor.trim().to_string();
        }
        device_name.to_uppercase()
    }

    /// Shells out to `lsblk`, hand-parsing its `-P` (key="value")
    /// output since not every distribution's `lsblk` supports JSON
    /// output.
    fn parse_lsblk_output(&self) -> Result<Vec<Device>> {
        let output = Command::new("lsblk")
            .args(["-b", "-P", "-o", "NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,MODEL,VENDOR,RM,RO"])
            .output()
            .map_err(|e| orc_core::OrcError::Other(format!("failed to run lsblk: {e}")))?;
        if !output.status.success() {
            return Err(orc_core::OrcError::Other("lsblk command failed".into()));
        }

        let output_str = String::from_utf8_lossy(&output.stdout);
        let mut devices = Vec::new();

        for line in output_str.lines() {
            let fields = parse_key_value_line(line);
            if fields.get("TYPE").map(|t| t != "disk").unwrap_or(true) {
                continue;
            }
            let name = match fields.get("NAME") {
                Some(n) if !n.is_empty() => n.clone(),
                _ => continue,
            };

            let device_path = format!("/dev/{name}");
            let size = fields.get("SIZE").and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
            let mount_points = Self::get_mount_points(&device_path);
            let is_system = Self::is_system_disk(&device_path, &mount_points);
            let model = fields
                .get("MODEL")
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| Self::get_device_model(&name));
            let is_removable =
                fields.get("RM").map(|rm| rm == "1").unwrap_or_else(|| Self::is_removable(&name));

            devices.push(Device {
                id: device_path,
                name: if model.is_empty() { name.clone() } else { format!("{model} ({name})") },
                size,
                device_type: Self::get_device_type(&name),
                mount_points,
                is_removable,
                is_system,
                filesystem: fields.get("FSTYPE").cloned().filter(|f| !f.is_empty()),
                serial: None,
            });
        }

        devices.sort_by(|a, b| match (a.is_removable, b.is_removable) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        Ok(devices)
    }

    fn get_partitions(&self, device_path: &str) -> Vec<Partition> {
        let mut partitions = Vec::new();
        if let Ok(output) =
            Command::new("lsblk").args(["-b", "-n", "-o", "NAME,SIZE,FSTYPE,MOUNTPOINT", device_path]).output()
        {
            let output_str = String::from_utf8_lossy(&output.stdout);
            for (i, line) in output_str.lines().enumerate() {
                if i == 0 {
                    continue;
                }
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 {
                    let name = parts[0].trim_start_matches(['├', '└', '─']);
                    let size = parts[1].parse::<u64>().unwrap_or(0);
                    let filesystem = parts.get(2).map(|s| s.to_string());
                    let mount_point = parts.get(3).map(PathBuf::from);
                    partitions.push(Partition { id: format!("/dev/{name}"), size, filesystem, mount_point });
                }
            }
        }
        partitions
    }
}

fn parse_key_value_line(line: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                if !in_quotes && !key.is_empty() {
                    fields.insert(std::mem::take(&mut key), std::mem::take(&mut value));
                }
            }
            '=' if !in_quotes => {}
            ' ' if !in_quotes => {}
            _ if in_quotes => value.push(ch),
            _ => key.push(ch),
        }
    }
    fields
}

#[async_trait::async_trait]
impl DeviceManager for LinuxDeviceManager {
    async fn enumerate_devices(&self) -> Result<Vec<Device>> {
        if let Ok(devices) = self.parse_lsblk_output() {
            if !devices.is_empty() {
                return Ok(devices);
            }
        }

        let mut devices = Vec::new();
        let sys_block = Path::new("/sys/block");
        if !sys_block.exists() {
            return Err(orc_core::OrcError::Other("cannot access /sys/block".into()));
        }
        for entry in fs::read_dir(sys_block)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("loop") || name.starts_with("ram") {
                continue;
            }
            let size = fs::read_to_string(format!("/sys/block/{name}/size"))
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0)
                * 512;
            if size == 0 {
                continue;
            }
            let device_path = format!("/dev/{name}");
            let mount_points = Self::get_mount_points(&device_path);
            let is_system = Self::is_system_disk(&device_path, &mount_points);
            devices.push(Device {
                id: device_path,
                name: Self::get_device_model(&name),
                size,
                device_type: Self::get_device_type(&name),
                mount_points,
                is_removable: Self::is_removable(&name),
                is_system,
                filesystem: None,
                serial: None,
            });
        }
        Ok(devices)
    }

    async fn get_device_info(&self, device: &Device) -> Result<DeviceInfo> {
        let partitions = self.get_partitions(&device.id);
        let output = Command::new("blkid").arg(&device.id).output().ok();
        let blkid_stdout = output.as_ref().and_then(|o| String::from_utf8(o.stdout.clone()).ok());
        let label = blkid_stdout.as_ref().and_then(|s| {
            s.split_whitespace()
                .find(|p| p.starts_with("LABEL="))
                .map(|p| p.trim_start_matches("LABEL=").trim_matches('"').to_string())
        });

        let (used_space, free_space) = if let Some(mount) = device.mount_points.first() {
            df_used_and_free(mount)
        } else {
            (None, None)
        };

        Ok(DeviceInfo { device: device.clone(), label, used_space, free_space, partitions })
    }

    async fn check_permissions(&self, _device: &Device) -> Result<PermissionLevel> {
        if nix::unistd::geteuid().is_root() {
            return Ok(PermissionLevel::RawDevice);
        }
        if let Ok(groups) = nix::unistd::getgroups() {
            if let Ok(Some(disk_group)) = nix::unistd::Group::from_name("disk") {
                if groups.contains(&disk_group.gid) {
                    return Ok(PermissionLevel::MountedOnly);
                }
            }
        }
        Ok(PermissionLevel::ReadOnly)
    }
}

fn df_used_and_free(mount: &Path) -> (Option<u64>, Option<u64>) {
    let output = match Command::new("df").args(["-B1", &mount.to_string_lossy()]).output() {
        Ok(o) => o,
        Err(_) => return (None, None),
    };
    let output_str = String::from_utf8_lossy(&output.stdout);
    match output_str.lines().nth(1) {
        Some(line) => {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 4 {
                (parts[2].parse().ok(), parts[3].parse().ok())
            } else {
                (None, None)
            }
        }
        None => (None, None),
    }
}
