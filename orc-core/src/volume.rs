use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem type recognized on a volume's boot sector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilesystemType {
    Ntfs,
    Fat12,
    Fat16,
    Fat32,
    ExFat,
    Unknown,
}

/// How a volume's backing store is opened.
///
/// A sum type with an explicit method table is preferred over deep
/// inheritance for dispatching between backends (design note in §9) —
/// `crate::stream`/`orc-fs::volume_reader` match on this rather than
/// using a trait object hierarchy of backend structs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendKind {
    PhysicalDrive { path: PathBuf, partition_offset: u64 },
    Partition { disk_path: PathBuf, offset: u64, length: u64 },
    MountedVolume { path: PathBuf },
    DiskImage { path: PathBuf },
    ShadowCopy { guid: uuid::Uuid },
    BitLocker { path: PathBuf },
}

/// The altitude at which a location is read, per §3: `lowest` reads
/// through a physical-drive/partition offset, `highest` reads through a
/// mounted-volume handle, `exact` uses a caller-provided device path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Altitude {
    Lowest,
    Highest,
    Exact,
}

/// Volume identity, per §3. Two volumes with equal serial and equal
/// snapshot GUID are the same volume; mount-point lists are merged by
/// `LocationSet::consolidate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub serial: u64,
    pub backend: BackendKind,
    pub fs_type: FilesystemType,
    pub cluster_size: u32,
    pub sector_count: u64,
    pub physical_sector_size: u32,
    pub logical_sector_size: u32,
    pub mount_points: Vec<PathBuf>,
    pub is_valid: bool,
    pub diagnostic: Option<String>,
    pub parent: Option<Box<Volume>>,
    pub shadow_guid: Option<uuid::Uuid>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Volume {
    /// Identity key used by `LocationSet::consolidate` to merge
    /// duplicates: equal serial and equal snapshot GUID means "the same
    /// volume", per §3.
    pub fn identity_key(&self) -> (u64, Option<uuid::Uuid>) {
        (self.serial, self.shadow_guid)
    }

    pub fn merge_mount_points(&mut self, other: &Volume) {
        for mp in &other.mount_points {
            if !self.mount_points.contains(mp) {
                self.mount_points.push(mp.clone());
            }
        }
    }

    pub fn is_shadow_copy(&self) -> bool {
        self.shadow_guid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_volume(serial: u64, guid: Option<uuid::Uuid>) -> Volume {
        Volume {
            serial,
            backend: BackendKind::MountedVolume { path: "/mnt/x".into() },
            fs_type: FilesystemType::Ntfs,
            cluster_size: 4096,
            sector_count: 1000,
            physical_sector_size: 512,
            logical_sector_size: 512,
            mount_points: vec![],
            is_valid: true,
            diagnostic: None,
            parent: None,
            shadow_guid: guid,
            created_at: None,
        }
    }

    #[test]
    fn identity_key_distinguishes_snapshots() {
        let live = sample_volume(42, None);
        let snap = sample_volume(42, Some(uuid::Uuid::nil()));
        assert_ne!(live.identity_key(), snap.identity_key());
    }

    #[test]
    fn merge_mount_points_is_idempotent_and_deduped() {
        let mut a = sample_volume(1, None);
        a.mount_points.push("C:\\".into());
        let mut b = sample_volume(1, None);
        b.mount_points.push("C:\\".into());
        b.mount_points.push("D:\\".into());

        a.merge_mount_points(&b);
        a.merge_mount_points(&b);
        assert_eq!(a.mount_points.len(), 2);
    }
}
