//! Location set (C7, §4.7): discovers, canonicalises, filters, and
//! iterates storage locations.
//!
//! Grounded in the teacher's `disk_manager` (device candidates flow in
//! from outside, get deduped and classified) generalized from "list
//! devices to offer the user" to "merge location specs against already
//! enumerated volumes, expand shadow copies, apply exclusions" per
//! §4.7. Device/VSS *discovery* stays an external collaborator's job
//! (`orc-platform` enumerates devices; this module only consolidates
//! candidate [`Volume`]s against the specs the caller asked for).

use std::collections::HashMap;

use orc_core::config::{ShadowConfig, ShadowPolicy};
use orc_core::{BackendKind, FilesystemType, OrcError, Result, Volume};
use uuid::Uuid;

use orc_fs::vss::{
    diff_areas_for, overwritten_blocks, snapshots_in, walk_catalog, walk_diff_location_table,
    CatalogBlock, DiffAreaView, SnapshotInfo, BLOCK_SIZE,
};
use orc_fs::{Backend, VolumeReader};

/// One entry passed to [`LocationSet::add`] (§4.7): "a device path, a
/// drive letter, a directory pattern, or the literal `*`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationSpec {
    /// Every volume the caller enumerated, e.g. the literal `*`.
    All,
    /// An exact backend device path (`\\.\PhysicalDrive0`, `/dev/sda`, an
    /// image file path).
    DevicePath(String),
    /// A single mounted-volume root (`C:\`, `/mnt/data`).
    MountPoint(std::path::PathBuf),
    /// A directory somewhere under a volume; matches whichever
    /// candidate volume's mount point is a prefix of the pattern.
    DirectoryPattern(String),
}

impl LocationSpec {
    /// Parses one location string (§4.7). Recognizes `*`, a bare drive
    /// letter (`C:`), a device path (`\\.\PhysicalDriveN` or `/dev/...`),
    /// and falls back to treating anything else as a directory pattern.
    pub fn parse(spec: &str) -> LocationSpec {
        let trimmed = spec.trim();
        if trimmed == "*" {
            return LocationSpec::All;
        }
        if trimmed.starts_with(r"\\.\") || trimmed.starts_with("/dev/") {
            return LocationSpec::DevicePath(trimmed.to_string());
        }
        if trimmed.len() <= 3 && trimmed.chars().next().map(|c| c.is_ascii_alphabetic()) == Some(true)
            && trimmed.chars().nth(1) == Some(':')
        {
            return LocationSpec::MountPoint(std::path::PathBuf::from(format!(
                "{}\\",
                &trimmed[..2]
            )));
        }
        LocationSpec::DirectoryPattern(trimmed.to_string())
    }

    fn matches(&self, volume: &Volume) -> bool {
        match self {
            LocationSpec::All => true,
            LocationSpec::DevicePath(p) => match &volume.backend {
                BackendKind::PhysicalDrive { path, .. } => path.to_string_lossy() == *p,
                BackendKind::Partition { disk_path, .. } => disk_path.to_string_lossy() == *p,
                BackendKind::MountedVolume { path } => path.to_string_lossy() == *p,
                BackendKind::DiskImage { path } => path.to_string_lossy() == *p,
                BackendKind::BitLocker { path } => path.to_string_lossy() == *p,
                BackendKind::ShadowCopy { .. } => false,
            },
            LocationSpec::MountPoint(mp) => volume.mount_points.iter().any(|m| m == mp),
            LocationSpec::DirectoryPattern(pattern) => volume.mount_points.iter().any(|m| {
                let m = m.to_string_lossy();
                pattern.starts_with(m.as_ref())
            }),
        }
    }
}

const DEFAULT_FS_TYPES: &[FilesystemType] = &[
    FilesystemType::Ntfs,
    FilesystemType::Fat12,
    FilesystemType::Fat16,
    FilesystemType::Fat32,
    FilesystemType::ExFat,
];

/// Discovers, canonicalises, filters, and iterates storage locations
/// (§3 "Location set", §4.7).
pub struct LocationSet {
    specs: Vec<LocationSpec>,
    volumes: HashMap<(u64, Option<Uuid>), Volume>,
    shadows: ShadowConfig,
    excludes: Vec<glob::Pattern>,
}

impl LocationSet {
    pub fn new(shadows: ShadowConfig, excludes: &[String]) -> Result<Self> {
        let excludes = excludes
            .iter()
            .map(|g| glob::Pattern::new(g).map_err(|e| OrcError::Configuration(format!("bad exclude glob {g:?}: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(LocationSet { specs: Vec::new(), volumes: HashMap::new(), shadows, excludes })
    }

    pub fn add(&mut self, spec: &str) {
        self.specs.push(LocationSpec::parse(spec));
    }

    /// Injects default profile/system paths (§4.7): `%SystemRoot%\System32`
    /// plus every profile home the caller already discovered. Profile
    /// discovery itself is an external collaborator's job (`orc-platform`'s
    /// profile enumeration feeds C11 and, via this call, C7).
    pub fn add_known_locations(&mut self, profile_homes: &[std::path::PathBuf]) {
        self.specs.push(LocationSpec::DirectoryPattern(r"C:\Windows\System32".to_string()));
        for home in profile_homes {
            self.specs.push(LocationSpec::DirectoryPattern(home.to_string_lossy().to_string()));
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excludes.iter().any(|p| p.matches(path))
    }

    /// Merges `candidates` into the consolidated set (§4.7): only
    /// volumes matching at least one added spec and recognised as
    /// NTFS/FAT survive; duplicates (by [`Volume::identity_key`]) have
    /// their mount-point lists merged. Idempotent by content — calling
    /// this twice with the same candidates yields the same volume set
    /// (§8 testable property).
    pub fn consolidate(&mut self, candidates: Vec<Volume>) -> Result<()> {
        for cand in candidates {
            if !DEFAULT_FS_TYPES.contains(&cand.fs_type) {
                continue;
            }
            if !self.specs.is_empty() && !self.specs.iter().any(|s| s.matches(&cand)) {
                continue;
            }
            let key = cand.identity_key();
            match self.volumes.get_mut(&key) {
                Some(existing) => existing.merge_mount_points(&cand),
                None => {
                    self.volumes.insert(key, cand);
                }
            }
        }
        self.expand_shadows()?;
        Ok(())
    }

    /// Shadow policy resolution (§4.7): for each live NTFS volume, reads
    /// its VSS catalog (best-effort — a volume with no discoverable
    /// catalog is left with no shadow copies rather than failing
    /// consolidation), orders snapshots by creation time ascending, and
    /// selects per `self.shadows.policy`.
    fn expand_shadows(&mut self) -> Result<()> {
        if matches!(self.shadows.policy, ShadowPolicy::None) {
            return Ok(());
        }
        let live_volumes: Vec<Volume> = self
            .volumes
            .values()
            .filter(|v| v.shadow_guid.is_none() && v.fs_type == FilesystemType::Ntfs)
            .cloned()
            .collect();

        for live in live_volumes {
            let mut snapshots = match discover_snapshots(&live) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("VSS catalog unavailable for volume {}: {}", live.serial, e);
                    continue;
                }
            };
            snapshots.sort_by_key(|s| s.creation_time);

            let selected: Vec<SnapshotInfo> = match &self.shadows.policy {
                ShadowPolicy::None => vec![],
                ShadowPolicy::Newest => snapshots.pop().into_iter().collect(),
                ShadowPolicy::Oldest => snapshots.into_iter().take(1).collect(),
                ShadowPolicy::All => snapshots,
                ShadowPolicy::SpecificGuids => {
                    let mut out = Vec::new();
                    for guid in &self.shadows.guids {
                        if let Some(s) = snapshots.iter().find(|s| s.guid == *guid) {
                            out.push(s.clone());
                        } else {
                            log::warn!("requested shadow GUID {guid} not found on volume {}", live.serial);
                        }
                    }
                    out
                }
            };

            for snap in selected {
                let key = (live.serial, Some(snap.guid));
                if self.volumes.contains_key(&key) {
                    continue;
                }
                let shadow_volume = Volume {
                    serial: live.serial,
                    backend: BackendKind::ShadowCopy { guid: snap.guid },
                    fs_type: live.fs_type,
                    cluster_size: live.cluster_size,
                    sector_count: live.sector_count,
                    physical_sector_size: live.physical_sector_size,
                    logical_sector_size: live.logical_sector_size,
                    mount_points: live.mount_points.clone(),
                    is_valid: true,
                    diagnostic: None,
                    parent: Some(Box::new(live.clone())),
                    shadow_guid: Some(snap.guid),
                    created_at: Some(snap.creation_time),
                };
                self.volumes.insert(key, shadow_volume);
            }
        }
        Ok(())
    }

    /// Every `Volume` yielded has `is_valid == true` or an attached
    /// diagnostic (§4.7 invariant), in a deterministic order (serial,
    /// then live-before-shadow, then GUID) so repeated runs enumerate
    /// identically.
    pub fn enumerate(&self) -> Vec<Volume> {
        let mut out: Vec<Volume> = self.volumes.values().cloned().collect();
        out.sort_by(|a, b| a.serial.cmp(&b.serial).then(a.shadow_guid.cmp(&b.shadow_guid)));
        out
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

impl std::fmt::Display for LocationSet {
    /// A `Text::Print`-style human-readable dump of the consolidated
    /// set, matching upstream `Text/Print/LocationSet.cpp`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Locations ({}):", self.volumes.len())?;
        for volume in self.enumerate() {
            let kind = if volume.is_shadow_copy() { "shadow" } else { "live" };
            writeln!(
                f,
                "  [{kind}] serial={:#x} fs={:?} mounts={:?}",
                volume.serial, volume.fs_type, volume.mount_points
            )?;
        }
        Ok(())
    }
}

/// Locates and parses a volume's VSS catalog by opening a reader over
/// it, finding the VSS store file via its well-known name (§4.6), and
/// walking the catalog block chain within that file's data stream.
fn discover_snapshots(volume: &Volume) -> Result<Vec<SnapshotInfo>> {
    let (_store, blocks) = load_vss_catalog(volume)?;
    Ok(snapshots_in(&blocks))
}

/// Shared by `discover_snapshots` and `diff_area_for_shadow`: reads the
/// VSS store stream whole and walks its catalog block chain, returning
/// both — the diff-area location table a `DiffAreaInfo` points at
/// lives in the same store stream the catalog does.
fn load_vss_catalog(volume: &Volume) -> Result<(Vec<u8>, Vec<CatalogBlock>)> {
    let mut reader = open_reader_for(volume)?;
    reader.load_boot_sector()?;
    let store = read_vss_store_file(&mut reader)?;
    let blocks = walk_catalog(|offset| read_store_block(&store, offset), 0)?;
    Ok((store, blocks))
}

fn read_store_block(store: &[u8], offset: u64) -> Result<[u8; BLOCK_SIZE as usize]> {
    let start = offset as usize;
    let end = start + BLOCK_SIZE as usize;
    if end > store.len() {
        return Err(OrcError::malformed("VSS catalog", "block beyond store file length"));
    }
    let mut block = [0u8; BLOCK_SIZE as usize];
    block.copy_from_slice(&store[start..end]);
    Ok(block)
}

/// Resolves a shadow copy's diff-area redirection table (§4.6): finds
/// the `DiffAreaInfo` catalog entry matching `guid` on `live`'s
/// catalog, then walks its diff-area location table into the
/// `block_index -> diff-area offset` map `DiffAreaView` needs. `Ok(None)`
/// (not an error) when the snapshot's catalog carries no `DiffAreaInfo`
/// of its own — reads for that shadow then fall through to the live
/// volume for every block.
fn diff_area_for_shadow(live: &Volume, guid: Uuid) -> Result<Option<(HashMap<u64, u64>, Vec<u8>)>> {
    let (store, blocks) = load_vss_catalog(live)?;
    let Some(diff_area) = diff_areas_for(&blocks, guid).into_iter().next() else {
        return Ok(None);
    };
    let entries = walk_diff_location_table(
        |offset| read_store_block(&store, offset),
        diff_area.diff_location_table_offset,
    )?;
    Ok(Some((overwritten_blocks(&entries, BLOCK_SIZE), store)))
}

/// Finds `\System Volume Information\{...}{3808876B-...}` and returns
/// its DATA stream in full (§4.6). The store file is usually modest in
/// size relative to the volume, so reading it whole keeps the catalog
/// walk simple; a production implementation would stream it instead.
fn read_vss_store_file(reader: &mut VolumeReader) -> Result<Vec<u8>> {
    use orc_fs::ntfs::{MftWalker, ResurrectMode};

    const VSS_MARKER: &str = "3808876B-C176-4E48-B7AE-04046E6CC752";
    let mut walker = MftWalker::open(reader, ResurrectMode::No)?;
    while let Some(record) = walker.next() {
        let matches = record
            .file_names()
            .any(|fn_info| fn_info.name.to_uppercase().contains(VSS_MARKER));
        if matches {
            return walker.open_stream(&record, None);
        }
    }
    Err(OrcError::unsupported("no VSS store file found on volume"))
}

/// Opens a [`VolumeReader`] for whatever backend a [`Volume`] names.
/// BitLocker degrades to reading straight through the mounted (already
/// decrypted) volume here, per its own "external collaborator" scope
/// note. Shadow-copy volumes open a real `Backend::Shadow`: a reader
/// over the parent live volume plus a [`DiffAreaView`] built from that
/// volume's catalog, so reads of blocks modified since the snapshot
/// redirect into the diff area instead of reading post-snapshot live
/// content (§4.6).
pub fn open_reader_for(volume: &Volume) -> Result<VolumeReader> {
    match &volume.backend {
        BackendKind::PhysicalDrive { path, partition_offset } => {
            VolumeReader::open_physical(path.clone(), *partition_offset, u64::MAX)
        }
        BackendKind::Partition { disk_path, offset, length } => {
            VolumeReader::open_physical(disk_path.clone(), *offset, *length)
        }
        BackendKind::MountedVolume { path } => VolumeReader::open_mounted(path.clone(), u64::MAX),
        BackendKind::DiskImage { path } => VolumeReader::open_image(path.clone()),
        BackendKind::BitLocker { path } => VolumeReader::open_mounted(path.clone(), u64::MAX),
        BackendKind::ShadowCopy { guid } => {
            let parent = volume
                .parent
                .as_deref()
                .ok_or_else(|| OrcError::unsupported("shadow copy volume has no parent to read through"))?;
            let live_reader = open_reader_for(parent)?;
            let altitude = live_reader.altitude();
            let live_backend = live_reader.into_backend();

            let diff_area = match diff_area_for_shadow(parent, *guid) {
                Ok(Some((overwritten, store))) => {
                    log::debug!(
                        "shadow {guid}: {} block(s) redirected through diff area",
                        overwritten.len()
                    );
                    DiffAreaView::new(BLOCK_SIZE, overwritten, Backend::Memory { data: store })
                }
                Ok(None) => {
                    log::warn!("shadow {guid} has no DiffAreaInfo in its volume's catalog; reading through live volume");
                    DiffAreaView::empty(BLOCK_SIZE, Backend::Memory { data: Vec::new() })
                }
                Err(e) => {
                    log::warn!("failed to resolve diff area for shadow {guid}: {e}; reading through live volume");
                    DiffAreaView::empty(BLOCK_SIZE, Backend::Memory { data: Vec::new() })
                }
            };

            Ok(VolumeReader::new(Backend::Shadow { live: Box::new(live_backend), diff_area }, altitude))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn volume(serial: u64, fs: FilesystemType, mount: &str) -> Volume {
        Volume {
            serial,
            backend: BackendKind::MountedVolume { path: mount.into() },
            fs_type: fs,
            cluster_size: 4096,
            sector_count: 1000,
            physical_sector_size: 512,
            logical_sector_size: 512,
            mount_points: vec![mount.into()],
            is_valid: true,
            diagnostic: None,
            parent: None,
            shadow_guid: None,
            created_at: Some(Utc::now()),
        }
    }

    #[test]
    fn consolidate_drops_unrecognised_filesystems() {
        let mut set = LocationSet::new(ShadowConfig { policy: ShadowPolicy::None, guids: vec![] }, &[]).unwrap();
        set.add("*");
        set.consolidate(vec![volume(1, FilesystemType::Unknown, "D:\\")]).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn consolidate_merges_duplicate_serials() {
        let mut set = LocationSet::new(ShadowConfig { policy: ShadowPolicy::None, guids: vec![] }, &[]).unwrap();
        set.add("*");
        let mut v1 = volume(42, FilesystemType::Ntfs, "C:\\");
        let mut v2 = volume(42, FilesystemType::Ntfs, "D:\\");
        v1.mount_points = vec!["C:\\".into()];
        v2.mount_points = vec!["D:\\".into()];
        set.consolidate(vec![v1]).unwrap();
        set.consolidate(vec![v2]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.enumerate()[0].mount_points.len(), 2);
    }

    #[test]
    fn consolidate_is_idempotent_by_content() {
        let mut set = LocationSet::new(ShadowConfig { policy: ShadowPolicy::None, guids: vec![] }, &[]).unwrap();
        set.add("*");
        let v = volume(7, FilesystemType::Ntfs, "C:\\");
        set.consolidate(vec![v.clone()]).unwrap();
        let first = set.enumerate();
        set.consolidate(vec![v]).unwrap();
        let second = set.enumerate();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].mount_points, second[0].mount_points);
    }

    #[test]
    fn location_spec_parses_drive_letter_and_wildcard() {
        assert_eq!(LocationSpec::parse("*"), LocationSpec::All);
        assert_eq!(
            LocationSpec::parse("C:"),
            LocationSpec::MountPoint(std::path::PathBuf::from(r"C:\"))
        );
        assert_eq!(
            LocationSpec::parse(r"\\.\PhysicalDrive0"),
            LocationSpec::DevicePath(r"\\.\PhysicalDrive0".to_string())
        );
    }

    #[test]
    fn exclude_glob_matches_wildcard_paths() {
        let set = LocationSet::new(
            ShadowConfig { policy: ShadowPolicy::None, guids: vec![] },
            &[r"C:\Windows\Temp\*".to_string()],
        )
        .unwrap();
        assert!(set.is_excluded(r"C:\Windows\Temp\foo.log"));
        assert!(!set.is_excluded(r"C:\Users\alice\doc.txt"));
    }
}
