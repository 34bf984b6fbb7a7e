//! Ties the boot-sector geometry, the FAT table, and directory parsing
//! together into a filesystem tree walk (§4.4), grounded in the
//! teacher's `Fat32Reader`/`Fat16Reader` (root-directory special-casing,
//! `bytes_per_cluster`/`data_start_byte` derivation) — generalized to
//! exFAT (FAT32-shaped root, no fixed root region) and turned from an
//! on-demand single-directory reader into a full recursive tree walk,
//! which the teacher's format-then-verify use case never needed.

use orc_core::{FilesystemType, OrcError, Result};

use super::cluster_chain::{FatTable, FatWidth};
use super::directory::{parse_directory, DirEntry};
use super::exfat::parse_exfat_directory;
use crate::volume_reader::Geometry;
use crate::VolumeReader;

/// Default recursion guard: directories nested deeper than this are
/// treated the same way NTFS treats an unresolvable parent chain — the
/// walk for that branch stops rather than looping forever on a
/// corrupt/cyclic cluster graph.
pub const DEFAULT_MAX_DEPTH: usize = 256;

pub struct FatWalker {
    width: FatWidth,
    table: FatTable,
    cluster_size: u32,
    data_start_byte: u64,
    /// Fixed-size root region for FAT12/16 (byte offset, length); `None`
    /// for FAT32/exFAT, which use an ordinary cluster chain instead.
    fixed_root: Option<(u64, u64)>,
    root_cluster: u32,
    max_depth: usize,
    /// exFAT uses a distinct typed directory-entry layout (0x85/0xC0/
    /// 0xC1) with no VFAT-style LFN chaining, and per-file contiguous
    /// allocation (`NoFatChain`) that bypasses the FAT entirely — the
    /// walker needs to know which directory parser and cluster-read
    /// strategy apply.
    is_exfat: bool,
}

impl FatWalker {
    pub fn open(reader: &mut VolumeReader) -> Result<Self> {
        let geometry = reader
            .geometry
            .ok_or_else(|| OrcError::Other("load_boot_sector not called".into()))?;
        let is_exfat = geometry.fs_type == FilesystemType::ExFat;
        let width = match geometry.fs_type {
            FilesystemType::Fat12 => FatWidth::Fat12,
            FilesystemType::Fat16 => FatWidth::Fat16,
            FilesystemType::Fat32 | FilesystemType::ExFat => FatWidth::Fat32OrExFat,
            other => return Err(OrcError::unsupported(format!("{other:?} is not a FAT-family filesystem"))),
        };

        let fat_start_byte = geometry.fat_reserved_sectors as u64 * geometry.logical_sector_size as u64;
        let fat_size_bytes = geometry.fat_size_sectors * geometry.logical_sector_size as u64;
        let all_fats_bytes = fat_size_bytes * geometry.fat_count as u64;

        let fixed_root_bytes = geometry.fat_root_entries as u64 * 32;
        let fixed_root = if fixed_root_bytes > 0 {
            Some((fat_start_byte + all_fats_bytes, fixed_root_bytes))
        } else {
            None
        };
        // exFAT's cluster heap isn't necessarily adjacent to the FAT
        // region (unlike FAT12/16/32's data area) — its boot sector
        // carries the heap's byte offset directly rather than it being
        // implied by what comes before it.
        let data_start_byte = if is_exfat {
            geometry.exfat_cluster_heap_offset_sectors as u64 * geometry.logical_sector_size as u64
        } else {
            fat_start_byte + all_fats_bytes + fixed_root_bytes
        };

        Ok(FatWalker {
            width,
            table: FatTable::new(width, fat_start_byte, fat_size_bytes),
            cluster_size: geometry.cluster_size,
            data_start_byte,
            fixed_root,
            root_cluster: geometry.fat_root_cluster,
            max_depth: DEFAULT_MAX_DEPTH,
            is_exfat,
        })
    }

    fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_start_byte + (cluster as u64 - 2) * self.cluster_size as u64
    }

    fn read_cluster_chain_bytes(&mut self, reader: &mut VolumeReader, first_cluster: u32, max_len: Option<u64>) -> Result<Vec<u8>> {
        let chain = self.table.walk_chain(reader, first_cluster);
        let mut out = Vec::new();
        for cluster in &chain.clusters {
            let mut buf = vec![0u8; self.cluster_size as usize];
            reader.read_at_bytes(self.cluster_offset(*cluster), &mut buf)?;
            out.extend_from_slice(&buf);
            if let Some(limit) = max_len {
                if out.len() as u64 >= limit {
                    break;
                }
            }
        }
        if let Some(limit) = max_len {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    /// Reads `first_cluster` onward as one contiguous run of clusters,
    /// without consulting the FAT — exFAT's `NoFatChain` allocation
    /// (§4.4). `len_bytes` determines how many clusters are covered;
    /// the FAT entries for these clusters are never valid chain links
    /// and must not be walked.
    fn read_contiguous_bytes(&self, reader: &mut VolumeReader, first_cluster: u32, len_bytes: u64) -> Result<Vec<u8>> {
        let cluster_count = len_bytes.div_ceil(self.cluster_size as u64).max(1);
        let mut out = Vec::with_capacity((cluster_count * self.cluster_size as u64) as usize);
        for i in 0..cluster_count {
            let mut buf = vec![0u8; self.cluster_size as usize];
            reader.read_at_bytes(self.cluster_offset(first_cluster + i as u32), &mut buf)?;
            out.extend_from_slice(&buf);
        }
        out.truncate(len_bytes as usize);
        Ok(out)
    }

    /// Reads the bytes for a resolved entry's data, choosing between a
    /// walked FAT chain and a contiguous read based on the entry's
    /// `no_fat_chain` flag (always `false` outside exFAT).
    fn read_entry_bytes(&mut self, reader: &mut VolumeReader, entry: &DirEntry, len_bytes: u64) -> Result<Vec<u8>> {
        if entry.no_fat_chain {
            self.read_contiguous_bytes(reader, entry.first_cluster, len_bytes)
        } else {
            self.read_cluster_chain_bytes(reader, entry.first_cluster, Some(len_bytes))
        }
    }

    /// Reads and parses the root directory (§4.4): a fixed-size region
    /// for FAT12/16, an ordinary cluster chain for FAT32/exFAT.
    pub fn read_root(&mut self, reader: &mut VolumeReader) -> Result<Vec<DirEntry>> {
        let bytes = if let Some((offset, len)) = self.fixed_root {
            let mut buf = vec![0u8; len as usize];
            reader.read_at_bytes(offset, &mut buf)?;
            buf
        } else {
            self.read_cluster_chain_bytes(reader, self.root_cluster, None)?
        };
        Ok(self.parse_directory_bytes(&bytes))
    }

    fn parse_directory_bytes(&self, bytes: &[u8]) -> Vec<DirEntry> {
        if self.is_exfat {
            parse_exfat_directory(bytes)
        } else {
            parse_directory(bytes)
        }
    }

    pub fn read_directory(&mut self, reader: &mut VolumeReader, entry: &DirEntry) -> Result<Vec<DirEntry>> {
        let bytes = if entry.no_fat_chain {
            // A directory's own size isn't tracked in its entry; read
            // whole clusters until the table's allocation runs out by
            // falling back to a chain walk is wrong for `NoFatChain`
            // clusters (their FAT entries aren't chain links), so walk
            // forward one allocation-unit at a time until an empty
            // (all-zero) cluster is seen.
            self.read_contiguous_directory_bytes(reader, entry.first_cluster)?
        } else {
            self.read_cluster_chain_bytes(reader, entry.first_cluster, None)?
        };
        Ok(self.parse_directory_bytes(&bytes))
    }

    /// Reads a `NoFatChain` directory's clusters one at a time until a
    /// fully zeroed cluster is hit (no end-of-chain marker exists to
    /// stop at, since these clusters were never linked through the
    /// FAT), bounded by `DEFAULT_MAX_DEPTH` clusters as a corruption
    /// guard.
    fn read_contiguous_directory_bytes(&self, reader: &mut VolumeReader, first_cluster: u32) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for i in 0..self.max_depth as u32 {
            let mut buf = vec![0u8; self.cluster_size as usize];
            reader.read_at_bytes(self.cluster_offset(first_cluster + i), &mut buf)?;
            if buf.iter().all(|&b| b == 0) {
                break;
            }
            out.extend_from_slice(&buf);
        }
        Ok(out)
    }

    /// Reads a file's full content, truncated to its declared size
    /// (§4.4 — a cluster chain always allocates whole clusters).
    pub fn read_file(&mut self, reader: &mut VolumeReader, entry: &DirEntry) -> Result<Vec<u8>> {
        self.read_entry_bytes(reader, entry, entry.file_size)
    }

    /// Walks the whole tree depth-first from the root, yielding
    /// `(full_path, entry)` pairs. Uses an explicit stack rather than
    /// recursion so a pathological depth doesn't blow the Rust call
    /// stack; `max_depth` bounds it the same way `PathResolver` bounds
    /// NTFS ancestry chains.
    pub fn walk_tree(&mut self, reader: &mut VolumeReader) -> Result<Vec<(String, DirEntry)>> {
        let mut out = Vec::new();
        let root_entries = self.read_root(reader)?;
        let mut stack: Vec<(String, DirEntry, usize)> = root_entries
            .into_iter()
            .filter(|e| !e.attributes.is_volume_label())
            .map(|e| {
                let name = e.name().to_string();
                (name, e, 1)
            })
            .collect();

        while let Some((path, entry, depth)) = stack.pop() {
            let is_dir = entry.is_directory();
            let short = entry.short_name.clone();
            out.push((path.clone(), entry));
            if is_dir && depth < self.max_depth && short != "." && short != ".." {
                let dir_entry = out.last().unwrap().1.clone();
                if dir_entry.first_cluster >= 2 {
                    match self.read_directory(reader, &dir_entry) {
                        Ok(children) => {
                            for child in children {
                                if child.short_name == "." || child.short_name == ".." {
                                    continue;
                                }
                                let child_path = format!("{path}\\{}", child.name());
                                stack.push((child_path, child, depth + 1));
                            }
                        }
                        Err(e) => {
                            log::warn!("failed to read directory '{path}': {e}");
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::directory::DirEntryAttributes;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Write;

    /// Builds a minimal FAT16 image: boot sector, one FAT, a fixed
    /// root directory with one file entry, and that file's single
    /// data cluster.
    fn build_fat16_image() -> (tempfile::TempDir, std::path::PathBuf) {
        let bytes_per_sector = 512u32;
        let sectors_per_cluster = 1u32;
        let reserved_sectors = 1u16;
        let num_fats = 1u8;
        let root_entries = 16u16;
        let fat_size_16 = 1u16;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fat16.img");
        let mut image = vec![0u8; bytes_per_sector as usize * 10];

        LittleEndian::write_u16(&mut image[11..13], bytes_per_sector as u16);
        image[13] = sectors_per_cluster as u8;
        LittleEndian::write_u16(&mut image[14..16], reserved_sectors);
        image[16] = num_fats;
        LittleEndian::write_u16(&mut image[17..19], root_entries);
        LittleEndian::write_u16(&mut image[19..21], 10);
        LittleEndian::write_u16(&mut image[22..24], fat_size_16);
        image[510] = 0x55;
        image[511] = 0xAA;

        let fat_start = reserved_sectors as usize * bytes_per_sector as usize;
        image[fat_start + 2] = 0xFF; // cluster 2 -> EOC (0xFFFF)
        image[fat_start + 3] = 0xFF;

        let root_start = fat_start + fat_size_16 as usize * num_fats as usize * bytes_per_sector as usize;
        let mut entry = [0u8; 32];
        entry[0..11].copy_from_slice(b"HELLO   TXT");
        entry[11] = 0;
        LittleEndian::write_u16(&mut entry[26..28], 2); // first cluster
        LittleEndian::write_u32(&mut entry[28..32], 5); // size
        image[root_start..root_start + 32].copy_from_slice(&entry);

        let data_start = root_start + root_entries as usize * 32;
        image[data_start..data_start + 5].copy_from_slice(b"Hello");

        std::fs::File::create(&path).unwrap().write_all(&image).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_root_directory_and_file_content() {
        let (_dir, path) = build_fat16_image();
        let mut reader = VolumeReader::open_image(path).unwrap();
        reader.load_boot_sector().unwrap();
        let mut walker = FatWalker::open(&mut reader).unwrap();

        let root = walker.read_root(&mut reader).unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name(), "HELLO.TXT");

        let content = walker.read_file(&mut reader, &root[0]).unwrap();
        assert_eq!(content, b"Hello");
    }

    #[test]
    fn walk_tree_visits_root_file() {
        let (_dir, path) = build_fat16_image();
        let mut reader = VolumeReader::open_image(path).unwrap();
        reader.load_boot_sector().unwrap();
        let mut walker = FatWalker::open(&mut reader).unwrap();
        let entries = walker.walk_tree(&mut reader).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "HELLO.TXT");
        assert!(!entries[0].1.attributes.is_directory());
        let _ = DirEntryAttributes(0);
    }
}
