//! Boot-sector sniffing: derives filesystem type and geometry from the
//! first 512 bytes of a volume (§6 "NTFS boot sector" / §4.4 FAT boot
//! parameters).
//!
//! Grounded in the teacher's `ntfs::structures::NtfsBootSector` and
//! `fat32::reader::Fat32BootSector`, but parsed through `byteorder`
//! reads at fixed offsets instead of an unaligned pointer cast — a
//! malformed image must never produce undefined behaviour, only a
//! `Malformed` error.

use byteorder::{ByteOrder, LittleEndian};
use orc_core::{FilesystemType, OrcError, Result};

/// Geometry every backend must agree on after `load_boot_sector` (§4.2
/// invariant), independent of which path (physical/partition/mounted)
/// was used to read it.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub fs_type: FilesystemType,
    pub logical_sector_size: u32,
    pub physical_sector_size: u32,
    pub cluster_size: u32,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mftmirr_lcn: u64,
    pub mft_record_size: u32,
    pub index_buffer_size: u32,
    pub serial: u64,
    /// FAT-only: root-directory cluster (FAT32/exFAT) or 0 for
    /// FAT12/16, where the root directory is a fixed-size region.
    pub fat_root_cluster: u32,
    pub fat_reserved_sectors: u16,
    pub fat_count: u8,
    pub fat_size_sectors: u64,
    pub fat_root_entries: u16,
    /// exFAT only: `ClusterHeapOffset` from the boot sector, a sector
    /// count from the start of the volume to the first cluster (2),
    /// independent of and not necessarily adjacent to the FAT region
    /// (the way FAT12/16/32's data region always is). Zero for every
    /// other filesystem.
    pub exfat_cluster_heap_offset_sectors: u32,
}

/// Determines the filesystem from a 512-byte boot sector and derives
/// geometry (§6). Unknown signatures are reported as
/// `FilesystemType::Unknown` rather than an error — the caller decides
/// whether an unrecognised filesystem is fatal.
pub fn sniff_filesystem(sector: &[u8]) -> Result<Geometry> {
    if sector.len() < 512 {
        return Err(OrcError::malformed("boot sector", "fewer than 512 bytes"));
    }

    if &sector[3..11] == b"NTFS    " {
        return parse_ntfs(sector);
    }
    if &sector[3..11] == b"EXFAT   " {
        return parse_exfat(sector);
    }
    // FAT12/16/32 OEM strings are not load-bearing (anything 8 bytes is
    // legal), so rely on the root-entry-count / total-sectors-16 split
    // the way the teacher's `Fat32Reader::new` does.
    if sector.len() >= 512 && (sector[510], sector[511]) == (0x55, 0xAA) {
        return parse_fat(sector);
    }

    Ok(unknown_geometry())
}

fn unknown_geometry() -> Geometry {
    Geometry {
        fs_type: FilesystemType::Unknown,
        logical_sector_size: 512,
        physical_sector_size: 512,
        cluster_size: 0,
        total_sectors: 0,
        mft_lcn: 0,
        mftmirr_lcn: 0,
        mft_record_size: 0,
        index_buffer_size: 0,
        serial: 0,
        fat_root_cluster: 0,
        fat_reserved_sectors: 0,
        fat_count: 0,
        fat_size_sectors: 0,
        fat_root_entries: 0,
        exfat_cluster_heap_offset_sectors: 0,
    }
}

fn clusters_or_shift(byte: i8, cluster_size: u32) -> u32 {
    if byte > 0 {
        byte as u32 * cluster_size
    } else {
        1u32 << (-(byte as i32)) as u32
    }
}

fn parse_ntfs(sector: &[u8]) -> Result<Geometry> {
    let bytes_per_sector = LittleEndian::read_u16(&sector[11..13]) as u32;
    let sectors_per_cluster_raw = sector[13] as i8;
    let sectors_per_cluster = if sectors_per_cluster_raw > 0 {
        sectors_per_cluster_raw as u32
    } else {
        // Negative encodes 2^|n| bytes directly, independent of sector size.
        return Err(OrcError::malformed(
            "NTFS boot sector",
            "negative sectors-per-cluster is not a supported encoding",
        ));
    };
    if bytes_per_sector == 0 || sectors_per_cluster == 0 {
        return Err(OrcError::malformed("NTFS boot sector", "zero sector or cluster size"));
    }
    let cluster_size = bytes_per_sector * sectors_per_cluster;

    // Standard NTFS $BOOT layout: total-sectors at 0x28, $MFT LCN at
    // 0x30, $MFTMirr LCN at 0x38, clusters-per-file-record at 0x40,
    // clusters-per-index-buffer at 0x44, volume serial at 0x48.
    let total_sectors = LittleEndian::read_u64(&sector[0x28..0x30]);
    let mft_lcn = LittleEndian::read_u64(&sector[0x30..0x38]);
    let mftmirr_lcn = LittleEndian::read_u64(&sector[0x38..0x40]);
    let clusters_per_file_record = sector[0x40] as i8;
    let clusters_per_index_buffer = sector[0x44] as i8;
    let serial = LittleEndian::read_u64(&sector[0x48..0x50]);

    let mft_record_size = clusters_or_shift(clusters_per_file_record, cluster_size);
    let index_buffer_size = clusters_or_shift(clusters_per_index_buffer, cluster_size);

    Ok(Geometry {
        fs_type: FilesystemType::Ntfs,
        logical_sector_size: bytes_per_sector,
        physical_sector_size: bytes_per_sector,
        cluster_size,
        total_sectors,
        mft_lcn,
        mftmirr_lcn,
        mft_record_size,
        index_buffer_size,
        serial,
        fat_root_cluster: 0,
        fat_reserved_sectors: 0,
        fat_count: 0,
        fat_size_sectors: 0,
        fat_root_entries: 0,
        exfat_cluster_heap_offset_sectors: 0,
    })
}

fn parse_exfat(sector: &[u8]) -> Result<Geometry> {
    let bytes_per_sector_shift = sector[108];
    let sectors_per_cluster_shift = sector[109];
    let bytes_per_sector = 1u32 << bytes_per_sector_shift;
    let cluster_size = bytes_per_sector << sectors_per_cluster_shift;
    let total_sectors = LittleEndian::read_u64(&sector[72..80]);
    let root_cluster = LittleEndian::read_u32(&sector[96..100]);
    let serial = LittleEndian::read_u32(&sector[100..104]) as u64;
    let fat_offset_sectors = LittleEndian::read_u32(&sector[80..84]);
    let fat_length_sectors = LittleEndian::read_u32(&sector[84..88]) as u64;
    let cluster_heap_offset_sectors = LittleEndian::read_u32(&sector[88..92]);

    Ok(Geometry {
        fs_type: FilesystemType::ExFat,
        logical_sector_size: bytes_per_sector,
        physical_sector_size: bytes_per_sector,
        cluster_size,
        total_sectors,
        mft_lcn: 0,
        mftmirr_lcn: 0,
        mft_record_size: 0,
        index_buffer_size: 0,
        serial,
        fat_root_cluster: root_cluster,
        // `FatOffset` is already a sector count from the start of the
        // volume (unlike FAT12/16/32's reserved-sector count, which
        // this field is reused as), so `FatTable`'s
        // `reserved_sectors * sector_size` derivation lands on the
        // same byte offset.
        fat_reserved_sectors: fat_offset_sectors.min(u16::MAX as u32) as u16,
        fat_count: sector[110],
        fat_size_sectors: fat_length_sectors,
        fat_root_entries: 0,
        exfat_cluster_heap_offset_sectors: cluster_heap_offset_sectors,
    })
}

fn parse_fat(sector: &[u8]) -> Result<Geometry> {
    let bytes_per_sector = LittleEndian::read_u16(&sector[11..13]) as u32;
    let sectors_per_cluster = sector[13] as u32;
    let reserved_sectors = LittleEndian::read_u16(&sector[14..16]);
    let num_fats = sector[16];
    let root_entries = LittleEndian::read_u16(&sector[17..19]);
    let total_sectors_16 = LittleEndian::read_u16(&sector[19..21]) as u32;
    let fat_size_16 = LittleEndian::read_u16(&sector[22..24]) as u64;
    let total_sectors_32 = LittleEndian::read_u32(&sector[32..36]) as u64;

    if bytes_per_sector == 0 || sectors_per_cluster == 0 {
        return Err(OrcError::malformed("FAT boot sector", "zero sector or cluster size"));
    }
    let cluster_size = bytes_per_sector * sectors_per_cluster;

    let is_fat32 = root_entries == 0 && total_sectors_16 == 0;
    if is_fat32 {
        let fat_size_32 = LittleEndian::read_u32(&sector[36..40]) as u64;
        let root_cluster = LittleEndian::read_u32(&sector[44..48]);
        let serial = LittleEndian::read_u32(&sector[67..71]) as u64;
        Ok(Geometry {
            fs_type: FilesystemType::Fat32,
            logical_sector_size: bytes_per_sector,
            physical_sector_size: bytes_per_sector,
            cluster_size,
            total_sectors: total_sectors_32,
            mft_lcn: 0,
            mftmirr_lcn: 0,
            mft_record_size: 0,
            index_buffer_size: 0,
            serial,
            fat_root_cluster: root_cluster,
            fat_reserved_sectors: reserved_sectors,
            fat_count: num_fats,
            fat_size_sectors: fat_size_32,
            fat_root_entries: 0,
            exfat_cluster_heap_offset_sectors: 0,
        })
    } else {
        let total_sectors = if total_sectors_16 != 0 {
            total_sectors_16 as u64
        } else {
            total_sectors_32
        };
        let serial = LittleEndian::read_u32(&sector[39..43]) as u64;
        // FAT16 has 4085..65525 clusters; fewer is FAT12 (§4.4).
        let data_sectors = total_sectors
            .saturating_sub(reserved_sectors as u64)
            .saturating_sub(num_fats as u64 * fat_size_16)
            .saturating_sub(((root_entries as u64 * 32) + bytes_per_sector as u64 - 1) / bytes_per_sector as u64);
        let cluster_count = data_sectors / sectors_per_cluster as u64;
        let fs_type = if cluster_count < 4085 {
            FilesystemType::Fat12
        } else {
            FilesystemType::Fat16
        };
        Ok(Geometry {
            fs_type,
            logical_sector_size: bytes_per_sector,
            physical_sector_size: bytes_per_sector,
            cluster_size,
            total_sectors,
            mft_lcn: 0,
            mftmirr_lcn: 0,
            mft_record_size: 0,
            index_buffer_size: 0,
            serial,
            fat_root_cluster: 0,
            fat_reserved_sectors: reserved_sectors,
            fat_count: num_fats,
            fat_size_sectors: fat_size_16,
            fat_root_entries: root_entries,
            exfat_cluster_heap_offset_sectors: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ntfs_sector() -> Vec<u8> {
        let mut s = vec![0u8; 512];
        s[3..11].copy_from_slice(b"NTFS    ");
        LittleEndian::write_u16(&mut s[11..13], 512);
        s[13] = 8; // 8 sectors/cluster = 4096-byte clusters
        LittleEndian::write_u64(&mut s[0x28..0x30], 1_000_000);
        LittleEndian::write_u64(&mut s[0x30..0x38], 4);
        LittleEndian::write_u64(&mut s[0x38..0x40], 1000);
        s[0x40] = (-10i8) as u8; // clusters-per-file-record: 2^10 = 1024 bytes
        s[0x44] = (-10i8) as u8; // clusters-per-index-buffer: likewise
        LittleEndian::write_u64(&mut s[0x48..0x50], 0xDEAD_BEEF_0000_0001);
        s[510] = 0x55;
        s[511] = 0xAA;
        s
    }

    #[test]
    fn recognises_ntfs_and_derives_geometry() {
        let g = sniff_filesystem(&ntfs_sector()).unwrap();
        assert_eq!(g.fs_type, FilesystemType::Ntfs);
        assert_eq!(g.cluster_size, 4096);
        assert_eq!(g.mft_record_size, 1024);
        assert_eq!(g.index_buffer_size, 1024);
    }

    #[test]
    fn recognises_fat32() {
        let mut s = vec![0u8; 512];
        LittleEndian::write_u16(&mut s[11..13], 512);
        s[13] = 8;
        LittleEndian::write_u16(&mut s[14..16], 32);
        s[16] = 2;
        LittleEndian::write_u32(&mut s[32..36], 2_000_000);
        LittleEndian::write_u32(&mut s[36..40], 4000);
        LittleEndian::write_u32(&mut s[44..48], 2);
        s[510] = 0x55;
        s[511] = 0xAA;

        let g = sniff_filesystem(&s).unwrap();
        assert_eq!(g.fs_type, FilesystemType::Fat32);
        assert_eq!(g.fat_root_cluster, 2);
    }

    #[test]
    fn unrecognised_signature_is_unknown_not_an_error() {
        let s = vec![0u8; 512];
        let g = sniff_filesystem(&s).unwrap();
        assert_eq!(g.fs_type, FilesystemType::Unknown);
    }
}
