//! exFAT directory entry parsing (§4.4): a distinct, typed entry set
//! keyed by entry type byte (0x85 file, 0xC0 stream extension, 0xC1
//! file name), not the VFAT 8.3/LFN layout the rest of this module uses
//! for FAT12/16/32.
//!
//! Grounded in the teacher's `filesystems::families::fat::exfat::reader`
//! (`ExFatDirectoryEntry`/`FileDirectoryEntry`/`StreamExtensionEntry`/
//! `FileNameEntry` field layouts, entry-type constants, UTF-16LE name
//! splicing) — reworked from that module's unsafe `repr(C, packed)`
//! struct casts into explicit byte-offset decoding (matching how the
//! rest of this crate reads on-disk structures), and extended to carry
//! the `NoFatChain` allocation flag through to the cluster reader
//! (§4.4 "exFAT contiguous allocation"), which the teacher's read path
//! never needed since it always walked the FAT.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};

use super::directory::{DirEntry, DirEntryAttributes};

const ENTRY_SIZE: usize = 32;
const IN_USE_BIT: u8 = 0x80;

const ENTRY_TYPE_FILE: u8 = 0x85;
const ENTRY_TYPE_STREAM_EXTENSION: u8 = 0xC0;
const ENTRY_TYPE_FILE_NAME: u8 = 0xC1;

/// Stream extension secondary-flags bit indicating the data run is one
/// contiguous cluster span, to be read without walking the FAT chain.
const NO_FAT_CHAIN_FLAG: u8 = 0x02;

/// Parses one exFAT directory region (a cluster chain's concatenated
/// bytes) into resolved entries. Each file/directory is a set of
/// entries: a 0x85 primary, a 0xC0 stream extension, and one or more
/// 0xC1 name entries (15 UTF-16 code units each) — unlike VFAT, the
/// name entries are never shared or reordered, so no checksum
/// validation against a short name is needed.
pub fn parse_exfat_directory(data: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + ENTRY_SIZE <= data.len() {
        let entry_type = data[offset];

        if entry_type == 0x00 {
            // A cleared entry type with the in-use bit also clear marks
            // the end of the allocated portion of this directory.
            break;
        }
        if entry_type & IN_USE_BIT == 0 {
            offset += ENTRY_SIZE;
            continue;
        }
        if entry_type != ENTRY_TYPE_FILE {
            offset += ENTRY_SIZE;
            continue;
        }

        let primary = &data[offset..offset + ENTRY_SIZE];
        let secondary_count = primary[1] as usize;
        let file_attributes = LittleEndian::read_u16(&primary[4..6]);
        let create_ts = LittleEndian::read_u32(&primary[8..12]);
        let modified_ts = LittleEndian::read_u32(&primary[12..16]);
        let accessed_ts = LittleEndian::read_u32(&primary[16..20]);

        let set_end = offset + ENTRY_SIZE * (1 + secondary_count);
        if secondary_count == 0 || set_end > data.len() {
            offset += ENTRY_SIZE;
            continue;
        }

        let stream = &data[offset + ENTRY_SIZE..offset + 2 * ENTRY_SIZE];
        if stream[0] != ENTRY_TYPE_STREAM_EXTENSION {
            offset += ENTRY_SIZE;
            continue;
        }
        let no_fat_chain = stream[1] & NO_FAT_CHAIN_FLAG != 0;
        let name_length = stream[3] as usize;
        let data_length = LittleEndian::read_u64(&stream[24..32]);
        let first_cluster = LittleEndian::read_u32(&stream[20..24]);

        let mut name_units: Vec<u16> = Vec::with_capacity(name_length);
        let mut name_entry_offset = offset + 2 * ENTRY_SIZE;
        while name_entry_offset < set_end && name_units.len() < name_length {
            let name_entry = &data[name_entry_offset..name_entry_offset + ENTRY_SIZE];
            if name_entry[0] != ENTRY_TYPE_FILE_NAME {
                break;
            }
            for i in 0..15 {
                if name_units.len() >= name_length {
                    break;
                }
                name_units.push(LittleEndian::read_u16(&name_entry[2 + i * 2..4 + i * 2]));
            }
            name_entry_offset += ENTRY_SIZE;
        }
        let name = String::from_utf16_lossy(&name_units);

        entries.push(DirEntry {
            short_name: name.clone(),
            long_name: Some(name),
            attributes: DirEntryAttributes(exfat_attributes_to_fat(file_attributes)),
            first_cluster,
            file_size: data_length,
            creation_time: decode_exfat_timestamp(create_ts),
            write_time: decode_exfat_timestamp(modified_ts),
            access_time: decode_exfat_timestamp(accessed_ts),
            no_fat_chain,
        });

        offset = set_end;
    }

    entries
}

/// exFAT's file-attribute bitmap reuses the FAT12/16/32 bit positions
/// (`ReadOnly`, `Hidden`, `System`, `Directory`, `Archive`) directly, so
/// the low byte can be handed straight to [`DirEntryAttributes`].
fn exfat_attributes_to_fat(attributes: u16) -> u8 {
    (attributes & 0x00FF) as u8
}

/// Decodes an exFAT packed timestamp: bits 31-25 year-1980, 24-21
/// month, 20-16 day, 15-11 hour, 10-5 minute, 4-0 2-second ticks. The
/// 10ms-increment and UTC-offset fields that ride alongside each
/// timestamp in the directory entry aren't threaded through here, the
/// same second-granularity, UTC-assumed simplification `decode_fat_datetime`
/// already makes for FAT12/16/32.
fn decode_exfat_timestamp(ts: u32) -> Option<DateTime<Utc>> {
    if ts == 0 {
        return None;
    }
    let year = 1980 + (ts >> 25) as i32;
    let month = ((ts >> 21) & 0x0F) as u32;
    let day = ((ts >> 16) & 0x1F) as u32;
    let hour = ((ts >> 11) & 0x1F) as u32;
    let minute = ((ts >> 5) & 0x3F) as u32;
    let second = (ts & 0x1F) * 2;
    Utc.with_ymd_and_hms(year, month.max(1), day.max(1), hour, minute, second).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_file_set(data: &mut Vec<u8>, name: &str, first_cluster: u32, size: u64, no_fat_chain: bool, is_dir: bool) {
        let name_units: Vec<u16> = name.encode_utf16().collect();
        let name_entries = (name_units.len() + 14) / 15;

        let mut primary = [0u8; ENTRY_SIZE];
        primary[0] = ENTRY_TYPE_FILE;
        primary[1] = (1 + name_entries) as u8; // secondary count
        LittleEndian::write_u16(&mut primary[4..6], if is_dir { DirEntryAttributes::DIRECTORY as u16 } else { 0 });
        data.extend_from_slice(&primary);

        let mut stream = [0u8; ENTRY_SIZE];
        stream[0] = ENTRY_TYPE_STREAM_EXTENSION;
        if no_fat_chain {
            stream[1] |= NO_FAT_CHAIN_FLAG;
        }
        stream[3] = name_units.len() as u8;
        LittleEndian::write_u32(&mut stream[20..24], first_cluster);
        LittleEndian::write_u64(&mut stream[24..32], size);
        data.extend_from_slice(&stream);

        for chunk in name_units.chunks(15) {
            let mut name_entry = [0u8; ENTRY_SIZE];
            name_entry[0] = ENTRY_TYPE_FILE_NAME;
            for (i, unit) in chunk.iter().enumerate() {
                LittleEndian::write_u16(&mut name_entry[2 + i * 2..4 + i * 2], *unit);
            }
            data.extend_from_slice(&name_entry);
        }
    }

    #[test]
    fn parses_file_entry_set() {
        let mut data = Vec::new();
        push_file_set(&mut data, "hello.txt", 5, 11, false, false);
        let entries = parse_exfat_directory(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "hello.txt");
        assert_eq!(entries[0].first_cluster, 5);
        assert_eq!(entries[0].file_size, 11);
        assert!(!entries[0].no_fat_chain);
        assert!(!entries[0].is_directory());
    }

    #[test]
    fn carries_no_fat_chain_flag_through() {
        let mut data = Vec::new();
        push_file_set(&mut data, "contig.bin", 8, 4096 * 3, true, false);
        let entries = parse_exfat_directory(&data);
        assert!(entries[0].no_fat_chain);
    }

    #[test]
    fn splices_name_spanning_multiple_name_entries() {
        let long_name: String = "a".repeat(20);
        let mut data = Vec::new();
        push_file_set(&mut data, &long_name, 9, 0, false, false);
        let entries = parse_exfat_directory(&data);
        assert_eq!(entries[0].name(), long_name);
    }

    #[test]
    fn decodes_directory_attribute() {
        let mut data = Vec::new();
        push_file_set(&mut data, "SUBDIR", 10, 0, false, true);
        let entries = parse_exfat_directory(&data);
        assert!(entries[0].is_directory());
    }

    #[test]
    fn skips_non_file_entries_like_bitmap_and_upcase() {
        let mut data = vec![0u8; ENTRY_SIZE];
        data[0] = 0x81; // allocation bitmap
        data.extend(std::iter::repeat(0u8).take(ENTRY_SIZE));
        data[ENTRY_SIZE] = 0x82; // upcase table
        push_file_set(&mut data, "real.txt", 7, 3, false, false);
        let entries = parse_exfat_directory(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "real.txt");
    }
}
