//! Directory entry parsing (§4.4): 32-byte 8.3 entries, LFN splicing,
//! and timestamp decoding.
//!
//! Grounded in the teacher's `fat32::reader::Fat32DirEntry` layout and
//! `fat_common::directory::parse_83_name`, merged with
//! `fat_common::timestamps` for the packed FAT date/time fields.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};

use super::long_name::{assemble_long_name, lfn_checksum, ATTR_LONG_NAME, LAST_LFN_ENTRY_FLAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryAttributes(pub u8);

impl DirEntryAttributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;

    pub fn is_directory(self) -> bool {
        self.0 & Self::DIRECTORY != 0
    }

    pub fn is_volume_label(self) -> bool {
        self.0 & Self::VOLUME_ID != 0
    }
}

/// One resolved directory entry: an 8.3 short entry, with its long name
/// spliced in from any preceding LFN entries (§4.4).
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub short_name: String,
    pub long_name: Option<String>,
    pub attributes: DirEntryAttributes,
    pub first_cluster: u32,
    pub file_size: u64,
    pub creation_time: Option<DateTime<Utc>>,
    pub write_time: Option<DateTime<Utc>>,
    pub access_time: Option<DateTime<Utc>>,
    /// exFAT only: the stream extension entry's `NoFatChain` bit — the
    /// cluster run is contiguous and must be read without consulting the
    /// FAT. Always `false` for FAT12/16/32 entries.
    pub no_fat_chain: bool,
}

impl DirEntry {
    pub fn name(&self) -> &str {
        self.long_name.as_deref().unwrap_or(&self.short_name)
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }
}

/// Parses 8.3 filename bytes the way `fat_common::directory::parse_83_name`
/// does: space-padded base + extension, `0x05` meaning a literal `0xE5`.
fn parse_83_name(name: &[u8; 11]) -> String {
    let mut result = String::new();
    for &byte in &name[0..8] {
        if byte == 0x20 || byte == 0x00 {
            break;
        }
        result.push(if byte == 0x05 { 0xE5 as char } else { byte as char });
    }
    let ext_start = result.len();
    for &byte in &name[8..11] {
        if byte != 0x20 && byte != 0x00 {
            if result.len() == ext_start {
                result.push('.');
            }
            result.push(byte as char);
        }
    }
    result
}

/// Packed FAT date (bits 15-9 year-1980, 8-5 month, 4-0 day) and time
/// (bits 15-11 hour, 10-5 minute, 4-0 2-second ticks), per
/// `fat_common::timestamps`.
fn decode_fat_datetime(date: u16, time: u16) -> Option<DateTime<Utc>> {
    if date == 0 {
        return None;
    }
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = (time & 0x1F) as u32 * 2;
    Utc.with_ymd_and_hms(year, month.max(1), day.max(1), hour, minute, second).single()
}

const ENTRY_SIZE: usize = 32;
const ENTRY_FREE: u8 = 0xE5;
const ENTRY_END: u8 = 0x00;

/// Parses a whole directory region (one cluster chain's worth of
/// bytes, already concatenated) into resolved entries, splicing LFN
/// chains into the short entry that follows them (§4.4).
pub fn parse_directory(data: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut pending_lfn: Vec<[u8; 32]> = Vec::new();

    for chunk in data.chunks_exact(ENTRY_SIZE) {
        let first_byte = chunk[0];
        if first_byte == ENTRY_END {
            break;
        }
        if first_byte == ENTRY_FREE {
            pending_lfn.clear();
            continue;
        }

        let attr = chunk[11];
        if attr == ATTR_LONG_NAME {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(chunk);
            if raw[0] & LAST_LFN_ENTRY_FLAG != 0 {
                pending_lfn.clear();
            }
            pending_lfn.push(raw);
            continue;
        }

        let mut short_name_bytes = [0u8; 11];
        short_name_bytes.copy_from_slice(&chunk[0..11]);

        let long_name = if !pending_lfn.is_empty() {
            let checksum = lfn_checksum(&short_name_bytes);
            let valid = pending_lfn.iter().all(|e| e[13] == checksum);
            let name = if valid { Some(assemble_long_name(&pending_lfn)) } else { None };
            pending_lfn.clear();
            name
        } else {
            None
        };

        let first_cluster_hi = LittleEndian::read_u16(&chunk[20..22]) as u32;
        let first_cluster_lo = LittleEndian::read_u16(&chunk[26..28]) as u32;
        let first_cluster = (first_cluster_hi << 16) | first_cluster_lo;
        let file_size = LittleEndian::read_u32(&chunk[28..32]) as u64;

        let creation_date = LittleEndian::read_u16(&chunk[16..18]);
        let creation_time_field = LittleEndian::read_u16(&chunk[14..16]);
        let write_date = LittleEndian::read_u16(&chunk[24..26]);
        let write_time_field = LittleEndian::read_u16(&chunk[22..24]);
        let access_date = LittleEndian::read_u16(&chunk[18..20]);

        entries.push(DirEntry {
            short_name: parse_83_name(&short_name_bytes),
            long_name,
            attributes: DirEntryAttributes(attr),
            first_cluster,
            file_size,
            creation_time: decode_fat_datetime(creation_date, creation_time_field),
            write_time: decode_fat_datetime(write_date, write_time_field),
            access_time: decode_fat_datetime(access_date, 0),
            no_fat_chain: false,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_entry(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
        let mut e = [0u8; 32];
        e[0..11].copy_from_slice(name);
        e[11] = attr;
        LittleEndian::write_u16(&mut e[20..22], (cluster >> 16) as u16);
        LittleEndian::write_u16(&mut e[26..28], (cluster & 0xFFFF) as u16);
        LittleEndian::write_u32(&mut e[28..32], size);
        e
    }

    #[test]
    fn parses_plain_83_entry() {
        let entry = short_entry(b"README  TXT", 0, 5, 1024);
        let entries = parse_directory(&entry);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "README.TXT");
        assert_eq!(entries[0].first_cluster, 5);
        assert_eq!(entries[0].file_size, 1024);
    }

    #[test]
    fn stops_at_end_marker() {
        let mut data = short_entry(b"A          ", 0, 2, 0).to_vec();
        data.extend_from_slice(&[0u8; 32]); // end marker
        data.extend_from_slice(&short_entry(b"B          ", 0, 3, 0));
        let entries = parse_directory(&data);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn skips_free_entries() {
        let mut data = vec![0u8; 32];
        data[0] = ENTRY_FREE;
        data.extend_from_slice(&short_entry(b"LIVE       ", 0, 4, 0));
        let entries = parse_directory(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].short_name, "LIVE");
    }

    #[test]
    fn decodes_directory_attribute() {
        let entry = short_entry(b"SUBDIR     ", DirEntryAttributes::DIRECTORY, 10, 0);
        let entries = parse_directory(&entry);
        assert!(entries[0].is_directory());
    }
}
