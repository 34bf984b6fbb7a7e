//! VFAT long-filename (LFN) decoding (§4.4): up to 20 chained 32-byte
//! entries preceding the 8.3 entry they belong to, each holding 13
//! UTF-16 code units.
//!
//! Grounded in the teacher's `fat_common::long_names` — same entry
//! layout and checksum — read-only here (the teacher also generates
//! short names and LFN entries for writing, which this core never
//! does).

use byteorder::{ByteOrder, LittleEndian};

/// Maximum LFN entries chained to one short entry (255 chars / 13 per
/// entry, rounded up) — a chain longer than this is almost certainly
/// corrupt and is capped rather than trusted indefinitely.
pub const MAX_LFN_ENTRIES: usize = 20;

pub const ATTR_LONG_NAME: u8 = 0x0F;
pub const LAST_LFN_ENTRY_FLAG: u8 = 0x40;

/// Checksum of the 8.3 short name an LFN chain must match, per
/// `fat_common::directory::lfn_checksum`.
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for &byte in short_name {
        sum = ((sum >> 1) | ((sum & 1) << 7)).wrapping_add(byte);
    }
    sum
}

/// Extracts the 13 UTF-16 code units from one 32-byte LFN entry, in
/// on-disk order (name1, name2, name3).
pub fn lfn_entry_chars(entry: &[u8; 32]) -> [u16; 13] {
    let mut out = [0u16; 13];
    for i in 0..5 {
        out[i] = LittleEndian::read_u16(&entry[1 + i * 2..3 + i * 2]);
    }
    for i in 0..6 {
        out[5 + i] = LittleEndian::read_u16(&entry[14 + i * 2..16 + i * 2]);
    }
    for i in 0..2 {
        out[11 + i] = LittleEndian::read_u16(&entry[28 + i * 2..30 + i * 2]);
    }
    out
}

/// Assembles a sequence of LFN entries (already collected in on-disk
/// order, which is highest-sequence-first) into the long name. `0x0000`
/// terminates the name; trailing `0xFFFF` padding is dropped.
pub fn assemble_long_name(entries_high_to_low: &[[u8; 32]]) -> String {
    let mut units: Vec<u16> = Vec::new();
    for entry in entries_high_to_low {
        for &unit in lfn_entry_chars(entry).iter() {
            if unit == 0x0000 {
                return String::from_utf16_lossy(&units);
            }
            if unit != 0xFFFF {
                units.push(unit);
            }
        }
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_entry(seq: u8, last: bool, chars: &str, checksum: u8) -> [u8; 32] {
        let mut entry = [0xFFu8; 32];
        entry[0] = if last { seq | LAST_LFN_ENTRY_FLAG } else { seq };
        entry[11] = ATTR_LONG_NAME;
        entry[13] = checksum;
        let utf16: Vec<u16> = chars.encode_utf16().collect();
        let mut units = utf16.clone();
        if units.len() < 13 {
            units.push(0x0000);
        }
        units.resize(13, 0xFFFF);
        for i in 0..5 {
            entry[1 + i * 2..3 + i * 2].copy_from_slice(&units[i].to_le_bytes());
        }
        for i in 0..6 {
            entry[14 + i * 2..16 + i * 2].copy_from_slice(&units[5 + i].to_le_bytes());
        }
        for i in 0..2 {
            entry[28 + i * 2..30 + i * 2].copy_from_slice(&units[11 + i].to_le_bytes());
        }
        entry
    }

    #[test]
    fn assembles_single_entry_name() {
        let entry = encode_entry(1, true, "hello.txt", 0);
        let name = assemble_long_name(&[entry]);
        assert_eq!(name, "hello.txt");
    }

    #[test]
    fn assembles_two_entry_name_high_to_low() {
        // "a long filename.txt" is 20 chars, needs 2 LFN entries (13 + 7).
        let long = "a long filename.txt";
        let checksum = lfn_checksum(b"ALONGF~1TXT");
        let first13: String = long.chars().take(13).collect();
        let rest: String = long.chars().skip(13).collect();
        let high = encode_entry(2, true, &rest, checksum);
        let low = encode_entry(1, false, &first13, checksum);
        let name = assemble_long_name(&[high, low]);
        assert_eq!(name, long);
    }
}
