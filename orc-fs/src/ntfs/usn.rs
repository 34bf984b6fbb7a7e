//! USN change journal reader (§3, §4.3 "USN journal reader"), new
//! relative to the teacher: `moses` reads and writes filesystem
//! structures at format time, never a live audit trail. Walks
//! `$Extend\$UsnJrnl:$J` the same way `mft::read_non_resident` walks any
//! other sparse non-resident stream — forward, skipping zero-filled
//! holes — looking for length-prefixed records 8-byte aligned.
//!
//! `:$Max` (journal parameters — max size, allocation delta, lowest
//! valid USN) is exposed separately by `UsnMaxParams::parse`, matching
//! the original collector's `USNInfo` command.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use orc_core::{Frn, OrcError, Result};

/// One journal record (§6 "USN record v2/v3"); v3's 128-bit file/parent
/// references are not modeled since NTFS never emits them, only ReFS.
#[derive(Debug, Clone)]
pub struct UsnRecord {
    pub usn: u64,
    pub file_reference: Frn,
    pub parent_reference: Frn,
    pub timestamp: DateTime<Utc>,
    pub reason: u32,
    pub source_info: u32,
    pub file_attributes: u32,
    pub name: String,
}

/// Journal sizing parameters, from `$Extend\$UsnJrnl:$Max` (supplemental
/// feature, not in the distilled record walk itself).
#[derive(Debug, Clone, Copy)]
pub struct UsnMaxParams {
    pub max_size: u64,
    pub allocation_delta: u64,
    pub lowest_valid_usn: u64,
}

impl UsnMaxParams {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            return Err(OrcError::malformed("USN $Max", "shorter than 24 bytes"));
        }
        Ok(UsnMaxParams {
            max_size: LittleEndian::read_u64(&data[0..8]),
            allocation_delta: LittleEndian::read_u64(&data[8..16]),
            lowest_valid_usn: LittleEndian::read_u64(&data[16..24]),
        })
    }
}

const RECORD_ALIGNMENT: usize = 8;

/// Parses one USN record starting at `data[0]`; returns the record and
/// its on-disk length (the caller advances by this, rounded up to the
/// alignment, per §4.3). A zero `record_length` means a sparse/unused
/// region — the caller should skip forward by the page/chunk size
/// instead of calling this again at the same offset.
pub fn parse_record(data: &[u8]) -> Result<Option<(UsnRecord, usize)>> {
    if data.len() < 4 {
        return Ok(None);
    }
    let record_length = LittleEndian::read_u32(&data[0..4]) as usize;
    if record_length == 0 {
        return Ok(None);
    }
    if record_length < 60 || record_length > data.len() {
        return Err(OrcError::malformed("USN record", "implausible record length"));
    }

    let file_reference = Frn::from_raw(LittleEndian::read_u64(&data[8..16]));
    let parent_reference = Frn::from_raw(LittleEndian::read_u64(&data[16..24]));
    let usn = LittleEndian::read_u64(&data[24..32]);
    let timestamp_raw = LittleEndian::read_u64(&data[32..40]);
    let reason = LittleEndian::read_u32(&data[40..44]);
    let source_info = LittleEndian::read_u32(&data[44..48]);
    let file_attributes = LittleEndian::read_u32(&data[52..56]);
    let name_length = LittleEndian::read_u16(&data[56..58]) as usize;
    let name_offset = LittleEndian::read_u16(&data[58..60]) as usize;

    let name_start = name_offset;
    let name_end = name_start + name_length;
    if name_end > record_length {
        return Err(OrcError::malformed("USN record", "name beyond record"));
    }
    let name = super::attributes::utf16le_to_string(&data[name_start..name_end])?;

    let record = UsnRecord {
        usn,
        file_reference,
        parent_reference,
        timestamp: filetime_to_utc(timestamp_raw),
        reason,
        source_info,
        file_attributes,
        name,
    };
    Ok(Some((record, record_length)))
}

/// Windows FILETIME (100ns ticks since 1601-01-01) to a UTC timestamp.
/// Shared with the VSS catalog parser, whose `creation-time` field uses
/// the same encoding.
pub fn filetime_to_utc(filetime: u64) -> DateTime<Utc> {
    const EPOCH_DIFF_100NS: i64 = 116_444_736_000_000_000;
    let since_unix_100ns = filetime as i64 - EPOCH_DIFF_100NS;
    let secs = since_unix_100ns.div_euclid(10_000_000);
    let nanos = (since_unix_100ns.rem_euclid(10_000_000)) * 100;
    DateTime::from_timestamp(secs, nanos as u32).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}

/// Walks a full `$J` stream buffer (already read through the sparse
/// non-resident reader), yielding every valid record found, skipping
/// zero-filled gaps by scanning forward a page at a time (§4.3).
pub struct UsnJournalWalker<'a> {
    data: &'a [u8],
    pos: usize,
}

const SCAN_STEP: usize = 4096;

impl<'a> UsnJournalWalker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        UsnJournalWalker { data, pos: 0 }
    }
}

impl<'a> Iterator for UsnJournalWalker<'a> {
    type Item = UsnRecord;

    fn next(&mut self) -> Option<UsnRecord> {
        while self.pos < self.data.len() {
            match parse_record(&self.data[self.pos..]) {
                Ok(Some((record, len))) => {
                    let advance = ((len + RECORD_ALIGNMENT - 1) / RECORD_ALIGNMENT) * RECORD_ALIGNMENT;
                    self.pos += advance.max(RECORD_ALIGNMENT);
                    return Some(record);
                }
                Ok(None) => {
                    // Sparse or short tail: jump ahead a scan step and keep looking.
                    self.pos += SCAN_STEP;
                }
                Err(_) => {
                    self.pos += RECORD_ALIGNMENT;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_record(name: &str, usn: u64) -> Vec<u8> {
        let name_utf16: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let mut rec = vec![0u8; 60 + name_utf16.len()];
        LittleEndian::write_u64(&mut rec[8..16], Frn::new(10, 1).raw());
        LittleEndian::write_u64(&mut rec[16..24], Frn::new(5, 5).raw());
        LittleEndian::write_u64(&mut rec[24..32], usn);
        LittleEndian::write_u32(&mut rec[40..44], 0x2); // reason: data extend
        LittleEndian::write_u16(&mut rec[56..58], name_utf16.len() as u16);
        LittleEndian::write_u16(&mut rec[58..60], 60);
        rec[60..].copy_from_slice(&name_utf16);
        let len = rec.len() as u32;
        LittleEndian::write_u32(&mut rec[0..4], len);
        // pad to 8-byte alignment
        while rec.len() % RECORD_ALIGNMENT != 0 {
            rec.push(0);
        }
        rec
    }

    #[test]
    fn parses_single_record() {
        let data = build_record("file.txt", 1024);
        let (record, _len) = parse_record(&data).unwrap().unwrap();
        assert_eq!(record.name, "file.txt");
        assert_eq!(record.usn, 1024);
        assert_eq!(record.file_reference.record_index(), 10);
    }

    #[test]
    fn walker_skips_sparse_gap_between_records() {
        let mut data = build_record("a.txt", 100);
        data.extend(std::iter::repeat(0u8).take(SCAN_STEP * 2));
        data.extend(build_record("b.txt", 200));

        let names: Vec<String> = UsnJournalWalker::new(&data).map(|r| r.name).collect();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn parses_max_params() {
        let mut data = vec![0u8; 24];
        LittleEndian::write_u64(&mut data[0..8], 32 * 1024 * 1024);
        LittleEndian::write_u64(&mut data[8..16], 4 * 1024 * 1024);
        LittleEndian::write_u64(&mut data[16..24], 12345);
        let params = UsnMaxParams::parse(&data).unwrap();
        assert_eq!(params.max_size, 32 * 1024 * 1024);
        assert_eq!(params.lowest_valid_usn, 12345);
    }
}
