//! Attribute header + body parsing (§3, §4.3, §6), grounded in the
//! teacher's `ntfs::attributes::parse_attribute` — resident vs
//! non-resident dispatch, named-stream handling — reworked onto
//! explicit offset reads and an `Attribute` struct that keeps the raw
//! run-list instead of eagerly resolving it (the volume reader isn't
//! available at parse time; resolution happens in `mft::AttributeReader`).

use byteorder::{ByteOrder, LittleEndian};
use orc_core::{OrcError, Result};

use super::data_runs::{decode_data_runs, DataRun};
use super::structures::*;

#[derive(Debug, Clone)]
pub enum AttributeBody {
    /// Content lives inline in the MFT record.
    Resident(Vec<u8>),
    /// Content is described by a run-list; `compression_unit` is the
    /// exponent N (2^N clusters per compression unit), 0 = uncompressed.
    NonResident {
        runs: Vec<DataRun>,
        compression_unit: u16,
        allocated_size: u64,
        data_size: u64,
        initialized_size: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub type_code: u32,
    pub name: Option<String>,
    pub attribute_id: u16,
    pub flags: u16,
    pub body: AttributeBody,
}

impl Attribute {
    pub fn is_resident(&self) -> bool {
        matches!(self.body, AttributeBody::Resident(_))
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub const FLAG_COMPRESSED: u16 = 0x0001;
    pub const FLAG_ENCRYPTED: u16 = 0x4000;
    pub const FLAG_SPARSE: u16 = 0x8000;

    pub fn is_encrypted(&self) -> bool {
        self.flags & Self::FLAG_ENCRYPTED != 0
    }

    pub fn resident_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            AttributeBody::Resident(b) => Some(b),
            AttributeBody::NonResident { .. } => None,
        }
    }
}

/// Parses one attribute starting at `offset` in `record`. Returns the
/// attribute plus the total byte length consumed (the caller advances
/// by this to find the next attribute, per §4.3 step 4).
pub fn parse_attribute(record: &[u8], offset: usize) -> Result<(Attribute, u32)> {
    if offset + 16 > record.len() {
        return Err(OrcError::malformed("attribute header", "beyond record buffer"));
    }

    let type_code = LittleEndian::read_u32(&record[offset..offset + 4]);
    if type_code == ATTR_TYPE_END {
        return Err(OrcError::malformed("attribute header", "end sentinel, not an attribute"));
    }
    let record_length = LittleEndian::read_u32(&record[offset + 4..offset + 8]);
    if record_length < 16 || offset as u64 + record_length as u64 > record.len() as u64 {
        return Err(OrcError::malformed("attribute header", "implausible record length"));
    }
    let non_resident = record[offset + 8] != 0;
    let name_length = record[offset + 9] as usize;
    let name_offset = LittleEndian::read_u16(&record[offset + 10..offset + 12]) as usize;
    let flags = LittleEndian::read_u16(&record[offset + 12..offset + 14]);
    let attribute_id = LittleEndian::read_u16(&record[offset + 14..offset + 16]);

    let name = if name_length > 0 {
        let start = offset + name_offset;
        let end = start + name_length * 2;
        if end > record.len() {
            return Err(OrcError::malformed("attribute name", "beyond record buffer"));
        }
        Some(utf16le_to_string(&record[start..end])?)
    } else {
        None
    };

    let body = if non_resident {
        parse_non_resident_body(record, offset)?
    } else {
        parse_resident_body(record, offset)?
    };

    Ok((
        Attribute { type_code, name, attribute_id, flags, body },
        record_length,
    ))
}

fn parse_resident_body(record: &[u8], offset: usize) -> Result<AttributeBody> {
    if offset + 24 > record.len() {
        return Err(OrcError::malformed("resident attribute", "header beyond buffer"));
    }
    let value_length = LittleEndian::read_u32(&record[offset + 16..offset + 20]) as usize;
    let value_offset = LittleEndian::read_u16(&record[offset + 20..offset + 22]) as usize;
    let start = offset + value_offset;
    let end = start + value_length;
    if end > record.len() {
        return Err(OrcError::malformed("resident attribute", "value beyond buffer"));
    }
    Ok(AttributeBody::Resident(record[start..end].to_vec()))
}

fn parse_non_resident_body(record: &[u8], offset: usize) -> Result<AttributeBody> {
    if offset + 64 > record.len() {
        return Err(OrcError::malformed("non-resident attribute", "header beyond buffer"));
    }
    let data_runs_offset = LittleEndian::read_u16(&record[offset + 32..offset + 34]) as usize;
    let compression_unit = LittleEndian::read_u16(&record[offset + 34..offset + 36]);
    let allocated_size = LittleEndian::read_u64(&record[offset + 40..offset + 48]);
    let data_size = LittleEndian::read_u64(&record[offset + 48..offset + 56]);
    let initialized_size = LittleEndian::read_u64(&record[offset + 56..offset + 64]);

    let runs_start = offset + data_runs_offset;
    let mut runs_end = runs_start;
    while runs_end < record.len() && record[runs_end] != 0 {
        let header_byte = record[runs_end];
        let length_size = (header_byte & 0x0F) as usize;
        let offset_size = ((header_byte >> 4) & 0x0F) as usize;
        runs_end += 1 + length_size + offset_size;
    }
    if runs_end > record.len() {
        return Err(OrcError::malformed("non-resident attribute", "run-list beyond buffer"));
    }
    let runs = decode_data_runs(&record[runs_start..runs_end])?;

    Ok(AttributeBody::NonResident {
        runs,
        compression_unit,
        allocated_size,
        data_size,
        initialized_size,
    })
}

pub fn utf16le_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(OrcError::malformed("UTF-16 name", "odd byte length"));
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| LittleEndian::read_u16(c)).collect();
    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_resident_filename(name: &str) -> Vec<u8> {
        let name_utf16: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        // FILE_NAME value: 64-byte fixed part + name.
        let mut value = vec![0u8; 64 + name_utf16.len()];
        value[64 - 2] = name.chars().count() as u8;
        value[64 - 1] = 1; // Win32 namespace
        value[64..].copy_from_slice(&name_utf16);

        let mut record = vec![0u8; 24 + value.len()];
        LittleEndian::write_u32(&mut record[0..4], ATTR_TYPE_FILE_NAME);
        LittleEndian::write_u32(&mut record[4..8], record.len() as u32);
        record[8] = 0; // resident
        record[9] = 0; // no name
        LittleEndian::write_u16(&mut record[10..12], 24);
        LittleEndian::write_u32(&mut record[16..20], value.len() as u32);
        LittleEndian::write_u16(&mut record[20..22], 24);
        record[24..].copy_from_slice(&value);
        record
    }

    #[test]
    fn parses_resident_attribute_value() {
        let record = build_resident_filename("hello.txt");
        let (attr, len) = parse_attribute(&record, 0).unwrap();
        assert_eq!(attr.type_code, ATTR_TYPE_FILE_NAME);
        assert_eq!(len as usize, record.len());
        assert!(attr.is_resident());
    }

    #[test]
    fn rejects_attribute_past_end_sentinel() {
        let mut record = vec![0u8; 16];
        LittleEndian::write_u32(&mut record[0..4], ATTR_TYPE_END);
        assert!(parse_attribute(&record, 0).is_err());
    }

    #[test]
    fn parses_non_resident_run_list() {
        let mut record = vec![0u8; 64];
        LittleEndian::write_u32(&mut record[0..4], ATTR_TYPE_DATA);
        record[8] = 1; // non-resident
        LittleEndian::write_u16(&mut record[32..34], 64); // data runs offset
        LittleEndian::write_u64(&mut record[48..56], 4096); // data_size
        record.extend_from_slice(&[0x21, 0x08, 0x0A, 0x00, 0x00]);
        LittleEndian::write_u32(&mut record[4..8], record.len() as u32);

        let (attr, _) = parse_attribute(&record, 0).unwrap();
        match attr.body {
            AttributeBody::NonResident { runs, data_size, .. } => {
                assert_eq!(runs.len(), 1);
                assert_eq!(runs[0].lcn, Some(10));
                assert_eq!(data_size, 4096);
            }
            _ => panic!("expected non-resident body"),
        }
    }
}
