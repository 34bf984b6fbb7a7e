//! `$ATTRIBUTE_LIST` parsing (§3): enumerates attributes that live in
//! extension records rather than the base record, each entry pointing
//! at the FRN of the record that actually holds that attribute
//! instance. `mft::MftWalker` uses this to splice extension-record
//! attributes into logical order (§4.3 step 5).

use byteorder::{ByteOrder, LittleEndian};
use orc_core::{Frn, OrcError, Result};

use super::attributes::utf16le_to_string;

#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub type_code: u32,
    pub name: Option<String>,
    pub starting_vcn: u64,
    pub base_record_frn: Frn,
    pub attribute_id: u16,
}

pub fn parse_attribute_list(data: &[u8]) -> Result<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos + 26 <= data.len() {
        let type_code = LittleEndian::read_u32(&data[pos..pos + 4]);
        let record_length = LittleEndian::read_u16(&data[pos + 4..pos + 6]) as usize;
        if record_length < 26 {
            return Err(OrcError::malformed("attribute-list", "implausible entry length"));
        }
        let name_length = data[pos + 6] as usize;
        let name_offset = data[pos + 7] as usize;
        let starting_vcn = LittleEndian::read_u64(&data[pos + 8..pos + 16]);
        let base_reference_raw = LittleEndian::read_u64(&data[pos + 16..pos + 24]);
        let attribute_id = LittleEndian::read_u16(&data[pos + 24..pos + 26]);

        let name = if name_length > 0 {
            let start = pos + name_offset;
            let end = start + name_length * 2;
            if end > data.len() {
                return Err(OrcError::malformed("attribute-list", "name beyond buffer"));
            }
            Some(utf16le_to_string(&data[start..end])?)
        } else {
            None
        };

        entries.push(AttributeListEntry {
            type_code,
            name,
            starting_vcn,
            base_record_frn: Frn::from_raw(base_reference_raw),
            attribute_id,
        });

        if pos + record_length <= pos {
            break;
        }
        pos += record_length;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_entry(type_code: u32, frn: Frn) -> Vec<u8> {
        let mut e = vec![0u8; 26];
        LittleEndian::write_u32(&mut e[0..4], type_code);
        LittleEndian::write_u16(&mut e[4..6], 26);
        LittleEndian::write_u64(&mut e[16..24], frn.raw());
        e
    }

    #[test]
    fn parses_two_entries() {
        let mut data = build_entry(0x80, Frn::new(10, 1));
        data.extend(build_entry(0x80, Frn::new(20, 2)));
        let entries = parse_attribute_list(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].base_record_frn.record_index(), 20);
    }

    #[test]
    fn rejects_implausible_length() {
        let mut data = vec![0u8; 26];
        LittleEndian::write_u16(&mut data[4..6], 4);
        assert!(parse_attribute_list(&data).is_err());
    }
}
