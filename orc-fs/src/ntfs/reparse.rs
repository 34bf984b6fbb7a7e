//! Reparse point payload parsing (§3, §6), grounded in the teacher's
//! `filesystems::ntfs::reparse` (tag constants, mount-point/symlink
//! payload shape) — extended with the WOF payload the teacher never
//! needed, since `moses` never reads WOF-compressed system files.

use byteorder::{ByteOrder, LittleEndian};
use orc_core::{OrcError, Result};

use super::structures::ReparseTag;

/// WOF compression algorithm (§3, §6); chunk size is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WofAlgorithm {
    Xpress4k,
    Lzx,
    Xpress8k,
    Xpress16k,
}

impl WofAlgorithm {
    pub fn from_raw(v: u32) -> Result<Self> {
        match v {
            0 => Ok(WofAlgorithm::Xpress4k),
            1 => Ok(WofAlgorithm::Lzx),
            2 => Ok(WofAlgorithm::Xpress8k),
            3 => Ok(WofAlgorithm::Xpress16k),
            other => Err(OrcError::unsupported(format!("unknown WOF algorithm {other}"))),
        }
    }

    /// Chunk size in bytes, except for `Lzx` whose chunk size is a
    /// property of the `::WofCompressedData` stream's own header
    /// rather than the algorithm id (§4.5, §6).
    pub fn chunk_size(self) -> u32 {
        match self {
            WofAlgorithm::Xpress4k => 4096,
            WofAlgorithm::Xpress8k => 8192,
            WofAlgorithm::Xpress16k => 16384,
            WofAlgorithm::Lzx => 32768,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WofReparseData {
    pub version: u32,
    pub provider: u32,
    pub file_info_version: u32,
    pub algorithm: WofAlgorithm,
    /// Present on some provider versions; when absent the caller has to
    /// learn the logical size elsewhere (e.g. `$STANDARD_INFORMATION`
    /// isn't it either — the unnamed stream's own declared size is the
    /// *compressed* size for a WOF file, so this is the only on-disk
    /// source of truth when it's there).
    pub uncompressed_size: Option<u64>,
}

pub fn parse_wof_payload(data: &[u8]) -> Result<WofReparseData> {
    if data.len() < 16 {
        return Err(OrcError::malformed("WOF reparse payload", "shorter than 16 bytes"));
    }
    let version = LittleEndian::read_u32(&data[0..4]);
    let provider = LittleEndian::read_u32(&data[4..8]);
    let file_info_version = LittleEndian::read_u32(&data[8..12]);
    let algorithm = WofAlgorithm::from_raw(LittleEndian::read_u32(&data[12..16]))?;
    let uncompressed_size = if data.len() >= 24 {
        Some(LittleEndian::read_u64(&data[16..24]))
    } else {
        None
    };
    Ok(WofReparseData { version, provider, file_info_version, algorithm, uncompressed_size })
}

/// Reparse point as stored in the `REPARSE_POINT` attribute: a 4-byte
/// tag, a 2-byte data-length, 2 reserved bytes, then tag-specific
/// payload (§3, §6).
#[derive(Debug, Clone)]
pub struct ReparsePoint {
    pub tag: ReparseTag,
    pub payload: Vec<u8>,
}

pub fn parse_reparse_point(data: &[u8]) -> Result<ReparsePoint> {
    if data.len() < 8 {
        return Err(OrcError::malformed("reparse point", "header shorter than 8 bytes"));
    }
    let tag_raw = LittleEndian::read_u32(&data[0..4]);
    let length = LittleEndian::read_u16(&data[4..6]) as usize;
    if 8 + length > data.len() {
        return Err(OrcError::malformed("reparse point", "payload beyond buffer"));
    }
    Ok(ReparsePoint {
        tag: ReparseTag::from_raw(tag_raw),
        payload: data[8..8 + length].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wof_reparse_payload() {
        let mut buf = vec![0u8; 8 + 16];
        LittleEndian::write_u32(&mut buf[0..4], ReparseTag::TAG_WOF);
        LittleEndian::write_u16(&mut buf[4..6], 16);
        LittleEndian::write_u32(&mut buf[8..12], 1);
        LittleEndian::write_u32(&mut buf[12..16], 2);
        LittleEndian::write_u32(&mut buf[16..20], 1);
        LittleEndian::write_u32(&mut buf[20..24], 2); // xpress8k

        let rp = parse_reparse_point(&buf).unwrap();
        assert_eq!(rp.tag, ReparseTag::Wof);
        let wof = parse_wof_payload(&rp.payload).unwrap();
        assert_eq!(wof.algorithm, WofAlgorithm::Xpress8k);
        assert_eq!(wof.algorithm.chunk_size(), 8192);
        assert_eq!(wof.uncompressed_size, None);
    }

    #[test]
    fn parses_wof_payload_with_trailing_uncompressed_size() {
        let mut payload = vec![0u8; 24];
        LittleEndian::write_u32(&mut payload[12..16], 0); // xpress4k
        LittleEndian::write_u64(&mut payload[16..24], 5 * 1024 * 1024);
        let wof = parse_wof_payload(&payload).unwrap();
        assert_eq!(wof.uncompressed_size, Some(5 * 1024 * 1024));
    }

    #[test]
    fn unknown_algorithm_is_unsupported_not_fatal_to_parse() {
        let mut payload = vec![0u8; 16];
        LittleEndian::write_u32(&mut payload[12..16], 99);
        assert!(parse_wof_payload(&payload).is_err());
    }
}
