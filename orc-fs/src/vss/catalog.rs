//! VSS catalog block parsing (§4.6): the in-band metadata a Volume
//! Shadow Copy writes into `\System Volume Information\` describing
//! every snapshot and its diff area.
//!
//! No teacher source covers this (the formatter never reads shadow
//! copies); grounded instead in the teacher's general approach to
//! fixed-layout binary records — explicit `byteorder` reads at fixed
//! offsets, a discriminated entry type, never an unaligned struct cast
//! — carried over from `ntfs::mft` and `volume_reader::boot_sector`.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use orc_core::{OrcError, Result};
use uuid::Uuid;

use crate::ntfs::filetime_to_utc;

/// Total size of one catalog block on disk (§6 "VSS catalog block").
pub const BLOCK_SIZE: u64 = 16384;
const HEADER_SIZE: usize = 128;
const ENTRY_SIZE: usize = 128;
/// Entries fill whatever remains of the block after the header; at
/// 128 bytes each that's 127, not the round 128 the prose in §4.6
/// suggests — see the Open Question resolution in `DESIGN.md`.
const ENTRIES_PER_BLOCK: usize = (BLOCK_SIZE as usize - HEADER_SIZE) / ENTRY_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogBlockType {
    Catalog,
    DiffAreaTable,
    DiffAreaLocationTable,
    Bitmap,
    Unknown(u32),
}

impl CatalogBlockType {
    fn from_raw(v: u32) -> Self {
        match v {
            0 => CatalogBlockType::Catalog,
            1 => CatalogBlockType::DiffAreaTable,
            2 => CatalogBlockType::DiffAreaLocationTable,
            3 => CatalogBlockType::Bitmap,
            other => CatalogBlockType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogBlockHeader {
    pub signature: [u8; 16],
    pub block_type: CatalogBlockType,
    pub relative_offset: u64,
    pub current_offset: u64,
    pub next_offset: u64,
}

/// Discriminant of a 128-byte catalog entry, per §4.6: "discriminated
/// by their first 4 bytes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogEntryType {
    EndOfCatalog,
    Free,
    SnapshotInfo,
    DiffAreaInfo,
    Unknown(u32),
}

impl CatalogEntryType {
    fn from_raw(v: u32) -> Self {
        match v {
            0 => CatalogEntryType::EndOfCatalog,
            1 => CatalogEntryType::Free,
            2 => CatalogEntryType::SnapshotInfo,
            3 => CatalogEntryType::DiffAreaInfo,
            other => CatalogEntryType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub size: u64,
    pub guid: Uuid,
    pub stack_position: u32,
    pub flags: u32,
    pub creation_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DiffAreaInfo {
    pub first_diff_table_offset: u64,
    pub snapshot_guid: Uuid,
    pub application_info_offset: u64,
    pub diff_location_table_offset: u64,
    pub bitmap_offset: u64,
    pub frn: u64,
    pub allocated_size: u64,
    pub previous_bitmap_offset: u64,
}

#[derive(Debug, Clone)]
pub enum CatalogEntry {
    EndOfCatalog,
    Free,
    SnapshotInfo(SnapshotInfo),
    DiffAreaInfo(DiffAreaInfo),
    Unknown(u32),
}

#[derive(Debug, Clone)]
pub struct CatalogBlock {
    pub header: CatalogBlockHeader,
    pub entries: Vec<CatalogEntry>,
}

fn read_guid(bytes: &[u8]) -> Uuid {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[0..16]);
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&buf[8..16]);
    // VSS GUIDs are stored in the same mixed-endian layout Windows uses
    // everywhere else (`GUID` struct): first three fields little-endian.
    Uuid::from_fields(
        LittleEndian::read_u32(&buf[0..4]),
        LittleEndian::read_u16(&buf[4..6]),
        LittleEndian::read_u16(&buf[6..8]),
        &tail,
    )
}

fn parse_header(data: &[u8]) -> Result<CatalogBlockHeader> {
    if data.len() < HEADER_SIZE {
        return Err(OrcError::malformed("VSS catalog block", "header truncated"));
    }
    let mut signature = [0u8; 16];
    signature.copy_from_slice(&data[0..16]);
    let block_type = CatalogBlockType::from_raw(LittleEndian::read_u32(&data[16..20]));
    // bytes 20..24 are padding.
    let relative_offset = LittleEndian::read_u64(&data[24..32]);
    let current_offset = LittleEndian::read_u64(&data[32..40]);
    let next_offset = LittleEndian::read_u64(&data[40..48]);
    Ok(CatalogBlockHeader { signature, block_type, relative_offset, current_offset, next_offset })
}

fn parse_entry(data: &[u8]) -> CatalogEntry {
    let discriminant = LittleEndian::read_u32(&data[0..4]);
    match CatalogEntryType::from_raw(discriminant) {
        CatalogEntryType::EndOfCatalog => CatalogEntry::EndOfCatalog,
        CatalogEntryType::Free => CatalogEntry::Free,
        CatalogEntryType::SnapshotInfo => {
            let size = LittleEndian::read_u64(&data[8..16]);
            let guid = read_guid(&data[16..32]);
            let stack_position = LittleEndian::read_u32(&data[32..36]);
            let flags = LittleEndian::read_u32(&data[36..40]);
            let creation_time = filetime_to_utc(LittleEndian::read_u64(&data[40..48]));
            CatalogEntry::SnapshotInfo(SnapshotInfo { size, guid, stack_position, flags, creation_time })
        }
        CatalogEntryType::DiffAreaInfo => {
            let first_diff_table_offset = LittleEndian::read_u64(&data[8..16]);
            let snapshot_guid = read_guid(&data[16..32]);
            let application_info_offset = LittleEndian::read_u64(&data[32..40]);
            let diff_location_table_offset = LittleEndian::read_u64(&data[40..48]);
            let bitmap_offset = LittleEndian::read_u64(&data[48..56]);
            let frn = LittleEndian::read_u64(&data[56..64]);
            let allocated_size = LittleEndian::read_u64(&data[64..72]);
            let previous_bitmap_offset = LittleEndian::read_u64(&data[72..80]);
            CatalogEntry::DiffAreaInfo(DiffAreaInfo {
                first_diff_table_offset,
                snapshot_guid,
                application_info_offset,
                diff_location_table_offset,
                bitmap_offset,
                frn,
                allocated_size,
                previous_bitmap_offset,
            })
        }
        CatalogEntryType::Unknown(v) => CatalogEntry::Unknown(v),
    }
}

/// Parses one 16384-byte catalog block. Validates sub-block offsets
/// are 16384-aligned (§4.6: "unaligned values indicate corruption and
/// abort catalog parsing").
pub fn parse_catalog_block(data: &[u8]) -> Result<CatalogBlock> {
    if data.len() as u64 != BLOCK_SIZE {
        return Err(OrcError::malformed("VSS catalog block", format!("expected {BLOCK_SIZE} bytes, got {}", data.len())));
    }
    let header = parse_header(data)?;
    for (name, offset) in [
        ("relative_offset", header.relative_offset),
        ("current_offset", header.current_offset),
        ("next_offset", header.next_offset),
    ] {
        if offset != 0 && offset % BLOCK_SIZE != 0 {
            return Err(OrcError::malformed("VSS catalog block", format!("{name} {offset} is not 16384-aligned")));
        }
    }

    let mut entries = Vec::with_capacity(ENTRIES_PER_BLOCK);
    for i in 0..ENTRIES_PER_BLOCK {
        let start = HEADER_SIZE + i * ENTRY_SIZE;
        entries.push(parse_entry(&data[start..start + ENTRY_SIZE]));
    }
    Ok(CatalogBlock { header, entries })
}

/// Walks the block chain starting at `first_block_offset`, following
/// `next_offset` until it hits zero (§4.6). A cycle is treated as
/// corruption: the walk stops and returns what it collected so far
/// rather than looping forever.
pub fn walk_catalog<F>(mut read_block: F, first_block_offset: u64) -> Result<Vec<CatalogBlock>>
where
    F: FnMut(u64) -> Result<[u8; BLOCK_SIZE as usize]>,
{
    let mut blocks = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut offset = first_block_offset;
    while offset != 0 {
        if !visited.insert(offset) {
            log::warn!("VSS catalog chain at {offset} revisits a block; stopping");
            break;
        }
        let bytes = read_block(offset)?;
        let block = parse_catalog_block(&bytes)?;
        let next = block.header.next_offset;
        blocks.push(block);
        offset = next;
    }
    Ok(blocks)
}

/// Collects every `SnapshotInfo` entry across a chain of catalog
/// blocks, in block-then-entry order (callers sort by creation time
/// per the shadow policy in §4.7).
pub fn snapshots_in(blocks: &[CatalogBlock]) -> Vec<SnapshotInfo> {
    blocks
        .iter()
        .flat_map(|b| &b.entries)
        .filter_map(|e| match e {
            CatalogEntry::SnapshotInfo(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// Collects every `DiffAreaInfo` entry matching a given snapshot GUID.
pub fn diff_areas_for<'a>(blocks: &'a [CatalogBlock], snapshot_guid: Uuid) -> Vec<&'a DiffAreaInfo> {
    blocks
        .iter()
        .flat_map(|b| &b.entries)
        .filter_map(|e| match e {
            CatalogEntry::DiffAreaInfo(d) if d.snapshot_guid == snapshot_guid => Some(d),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_block(next_offset: u64) -> Vec<u8> {
        let mut data = vec![0u8; BLOCK_SIZE as usize];
        data[0..16].copy_from_slice(b"GUID: shadow-cop");
        LittleEndian::write_u32(&mut data[16..20], 0); // Catalog
        LittleEndian::write_u64(&mut data[40..48], next_offset);
        // Fill all entries as end-of-catalog (0) by default (already zeroed).
        data
    }

    fn write_snapshot_entry(block: &mut [u8], index: usize, guid: Uuid, creation_filetime: u64) {
        let start = HEADER_SIZE + index * ENTRY_SIZE;
        LittleEndian::write_u32(&mut block[start..start + 4], 2); // SnapshotInfo
        LittleEndian::write_u64(&mut block[start + 8..start + 16], 12345); // size
        let (d1, d2, d3, d4) = guid.as_fields();
        LittleEndian::write_u32(&mut block[start + 16..start + 20], d1);
        LittleEndian::write_u16(&mut block[start + 20..start + 22], d2);
        LittleEndian::write_u16(&mut block[start + 22..start + 24], d3);
        block[start + 24..start + 32].copy_from_slice(d4);
        LittleEndian::write_u32(&mut block[start + 32..start + 36], 1); // stack position
        LittleEndian::write_u64(&mut block[start + 40..start + 48], creation_filetime);
    }

    #[test]
    fn parses_header_and_rejects_wrong_size() {
        let block = empty_block(0);
        let parsed = parse_catalog_block(&block).unwrap();
        assert_eq!(parsed.header.block_type, CatalogBlockType::Catalog);
        assert!(parse_catalog_block(&block[0..100]).is_err());
    }

    #[test]
    fn rejects_unaligned_next_offset() {
        let block = empty_block(12345);
        assert!(parse_catalog_block(&block).is_err());
    }

    #[test]
    fn extracts_snapshot_info_entry() {
        let mut block = empty_block(0);
        let guid = Uuid::new_v4();
        write_snapshot_entry(&mut block, 0, guid, 130_000_000_000_000_000);
        let parsed = parse_catalog_block(&block).unwrap();
        let snapshots = snapshots_in(std::slice::from_ref(&parsed));
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].guid, guid);
        assert_eq!(snapshots[0].stack_position, 1);
    }

    #[test]
    fn walk_catalog_follows_chain_and_stops_on_cycle() {
        let first = empty_block(BLOCK_SIZE);
        let second = empty_block(BLOCK_SIZE); // points back at itself: a cycle
        let blocks = [first, second];
        let result = walk_catalog(
            |offset| {
                let index = (offset / BLOCK_SIZE) as usize;
                let mut out = [0u8; BLOCK_SIZE as usize];
                out.copy_from_slice(&blocks[index.min(blocks.len() - 1)]);
                Ok(out)
            },
            0,
        )
        .unwrap();
        // 0 -> BLOCK_SIZE -> BLOCK_SIZE (revisit) -> stop.
        assert_eq!(result.len(), 2);
    }
}
