//! VSS diff-area location table parsing (§4.6 supplement): the linked
//! list of blocks that maps each overwritten live-volume block to
//! where its pre-snapshot content was copied in the diff area.
//!
//! spec.md's catalog grammar stops at `DiffAreaInfo`'s offsets; this
//! table's own record shapes have no counterpart there and come from
//! `original_source`'s `DiffAreaLocationTableHeader`/
//! `DiffAreaLocationTableEntry` instead — a `Node`-chained 16384-byte
//! block (the same block header shape `catalog::parse_header` already
//! reads) followed by 24-byte `{offset, dataRelativeOffset, dataSize}`
//! entries. Parsing style matches `catalog.rs`: explicit `byteorder`
//! reads, a cycle-safe chain walk.

use byteorder::{ByteOrder, LittleEndian};
use orc_core::{OrcError, Result};
use std::collections::{HashMap, HashSet};

use super::catalog::BLOCK_SIZE;

const HEADER_SIZE: usize = 128;
const ENTRY_SIZE: usize = 24;
const ENTRIES_PER_BLOCK: usize = (BLOCK_SIZE as usize - HEADER_SIZE) / ENTRY_SIZE;

/// One redirection: the live-volume byte range `[offset, offset +
/// data_size)` now lives at `data_relative_offset` within the diff
/// area's own store stream (the same VSS store stream the catalog
/// itself was read from).
#[derive(Debug, Clone, Copy)]
pub struct DiffLocationEntry {
    pub offset: u64,
    pub data_relative_offset: u64,
    pub data_size: u64,
}

fn parse_block(data: &[u8]) -> Result<(Vec<DiffLocationEntry>, u64)> {
    if data.len() as u64 != BLOCK_SIZE {
        return Err(OrcError::malformed(
            "VSS diff-area location table block",
            format!("expected {BLOCK_SIZE} bytes, got {}", data.len()),
        ));
    }
    // Same header shape as a catalog block: signature, type, padding,
    // relative/current/next offset — only `next_offset` (bytes 40..48)
    // is needed to follow the chain.
    let next_offset = LittleEndian::read_u64(&data[40..48]);
    if next_offset != 0 && next_offset % BLOCK_SIZE != 0 {
        return Err(OrcError::malformed(
            "VSS diff-area location table block",
            format!("next_offset {next_offset} is not 16384-aligned"),
        ));
    }

    let mut entries = Vec::new();
    for i in 0..ENTRIES_PER_BLOCK {
        let start = HEADER_SIZE + i * ENTRY_SIZE;
        let chunk = &data[start..start + ENTRY_SIZE];
        let offset = LittleEndian::read_u64(&chunk[0..8]);
        let data_relative_offset = LittleEndian::read_u64(&chunk[8..16]);
        let data_size = LittleEndian::read_u64(&chunk[16..24]);
        if offset == 0 && data_relative_offset == 0 && data_size == 0 {
            continue;
        }
        entries.push(DiffLocationEntry { offset, data_relative_offset, data_size });
    }
    Ok((entries, next_offset))
}

/// Walks the diff-area location table chain starting at
/// `first_table_offset`, following `next_offset` until it hits zero.
/// Mirrors `catalog::walk_catalog`'s cycle guard: a revisited block is
/// treated as corruption and stops the walk rather than looping.
pub fn walk_diff_location_table<F>(mut read_block: F, first_table_offset: u64) -> Result<Vec<DiffLocationEntry>>
where
    F: FnMut(u64) -> Result<[u8; BLOCK_SIZE as usize]>,
{
    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    let mut offset = first_table_offset;
    while offset != 0 {
        if !visited.insert(offset) {
            log::warn!("VSS diff-area location table at {offset} revisits a block; stopping");
            break;
        }
        let bytes = read_block(offset)?;
        let (block_entries, next) = parse_block(&bytes)?;
        entries.extend(block_entries);
        offset = next;
    }
    Ok(entries)
}

/// Converts location-table entries into the `block_index -> diff-area
/// byte offset` map `DiffAreaView` needs, keying each entry by which
/// live-volume block (at `block_size` granularity) it redirects.
pub fn overwritten_blocks(entries: &[DiffLocationEntry], block_size: u64) -> HashMap<u64, u64> {
    entries.iter().map(|e| (e.offset / block_size, e.data_relative_offset)).collect()
}
