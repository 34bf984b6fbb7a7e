//! Windows Overlay Filter (WOF) decompression (§4.5), new relative to
//! the teacher: `moses` never had to read through a reparse point to a
//! compressed unnamed stream.
//!
//! The chunk-offset-table layout (table size, per-chunk offset/size
//! derivation, last-chunk sizing) is ported from the original
//! collector's `WofChunks` (`Filesystem/Ntfs/Compression/WofChunks.cpp`),
//! which parses the table itself but — like the rest of that codebase —
//! hands the actual chunk bytes to the platform's decompression API
//! rather than reimplementing the codec. Chunk table parsing and
//! uncompressed-chunk passthrough ("the chunk didn't shrink") are
//! implemented here; the actual chunk codecs are not. `Xpress4k/8k/16k`
//! chunks use Huffman-prefixed LZ77 ([MS-XCA] §2.2), not the plain LZ77
//! "Xpress" token stream this module used to decode them with — that
//! earlier implementation produced plausible-looking but wrong bytes for
//! every real WOF stream, so both it and `WofAlgorithm::Lzx` are now
//! reported as unsupported rather than guessed at.

use byteorder::{ByteOrder, LittleEndian};
use orc_core::{OrcError, Result};

use crate::ntfs::reparse::WofAlgorithm;

/// One compressed chunk's span within the compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub offset: u64,
    pub size: u64,
}

/// Number of `2^bit`-sized chunks needed to cover `uncompressed_size`.
pub fn chunk_count(algorithm: WofAlgorithm, uncompressed_size: u64) -> u64 {
    let chunk_size = algorithm.chunk_size() as u64;
    (uncompressed_size + chunk_size - 1) / chunk_size
}

/// 4 bytes per offset while the uncompressed size fits in 32 bits, 8
/// bytes once it doesn't — the same threshold the compressor used when
/// choosing how wide to write each table entry.
pub fn chunk_offset_width(uncompressed_size: u64) -> usize {
    if uncompressed_size >= u32::MAX as u64 {
        8
    } else {
        4
    }
}

/// Parses the chunk offset table prefixing a WOF-compressed stream and
/// derives each chunk's `(offset, size)` within the stream that follows
/// it. `compressed_size` is the total length of the compressed stream,
/// table included.
pub fn parse_chunk_table(
    table_bytes: &[u8],
    algorithm: WofAlgorithm,
    compressed_size: u64,
    uncompressed_size: u64,
) -> Result<Vec<ChunkLocation>> {
    let count = chunk_count(algorithm, uncompressed_size);
    let width = chunk_offset_width(uncompressed_size);
    let table_len_bytes = (count.saturating_sub(1) as usize) * width;

    if table_bytes.len() < table_len_bytes {
        return Err(OrcError::malformed("WOF chunk table", "buffer shorter than declared table"));
    }

    let offsets: Vec<u64> = (0..count.saturating_sub(1))
        .map(|i| {
            let start = i as usize * width;
            if width == 8 {
                LittleEndian::read_u64(&table_bytes[start..start + 8])
            } else {
                LittleEndian::read_u32(&table_bytes[start..start + 4]) as u64
            }
        })
        .collect();

    let mut table = Vec::with_capacity(count as usize);
    if offsets.is_empty() {
        table.push(ChunkLocation { offset: 0, size: compressed_size });
        return Ok(table);
    }

    table.push(ChunkLocation { offset: table_len_bytes as u64, size: offsets[0] });
    for i in 1..offsets.len() {
        table.push(ChunkLocation {
            offset: offsets[i - 1] + table_len_bytes as u64,
            size: offsets[i] - offsets[i - 1],
        });
    }
    let last_offset = table.last().unwrap().offset;
    table.last_mut().unwrap().size = compressed_size - last_offset;

    Ok(table)
}

/// Decompresses one WOF chunk. `is_last` selects whether the chunk
/// decompresses to the full `chunk_size` or to the remainder implied by
/// `uncompressed_size` (§4.5 "final chunk sizing").
pub fn decompress_chunk(
    algorithm: WofAlgorithm,
    _compressed: &[u8],
    _output_len: usize,
) -> Result<Vec<u8>> {
    match algorithm {
        WofAlgorithm::Xpress4k | WofAlgorithm::Xpress8k | WofAlgorithm::Xpress16k => Err(
            OrcError::unsupported("Xpress-Huffman ([MS-XCA] §2.2) chunk decompression is not implemented"),
        ),
        WofAlgorithm::Lzx => Err(OrcError::unsupported("LZX chunk decompression is not implemented")),
    }
}

/// Decompresses a whole WOF-compressed unnamed data stream, as already
/// read in full from the MFT's `DATA` attribute (WOF stores the
/// compressed blob as ordinary attribute content — no NTFS-level
/// compression or sparse runs are involved, so this needs only the raw
/// bytes, not a volume reader).
pub fn decompress_wof_stream(
    compressed: &[u8],
    algorithm: WofAlgorithm,
    uncompressed_size: u64,
) -> Result<Vec<u8>> {
    let count = chunk_count(algorithm, uncompressed_size);
    let width = chunk_offset_width(uncompressed_size);
    let table_len = (count.saturating_sub(1) as usize) * width;
    if compressed.len() < table_len {
        return Err(OrcError::malformed("WOF stream", "shorter than its own chunk table"));
    }

    let table = parse_chunk_table(&compressed[..table_len], algorithm, compressed.len() as u64, uncompressed_size)?;
    let chunk_size = algorithm.chunk_size() as u64;

    let mut output = Vec::with_capacity(uncompressed_size as usize);
    for (i, loc) in table.iter().enumerate() {
        let start = loc.offset as usize;
        let end = start + loc.size as usize;
        if end > compressed.len() {
            return Err(OrcError::malformed("WOF chunk", "extends beyond stream"));
        }
        let remaining = uncompressed_size - output.len() as u64;
        let expected_len = remaining.min(chunk_size) as usize;

        let chunk_bytes = &compressed[start..end];
        if loc.size as u64 == expected_len as u64 {
            // Stored uncompressed: the chunk didn't shrink.
            output.extend_from_slice(chunk_bytes);
        } else {
            let decoded = decompress_chunk(algorithm, chunk_bytes, expected_len)
                .map_err(|e| OrcError::malformed("WOF chunk", format!("chunk {i}: {e}")))?;
            output.extend_from_slice(&decoded);
        }
    }
    output.truncate(uncompressed_size as usize);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_table_covers_whole_stream() {
        let table = parse_chunk_table(&[], WofAlgorithm::Xpress4k, 500, 500).unwrap();
        assert_eq!(table, vec![ChunkLocation { offset: 0, size: 500 }]);
    }

    #[test]
    fn multi_chunk_table_derives_offsets_from_cumulative_sizes() {
        // Two chunks of uncompressed data => one offset entry in the table.
        let uncompressed_size = 4096 * 2;
        let mut table_bytes = vec![0u8; 4];
        LittleEndian::write_u32(&mut table_bytes, 100); // first chunk compresses to 100 bytes
        let table =
            parse_chunk_table(&table_bytes, WofAlgorithm::Xpress4k, 4 + 100 + 50, uncompressed_size).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0], ChunkLocation { offset: 4, size: 100 });
        assert_eq!(table[1], ChunkLocation { offset: 104, size: 50 });
    }

    #[test]
    fn lzx_is_reported_unsupported_not_guessed() {
        assert!(decompress_chunk(WofAlgorithm::Lzx, &[], 16).is_err());
    }

    #[test]
    fn xpress_chunks_are_reported_unsupported_not_guessed() {
        assert!(decompress_chunk(WofAlgorithm::Xpress4k, &[], 16).is_err());
        assert!(decompress_chunk(WofAlgorithm::Xpress8k, &[], 16).is_err());
        assert!(decompress_chunk(WofAlgorithm::Xpress16k, &[], 16).is_err());
    }
}
