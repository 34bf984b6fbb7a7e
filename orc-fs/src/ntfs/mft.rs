//! MFT walker, attribute-list splicing, deleted-record resurrection and
//! the shared non-resident-attribute reader (§4.3).
//!
//! Grounded in the teacher's `ntfs::mft::{apply_fixup, MftRecord}` for
//! the fixup/parse shape, generalized to walk an arbitrary `VolumeReader`
//! instead of a single `AlignedDeviceReader` over a live mounted device,
//! and extended with attribute-list splicing, USN timestamps and
//! resurrection — none of which the teacher's read/write driver needed.

use byteorder::{ByteOrder, LittleEndian};
use orc_core::{Frn, OrcError, Result};
use std::collections::HashMap;

pub use orc_core::config::ResurrectMode;

use crate::volume_reader::Geometry;
use crate::VolumeReader;

use super::attribute_list::parse_attribute_list;
use super::attributes::{parse_attribute, utf16le_to_string, Attribute, AttributeBody};
use super::data_runs::DataRun;
use super::structures::*;

/// Applies the Update Sequence Array fixup in place (§4.3 step 2): the
/// last two bytes of every 512-byte sector are replaced by the stored
/// original value, after checking they currently hold the USA's check
/// value. A mismatch means a torn write or corruption — the caller
/// treats this as a malformed record, not a panic.
pub fn apply_fixup(buffer: &mut [u8], usa_offset: u16, usa_count: u16) -> Result<()> {
    const SECTOR_SIZE: usize = 512;
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;

    if usa_count == 0 {
        return Ok(());
    }
    if usa_offset + usa_count * 2 > buffer.len() {
        return Err(OrcError::malformed("MFT record", "USA extends beyond buffer"));
    }

    let check = [buffer[usa_offset], buffer[usa_offset + 1]];
    for i in 1..usa_count {
        let sector_end = i * SECTOR_SIZE;
        if sector_end > buffer.len() {
            break;
        }
        let tail = sector_end - 2;
        if buffer[tail] != check[0] || buffer[tail + 1] != check[1] {
            return Err(OrcError::malformed(
                "MFT record",
                format!("fixup mismatch at sector {i}"),
            ));
        }
        let original = [buffer[usa_offset + i * 2], buffer[usa_offset + i * 2 + 1]];
        buffer[tail] = original[0];
        buffer[tail + 1] = original[1];
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileNameInfo {
    pub parent_frn: Frn,
    pub namespace: FileNameNamespace,
    pub name: String,
    pub allocated_size: u64,
    pub data_size: u64,
    pub file_attributes: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_change_time: u64,
    pub access_time: u64,
}

/// Parses a resident `FILE_NAME` attribute value (§3).
pub fn parse_file_name(data: &[u8]) -> Result<FileNameInfo> {
    if data.len() < 66 {
        return Err(OrcError::malformed("FILE_NAME attribute", "shorter than fixed part"));
    }
    let parent_raw = LittleEndian::read_u64(&data[0..8]);
    let creation_time = LittleEndian::read_u64(&data[8..16]);
    let modification_time = LittleEndian::read_u64(&data[16..24]);
    let mft_change_time = LittleEndian::read_u64(&data[24..32]);
    let access_time = LittleEndian::read_u64(&data[32..40]);
    let allocated_size = LittleEndian::read_u64(&data[40..48]);
    let data_size = LittleEndian::read_u64(&data[48..56]);
    let file_attributes = LittleEndian::read_u32(&data[56..60]);
    let name_length = data[64] as usize;
    let namespace = FileNameNamespace::from_raw(data[65]);
    let name_bytes_start = 66;
    let name_bytes_end = name_bytes_start + name_length * 2;
    if name_bytes_end > data.len() {
        return Err(OrcError::malformed("FILE_NAME attribute", "name beyond buffer"));
    }
    let name = utf16le_to_string(&data[name_bytes_start..name_bytes_end])?;

    Ok(FileNameInfo {
        parent_frn: Frn::from_raw(parent_raw),
        namespace,
        name,
        allocated_size,
        data_size,
        file_attributes,
        creation_time,
        modification_time,
        mft_change_time,
        access_time,
    })
}

/// One parsed MFT record (§3): header fields plus its fully-spliced
/// attribute list (extension-record attributes already merged in, per
/// §4.3 step 5).
#[derive(Debug, Clone)]
pub struct MftRecord {
    pub frn: Frn,
    pub in_use: bool,
    pub is_directory: bool,
    pub deleted: bool,
    pub base_frn: Option<Frn>,
    pub attributes: Vec<Attribute>,
}

impl MftRecord {
    pub fn file_names(&self) -> impl Iterator<Item = FileNameInfo> + '_ {
        self.attributes
            .iter()
            .filter(|a| a.type_code == ATTR_TYPE_FILE_NAME)
            .filter_map(|a| a.resident_bytes().and_then(|b| parse_file_name(b).ok()))
    }

    /// The canonical name among possibly several `FILE_NAME` attributes:
    /// lowest-ranked namespace wins, Win32 over POSIX over DOS (§3, §9
    /// open question — resolved in DESIGN.md).
    pub fn canonical_file_name(&self) -> Option<FileNameInfo> {
        self.file_names().min_by_key(|fn_info| fn_info.namespace as u8)
    }

    pub fn find_attribute(&self, type_code: u32) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.type_code == type_code)
    }

    pub fn find_all_attributes<'a>(&'a self, type_code: u32) -> impl Iterator<Item = &'a Attribute> {
        self.attributes.iter().filter(move |a| a.type_code == type_code)
    }

    pub fn data_attribute(&self, stream_name: Option<&str>) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.type_code == ATTR_TYPE_DATA && a.name.as_deref() == stream_name)
    }

    /// Parses this record's `REPARSE_POINT` attribute, if any (§3).
    pub fn reparse_point(&self) -> Option<super::reparse::ReparsePoint> {
        let attr = self.find_attribute(ATTR_TYPE_REPARSE_POINT)?;
        super::reparse::parse_reparse_point(attr.resident_bytes()?).ok()
    }

    /// The WOF compression descriptor, if this record's reparse point is
    /// a WOF tag and its payload parses (§3, §4.5).
    pub fn wof_descriptor(&self) -> Option<super::reparse::WofReparseData> {
        let rp = self.reparse_point()?;
        if rp.tag != ReparseTag::Wof {
            return None;
        }
        super::reparse::parse_wof_payload(&rp.payload).ok()
    }
}

/// Parses the fixed header and the in-record attribute chain (not yet
/// spliced with any `ATTRIBUTE_LIST` extension records — that happens
/// in `MftWalker`, which alone can fetch other records).
fn parse_record_raw(mut data: Vec<u8>, record_index: u64) -> Result<(MftRecord, Vec<Attribute>)> {
    if data.len() < 48 {
        return Err(OrcError::malformed("MFT record", "shorter than header"));
    }
    let signature = &data[0..4];
    if signature == MFT_RECORD_BAAD_SIGNATURE {
        return Err(OrcError::malformed("MFT record", "BAAD signature"));
    }
    if signature != MFT_RECORD_SIGNATURE {
        return Err(OrcError::malformed("MFT record", "unrecognised signature"));
    }

    let usa_offset = LittleEndian::read_u16(&data[4..6]);
    let usa_count = LittleEndian::read_u16(&data[6..8]);
    apply_fixup(&mut data, usa_offset, usa_count)?;

    let sequence_number = LittleEndian::read_u16(&data[0x10..0x12]);
    let flags = LittleEndian::read_u16(&data[0x16..0x18]);
    let bytes_used = LittleEndian::read_u32(&data[0x18..0x1C]) as usize;
    let base_reference_raw = LittleEndian::read_u64(&data[0x20..0x28]);
    let attrs_offset = LittleEndian::read_u16(&data[0x14..0x16]) as usize;

    let in_use = flags & MFT_RECORD_FLAG_IN_USE != 0;
    let is_directory = flags & MFT_RECORD_FLAG_DIRECTORY != 0;
    let base_frn = if base_reference_raw != 0 { Some(Frn::from_raw(base_reference_raw)) } else { None };

    let limit = bytes_used.min(data.len());
    let mut attributes = Vec::new();
    let mut offset = attrs_offset;
    while offset + 4 <= limit {
        let type_code = LittleEndian::read_u32(&data[offset..offset + 4]);
        if type_code == ATTR_TYPE_END {
            break;
        }
        match parse_attribute(&data, offset) {
            Ok((attr, len)) => {
                // ATTRIBUTE_LIST splicing needs the volume reader (to
                // fetch extension records), which isn't available here —
                // `MftWalker::parse_and_splice` re-inspects `attributes`
                // for ATTR_TYPE_ATTRIBUTE_LIST after this function returns.
                attributes.push(attr);
                if len == 0 {
                    break;
                }
                offset += len as usize;
            }
            Err(_) => break,
        }
    }

    let frn = Frn::new(record_index, sequence_number);
    let record = MftRecord {
        frn,
        in_use,
        is_directory,
        deleted: !in_use,
        base_frn,
        attributes: attributes.clone(),
    };
    Ok((record, attributes))
}

/// Walks the MFT end to end (§4.3), record index 0..`$MFT.size /
/// record_size`. Never aborts on a per-record error — only an
/// unreadable `$MFT` itself is fatal (§4.3 "Failure semantics").
pub struct MftWalker<'r> {
    reader: &'r mut VolumeReader,
    geometry: Geometry,
    mft_runs: Vec<DataRun>,
    record_size: u32,
    total_records: u64,
    next_index: u64,
    pub resurrect: ResurrectMode,
    pub malformed_count: u64,
    pub baad_count: u64,
}

impl<'r> MftWalker<'r> {
    /// Bootstraps from the boot-sector geometry: reads record 0 (which
    /// always begins at the boot sector's declared `$MFT` LCN) to learn
    /// `$MFT`'s own run-list, then derives `total_records` from its
    /// declared data size (§4.3).
    pub fn open(reader: &'r mut VolumeReader, resurrect: ResurrectMode) -> Result<Self> {
        let geometry = reader
            .geometry
            .ok_or_else(|| OrcError::Other("load_boot_sector not called".into()))?;
        let record_size = geometry.mft_record_size.max(1024);

        let first_record_offset = geometry.mft_lcn * geometry.cluster_size as u64;
        let mut raw = vec![0u8; record_size as usize];
        reader.read_at_bytes(first_record_offset, &mut raw)?;
        let (bootstrap_record, _) = parse_record_raw(raw, MFT_RECORD_MFT)?;

        let data_attr = bootstrap_record
            .data_attribute(None)
            .ok_or_else(|| OrcError::Fatal("$MFT has no DATA attribute".into()))?;
        let (mft_runs, data_size) = match &data_attr.body {
            AttributeBody::NonResident { runs, data_size, .. } => (runs.clone(), *data_size),
            AttributeBody::Resident(bytes) => {
                return Err(OrcError::Fatal(format!(
                    "$MFT DATA is unexpectedly resident ({} bytes)",
                    bytes.len()
                )))
            }
        };
        let total_records = data_size / record_size as u64;

        Ok(MftWalker {
            reader,
            geometry,
            mft_runs,
            record_size,
            total_records,
            next_index: 0,
            resurrect,
            malformed_count: 0,
            baad_count: 0,
        })
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn read_record_bytes(&mut self, record_index: u64) -> Result<Vec<u8>> {
        let offset = record_index * self.record_size as u64;
        read_non_resident(self.reader, self.geometry.cluster_size, &self.mft_runs, offset, self.record_size as usize)
    }

    /// Direct FRN lookup: the record index addresses `$MFT` directly
    /// (§4.3 "Find by name/FRN").
    pub fn record_at(&mut self, frn: Frn) -> Result<Option<MftRecord>> {
        if frn.record_index() >= self.total_records {
            return Ok(None);
        }
        let bytes = self.read_record_bytes(frn.record_index())?;
        match self.parse_and_splice(bytes, frn.record_index()) {
            Ok(record) => Ok(Some(record)),
            Err(_) => Ok(None),
        }
    }

    fn parse_and_splice(&mut self, bytes: Vec<u8>, record_index: u64) -> Result<MftRecord> {
        let (mut record, raw_attrs) = parse_record_raw(bytes, record_index)?;

        let mut extra = Vec::new();
        for attr in &raw_attrs {
            if attr.type_code != ATTR_TYPE_ATTRIBUTE_LIST {
                continue;
            }
            let list_bytes = match &attr.body {
                AttributeBody::Resident(b) => b.clone(),
                AttributeBody::NonResident { runs, data_size, .. } => {
                    read_non_resident(self.reader, self.geometry.cluster_size, runs, 0, *data_size as usize)?
                }
            };
            let entries = parse_attribute_list(&list_bytes)?;
            let mut seen_bases: HashMap<u64, ()> = HashMap::new();
            for entry in entries {
                if entry.base_record_frn.record_index() == record_index {
                    continue;
                }
                if seen_bases.contains_key(&entry.base_record_frn.raw()) {
                    continue;
                }
                seen_bases.insert(entry.base_record_frn.raw(), ());
                if let Ok(Some(ext_record)) = self.record_at(entry.base_record_frn) {
                    extra.extend(ext_record.attributes);
                }
            }
        }
        record.attributes.extend(extra);
        Ok(record)
    }

    /// Opens a named (or unnamed) data stream for reading, transparent
    /// to residency (§4.3 "Attribute reader").
    pub fn open_stream(&mut self, record: &MftRecord, stream_name: Option<&str>) -> Result<Vec<u8>> {
        if let Some(wof) = record.wof_descriptor() {
            return self.open_wof_stream(record, wof);
        }

        let attr = record
            .data_attribute(stream_name)
            .ok_or_else(|| OrcError::unsupported(format!("no {stream_name:?} stream")))?;
        match &attr.body {
            AttributeBody::Resident(bytes) => Ok(bytes.clone()),
            AttributeBody::NonResident { runs, data_size, compression_unit, .. } => {
                if *compression_unit != 0 {
                    crate::compression::lznt1::read_compressed_stream(
                        self.reader,
                        self.geometry.cluster_size,
                        runs,
                        *compression_unit,
                        *data_size,
                    )
                } else {
                    read_non_resident(self.reader, self.geometry.cluster_size, runs, 0, *data_size as usize)
                }
            }
        }
    }

    /// Reads the compressed `::WofCompressedData` stream in full and
    /// decompresses it per the chunk-offset-table layout (§4.5).
    fn open_wof_stream(
        &mut self,
        record: &MftRecord,
        wof: super::reparse::WofReparseData,
    ) -> Result<Vec<u8>> {
        let uncompressed_size = wof
            .uncompressed_size
            .ok_or_else(|| OrcError::unsupported("WOF reparse point has no uncompressed-size field"))?;

        let attr = record
            .data_attribute(Some("WofCompressedData"))
            .ok_or_else(|| OrcError::malformed("WOF stream", "missing ::WofCompressedData attribute"))?;

        let compressed = match &attr.body {
            AttributeBody::Resident(bytes) => bytes.clone(),
            AttributeBody::NonResident { runs, data_size, .. } => {
                read_non_resident(self.reader, self.geometry.cluster_size, runs, 0, *data_size as usize)?
            }
        };

        crate::compression::wof::decompress_wof_stream(&compressed, wof.algorithm, uncompressed_size)
    }
}

impl<'r> Iterator for MftWalker<'r> {
    type Item = MftRecord;

    /// Advances to the next record that should be surfaced to the
    /// caller: in-use records always; deleted records only when
    /// `resurrect != No` (§4.3 "Resurrection"). Malformed and `BAAD`
    /// records are counted and skipped, never surfaced, never abort
    /// the walk (§7).
    fn next(&mut self) -> Option<MftRecord> {
        while self.next_index < self.total_records {
            let index = self.next_index;
            self.next_index += 1;

            let bytes = match self.read_record_bytes(index) {
                Ok(b) => b,
                Err(_) => {
                    self.malformed_count += 1;
                    continue;
                }
            };
            if bytes.len() >= 4 && &bytes[0..4] == MFT_RECORD_BAAD_SIGNATURE {
                self.baad_count += 1;
                continue;
            }
            let record = match self.parse_and_splice(bytes, index) {
                Ok(r) => r,
                Err(_) => {
                    self.malformed_count += 1;
                    continue;
                }
            };
            if record.base_frn.is_some() {
                // Extension record: surfaced only through its base's
                // spliced attribute list, never on its own.
                continue;
            }
            if record.in_use {
                return Some(record);
            }
            if self.resurrect != ResurrectMode::No {
                return Some(record);
            }
        }
        None
    }
}

/// Reads `len` bytes starting at `offset` from a run-list, zero-filling
/// sparse runs and truncating reads that run past the declared extent
/// (§4.3 "Attribute reader" — out-of-bounds VCNs read zeros up to the
/// declared allocated size).
pub fn read_non_resident(
    reader: &mut VolumeReader,
    cluster_size: u32,
    runs: &[DataRun],
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    let cluster_size = cluster_size as u64;
    let mut vcn = 0u64;
    let want_start = offset;
    let want_end = offset + len as u64;

    for run in runs {
        let run_start = vcn * cluster_size;
        let run_len_bytes = run.length * cluster_size;
        let run_end = run_start + run_len_bytes;
        vcn += run.length;

        if run_end <= want_start || run_start >= want_end {
            continue;
        }
        let overlap_start = run_start.max(want_start);
        let overlap_end = run_end.min(want_end);
        let out_offset = (overlap_start - want_start) as usize;
        let out_len = (overlap_end - overlap_start) as usize;

        match run.lcn {
            None => {
                // Sparse: `out` is already zero-initialised.
            }
            Some(lcn) => {
                let byte_offset = lcn * cluster_size + (overlap_start - run_start);
                let mut buf = vec![0u8; out_len];
                reader.read_at_bytes(byte_offset, &mut buf)?;
                out[out_offset..out_offset + out_len].copy_from_slice(&buf);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixup_replaces_sector_tails_after_checking_usn() {
        // Three sectors (1536 bytes): USA = [check, original-of-sector1, original-of-sector2].
        let mut buf = vec![0u8; 1536];
        buf[0x28] = 0xAB; // check
        buf[0x29] = 0xCD;
        buf[0x2A] = 0x11; // original sector-1 tail
        buf[0x2B] = 0x22;
        buf[0x2C] = 0x33; // original sector-2 tail
        buf[0x2D] = 0x44;
        buf[510] = 0xAB; // sector-1 tail currently holds the check value
        buf[511] = 0xCD;
        buf[1022] = 0xAB; // sector-2 tail likewise
        buf[1023] = 0xCD;

        apply_fixup(&mut buf, 0x28, 3).unwrap();

        assert_eq!(&buf[510..512], &[0x11, 0x22]);
        assert_eq!(&buf[1022..1024], &[0x33, 0x44]);
    }

    #[test]
    fn fixup_detects_mismatch() {
        let mut buf = vec![0u8; 1024];
        buf[0x28] = 0xAB;
        buf[0x29] = 0xCD;
        buf[510] = 0x00; // does not match check value
        buf[511] = 0x00;
        assert!(apply_fixup(&mut buf, 0x28, 2).is_err());
    }

    #[test]
    fn parses_file_name_attribute_value() {
        let name = "hello.txt";
        let name_utf16: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let mut value = vec![0u8; 66 + name_utf16.len()];
        LittleEndian::write_u64(&mut value[0..8], Frn::new(5, 5).raw());
        value[64] = name.len() as u8;
        value[65] = 1; // Win32
        value[66..].copy_from_slice(&name_utf16);

        let info = parse_file_name(&value).unwrap();
        assert_eq!(info.name, "hello.txt");
        assert_eq!(info.parent_frn.record_index(), 5);
    }

    #[test]
    fn canonical_name_prefers_win32_over_posix() {
        fn filename_attr(namespace: u8, name: &str) -> Attribute {
            let name_utf16: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
            let mut value = vec![0u8; 66 + name_utf16.len()];
            value[64] = name.len() as u8;
            value[65] = namespace;
            value[66..].copy_from_slice(&name_utf16);
            Attribute {
                type_code: ATTR_TYPE_FILE_NAME,
                name: None,
                attribute_id: 0,
                flags: 0,
                body: AttributeBody::Resident(value),
            }
        }

        let record = MftRecord {
            frn: Frn::new(100, 1),
            in_use: true,
            is_directory: false,
            deleted: false,
            base_frn: None,
            attributes: vec![
                filename_attr(0, "HELLO~1"), // POSIX namespace, short alias
                filename_attr(1, "hello world.txt"), // Win32 namespace
            ],
        };
        let canonical = record.canonical_file_name().unwrap();
        assert_eq!(canonical.name, "hello world.txt");
    }

    #[test]
    fn read_non_resident_zero_fills_sparse_runs() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.img");
        let cluster_size = 512u64;
        let mut data = vec![0u8; (cluster_size * 4) as usize];
        data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        std::fs::File::create(&path).unwrap().write_all(&data).unwrap();

        let mut vr = VolumeReader::open_image(path).unwrap();
        let runs = vec![
            DataRun { lcn: Some(0), length: 1 },
            DataRun { lcn: None, length: 1 },
        ];
        let out = read_non_resident(&mut vr, cluster_size as u32, &runs, 0, (cluster_size * 2) as usize).unwrap();
        assert_eq!(&out[0..4], &[1, 2, 3, 4]);
        assert!(out[cluster_size as usize..].iter().all(|&b| b == 0));
    }

    #[test]
    fn wof_descriptor_recognises_wof_reparse_point() {
        use byteorder::WriteBytesExt;
        let mut reparse_value = Vec::new();
        reparse_value.write_u32::<LittleEndian>(1).unwrap(); // version
        reparse_value.write_u32::<LittleEndian>(2).unwrap(); // provider
        reparse_value.write_u32::<LittleEndian>(1).unwrap(); // file_info_version
        reparse_value.write_u32::<LittleEndian>(2).unwrap(); // xpress8k
        reparse_value.write_u64::<LittleEndian>(5 * 1024 * 1024).unwrap();

        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(ReparseTag::TAG_WOF).unwrap();
        payload.write_u16::<LittleEndian>(reparse_value.len() as u16).unwrap();
        payload.write_u16::<LittleEndian>(0).unwrap(); // reserved
        payload.extend_from_slice(&reparse_value);

        let record = MftRecord {
            frn: Frn::new(42, 1),
            in_use: true,
            is_directory: false,
            deleted: false,
            base_frn: None,
            attributes: vec![Attribute {
                type_code: ATTR_TYPE_REPARSE_POINT,
                name: None,
                attribute_id: 0,
                flags: 0,
                body: AttributeBody::Resident(payload),
            }],
        };

        let wof = record.wof_descriptor().unwrap();
        assert_eq!(wof.algorithm, crate::ntfs::reparse::WofAlgorithm::Xpress8k);
        assert_eq!(wof.uncompressed_size, Some(5 * 1024 * 1024));
    }
}
