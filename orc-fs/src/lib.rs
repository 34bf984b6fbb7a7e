//! Filesystem engines (C2–C6): sector-aligned volume I/O, the NTFS and
//! FAT parsers, the compression layer, and the VSS catalog parser.
//!
//! Grounded in the teacher's `formatters`/`filesystems` crates: this
//! crate keeps their module shape (`ntfs/`, `fat32` generalized to a
//! shared `fat` family, `compression`) but only ever reads — there is
//! no writer side here, per the spec's read-only non-goal.

pub mod compression;
pub mod fat;
pub mod ntfs;
pub mod volume_reader;
pub mod vss;

pub use volume_reader::{Backend, VolumeReader};
