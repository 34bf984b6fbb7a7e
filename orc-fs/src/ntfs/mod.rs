//! NTFS engine (C3): MFT traversal, the attribute walker, the USN
//! journal reader, deleted-record recovery, and path resolution.
//!
//! Grounded in the teacher's `formatters/src/ntfs` tree (`structures`,
//! `mft`, `attributes`, `attribute_list`, `compression`) and
//! `filesystems/src/families/ntfs/ntfs/path_resolver.rs`, generalized
//! from a read/write filesystem driver down to a read-only forensic
//! walker: no writer-side module survives the trim (§ transform rules).

pub mod attribute_list;
pub mod attributes;
pub mod data_runs;
pub mod mft;
pub mod path_resolver;
pub mod reparse;
pub mod structures;
pub mod usn;

pub use attributes::{Attribute, AttributeBody};
pub use data_runs::{decode_data_runs, DataRun};
pub use mft::{MftRecord, MftWalker, ResurrectMode};
pub use path_resolver::PathResolver;
pub use reparse::{ReparsePoint, WofAlgorithm, WofReparseData};
pub use structures::*;
pub use usn::{filetime_to_utc, UsnJournalWalker, UsnMaxParams, UsnRecord};
