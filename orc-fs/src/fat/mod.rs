//! FAT engine (C4): FAT12/16/32 and exFAT directory trees and cluster
//! chains (§4.4).
//!
//! Grounded in the teacher's `fat32::reader::Fat32Reader`,
//! `fat16::reader::Fat16Reader` and `fat_common` (`directory`,
//! `long_names`, `cluster_calc`) — same boot-parameter shapes, same
//! 8.3/LFN decoding — generalized from three near-duplicate
//! read/write drivers into one read-only walker parameterized by FAT
//! width, and extended with the cross-linked/bad-chain tolerance the
//! spec calls for (the teacher only ever walked chains it had just
//! written itself).

pub mod cluster_chain;
pub mod directory;
pub mod exfat;
pub mod long_name;
pub mod walker;

pub use cluster_chain::{ClusterChain, FatTable, FatWidth};
pub use directory::{DirEntry, DirEntryAttributes};
pub use walker::FatWalker;
