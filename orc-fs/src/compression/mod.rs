//! Transparent decompression layer (§4.5): NTFS-native LZNT1 for
//! `FLAG_COMPRESSED` attributes, and the Windows Overlay Filter (WOF)
//! scheme that stores compressed payload as the unnamed data stream and
//! redirects reads to it through a reparse point.
//!
//! The teacher (`moses`) only ever needed LZNT1, for files it was about
//! to reformat; WOF decompression is new, grounded in the reparse
//! payload shape parsed by `ntfs::reparse` and in the other example
//! pack's compression readers for the chunk-table-then-chunks layout.

pub mod lznt1;
pub mod wof;
