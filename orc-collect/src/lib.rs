//! Collection pipeline: location set (C7), sample engine (C8), archive
//! pipeline (C9), and the resource extension loader (C10).

pub mod archive;
pub mod extension;
pub mod location;
pub mod sample;

pub use archive::{ArchiveAgent, ArchiveCodec, ArchiveItem, DirectoryArchiveCodec, HashDigests, IndexRow};
pub use extension::ExtensionRegistry;
pub use location::{LocationSet, LocationSpec};
pub use sample::{Candidate, ContentMatcher, NullContentMatcher, Sample, SampleEngine};
