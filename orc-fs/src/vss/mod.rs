//! Volume Shadow Copy catalog parser (C6, §4.6): discovers snapshots
//! from in-band VSS metadata and exposes a read view that redirects
//! through a snapshot's diff area.

pub mod catalog;
pub mod diff_area;
pub mod diff_location_table;

pub use catalog::{
    diff_areas_for, parse_catalog_block, snapshots_in, walk_catalog, CatalogBlock,
    CatalogBlockHeader, CatalogBlockType, CatalogEntry, CatalogEntryType, DiffAreaInfo,
    SnapshotInfo, BLOCK_SIZE,
};
pub use diff_area::DiffAreaView;
pub use diff_location_table::{overwritten_blocks, walk_diff_location_table, DiffLocationEntry};
