//! Sorted-index adapter over an ordered key/value engine.
//!
//! This crate turns structured index keys into order-preserving byte
//! strings and layers database index semantics on the raw engine surface:
//! ordered traversal, point lookup, insertion, deletion, duplicate
//! detection, and bulk construction. Two flavors share one interface:
//!
//! - **Standard** (non-unique): one engine row per `(key, record id)`;
//!   the record id rides at the end of the engine key, the value holds
//!   only the type-bits side channel.
//! - **Unique**: one engine row per logical key; the value is a
//!   *duplicate list* of `(record id, type-bits)` tuples kept sorted by
//!   ascending record id, with an all-zeros elision for the common
//!   single-entry case.
//!
//! Cursors cache their position outside the engine so they survive
//! transaction retries: [`SortedDataCursor::save_positioned`] releases
//! engine resources, [`SortedDataCursor::restore`] re-seeks, and a
//! restore that cannot land exactly where it was makes the next advance
//! return the current entry instead of moving.

pub mod bulk;
pub mod config;
pub mod cursor;
pub mod descriptor;
pub mod index;
pub mod legacy;
pub mod standard;
pub mod unique;

pub use bulk::SortedDataBuilder;
pub use config::{create_index_table, generate_create_config, parse_index_options, CreateConfigOptions};
pub use cursor::{IndexEntry, RequestedInfo, SeekPoint, SortedDataCursor};
pub use descriptor::IndexDescriptor;
pub use index::{SortedDataInterface, ValidateResults};
pub use legacy::register_legacy_collator;
pub use standard::StandardIndex;
pub use unique::UniqueIndex;

/// Oldest on-disk format this build can open.
pub const MINIMUM_INDEX_VERSION: i64 = 6;
/// Format written by newly created indexes.
pub const CURRENT_INDEX_VERSION: i64 = 6;
/// Newest on-disk format this build can open.
pub const MAXIMUM_INDEX_VERSION: i64 = 6;

/// Name of this adapter's subdocument inside an index descriptor's
/// `storageEngine` options.
pub const STORAGE_ENGINE_NAME: &str = "kelpie";
