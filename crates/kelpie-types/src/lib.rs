//! Core types for the Kelpie sorted-index layer.
//!
//! This crate defines the structured keys an index stores, the record ids
//! they point at, and the order-preserving byte codec that turns both into
//! engine key/value material. The codec's one law: for the given per-column
//! ordering, lexicographic byte order of encoded keys equals the logical
//! order of the structured keys.

pub mod key;
pub mod ordered_key;
pub mod reader;
pub mod record_id;
pub mod type_bits;
pub mod value;

pub use key::{IndexField, IndexKey, KeyOrdering};
pub use ordered_key::{Discriminator, OrderedKey};
pub use reader::ByteReader;
pub use record_id::RecordId;
pub use type_bits::TypeBits;
pub use value::FieldValue;

/// Maximum encoded size, in bytes, of a structured key accepted for
/// insertion (the record-id suffix is not counted). Oversized keys are
/// rejected at insert time and unchecked on read.
pub const MAX_KEY_BYTES: usize = 1024;
