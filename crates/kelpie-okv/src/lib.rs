//! Ordered key/value engine interface.
//!
//! The index layer consumes a transactional byte-string store with
//! lexicographically ordered cursors through the traits in this crate. A
//! production deployment binds them to a real storage engine; the
//! in-memory [`MemEngine`] implements the same contract for tests, tools,
//! and the engine-contract suite, the way a mock cursor backs the
//! cross-crate tests of a real B-tree.

pub mod context;
pub mod mem;
pub mod traits;

pub use context::OpContext;
pub use mem::MemEngine;
pub use traits::{KvCursor, KvEngine, KvSession, NearMatch};
