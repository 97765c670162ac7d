//! Engine traits: sessions, cursors, and the operations the index layer
//! relies on.
//!
//! # Cursor semantics
//!
//! Cursors follow ordered-KV conventions: a cursor is bound to one table
//! and one session, holds at most one position, and is **not** `Send` or
//! `Sync`. Mutations go through a pending key/value staged with
//! [`KvCursor::set_key`] / [`KvCursor::set_value`].
//!
//! # Status signaling
//!
//! Engines signal through [`kelpie_error::KelpieError`]: `NotFound` for
//! absent rows, `KeyExists` for insert collisions, `WriteConflict` for
//! transactional conflicts the caller's retry loop owns, and `Busy` when
//! exclusive access (bulk load, verify) is unavailable.

use kelpie_error::Result;

/// Where `search_near` landed relative to the probed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NearMatch {
    /// Positioned at the greatest key strictly below the probe.
    Less,
    /// Positioned exactly at the probe.
    Exact,
    /// Positioned at the least key strictly above the probe.
    Greater,
}

impl NearMatch {
    /// Whether the landing key is an exact match.
    #[must_use]
    pub fn is_exact(self) -> bool {
        self == Self::Exact
    }
}

/// A storage engine: a factory for sessions.
pub trait KvEngine: Send + Sync {
    /// Open a new session. Sessions are cheap and single-threaded.
    fn open_session(&self) -> Result<std::sync::Arc<dyn KvSession>>;
}

/// A per-session handle: cursor factory plus table-level operations.
pub trait KvSession: Send + Sync {
    /// Create a table from an engine config string.
    fn create_table(&self, uri: &str, config: &str) -> Result<()>;

    /// Open a transactional cursor on `uri`.
    fn open_cursor(&self, uri: &str) -> Result<Box<dyn KvCursor>>;

    /// Open an append-only bulk cursor on `uri`.
    ///
    /// Much faster than a transactional cursor; requires strictly
    /// increasing keys and exclusive access. Fails with `Busy` while any
    /// other cursor is open on the table.
    fn open_bulk_cursor(&self, uri: &str) -> Result<Box<dyn KvCursor>>;

    /// Close every cursor this session has handed out. Outstanding cursor
    /// handles turn into errors on use.
    fn close_all_cursors(&self);

    /// The `app_metadata` document recorded when the table was created.
    fn app_metadata(&self, uri: &str) -> Result<serde_json::Value>;

    /// The table's creation config string.
    fn creation_config(&self, uri: &str) -> Result<String>;

    /// On-disk footprint of the table in bytes.
    fn table_size_bytes(&self, uri: &str) -> Result<u64>;

    /// Structural check of the table. `Busy` means the check could not
    /// run under current access; other errors mean damage.
    fn verify(&self, uri: &str) -> Result<()>;

    /// Engine statistics for the table as `(name, value)` pairs.
    fn statistics(&self, uri: &str) -> Result<Vec<(String, i64)>>;
}

/// A positioned cursor over one table.
pub trait KvCursor {
    /// Stage the key for the next positioning or mutation call.
    fn set_key(&mut self, key: &[u8]);

    /// Stage the value for the next mutation call.
    fn set_value(&mut self, value: &[u8]);

    /// Insert the staged `(key, value)`. Fails with `KeyExists` when the
    /// key is already present; the cursor is unpositioned afterwards.
    fn insert(&mut self) -> Result<()>;

    /// Replace the value at the staged key. Fails with `NotFound` when
    /// the key is absent; positions the cursor at the key on success.
    fn update(&mut self) -> Result<()>;

    /// Remove the row at the staged key. Fails with `NotFound` when the
    /// key is absent.
    fn remove(&mut self) -> Result<()>;

    /// Position exactly at the staged key. Fails with `NotFound`.
    fn search(&mut self) -> Result<()>;

    /// Position at the nearest key to the staged key, reporting which
    /// side it landed on. Fails with `NotFound` only on an empty table.
    fn search_near(&mut self) -> Result<NearMatch>;

    /// Advance to the next key in ascending order. From an unpositioned
    /// cursor this lands on the first key. Returns `false` at the end.
    fn next(&mut self) -> Result<bool>;

    /// Step to the previous key. From an unpositioned cursor this lands
    /// on the last key. Returns `false` at the start.
    fn prev(&mut self) -> Result<bool>;

    /// Release the cursor's position and any resources pinned by it. The
    /// handle stays valid; the next positioning call starts fresh.
    fn reset(&mut self);

    /// The key at the current position.
    fn key(&self) -> Result<Vec<u8>>;

    /// The value at the current position.
    fn value(&self) -> Result<Vec<u8>>;
}
