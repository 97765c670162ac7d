//! Bulk builders.
//!
//! Bulk loading bypasses transactional cursors: each builder opens a
//! private session and an append-only bulk cursor. The engine only grants
//! bulk cursors with exclusive access, so the caller's outer-session
//! cursors are closed first, and a refused bulk open falls back to a
//! normal cursor with a warning rather than failing the build.
//!
//! Bulk cursors can only append, never update, so the unique builder
//! buffers every record id for the current key and emits the whole
//! duplicate list as one row when a greater key arrives.

use std::sync::Arc;

use kelpie_error::Result;
use kelpie_okv::{KvCursor, KvSession, OpContext};
use kelpie_types::record_id::RECORD_ID_ENCODED_LEN;
use kelpie_types::{IndexKey, OrderedKey, RecordId, TypeBits};
use tracing::{debug, warn};

use crate::index::{check_key_size, IndexIdent};

/// Append-only index construction: feed keys in non-decreasing order,
/// then commit.
pub trait SortedDataBuilder {
    /// Add one `(key, loc)` entry. Keys must arrive in non-decreasing
    /// order; a unique builder fails with `DuplicateKey` on a repeated
    /// key unless duplicates were allowed at construction.
    fn add_key(&mut self, key: &IndexKey, loc: RecordId) -> Result<()>;

    /// Flush anything pending and finish the build.
    fn commit(&mut self) -> Result<()>;
}

/// The private session + cursor pair a builder owns.
///
/// Field order matters: the cursor must drop (and release its table
/// slot) before the session it came from.
struct BulkCursor {
    cursor: Box<dyn KvCursor>,
    #[allow(dead_code)]
    session: Arc<dyn KvSession>,
}

fn open_bulk_cursor(ctx: &OpContext, uri: &str) -> Result<BulkCursor> {
    // Open cursors make a bulk open fail busy; close ours first.
    ctx.session().close_all_cursors();

    // A private session keeps the bulk load outside any transaction.
    let session = ctx.engine().open_session()?;
    let cursor = match session.open_bulk_cursor(uri) {
        Ok(cursor) => cursor,
        Err(err) => {
            warn!(%uri, %err, "failed to create bulk cursor");
            warn!(%uri, "falling back to non-bulk cursor for index");
            session.open_cursor(uri)?
        }
    };
    Ok(BulkCursor { cursor, session })
}

/// Bulk builds a standard index: every entry is its own engine row, so
/// each `add_key` appends directly.
pub(crate) struct StandardBulkBuilder {
    ident: IndexIdent,
    bulk: BulkCursor,
}

impl StandardBulkBuilder {
    pub fn new(ident: IndexIdent, ctx: &OpContext) -> Result<Self> {
        let bulk = open_bulk_cursor(ctx, &ident.uri)?;
        Ok(Self { ident, bulk })
    }
}

impl SortedDataBuilder for StandardBulkBuilder {
    fn add_key(&mut self, key: &IndexKey, loc: RecordId) -> Result<()> {
        debug_assert!(loc.is_normal());
        debug_assert!(!key.has_field_names());

        let encoded = OrderedKey::encode_with_record_id(key, self.ident.ordering, loc);
        check_key_size(encoded.len() - RECORD_ID_ENCODED_LEN, key)?;

        let type_bits = encoded.type_bits();
        let value = if type_bits.is_all_zeros() {
            Vec::new()
        } else {
            type_bits.to_buffer()
        };
        self.bulk.cursor.set_key(encoded.as_bytes());
        self.bulk.cursor.set_value(&value);
        self.bulk.cursor.insert()
    }

    fn commit(&mut self) -> Result<()> {
        // Every row was appended as it arrived; nothing to flush.
        debug!(index = %self.ident.index_name, "standard bulk build committed");
        Ok(())
    }
}

/// Bulk builds a unique index.
///
/// The insert of a key is deferred until the first strictly-greater key
/// arrives, gathering up all duplicate locs so they land as a single
/// duplicate-list row; bulk cursors cannot update an existing row.
pub(crate) struct UniqueBulkBuilder {
    ident: IndexIdent,
    dups_allowed: bool,
    key: Option<IndexKey>,
    key_string: OrderedKey,
    records: Vec<(RecordId, TypeBits)>,
    bulk: BulkCursor,
}

impl UniqueBulkBuilder {
    pub fn new(ident: IndexIdent, ctx: &OpContext, dups_allowed: bool) -> Result<Self> {
        let bulk = open_bulk_cursor(ctx, &ident.uri)?;
        Ok(Self {
            ident,
            dups_allowed,
            key: None,
            key_string: OrderedKey::default(),
            records: Vec::new(),
            bulk,
        })
    }

    fn do_insert(&mut self) -> Result<()> {
        debug_assert!(!self.records.is_empty());

        let mut value = Vec::new();
        for (loc, type_bits) in &self.records {
            loc.append_to(&mut value);
            // A sole record with all-zero type-bits omits them; anything
            // longer needs every entry explicit to stay parseable.
            if !(type_bits.is_all_zeros() && self.records.len() == 1) {
                type_bits.write_to(&mut value);
            }
        }

        self.bulk.cursor.set_key(self.key_string.as_bytes());
        self.bulk.cursor.set_value(&value);
        self.bulk.cursor.insert()?;

        self.records.clear();
        Ok(())
    }
}

impl SortedDataBuilder for UniqueBulkBuilder {
    fn add_key(&mut self, new_key: &IndexKey, loc: RecordId) -> Result<()> {
        debug_assert!(loc.is_normal());
        debug_assert!(!new_key.has_field_names());

        let encoded = OrderedKey::encode(new_key, self.ident.ordering);
        check_key_size(encoded.len(), new_key)?;

        match &self.key {
            Some(previous) => {
                let cmp = new_key.cmp_with(previous, self.ident.ordering);
                if cmp == std::cmp::Ordering::Equal {
                    // Dup found!
                    if !self.dups_allowed {
                        return Err(self.ident.dup_key_error(new_key));
                    }
                    // Duplicates on a unique index: gather this loc with
                    // the others for the key. Replacing the stored key is
                    // correct too; later dups are likely to be newer.
                } else {
                    // The bulk contract guarantees non-decreasing keys.
                    debug_assert!(cmp == std::cmp::Ordering::Greater);
                    // Done with dups of the previous key; insert it now.
                    self.do_insert()?;
                    debug_assert!(self.records.is_empty());
                }
            }
            None => {} // first call
        }

        self.key = Some(new_key.clone());
        self.key_string = encoded;
        self.records
            .push((loc, self.key_string.type_bits().clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.records.is_empty() {
            // Handles inserting the last key.
            self.do_insert()?;
        }
        debug!(index = %self.ident.index_name, "unique bulk build committed");
        Ok(())
    }
}
