//! Index cursors.
//!
//! A cursor is a stateful iterator over `(structured key, record id)`
//! entries in one direction. The engine cursor underneath is treated as
//! disposable: the authoritative position between calls is the cached
//! encoded key, type-bits, and record id held here. That split is what
//! makes save/restore across transaction retries work: `save_positioned`
//! releases the engine cursor's resources, `restore` re-seeks, and when
//! the exact saved entry is gone the next advance returns the entry the
//! cursor landed on instead of stepping past it.
//!
//! Cursors are bound to one operation context, are not thread-safe, and
//! hold at most one engine cursor at a time.

use std::cmp::Ordering as CmpOrdering;

use kelpie_error::{KelpieError, Result};
use kelpie_okv::{KvCursor, NearMatch, OpContext};
use kelpie_types::ordered_key::{decode_key, Discriminator, OrderedKey};
use kelpie_types::{ByteReader, FieldValue, IndexKey, RecordId, TypeBits};
use tracing::{debug, error};

use crate::index::IndexIdent;

/// How much of the current entry the caller wants decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedInfo {
    /// Existence only; the returned entry carries an empty key.
    Existence,
    /// Record id only; the returned entry carries an empty key.
    LocOnly,
    /// Full structured key plus record id.
    KeyAndLoc,
}

/// One decoded index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The structured key (empty unless requested).
    pub key: IndexKey,
    /// The record id.
    pub loc: RecordId,
}

/// A multi-field search pattern: a key prefix plus per-field suffix
/// values with individual inclusivity. Converted to an equivalent
/// structured key + inclusivity for the seek itself.
#[derive(Debug, Clone)]
pub struct SeekPoint {
    /// Key supplying the first `prefix_len` fields.
    pub prefix: IndexKey,
    /// How many prefix fields participate.
    pub prefix_len: usize,
    /// Skip every entry sharing the prefix (overrides the suffix).
    pub prefix_exclusive: bool,
    /// Values for the fields after the prefix, in key order.
    pub suffix: Vec<FieldValue>,
    /// Per-suffix-field inclusivity; the first exclusive field truncates
    /// the pattern.
    pub suffix_inclusive: Vec<bool>,
}

fn seek_point_to_query(point: &SeekPoint) -> (IndexKey, bool) {
    let mut values: Vec<FieldValue> = point
        .prefix
        .values()
        .take(point.prefix_len)
        .cloned()
        .collect();
    if point.prefix_exclusive {
        return (IndexKey::from_values(values), false);
    }
    for (value, inclusive) in point.suffix.iter().zip(&point.suffix_inclusive) {
        values.push(value.clone());
        if !inclusive {
            return (IndexKey::from_values(values), false);
        }
    }
    (IndexKey::from_values(values), true)
}

/// The cursor interface exposed to the layers above.
pub trait SortedDataCursor {
    /// Advance one entry in the cursor's direction.
    fn next(&mut self, parts: RequestedInfo) -> Result<Option<IndexEntry>>;

    /// Position at the first entry at-or-past `key` in the travel
    /// direction (`inclusive` controls whether entries equal to `key`
    /// count).
    fn seek(
        &mut self,
        key: &IndexKey,
        inclusive: bool,
        parts: RequestedInfo,
    ) -> Result<Option<IndexEntry>>;

    /// Seek by multi-field search pattern.
    fn seek_point(&mut self, point: &SeekPoint, parts: RequestedInfo)
        -> Result<Option<IndexEntry>>;

    /// Unique cursors only: exact-match lookup of a logical key.
    fn seek_exact(&mut self, key: &IndexKey, parts: RequestedInfo)
        -> Result<Option<IndexEntry>>;

    /// Bound the scan. An empty key clears the bound; otherwise the scan
    /// ends immediately before crossing `key` (`inclusive` keeps entries
    /// equal to it).
    fn set_end_position(&mut self, key: &IndexKey, inclusive: bool);

    /// Release engine resources while keeping the logical position.
    fn save_positioned(&mut self);

    /// Release engine resources and forget the position.
    fn save_unpositioned(&mut self);

    /// Re-acquire an engine cursor and re-seek to the saved position.
    fn restore(&mut self) -> Result<()>;

    /// Drop the operation context and the engine cursor.
    fn detach_from_op_context(&mut self);

    /// Bind to a replacement context. The engine cursor is recreated
    /// lazily by the next [`SortedDataCursor::restore`].
    fn reattach_to_op_context(&mut self, ctx: &OpContext);
}

/// Which flavor of index a cursor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CursorFlavor {
    /// Engine key carries the record id; value is type-bits.
    Standard,
    /// Engine key is the logical key; value is `(record id, type-bits)`.
    Unique,
}

/// Open a cursor on `ident` in the given direction.
pub(crate) fn new_cursor(
    ident: IndexIdent,
    flavor: CursorFlavor,
    ctx: &OpContext,
    forward: bool,
) -> Result<Box<dyn SortedDataCursor>> {
    debug!(uri = %ident.uri, table_id = ident.table_id, forward, "open index cursor");
    let cursor = ctx.session().open_cursor(&ident.uri)?;
    Ok(Box::new(IndexCursor {
        ident,
        flavor,
        forward,
        ctx: Some(ctx.clone()),
        cursor: Some(cursor),
        key: Vec::new(),
        type_bits: TypeBits::new(),
        loc: RecordId::null(),
        eof: false,
        cursor_at_eof: false,
        last_move_was_restore: false,
        query: Vec::new(),
        end_position: None,
    }))
}

struct IndexCursor {
    ident: IndexIdent,
    flavor: CursorFlavor,
    forward: bool,
    ctx: Option<OpContext>,
    cursor: Option<Box<dyn KvCursor>>,

    // Cached position: authoritative between calls, never clobbered by a
    // failing advance.
    key: Vec<u8>,
    type_bits: TypeBits,
    loc: RecordId,
    eof: bool,

    // Result of the most recent engine-cursor positioning, as opposed to
    // the logical `eof` above.
    cursor_at_eof: bool,

    // Set when a restore could not land on the exact saved entry; makes
    // the next advance report the landing entry instead of moving. Reset
    // by every other cursor movement.
    last_move_was_restore: bool,

    // Scratch encoding reused across seeks.
    query: Vec<u8>,

    end_position: Option<Vec<u8>>,
}

impl IndexCursor {
    fn engine(&mut self) -> Result<&mut (dyn KvCursor + 'static)> {
        self.cursor
            .as_deref_mut()
            .ok_or_else(move || KelpieError::internal("index cursor is detached from its engine cursor"))
    }

    fn advance_engine(&mut self) -> Result<()> {
        let forward = self.forward;
        let cursor = self.engine()?;
        let has_entry = if forward { cursor.next()? } else { cursor.prev()? };
        self.cursor_at_eof = !has_entry;
        Ok(())
    }

    /// Position the engine cursor at `query` or its nearest neighbor on
    /// the travel side. Returns true on an exact landing.
    fn seek_engine(&mut self, query: &[u8]) -> Result<bool> {
        let forward = self.forward;
        let cursor = self.engine()?;
        cursor.set_key(query);
        let near = match cursor.search_near() {
            Ok(near) => near,
            Err(err) if err.is_not_found() => {
                self.cursor_at_eof = true;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        self.cursor_at_eof = false;
        if near.is_exact() {
            return Ok(true);
        }
        // Landed on the wrong side of the query for our direction.
        let wrong_side = if forward {
            near == NearMatch::Less
        } else {
            near == NearMatch::Greater
        };
        if wrong_side {
            self.advance_engine()?;
        }
        Ok(false)
    }

    fn at_or_past_end_point(&self) -> bool {
        if self.eof {
            return true;
        }
        let Some(end) = &self.end_position else {
            return false;
        };
        let cmp = self.key.as_slice().cmp(end.as_slice());
        // The end position sits between the last in-range entry and the
        // first out-of-range one; it never equals a legal key.
        debug_assert!(cmp != CmpOrdering::Equal);
        if self.forward {
            cmp == CmpOrdering::Greater
        } else {
            cmp == CmpOrdering::Less
        }
    }

    /// Refresh the cached position from the engine cursor. Must follow
    /// every engine-cursor move; must *not* follow a restore that failed
    /// to land exactly, since that does not logically move the cursor
    /// until the following advance.
    fn update_position(&mut self) -> Result<()> {
        self.last_move_was_restore = false;
        if self.cursor_at_eof {
            self.eof = true;
            self.loc = RecordId::null();
            return Ok(());
        }
        self.eof = false;
        self.key = self.engine()?.key()?;
        if self.at_or_past_end_point() {
            self.eof = true;
            return Ok(());
        }
        self.update_loc_and_type_bits()
    }

    fn update_loc_and_type_bits(&mut self) -> Result<()> {
        match self.flavor {
            CursorFlavor::Standard => {
                let (_, loc) = RecordId::split_at_end(&self.key)?;
                self.loc = loc;
                let value = self.engine()?.value()?;
                let mut reader = ByteReader::new(&value);
                self.type_bits = TypeBits::read_from(&mut reader)?;
            }
            CursorFlavor::Unique => {
                // Cursors only ever see unique indexes in their pristine
                // state; duplicate lists are excluded by upstream locking.
                let value = self.engine()?.value()?;
                let mut reader = ByteReader::new(&value);
                self.loc = RecordId::read_from(&mut reader)?;
                self.type_bits = TypeBits::read_from(&mut reader)?;
                if !reader.is_empty() {
                    error!(
                        index = %self.ident.index_name,
                        "unique index cursor seeing multiple records for one key"
                    );
                    return Err(KelpieError::internal(
                        "unique index cursor sees a duplicate list",
                    ));
                }
            }
        }
        Ok(())
    }

    fn curr(&self, parts: RequestedInfo) -> Result<Option<IndexEntry>> {
        if self.eof {
            return Ok(None);
        }
        debug_assert!(!self.at_or_past_end_point());
        debug_assert!(!self.loc.is_null());

        let key = if parts == RequestedInfo::KeyAndLoc {
            let encoded = match self.flavor {
                CursorFlavor::Standard => RecordId::split_at_end(&self.key)?.0,
                CursorFlavor::Unique => self.key.as_slice(),
            };
            decode_key(encoded, self.ident.ordering, &self.type_bits)?
        } else {
            IndexKey::empty()
        };
        Ok(Some(IndexEntry { key, loc: self.loc }))
    }

    fn seek_encoded(&mut self, query: Vec<u8>, parts: RequestedInfo) -> Result<Option<IndexEntry>> {
        self.seek_engine(&query)?;
        self.query = query;
        self.update_position()?;
        self.curr(parts)
    }

    fn adjust_unique_restore(&mut self) -> Result<()> {
        // On a different key (or nowhere): nothing to correct.
        if self.last_move_was_restore || self.eof {
            return Ok(());
        }

        // Same key: the record id stored there must be on the correct
        // side of the saved one.
        let value = self.engine()?.value()?;
        let mut reader = ByteReader::new(&value);
        let loc_in_index = RecordId::read_from(&mut reader)?;
        if loc_in_index == self.loc {
            return Ok(());
        }

        self.last_move_was_restore = true;
        if self.forward && loc_in_index < self.loc {
            self.advance_engine()?;
        }
        if !self.forward && loc_in_index > self.loc {
            self.advance_engine()?;
        }
        Ok(())
    }
}

impl SortedDataCursor for IndexCursor {
    fn next(&mut self, parts: RequestedInfo) -> Result<Option<IndexEntry>> {
        // Advancing a cursor past the end is a no-op.
        if self.eof {
            return Ok(None);
        }
        if !self.last_move_was_restore {
            self.advance_engine()?;
        }
        self.update_position()?;
        self.curr(parts)
    }

    fn seek(
        &mut self,
        key: &IndexKey,
        inclusive: bool,
        parts: RequestedInfo,
    ) -> Result<Option<IndexEntry>> {
        let stripped = key.strip_field_names();
        // An exclusive discriminator means there is no need to
        // distinguish unique from standard key formats: both start with
        // the encoded key, and the probe never equals either.
        let discriminator = if self.forward == inclusive {
            Discriminator::ExclusiveBefore
        } else {
            Discriminator::ExclusiveAfter
        };
        let query =
            OrderedKey::encode_with_discriminator(&stripped, self.ident.ordering, discriminator);
        self.seek_encoded(query.into_bytes(), parts)
    }

    fn seek_point(
        &mut self,
        point: &SeekPoint,
        parts: RequestedInfo,
    ) -> Result<Option<IndexEntry>> {
        let (key, inclusive) = seek_point_to_query(point);
        self.seek(&key, inclusive, parts)
    }

    fn seek_exact(&mut self, key: &IndexKey, parts: RequestedInfo) -> Result<Option<IndexEntry>> {
        if self.flavor != CursorFlavor::Unique {
            return Err(KelpieError::internal(
                "seek_exact requires a unique index cursor",
            ));
        }
        let encoded = OrderedKey::encode(&key.strip_field_names(), self.ident.ordering);
        let query = encoded.into_bytes();

        // search, not search_near: only the exact logical key matches.
        let cursor = self.engine()?;
        cursor.set_key(&query);
        match cursor.search() {
            Ok(()) => self.cursor_at_eof = false,
            Err(err) if err.is_not_found() => self.cursor_at_eof = true,
            Err(err) => return Err(err),
        }
        self.query = query;
        self.update_position()?;
        debug_assert!(self.eof || self.key == self.query);
        self.curr(parts)
    }

    fn set_end_position(&mut self, key: &IndexKey, inclusive: bool) {
        if key.is_empty() {
            // Scan to the end of the index.
            self.end_position = None;
            return;
        }
        // Opposite rules from a seek: a forward scan ends *after* the key
        // if inclusive and *before* it if exclusive.
        let discriminator = if self.forward == inclusive {
            Discriminator::ExclusiveAfter
        } else {
            Discriminator::ExclusiveBefore
        };
        let end = OrderedKey::encode_with_discriminator(
            &key.strip_field_names(),
            self.ident.ordering,
            discriminator,
        );
        self.end_position = Some(end.into_bytes());
    }

    fn save_positioned(&mut self) {
        // The saved position is wherever the last update_position left
        // us; a partially completed reposition does not affect it.
        if let Some(cursor) = self.cursor.as_deref_mut() {
            cursor.reset();
        }
    }

    fn save_unpositioned(&mut self) {
        self.save_positioned();
        self.eof = true;
    }

    fn restore(&mut self) -> Result<()> {
        if self.cursor.is_none() {
            let ctx = self.ctx.as_ref().ok_or_else(|| {
                KelpieError::internal("restore on a cursor with no operation context")
            })?;
            self.cursor = Some(ctx.session().open_cursor(&self.ident.uri)?);
        }

        if !self.eof {
            let saved = self.key.clone();
            let exact = self.seek_engine(&saved)?;
            self.last_move_was_restore = !exact;
            if self.flavor == CursorFlavor::Unique {
                self.adjust_unique_restore()?;
            }
        }
        Ok(())
    }

    fn detach_from_op_context(&mut self) {
        self.ctx = None;
        self.cursor = None;
    }

    fn reattach_to_op_context(&mut self, ctx: &OpContext) {
        self.ctx = Some(ctx.clone());
        // The engine cursor is recreated in restore() so a stale handle
        // can never bind to the wrong transaction.
    }
}
