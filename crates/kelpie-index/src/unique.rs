//! The unique index flavor.
//!
//! One engine row per logical key. The value is a *duplicate list*:
//! `(record id, type-bits)` tuples ordered by ascending record id. A
//! single-entry list with all-zero type-bits omits the type-bits
//! entirely; multi-entry lists always write them, even all-zero, so the
//! list stays parseable. Lists longer than one entry exist only while a
//! caller explicitly allows duplicates (e.g. constraint repair); cursors
//! contractually never see them.

use kelpie_error::{KelpieError, Result};
use kelpie_okv::{KvCursor, OpContext};
use kelpie_types::{ByteReader, IndexKey, OrderedKey, RecordId, TypeBits};
use tracing::{debug, warn};

use crate::bulk::{SortedDataBuilder, UniqueBulkBuilder};
use crate::cursor::{CursorFlavor, SortedDataCursor};
use crate::descriptor::IndexDescriptor;
use crate::index::{
    append_custom_stats_impl, check_key_size, count_entries, is_empty_impl, open_ident,
    space_used_impl, verify_phase, IndexIdent, SortedDataInterface, ValidateResults,
};

/// A unique index bound to an engine table.
pub struct UniqueIndex {
    ident: IndexIdent,
}

impl UniqueIndex {
    /// Bind to `uri`, validating the table's format version.
    pub fn open(ctx: &OpContext, uri: &str, desc: &IndexDescriptor) -> Result<Self> {
        Ok(Self {
            ident: open_ident(ctx, uri, desc)?,
        })
    }

    /// Whether `key` exists with a record id other than `loc`.
    fn is_dup(&self, cursor: &mut dyn KvCursor, key: &IndexKey, loc: RecordId) -> Result<bool> {
        let encoded = OrderedKey::encode(key, self.ident.ordering);
        cursor.set_key(encoded.as_bytes());
        match cursor.search() {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(err),
        }

        // The key exists; our own loc at the key is not a duplicate.
        let value = cursor.value()?;
        let mut reader = ByteReader::new(&value);
        while !reader.is_empty() {
            if RecordId::read_from(&mut reader)? == loc {
                return Ok(false);
            }
            // Advance the reader past the entry's type-bits.
            TypeBits::read_from(&mut reader)?;
        }
        Ok(true)
    }
}

impl SortedDataInterface for UniqueIndex {
    fn is_unique(&self) -> bool {
        true
    }

    fn insert(
        &self,
        ctx: &OpContext,
        key: &IndexKey,
        loc: RecordId,
        dups_allowed: bool,
    ) -> Result<()> {
        debug_assert!(loc.is_normal());
        debug_assert!(!key.has_field_names());

        let encoded = OrderedKey::encode(key, self.ident.ordering);
        check_key_size(encoded.len(), key)?;

        debug!(index = %self.ident.index_name, %key, %loc, "unique index insert");

        let mut value = Vec::new();
        loc.append_to(&mut value);
        if !encoded.type_bits().is_all_zeros() {
            encoded.type_bits().write_to(&mut value);
        }

        let mut cursor = ctx.session().open_cursor(&self.ident.uri)?;
        cursor.set_key(encoded.as_bytes());
        cursor.set_value(&value);
        match cursor.insert() {
            Err(KelpieError::KeyExists) => {}
            result => return result,
        }

        // The logical key already has at least one entry. Read-modify-
        // write the duplicate list inside the surrounding transaction;
        // the engine aborts with a write conflict if anyone else touches
        // the row first, and the transaction manager owns the retry.
        //
        // All-zero type-bits cannot be omitted while the list has more
        // than one entry; the removal path restores the elision when the
        // list shrinks back to one.
        cursor.search()?;
        let old = cursor.value()?;

        let mut new_value = Vec::new();
        let mut inserted_loc = false;
        let mut reader = ByteReader::new(&old);
        while !reader.is_empty() {
            let loc_in_index = RecordId::read_from(&mut reader)?;
            if loc == loc_in_index {
                return Ok(()); // already in the index
            }

            if !inserted_loc && loc < loc_in_index {
                loc.append_to(&mut new_value);
                encoded.type_bits().write_to(&mut new_value);
                inserted_loc = true;
            }

            // Copy the existing entry across.
            loc_in_index.append_to(&mut new_value);
            TypeBits::read_from(&mut reader)?.write_to(&mut new_value);
        }

        if !dups_allowed {
            return Err(self.ident.dup_key_error(key));
        }

        if !inserted_loc {
            // This loc sorts above everything currently at the key.
            loc.append_to(&mut new_value);
            encoded.type_bits().write_to(&mut new_value);
        }

        cursor.set_value(&new_value);
        cursor.update()
    }

    fn unindex(
        &self,
        ctx: &OpContext,
        key: &IndexKey,
        loc: RecordId,
        dups_allowed: bool,
    ) -> Result<()> {
        debug_assert!(loc.is_normal());
        debug_assert!(!key.has_field_names());

        let encoded = OrderedKey::encode(key, self.ident.ordering);
        let mut cursor = ctx.session().open_cursor(&self.ident.uri)?;
        cursor.set_key(encoded.as_bytes());

        if !dups_allowed {
            // Nice and simple: the row is ours alone.
            return match cursor.remove() {
                Err(err) if err.is_not_found() => Ok(()),
                result => result,
            };
        }

        // Duplicates are possible, so the row holds a list of record ids.
        match cursor.search() {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        }
        let old = cursor.value()?;

        let mut found_loc = false;
        let mut records: Vec<(RecordId, TypeBits)> = Vec::new();
        let mut reader = ByteReader::new(&old);
        while !reader.is_empty() {
            let loc_in_index = RecordId::read_from(&mut reader)?;
            let type_bits = TypeBits::read_from(&mut reader)?;

            if loc == loc_in_index {
                if records.is_empty() && reader.is_empty() {
                    // Common case: removing the only loc for this key.
                    return cursor.remove();
                }
                found_loc = true;
                continue;
            }
            records.push((loc_in_index, type_bits));
        }

        if !found_loc {
            warn!(index = %self.ident.index_name, %loc, %key, "loc not found in the index for key");
            return Ok(());
        }

        // Put the other locs for this key back, restoring the
        // single-entry type-bits elision where it applies.
        debug_assert!(!records.is_empty());
        let mut new_value = Vec::new();
        for (record_loc, type_bits) in &records {
            record_loc.append_to(&mut new_value);
            if !(type_bits.is_all_zeros() && records.len() == 1) {
                type_bits.write_to(&mut new_value);
            }
        }
        cursor.set_value(&new_value);
        cursor.update()
    }

    fn dup_key_check(&self, ctx: &OpContext, key: &IndexKey, loc: RecordId) -> Result<()> {
        debug_assert!(!key.has_field_names());
        let mut cursor = ctx.session().open_cursor(&self.ident.uri)?;
        if self.is_dup(cursor.as_mut(), key, loc)? {
            return Err(self.ident.dup_key_error(key));
        }
        Ok(())
    }

    fn is_empty(&self, ctx: &OpContext) -> Result<bool> {
        is_empty_impl(&self.ident, ctx)
    }

    fn space_used_bytes(&self, ctx: &OpContext) -> Result<u64> {
        space_used_impl(&self.ident, ctx)
    }

    fn full_validate(
        &self,
        ctx: &OpContext,
        full: bool,
        results: &mut ValidateResults,
    ) -> Result<i64> {
        if !verify_phase(&self.ident, ctx, results)? {
            return Ok(0);
        }
        let count = {
            let mut cursor = self.new_cursor(ctx, true)?;
            count_entries(cursor.as_mut())?
        };

        if full {
            // Deep pass: every duplicate list must hold strictly
            // ascending record ids.
            let mut raw = ctx.session().open_cursor(&self.ident.uri)?;
            while raw.next()? {
                let value = raw.value()?;
                let mut reader = ByteReader::new(&value);
                let mut previous: Option<RecordId> = None;
                while !reader.is_empty() {
                    let loc = RecordId::read_from(&mut reader)?;
                    TypeBits::read_from(&mut reader)?;
                    if previous.is_some_and(|p| p >= loc) {
                        results.valid = false;
                        results.errors.push(format!(
                            "duplicate list out of order in index {}",
                            self.ident.index_name
                        ));
                        break;
                    }
                    previous = Some(loc);
                }
            }
        }
        Ok(count)
    }

    fn append_custom_stats(
        &self,
        ctx: &OpContext,
        output: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        append_custom_stats_impl(&self.ident, ctx, output)
    }

    fn new_cursor(&self, ctx: &OpContext, forward: bool) -> Result<Box<dyn SortedDataCursor>> {
        crate::cursor::new_cursor(self.ident.clone(), CursorFlavor::Unique, ctx, forward)
    }

    fn bulk_builder(
        &self,
        ctx: &OpContext,
        dups_allowed: bool,
    ) -> Result<Box<dyn SortedDataBuilder>> {
        Ok(Box::new(UniqueBulkBuilder::new(
            self.ident.clone(),
            ctx,
            dups_allowed,
        )?))
    }
}
