//! The standard (non-unique) index flavor.
//!
//! One engine row per `(key, record id)`: the record id rides at the end
//! of the engine key, so duplicates of a logical key are distinct rows
//! and the engine value carries only the type-bits side channel (empty
//! when all-zero).

use kelpie_error::{KelpieError, Result};
use kelpie_okv::OpContext;
use kelpie_types::record_id::RECORD_ID_ENCODED_LEN;
use kelpie_types::{IndexKey, OrderedKey, RecordId};
use tracing::debug;

use crate::bulk::{SortedDataBuilder, StandardBulkBuilder};
use crate::cursor::{CursorFlavor, SortedDataCursor};
use crate::descriptor::IndexDescriptor;
use crate::index::{
    append_custom_stats_impl, check_key_size, count_entries, is_empty_impl, open_ident,
    space_used_impl, verify_phase, IndexIdent, SortedDataInterface, ValidateResults,
};

/// A non-unique index bound to an engine table.
#[derive(Debug)]
pub struct StandardIndex {
    ident: IndexIdent,
}

impl StandardIndex {
    /// Bind to `uri`, validating the table's format version.
    pub fn open(ctx: &OpContext, uri: &str, desc: &IndexDescriptor) -> Result<Self> {
        Ok(Self {
            ident: open_ident(ctx, uri, desc)?,
        })
    }
}

impl SortedDataInterface for StandardIndex {
    fn is_unique(&self) -> bool {
        false
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
        debug_assert!(dups_allowed);
        let _ = dups_allowed;

        let encoded = OrderedKey::encode_with_record_id(key, self.ident.ordering, loc);
        check_key_size(encoded.len() - RECORD_ID_ENCODED_LEN, key)?;

        debug!(index = %self.ident.index_name, %key, %loc, "standard index insert");

        let mut cursor = ctx.session().open_cursor(&self.ident.uri)?;
        cursor.set_key(encoded.as_bytes());
        let type_bits = encoded.type_bits();
        let value = if type_bits.is_all_zeros() {
            Vec::new()
        } else {
            type_bits.to_buffer()
        };
        cursor.set_value(&value);
        match cursor.insert() {
            // The exact row already existed, e.g. a background build
            // racing a concurrent writer. Nothing to do.
            Err(KelpieError::KeyExists) => Ok(()),
            result => result,
        }
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
        debug_assert!(dups_allowed);
        let _ = dups_allowed;

        let encoded = OrderedKey::encode_with_record_id(key, self.ident.ordering, loc);
        let mut cursor = ctx.session().open_cursor(&self.ident.uri)?;
        cursor.set_key(encoded.as_bytes());
        match cursor.remove() {
            // Removing an absent entry is a no-op.
            Err(err) if err.is_not_found() => Ok(()),
            result => result,
        }
    }

    fn dup_key_check(&self, _ctx: &OpContext, _key: &IndexKey, _loc: RecordId) -> Result<()> {
        Err(KelpieError::internal(
            "dup_key_check on a non-unique index",
        ))
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
        _full: bool,
        results: &mut ValidateResults,
    ) -> Result<i64> {
        if !verify_phase(&self.ident, ctx, results)? {
            return Ok(0);
        }
        let mut cursor = self.new_cursor(ctx, true)?;
        count_entries(cursor.as_mut())
    }

    fn append_custom_stats(
        &self,
        ctx: &OpContext,
        output: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        append_custom_stats_impl(&self.ident, ctx, output)
    }

    fn new_cursor(&self, ctx: &OpContext, forward: bool) -> Result<Box<dyn SortedDataCursor>> {
        crate::cursor::new_cursor(self.ident.clone(), CursorFlavor::Standard, ctx, forward)
    }

    fn bulk_builder(
        &self,
        ctx: &OpContext,
        dups_allowed: bool,
    ) -> Result<Box<dyn SortedDataBuilder>> {
        // Not unique, so duplicates had better be allowed.
        debug_assert!(dups_allowed);
        let _ = dups_allowed;
        Ok(Box::new(StandardBulkBuilder::new(self.ident.clone(), ctx)?))
    }
}
