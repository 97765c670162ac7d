//! Shared index machinery: the public interface trait, the identity
//! shared by indexes and their cursors, the on-open format gate, and the
//! operations that do not differ between flavors.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use kelpie_error::{KelpieError, Result};
use kelpie_okv::OpContext;
use kelpie_types::{IndexKey, KeyOrdering, RecordId, MAX_KEY_BYTES};
use tracing::{error, warn};

use crate::bulk::SortedDataBuilder;
use crate::cursor::SortedDataCursor;
use crate::descriptor::IndexDescriptor;
use crate::{MAXIMUM_INDEX_VERSION, MINIMUM_INDEX_VERSION};

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// The index interface exposed to the layers above.
///
/// Both flavors implement every operation; `dup_key_check` is meaningful
/// only on unique indexes and `seek_exact` only on unique cursors.
pub trait SortedDataInterface {
    /// Whether this index enforces uniqueness.
    fn is_unique(&self) -> bool;

    /// Add a `(key, loc)` association.
    ///
    /// Idempotent: re-inserting an existing association returns `Ok`.
    /// Fails with `KeyTooLong` for oversized keys and `DuplicateKey` for
    /// a unique index holding a different `loc` at `key` when
    /// `dups_allowed` is false. Engine-transient errors bubble up for the
    /// caller's retry loop.
    fn insert(
        &self,
        ctx: &OpContext,
        key: &IndexKey,
        loc: RecordId,
        dups_allowed: bool,
    ) -> Result<()>;

    /// Remove a `(key, loc)` association. Removing an absent association
    /// is a no-op (logged, not an error).
    fn unindex(
        &self,
        ctx: &OpContext,
        key: &IndexKey,
        loc: RecordId,
        dups_allowed: bool,
    ) -> Result<()>;

    /// Unique only: fail with `DuplicateKey` when `key` is present with
    /// any record id other than `loc`.
    fn dup_key_check(&self, ctx: &OpContext, key: &IndexKey, loc: RecordId) -> Result<()>;

    /// Whether the index holds no entries.
    fn is_empty(&self, ctx: &OpContext) -> Result<bool>;

    /// On-disk footprint in bytes.
    fn space_used_bytes(&self, ctx: &OpContext) -> Result<u64>;

    /// Run the engine's structural check, then count entries with a full
    /// scan. `full` additionally walks flavor-specific structure. Returns
    /// the entry count; structural findings land in `results`.
    fn full_validate(
        &self,
        ctx: &OpContext,
        full: bool,
        results: &mut ValidateResults,
    ) -> Result<i64>;

    /// Append engine metadata and statistics for this index to `output`.
    fn append_custom_stats(
        &self,
        ctx: &OpContext,
        output: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool>;

    /// Prepare a brand-new index for use. The engine table already
    /// carries everything needed, so this is a no-op.
    fn init_as_empty(&self, ctx: &OpContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Open a cursor traveling in the given direction.
    fn new_cursor(&self, ctx: &OpContext, forward: bool) -> Result<Box<dyn SortedDataCursor>>;

    /// Open a bulk builder. Exclusive: no other cursor may be live on the
    /// table while the builder runs.
    fn bulk_builder(
        &self,
        ctx: &OpContext,
        dups_allowed: bool,
    ) -> Result<Box<dyn SortedDataBuilder>>;
}

/// Findings from [`SortedDataInterface::full_validate`].
#[derive(Debug, Default)]
pub struct ValidateResults {
    /// False when structural damage was found.
    pub valid: bool,
    /// Damage descriptions.
    pub errors: Vec<String>,
    /// Non-fatal notes (e.g. a verify skipped for being busy).
    pub warnings: Vec<String>,
}

/// Identity of one index table, shared between the index object and every
/// cursor opened on it. Carries no mutable state.
#[derive(Clone, Debug)]
pub(crate) struct IndexIdent {
    pub uri: String,
    pub table_id: u64,
    pub ordering: KeyOrdering,
    pub namespace: String,
    pub index_name: String,
}

impl IndexIdent {
    /// The user-facing duplicate-key error for this index.
    pub fn dup_key_error(&self, key: &IndexKey) -> KelpieError {
        KelpieError::DuplicateKey {
            namespace: self.namespace.clone(),
            index_name: self.index_name.clone(),
            key_text: key.to_string(),
        }
    }
}

/// Bind to an existing index table, verifying the on-disk format tag.
///
/// An out-of-range or missing `formatVersion` is unrecoverable without
/// repair: the diagnostic is logged here and the fatal error returned to
/// the caller, which owns termination.
pub(crate) fn open_ident(
    ctx: &OpContext,
    uri: &str,
    desc: &IndexDescriptor,
) -> Result<IndexIdent> {
    let metadata = ctx.session().app_metadata(uri)?;
    match metadata.get("formatVersion").and_then(serde_json::Value::as_i64) {
        Some(v) if (MINIMUM_INDEX_VERSION..=MAXIMUM_INDEX_VERSION).contains(&v) => {}
        Some(v) => {
            error!(
                %uri,
                found = v,
                min = MINIMUM_INDEX_VERSION,
                max = MAXIMUM_INDEX_VERSION,
                "index table has unsupported format version"
            );
            return Err(KelpieError::UnsupportedIndexFormat {
                found: v,
                min: MINIMUM_INDEX_VERSION,
                max: MAXIMUM_INDEX_VERSION,
            });
        }
        None => {
            error!(%uri, "index table metadata is missing formatVersion");
            return Err(KelpieError::MetadataUnavailable {
                uri: uri.to_owned(),
                detail: "missing formatVersion".to_owned(),
            });
        }
    }
    Ok(IndexIdent {
        uri: uri.to_owned(),
        table_id: NEXT_TABLE_ID.fetch_add(1, AtomicOrdering::Relaxed),
        ordering: desc.ordering(),
        namespace: desc.namespace.clone(),
        index_name: desc.name.clone(),
    })
}

/// Enforce the structured-key size cap at insertion.
pub(crate) fn check_key_size(encoded_len: usize, key: &IndexKey) -> Result<()> {
    if encoded_len >= MAX_KEY_BYTES {
        return Err(KelpieError::KeyTooLong {
            size: encoded_len,
            max: MAX_KEY_BYTES,
            key_text: key.to_string(),
        });
    }
    Ok(())
}

/// Shared `is_empty`: probe the first row with a raw engine cursor.
pub(crate) fn is_empty_impl(ident: &IndexIdent, ctx: &OpContext) -> Result<bool> {
    let mut cursor = ctx.session().open_cursor(&ident.uri)?;
    Ok(!cursor.next()?)
}

/// Shared `space_used_bytes`.
pub(crate) fn space_used_impl(ident: &IndexIdent, ctx: &OpContext) -> Result<u64> {
    ctx.session().table_size_bytes(&ident.uri)
}

/// The verify half of `full_validate`. Returns whether entry examination
/// should proceed (structural damage means individual entries are not
/// worth reading).
pub(crate) fn verify_phase(
    ident: &IndexIdent,
    ctx: &OpContext,
    results: &mut ValidateResults,
) -> Result<bool> {
    match ctx.session().verify(&ident.uri) {
        Ok(()) => {
            results.valid = true;
            Ok(true)
        }
        Err(KelpieError::Busy { .. }) => {
            let msg = "verify() returned busy. Not treating as invalid.";
            warn!(uri = %ident.uri, "{msg}");
            results.warnings.push(msg.to_owned());
            results.valid = true;
            Ok(true)
        }
        Err(err) => {
            let msg = format!(
                "verify() returned {err}. This indicates structural damage. \
                 Not examining individual index entries."
            );
            error!(uri = %ident.uri, "{msg}");
            results.errors.push(msg);
            results.valid = false;
            Ok(false)
        }
    }
}

/// Count every entry with a full forward scan of `cursor`.
pub(crate) fn count_entries(cursor: &mut dyn SortedDataCursor) -> Result<i64> {
    use crate::cursor::RequestedInfo;

    let mut count = 0i64;
    let mut entry = cursor.seek(&IndexKey::empty(), true, RequestedInfo::Existence)?;
    while entry.is_some() {
        count += 1;
        entry = cursor.next(RequestedInfo::Existence)?;
    }
    Ok(count)
}

/// Shared `append_custom_stats`: metadata, creation config, statistics.
/// Unavailable pieces become error fields rather than failures.
pub(crate) fn append_custom_stats_impl(
    ident: &IndexIdent,
    ctx: &OpContext,
    output: &mut serde_json::Map<String, serde_json::Value>,
) -> Result<bool> {
    match ctx.session().app_metadata(&ident.uri) {
        Ok(metadata) => {
            output.insert("metadata".to_owned(), metadata);
        }
        Err(err) => {
            output.insert(
                "metadata".to_owned(),
                serde_json::json!({ "error": "unable to retrieve metadata",
                                    "reason": err.to_string() }),
            );
        }
    }
    match ctx.session().creation_config(&ident.uri) {
        Ok(config) => {
            output.insert("creationString".to_owned(), serde_json::Value::String(config));
            output.insert("type".to_owned(), serde_json::Value::from("file"));
        }
        Err(err) => {
            output.insert(
                "creationString".to_owned(),
                serde_json::json!({ "error": "unable to retrieve creation config",
                                    "reason": err.to_string() }),
            );
        }
    }
    match ctx.session().statistics(&ident.uri) {
        Ok(stats) => {
            let mut doc = serde_json::Map::new();
            for (name, value) in stats {
                doc.insert(name, serde_json::Value::from(value));
            }
            output.insert("statistics".to_owned(), serde_json::Value::Object(doc));
        }
        Err(err) => {
            output.insert(
                "statistics".to_owned(),
                serde_json::json!({ "error": "unable to retrieve statistics",
                                    "reason": err.to_string() }),
            );
        }
    }
    Ok(true)
}
