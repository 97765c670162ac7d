//! Public API facade for Kelpie.
//!
//! Re-exports the pieces a consumer needs to create, open, and use
//! indexes over an ordered key/value engine. The internal crates stay
//! available for callers that need the engine traits or the raw codec.

pub use kelpie_error::{KelpieError, Result};
pub use kelpie_index::{
    create_index_table, generate_create_config, register_legacy_collator, CreateConfigOptions,
    IndexDescriptor, IndexEntry, RequestedInfo, SeekPoint, SortedDataBuilder, SortedDataCursor,
    SortedDataInterface, StandardIndex, UniqueIndex, ValidateResults,
};
pub use kelpie_okv::{KvCursor, KvEngine, KvSession, MemEngine, NearMatch, OpContext};
pub use kelpie_types::{
    Discriminator, FieldValue, IndexKey, KeyOrdering, OrderedKey, RecordId, TypeBits,
    MAX_KEY_BYTES,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn context() -> OpContext {
        let engine: Arc<dyn KvEngine> = Arc::new(MemEngine::new());
        OpContext::new(engine).expect("in-memory session should open")
    }

    fn open_index(ctx: &OpContext, uri: &str) -> StandardIndex {
        let desc = IndexDescriptor::new("a_1", "db.coll", vec![("a".to_owned(), 1)]);
        let config = generate_create_config(&desc, &CreateConfigOptions::default(), "")
            .expect("config should compose");
        create_index_table(ctx, uri, &config).expect("table should create");
        StandardIndex::open(ctx, uri, &desc).expect("index should open")
    }

    #[test]
    fn test_public_api_insert_and_scan() {
        let ctx = context();
        let index = open_index(&ctx, "table:facade");
        index
            .insert(
                &ctx,
                &IndexKey::from_values([FieldValue::I64(1)]),
                RecordId::new(42),
                true,
            )
            .expect("insert should succeed");

        let mut cursor = index.new_cursor(&ctx, true).expect("cursor should open");
        let entry = cursor
            .seek(&IndexKey::empty(), true, RequestedInfo::KeyAndLoc)
            .expect("seek should succeed")
            .expect("one entry present");
        assert_eq!(entry.loc, RecordId::new(42));
        assert_eq!(entry.key, IndexKey::from_values([FieldValue::I64(1)]));
    }

    #[test]
    fn test_public_api_surfaces_duplicate_errors() {
        let ctx = context();
        let desc = IndexDescriptor::new("u_1", "db.coll", vec![("u".to_owned(), 1)]).unique();
        let config = generate_create_config(&desc, &CreateConfigOptions::default(), "")
            .expect("config should compose");
        create_index_table(&ctx, "table:facade-u", &config).expect("table should create");
        let index = UniqueIndex::open(&ctx, "table:facade-u", &desc).expect("index should open");

        let key = IndexKey::from_values([FieldValue::from("dup")]);
        index
            .insert(&ctx, &key, RecordId::new(1), false)
            .expect("first insert");
        let err = index
            .insert(&ctx, &key, RecordId::new(2), false)
            .expect_err("conflicting loc");
        assert!(matches!(err, KelpieError::DuplicateKey { .. }));
    }
}
