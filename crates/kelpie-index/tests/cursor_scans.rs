//! Cursor behavior: scan exhaustiveness, seek inclusivity, end bounds,
//! and save/restore stability across interleaved mutations.

use std::sync::Arc;

use kelpie_index::{
    create_index_table, generate_create_config, CreateConfigOptions, IndexDescriptor,
    RequestedInfo, SeekPoint, SortedDataInterface, StandardIndex, UniqueIndex,
};
use kelpie_okv::{KvEngine, MemEngine, OpContext};
use kelpie_types::{FieldValue, IndexKey, RecordId};

fn context() -> OpContext {
    let engine: Arc<dyn KvEngine> = Arc::new(MemEngine::new());
    OpContext::new(engine).expect("session opens")
}

fn descriptor(key_pattern: &[(&str, i32)]) -> IndexDescriptor {
    IndexDescriptor::new(
        "scan_idx",
        "db.coll",
        key_pattern
            .iter()
            .map(|(name, dir)| ((*name).to_owned(), *dir))
            .collect(),
    )
}

fn create_standard(ctx: &OpContext, uri: &str, key_pattern: &[(&str, i32)]) -> StandardIndex {
    let desc = descriptor(key_pattern);
    let config = generate_create_config(&desc, &CreateConfigOptions::default(), "").unwrap();
    create_index_table(ctx, uri, &config).unwrap();
    StandardIndex::open(ctx, uri, &desc).unwrap()
}

fn create_unique(ctx: &OpContext, uri: &str, key_pattern: &[(&str, i32)]) -> UniqueIndex {
    let desc = descriptor(key_pattern).unique();
    let config = generate_create_config(&desc, &CreateConfigOptions::default(), "").unwrap();
    create_index_table(ctx, uri, &config).unwrap();
    UniqueIndex::open(ctx, uri, &desc).unwrap()
}

fn int_key(v: i64) -> IndexKey {
    IndexKey::from_values([FieldValue::I64(v)])
}

fn loc(raw: i64) -> RecordId {
    RecordId::new(raw)
}

/// Populate a standard index with `({a: i}, 1)` for each `i` in 1..=5.
fn seeded_standard(ctx: &OpContext, uri: &str) -> StandardIndex {
    let index = create_standard(ctx, uri, &[("a", 1)]);
    for i in 1..=5 {
        index.insert(ctx, &int_key(i), loc(1), true).unwrap();
    }
    index
}

fn drain_keys(
    cursor: &mut dyn kelpie_index::SortedDataCursor,
    first: Option<kelpie_index::IndexEntry>,
) -> Vec<i64> {
    let mut out = Vec::new();
    let mut entry = first;
    while let Some(e) = entry {
        out.push(e.key.fields()[0].value.as_int().unwrap());
        entry = cursor.next(RequestedInfo::KeyAndLoc).unwrap();
    }
    out
}

#[test]
fn forward_and_reverse_scans_visit_everything_once() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c1");

    let mut fwd = index.new_cursor(&ctx, true).unwrap();
    let first = fwd
        .seek(&IndexKey::empty(), true, RequestedInfo::KeyAndLoc)
        .unwrap();
    assert_eq!(drain_keys(fwd.as_mut(), first), vec![1, 2, 3, 4, 5]);

    let mut rev = index.new_cursor(&ctx, false).unwrap();
    let first = rev
        .seek(&IndexKey::empty(), true, RequestedInfo::KeyAndLoc)
        .unwrap();
    assert_eq!(drain_keys(rev.as_mut(), first), vec![5, 4, 3, 2, 1]);
}

#[test]
fn seek_inclusivity_forward_and_reverse() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c2");

    let mut fwd = index.new_cursor(&ctx, true).unwrap();
    let entry = fwd.seek(&int_key(3), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(3));
    let entry = fwd.seek(&int_key(3), false, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(4));
    // Between keys: inclusive or not, the next entry is the same.
    let entry = fwd.seek(&int_key(0), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(1));
    let entry = fwd.seek(&int_key(5), false, RequestedInfo::KeyAndLoc).unwrap();
    assert!(entry.is_none());

    let mut rev = index.new_cursor(&ctx, false).unwrap();
    let entry = rev.seek(&int_key(3), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(3));
    let entry = rev.seek(&int_key(3), false, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(2));
    let entry = rev.seek(&int_key(1), false, RequestedInfo::KeyAndLoc).unwrap();
    assert!(entry.is_none());
}

#[test]
fn end_bound_inclusive_and_exclusive() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c3");

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    cursor.set_end_position(&int_key(4), true);
    let first = cursor.seek(&int_key(2), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(drain_keys(cursor.as_mut(), first), vec![2, 3, 4]);

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    cursor.set_end_position(&int_key(4), false);
    let first = cursor.seek(&int_key(2), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(drain_keys(cursor.as_mut(), first), vec![2, 3]);

    // Clearing the bound scans to the end.
    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    cursor.set_end_position(&IndexKey::empty(), true);
    let first = cursor.seek(&int_key(4), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(drain_keys(cursor.as_mut(), first), vec![4, 5]);
}

#[test]
fn reverse_end_bound_stops_before_crossing() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c4");

    let mut cursor = index.new_cursor(&ctx, false).unwrap();
    cursor.set_end_position(&int_key(2), true);
    let first = cursor.seek(&int_key(4), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(drain_keys(cursor.as_mut(), first), vec![4, 3, 2]);

    let mut cursor = index.new_cursor(&ctx, false).unwrap();
    cursor.set_end_position(&int_key(2), false);
    let first = cursor.seek(&int_key(4), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(drain_keys(cursor.as_mut(), first), vec![4, 3]);
}

#[test]
fn descending_ordering_scans_high_to_low() {
    let ctx = context();
    let index = create_standard(&ctx, "table:c5", &[("a", -1)]);
    for i in 1..=3 {
        index.insert(&ctx, &int_key(i), loc(1), true).unwrap();
    }

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    let first = cursor
        .seek(&IndexKey::empty(), true, RequestedInfo::KeyAndLoc)
        .unwrap();
    assert_eq!(drain_keys(cursor.as_mut(), first), vec![3, 2, 1]);
}

#[test]
fn save_restore_is_invisible_without_interim_writes() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c6");

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    let entry = cursor.seek(&int_key(2), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(2));

    cursor.save_positioned();
    cursor.restore().unwrap();

    let entry = cursor.next(RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(3));
}

#[test]
fn save_restore_lands_on_successor_when_entry_deleted() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c7");

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    cursor.seek(&int_key(2), true, RequestedInfo::KeyAndLoc).unwrap();
    cursor.save_positioned();

    index.unindex(&ctx, &int_key(2), loc(1), true).unwrap();

    cursor.restore().unwrap();
    let entry = cursor.next(RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(3));
}

#[test]
fn reverse_save_restore_lands_on_logical_predecessor() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c8");

    let mut cursor = index.new_cursor(&ctx, false).unwrap();
    cursor.seek(&int_key(3), true, RequestedInfo::KeyAndLoc).unwrap();
    cursor.save_positioned();

    index.unindex(&ctx, &int_key(3), loc(1), true).unwrap();

    cursor.restore().unwrap();
    let entry = cursor.next(RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(2));
}

#[test]
fn save_unpositioned_forgets_the_position() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c9");

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    cursor.seek(&int_key(2), true, RequestedInfo::KeyAndLoc).unwrap();
    cursor.save_unpositioned();
    cursor.restore().unwrap();

    // The cursor is at EOF until the caller seeks again.
    assert!(cursor.next(RequestedInfo::KeyAndLoc).unwrap().is_none());
    let entry = cursor.seek(&int_key(1), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(1));
}

#[test]
fn unique_restore_skips_lower_replacement_locs() {
    let ctx = context();
    let index = create_unique(&ctx, "table:c10", &[("a", 1)]);
    index.insert(&ctx, &int_key(1), loc(5), false).unwrap();
    index.insert(&ctx, &int_key(2), loc(1), false).unwrap();

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    let entry = cursor.seek(&int_key(1), true, RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().loc, loc(5));
    cursor.save_positioned();

    // The entry is replaced by one with a smaller loc: semantically the
    // cursor has already passed it, so it must not come back.
    index.unindex(&ctx, &int_key(1), loc(5), false).unwrap();
    index.insert(&ctx, &int_key(1), loc(3), false).unwrap();

    cursor.restore().unwrap();
    let entry = cursor.next(RequestedInfo::KeyAndLoc).unwrap().unwrap();
    assert_eq!(entry.key, int_key(2));
}

#[test]
fn unique_restore_returns_higher_replacement_locs() {
    let ctx = context();
    let index = create_unique(&ctx, "table:c11", &[("a", 1)]);
    index.insert(&ctx, &int_key(1), loc(5), false).unwrap();
    index.insert(&ctx, &int_key(2), loc(1), false).unwrap();

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    cursor.seek(&int_key(1), true, RequestedInfo::KeyAndLoc).unwrap();
    cursor.save_positioned();

    // Replaced by a higher loc: still ahead of the cursor, so the next
    // advance must yield it.
    index.unindex(&ctx, &int_key(1), loc(5), false).unwrap();
    index.insert(&ctx, &int_key(1), loc(7), false).unwrap();

    cursor.restore().unwrap();
    let entry = cursor.next(RequestedInfo::KeyAndLoc).unwrap().unwrap();
    assert_eq!(entry.key, int_key(1));
    assert_eq!(entry.loc, loc(7));
}

#[test]
fn seek_exact_hits_and_misses() {
    let ctx = context();
    let index = create_unique(&ctx, "table:c12", &[("a", 1)]);
    index.insert(&ctx, &int_key(2), loc(8), false).unwrap();

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    let entry = cursor.seek_exact(&int_key(2), RequestedInfo::KeyAndLoc).unwrap();
    let entry = entry.unwrap();
    assert_eq!(entry.key, int_key(2));
    assert_eq!(entry.loc, loc(8));

    assert!(cursor
        .seek_exact(&int_key(3), RequestedInfo::KeyAndLoc)
        .unwrap()
        .is_none());
}

#[test]
fn seek_exact_is_unique_only() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c13");
    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    assert!(cursor
        .seek_exact(&int_key(1), RequestedInfo::KeyAndLoc)
        .is_err());
}

#[test]
fn detach_reattach_round_trip() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c14");

    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    cursor.seek(&int_key(2), true, RequestedInfo::KeyAndLoc).unwrap();

    cursor.save_positioned();
    cursor.detach_from_op_context();

    // A detached cursor has no engine handle to restore onto.
    assert!(cursor.restore().is_err());

    cursor.reattach_to_op_context(&ctx);
    cursor.restore().unwrap();
    let entry = cursor.next(RequestedInfo::KeyAndLoc).unwrap();
    assert_eq!(entry.unwrap().key, int_key(3));
}

#[test]
fn seek_point_scans_from_pattern() {
    let ctx = context();
    let index = create_standard(&ctx, "table:c15", &[("a", 1), ("b", 1)]);
    for a in 1..=2 {
        for b in 1..=2 {
            let key = IndexKey::from_values([FieldValue::I64(a), FieldValue::I64(b)]);
            index.insert(&ctx, &key, loc(a * 10 + b), true).unwrap();
        }
    }

    let mut cursor = index.new_cursor(&ctx, true).unwrap();

    // All entries with a == 1, starting at b >= 2.
    let point = SeekPoint {
        prefix: IndexKey::from_values([FieldValue::I64(1)]),
        prefix_len: 1,
        prefix_exclusive: false,
        suffix: vec![FieldValue::I64(2)],
        suffix_inclusive: vec![true],
    };
    let entry = cursor.seek_point(&point, RequestedInfo::KeyAndLoc).unwrap().unwrap();
    assert_eq!(entry.loc, loc(12));

    // Skip the whole a == 1 prefix.
    let point = SeekPoint {
        prefix: IndexKey::from_values([FieldValue::I64(1)]),
        prefix_len: 1,
        prefix_exclusive: true,
        suffix: vec![],
        suffix_inclusive: vec![],
    };
    let entry = cursor.seek_point(&point, RequestedInfo::KeyAndLoc).unwrap().unwrap();
    assert_eq!(entry.loc, loc(21));
}

#[test]
fn loc_only_requests_skip_key_decoding() {
    let ctx = context();
    let index = seeded_standard(&ctx, "table:c16");
    let mut cursor = index.new_cursor(&ctx, true).unwrap();
    let entry = cursor
        .seek(&int_key(1), true, RequestedInfo::LocOnly)
        .unwrap()
        .unwrap();
    assert!(entry.key.is_empty());
    assert_eq!(entry.loc, loc(1));
}
