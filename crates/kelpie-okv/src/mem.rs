//! In-memory engine implementing the ordered-KV contract.
//!
//! Backs the index layer's tests and tools. Tables are `BTreeMap`s behind
//! a single engine lock; per-table open-cursor accounting makes the
//! exclusive-access behaviors observable: bulk-cursor opens fail `Busy`
//! while any cursor is live on the table, `verify` does the same, and
//! `close_all_cursors` invalidates a session's outstanding handles.
//!
//! This is contract-fidelity storage, not a storage engine: writes are
//! applied immediately and transactional conflict signaling is left to
//! real engines.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use parking_lot::Mutex;

use kelpie_error::{KelpieError, Result};

use crate::traits::{KvCursor, KvEngine, KvSession, NearMatch};

struct TableData {
    rows: BTreeMap<Vec<u8>, Vec<u8>>,
    config: String,
    app_metadata: serde_json::Value,
    open_cursors: usize,
}

#[derive(Default)]
struct EngineInner {
    tables: Mutex<HashMap<String, TableData>>,
}

/// The in-memory engine.
#[derive(Default)]
pub struct MemEngine {
    inner: Arc<EngineInner>,
}

impl MemEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvEngine for MemEngine {
    fn open_session(&self) -> Result<Arc<dyn KvSession>> {
        Ok(Arc::new(MemSession {
            inner: Arc::clone(&self.inner),
            gates: Mutex::new(Vec::new()),
        }))
    }
}

/// Tracks one handed-out cursor so the session can invalidate it and the
/// table's open-cursor count stays balanced whichever side closes first.
struct CursorGate {
    uri: String,
    closed: AtomicBool,
}

struct MemSession {
    inner: Arc<EngineInner>,
    gates: Mutex<Vec<Arc<CursorGate>>>,
}

impl MemSession {
    fn open_cursor_inner(&self, uri: &str, bulk: bool) -> Result<Box<dyn KvCursor>> {
        let mut tables = self.inner.tables.lock();
        let table = tables
            .get_mut(uri)
            .ok_or(KelpieError::NotFound)?;
        if bulk && table.open_cursors > 0 {
            return Err(KelpieError::Busy {
                uri: uri.to_owned(),
            });
        }
        table.open_cursors += 1;
        drop(tables);

        let gate = Arc::new(CursorGate {
            uri: uri.to_owned(),
            closed: AtomicBool::new(false),
        });
        self.gates.lock().push(Arc::clone(&gate));
        Ok(Box::new(MemCursor {
            inner: Arc::clone(&self.inner),
            gate,
            position: Position::Cleared,
            pending_key: None,
            pending_value: None,
            bulk,
            last_bulk_key: None,
        }))
    }
}

fn release_gate(inner: &EngineInner, gate: &CursorGate) {
    if !gate.closed.swap(true, AtomicOrdering::AcqRel) {
        if let Some(table) = inner.tables.lock().get_mut(&gate.uri) {
            table.open_cursors = table.open_cursors.saturating_sub(1);
        }
    }
}

impl KvSession for MemSession {
    fn create_table(&self, uri: &str, config: &str) -> Result<()> {
        let mut tables = self.inner.tables.lock();
        if tables.contains_key(uri) {
            return Err(KelpieError::internal(format!("table '{uri}' already exists")));
        }
        tables.insert(
            uri.to_owned(),
            TableData {
                rows: BTreeMap::new(),
                config: config.to_owned(),
                app_metadata: parse_app_metadata(config),
                open_cursors: 0,
            },
        );
        Ok(())
    }

    fn open_cursor(&self, uri: &str) -> Result<Box<dyn KvCursor>> {
        self.open_cursor_inner(uri, false)
    }

    fn open_bulk_cursor(&self, uri: &str) -> Result<Box<dyn KvCursor>> {
        self.open_cursor_inner(uri, true)
    }

    fn close_all_cursors(&self) {
        for gate in self.gates.lock().drain(..) {
            release_gate(&self.inner, &gate);
        }
    }

    fn app_metadata(&self, uri: &str) -> Result<serde_json::Value> {
        let tables = self.inner.tables.lock();
        let table = tables.get(uri).ok_or_else(|| KelpieError::MetadataUnavailable {
            uri: uri.to_owned(),
            detail: "no such table".to_owned(),
        })?;
        Ok(table.app_metadata.clone())
    }

    fn creation_config(&self, uri: &str) -> Result<String> {
        let tables = self.inner.tables.lock();
        let table = tables.get(uri).ok_or_else(|| KelpieError::MetadataUnavailable {
            uri: uri.to_owned(),
            detail: "no such table".to_owned(),
        })?;
        Ok(table.config.clone())
    }

    fn table_size_bytes(&self, uri: &str) -> Result<u64> {
        let tables = self.inner.tables.lock();
        let table = tables.get(uri).ok_or(KelpieError::NotFound)?;
        Ok(table
            .rows
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum())
    }

    fn verify(&self, uri: &str) -> Result<()> {
        let tables = self.inner.tables.lock();
        let table = tables.get(uri).ok_or(KelpieError::NotFound)?;
        if table.open_cursors > 0 {
            // Verification needs exclusive access, same as a bulk open.
            return Err(KelpieError::Busy {
                uri: uri.to_owned(),
            });
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn statistics(&self, uri: &str) -> Result<Vec<(String, i64)>> {
        let tables = self.inner.tables.lock();
        let table = tables.get(uri).ok_or(KelpieError::NotFound)?;
        let bytes: i64 = table
            .rows
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as i64)
            .sum();
        Ok(vec![
            ("entries".to_owned(), table.rows.len() as i64),
            ("bytes".to_owned(), bytes),
        ])
    }
}

/// Extract the `app_metadata=(...)` section of a create-config string
/// into a JSON document. `formatVersion` parses as an integer; `infoObj`
/// parses as embedded JSON.
fn parse_app_metadata(config: &str) -> serde_json::Value {
    let Some(start) = config.find("app_metadata=(") else {
        return serde_json::Value::Null;
    };
    let body_start = start + "app_metadata=(".len();
    let mut depth = 1u32;
    let mut in_string = false;
    let mut prev_escape = false;
    let mut end = None;
    for (i, ch) in config[body_start..].char_indices() {
        if in_string {
            if prev_escape {
                prev_escape = false;
            } else if ch == '\\' {
                prev_escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => {
                if ch == ')' && depth == 1 {
                    end = Some(body_start + i);
                    break;
                }
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
    }
    let Some(end) = end else {
        return serde_json::Value::Null;
    };
    let body = &config[body_start..end];

    let mut doc = serde_json::Map::new();
    if let Some(pos) = body.find("formatVersion=") {
        let rest = &body[pos + "formatVersion=".len()..];
        let digits: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '-')
            .collect();
        if let Ok(v) = digits.parse::<i64>() {
            doc.insert("formatVersion".to_owned(), serde_json::Value::from(v));
        }
    }
    if let Some(pos) = body.find("infoObj=") {
        let raw = &body[pos + "infoObj=".len()..];
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()));
        doc.insert("infoObj".to_owned(), value);
    }
    serde_json::Value::Object(doc)
}

enum Position {
    /// No position held.
    Cleared,
    /// At a row; key and value captured at positioning time.
    At { key: Vec<u8>, value: Vec<u8> },
    /// Stepped past the last row.
    AfterEnd,
    /// Stepped before the first row.
    BeforeStart,
}

struct MemCursor {
    inner: Arc<EngineInner>,
    gate: Arc<CursorGate>,
    position: Position,
    pending_key: Option<Vec<u8>>,
    pending_value: Option<Vec<u8>>,
    bulk: bool,
    last_bulk_key: Option<Vec<u8>>,
}

impl MemCursor {
    fn check_open(&self) -> Result<()> {
        if self.gate.closed.load(AtomicOrdering::Acquire) {
            return Err(KelpieError::internal("cursor used after close"));
        }
        Ok(())
    }

    fn staged_key(&self) -> Result<Vec<u8>> {
        self.pending_key
            .clone()
            .ok_or_else(|| KelpieError::internal("no key staged on cursor"))
    }

    fn with_table<T>(&self, f: impl FnOnce(&mut TableData) -> Result<T>) -> Result<T> {
        let mut tables = self.inner.tables.lock();
        let table = tables.get_mut(&self.gate.uri).ok_or(KelpieError::NotFound)?;
        f(table)
    }
}

impl KvCursor for MemCursor {
    fn set_key(&mut self, key: &[u8]) {
        self.pending_key = Some(key.to_vec());
    }

    fn set_value(&mut self, value: &[u8]) {
        self.pending_value = Some(value.to_vec());
    }

    fn insert(&mut self) -> Result<()> {
        self.check_open()?;
        let key = self.staged_key()?;
        let value = self
            .pending_value
            .clone()
            .ok_or_else(|| KelpieError::internal("no value staged on cursor"))?;
        if self.bulk {
            if let Some(last) = &self.last_bulk_key {
                if key <= *last {
                    return Err(KelpieError::internal(
                        "bulk cursor requires strictly increasing keys",
                    ));
                }
            }
        }
        self.with_table(|table| {
            if table.rows.contains_key(&key) {
                return Err(KelpieError::KeyExists);
            }
            table.rows.insert(key.clone(), value);
            Ok(())
        })?;
        if self.bulk {
            self.last_bulk_key = Some(key);
        }
        self.position = Position::Cleared;
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        self.check_open()?;
        let key = self.staged_key()?;
        let value = self
            .pending_value
            .clone()
            .ok_or_else(|| KelpieError::internal("no value staged on cursor"))?;
        self.with_table(|table| {
            let row = table.rows.get_mut(&key).ok_or(KelpieError::NotFound)?;
            *row = value.clone();
            Ok(())
        })?;
        self.position = Position::At { key, value };
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        self.check_open()?;
        let key = self.staged_key()?;
        self.with_table(|table| {
            table.rows.remove(&key).ok_or(KelpieError::NotFound)?;
            Ok(())
        })?;
        self.position = Position::Cleared;
        Ok(())
    }

    fn search(&mut self) -> Result<()> {
        self.check_open()?;
        let key = self.staged_key()?;
        let value = self.with_table(|table| {
            table.rows.get(&key).cloned().ok_or(KelpieError::NotFound)
        })?;
        self.position = Position::At { key, value };
        Ok(())
    }

    fn search_near(&mut self) -> Result<NearMatch> {
        self.check_open()?;
        let probe = self.staged_key()?;
        let (key, value, near) = self.with_table(|table| {
            if let Some((k, v)) = table.rows.range(probe.clone()..).next() {
                let near = if *k == probe {
                    NearMatch::Exact
                } else {
                    NearMatch::Greater
                };
                return Ok((k.clone(), v.clone(), near));
            }
            if let Some((k, v)) = table.rows.range(..probe.clone()).next_back() {
                return Ok((k.clone(), v.clone(), NearMatch::Less));
            }
            Err(KelpieError::NotFound)
        })?;
        self.position = Position::At { key, value };
        Ok(near)
    }

    fn next(&mut self) -> Result<bool> {
        self.check_open()?;
        let from = match &self.position {
            Position::AfterEnd => return Ok(false),
            Position::At { key, .. } => Some(key.clone()),
            Position::Cleared | Position::BeforeStart => None,
        };
        let found = self.with_table(|table| {
            let mut range = match &from {
                Some(key) => table
                    .rows
                    .range((Bound::Excluded(key.clone()), Bound::Unbounded)),
                None => table.rows.range::<Vec<u8>, _>(..),
            };
            Ok(range.next().map(|(k, v)| (k.clone(), v.clone())))
        })?;
        match found {
            Some((key, value)) => {
                self.position = Position::At { key, value };
                Ok(true)
            }
            None => {
                self.position = Position::AfterEnd;
                Ok(false)
            }
        }
    }

    fn prev(&mut self) -> Result<bool> {
        self.check_open()?;
        let from = match &self.position {
            Position::BeforeStart => return Ok(false),
            Position::At { key, .. } => Some(key.clone()),
            Position::Cleared | Position::AfterEnd => None,
        };
        let found = self.with_table(|table| {
            let mut range = match &from {
                Some(key) => table.rows.range(..key.clone()),
                None => table.rows.range::<Vec<u8>, _>(..),
            };
            Ok(range.next_back().map(|(k, v)| (k.clone(), v.clone())))
        })?;
        match found {
            Some((key, value)) => {
                self.position = Position::At { key, value };
                Ok(true)
            }
            None => {
                self.position = Position::BeforeStart;
                Ok(false)
            }
        }
    }

    fn reset(&mut self) {
        self.position = Position::Cleared;
    }

    fn key(&self) -> Result<Vec<u8>> {
        match &self.position {
            Position::At { key, .. } => Ok(key.clone()),
            _ => Err(KelpieError::internal("cursor not positioned")),
        }
    }

    fn value(&self) -> Result<Vec<u8>> {
        match &self.position {
            Position::At { value, .. } => Ok(value.clone()),
            _ => Err(KelpieError::internal("cursor not positioned")),
        }
    }
}

impl Drop for MemCursor {
    fn drop(&mut self) {
        release_gate(&self.inner, &self.gate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_table() -> (MemEngine, Arc<dyn KvSession>) {
        let engine = MemEngine::new();
        let session = engine.open_session().unwrap();
        session
            .create_table("table:t", "key_format=u,value_format=u")
            .unwrap();
        (engine, session)
    }

    fn put(session: &Arc<dyn KvSession>, key: &[u8], value: &[u8]) {
        let mut c = session.open_cursor("table:t").unwrap();
        c.set_key(key);
        c.set_value(value);
        c.insert().unwrap();
    }

    #[test]
    fn insert_search_and_duplicate_signaling() {
        let (_engine, session) = engine_with_table();
        put(&session, b"a", b"1");

        let mut c = session.open_cursor("table:t").unwrap();
        c.set_key(b"a");
        c.set_value(b"2");
        assert!(matches!(c.insert(), Err(KelpieError::KeyExists)));

        c.set_key(b"a");
        c.search().unwrap();
        assert_eq!(c.value().unwrap(), b"1");

        c.set_key(b"missing");
        assert!(matches!(c.search(), Err(KelpieError::NotFound)));
    }

    #[test]
    fn search_near_reports_landing_side() {
        let (_engine, session) = engine_with_table();
        put(&session, b"b", b"1");
        put(&session, b"d", b"2");

        let mut c = session.open_cursor("table:t").unwrap();
        c.set_key(b"b");
        assert_eq!(c.search_near().unwrap(), NearMatch::Exact);
        c.set_key(b"c");
        assert_eq!(c.search_near().unwrap(), NearMatch::Greater);
        assert_eq!(c.key().unwrap(), b"d");
        c.set_key(b"e");
        assert_eq!(c.search_near().unwrap(), NearMatch::Less);
        assert_eq!(c.key().unwrap(), b"b");
    }

    #[test]
    fn search_near_on_empty_table_is_not_found() {
        let (_engine, session) = engine_with_table();
        let mut c = session.open_cursor("table:t").unwrap();
        c.set_key(b"x");
        assert!(matches!(c.search_near(), Err(KelpieError::NotFound)));
    }

    #[test]
    fn traversal_both_directions() {
        let (_engine, session) = engine_with_table();
        for k in [b"c", b"a", b"b"] {
            put(&session, k, b"v");
        }
        let mut c = session.open_cursor("table:t").unwrap();
        let mut seen = Vec::new();
        while c.next().unwrap() {
            seen.push(c.key().unwrap());
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(!c.next().unwrap()); // stays at end

        let mut back = session.open_cursor("table:t").unwrap();
        let mut rev = Vec::new();
        while back.prev().unwrap() {
            rev.push(back.key().unwrap());
        }
        assert_eq!(rev, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        assert!(!back.prev().unwrap());
    }

    #[test]
    fn update_and_remove_signal_not_found() {
        let (_engine, session) = engine_with_table();
        let mut c = session.open_cursor("table:t").unwrap();
        c.set_key(b"nope");
        c.set_value(b"v");
        assert!(matches!(c.update(), Err(KelpieError::NotFound)));
        c.set_key(b"nope");
        assert!(matches!(c.remove(), Err(KelpieError::NotFound)));

        put(&session, b"k", b"v1");
        c.set_key(b"k");
        c.set_value(b"v2");
        c.update().unwrap();
        assert_eq!(c.value().unwrap(), b"v2");
        c.set_key(b"k");
        c.remove().unwrap();
        c.set_key(b"k");
        assert!(matches!(c.search(), Err(KelpieError::NotFound)));
    }

    #[test]
    fn bulk_open_is_busy_while_cursors_live() {
        let (_engine, session) = engine_with_table();
        let held = session.open_cursor("table:t").unwrap();
        assert!(matches!(
            session.open_bulk_cursor("table:t"),
            Err(KelpieError::Busy { .. })
        ));
        drop(held);
        assert!(session.open_bulk_cursor("table:t").is_ok());
    }

    #[test]
    fn close_all_cursors_unblocks_bulk_open() {
        let (_engine, session) = engine_with_table();
        let mut held = session.open_cursor("table:t").unwrap();
        session.close_all_cursors();
        assert!(session.open_bulk_cursor("table:t").is_ok());
        // The stale handle errors instead of touching the table.
        held.set_key(b"a");
        assert!(held.search().is_err());
    }

    #[test]
    fn bulk_cursor_enforces_increasing_keys() {
        let (_engine, session) = engine_with_table();
        let mut bulk = session.open_bulk_cursor("table:t").unwrap();
        bulk.set_key(b"a");
        bulk.set_value(b"1");
        bulk.insert().unwrap();
        bulk.set_key(b"c");
        bulk.set_value(b"2");
        bulk.insert().unwrap();
        bulk.set_key(b"b");
        bulk.set_value(b"3");
        assert!(bulk.insert().is_err());
    }

    #[test]
    fn verify_is_busy_with_open_cursors_and_ok_after() {
        let (_engine, session) = engine_with_table();
        let held = session.open_cursor("table:t").unwrap();
        assert!(matches!(
            session.verify("table:t"),
            Err(KelpieError::Busy { .. })
        ));
        drop(held);
        session.verify("table:t").unwrap();
    }

    #[test]
    fn app_metadata_round_trips_through_config() {
        let engine = MemEngine::new();
        let session = engine.open_session().unwrap();
        session
            .create_table(
                "table:meta",
                "type=file,key_format=u,value_format=u,\
                 app_metadata=(formatVersion=6,infoObj={\"name\":\"x_1\",\"ns\":\"db.c\"}),",
            )
            .unwrap();
        let meta = session.app_metadata("table:meta").unwrap();
        assert_eq!(meta["formatVersion"], 6);
        assert_eq!(meta["infoObj"]["name"], "x_1");
    }

    #[test]
    fn statistics_and_size_follow_contents() {
        let (_engine, session) = engine_with_table();
        put(&session, b"abc", b"de");
        assert_eq!(session.table_size_bytes("table:t").unwrap(), 5);
        let stats = session.statistics("table:t").unwrap();
        assert!(stats.contains(&("entries".to_owned(), 1)));
    }
}
