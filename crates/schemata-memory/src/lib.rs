//! In-process persistence collaborator for Schemata.
//!
//! `MemoryStore` keeps every collection as a vector of records behind a
//! mutex. A transaction reads and writes a snapshot taken at `begin` and
//! logs its writes; commit replays the log onto the committed tables,
//! rollback drops both. Overlapping transactions therefore never lose each
//! other's commits, but updates and deletes are re-evaluated against the
//! committed state at commit time. Ids come from the committed tables, so
//! they stay unique across transactions (a rollback leaves a gap).
//!
//! The store counts reads and writes so tests can assert that a layer above
//! it (the cache plugin, for instance) did or did not reach persistence.

use std::collections::BTreeMap;
use std::future::ready;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use asupersync::{Cx, Outcome};
use schemata_core::{
    BoxOutcome, Error, Filter, FindOptions, ID_FIELD, Record, Store, Transaction, Value,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    collections: BTreeMap<String, Vec<Record>>,
    next_id: BTreeMap<String, i64>,
}

impl Tables {
    fn find_many(&self, collection: &str, options: &FindOptions) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .collections
            .get(collection)
            .map(|rows| rows.iter().filter(|r| options.matches(r)).cloned().collect())
            .unwrap_or_default();
        options.apply_window(&mut rows);
        rows
    }

    fn count(&self, collection: &str, filter: Option<&Filter>) -> u64 {
        self.collections.get(collection).map_or(0, |rows| {
            rows.iter()
                .filter(|r| filter.is_none_or(|f| f.matches(r)))
                .count() as u64
        })
    }

    fn insert(&mut self, collection: &str, mut record: Record) -> Record {
        self.assign_id(collection, &mut record);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    /// Give `record` the next id unless it has one, keeping the sequence
    /// ahead of explicit integer ids.
    fn assign_id(&mut self, collection: &str, record: &mut Record) {
        let next = self.next_id.entry(collection.to_string()).or_insert(1);
        match record.get(ID_FIELD).and_then(Value::as_i64) {
            Some(id) => {
                if id >= *next {
                    *next = id + 1;
                }
            }
            None if record.get(ID_FIELD).is_none_or(Value::is_null) => {
                record.insert(ID_FIELD.to_string(), Value::from(*next));
                *next += 1;
            }
            None => {}
        }
    }

    fn apply(&mut self, write: &Write) {
        match write {
            Write::Insert { collection, record } => {
                self.insert(collection, record.clone());
            }
            Write::Update {
                collection,
                filter,
                patch,
            } => {
                self.update(collection, filter, patch);
            }
            Write::Delete { collection, filter } => {
                self.delete(collection, filter);
            }
        }
    }

    fn update(&mut self, collection: &str, filter: &Filter, patch: &Record) -> Vec<Record> {
        let mut updated = Vec::new();
        if let Some(rows) = self.collections.get_mut(collection) {
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                for (k, v) in patch {
                    if k != ID_FIELD {
                        row.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        updated
    }

    fn delete(&mut self, collection: &str, filter: &Filter) -> Vec<Record> {
        let Some(rows) = self.collections.get_mut(collection) else {
            return Vec::new();
        };
        let (removed, kept): (Vec<Record>, Vec<Record>) =
            rows.drain(..).partition(|r| filter.matches(r));
        *rows = kept;
        removed
    }
}

/// A logged transaction write, replayed at commit.
#[derive(Debug, Clone)]
enum Write {
    Insert { collection: String, record: Record },
    Update {
        collection: String,
        filter: Filter,
        patch: Record,
    },
    Delete { collection: String, filter: Filter },
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    counters: Counters,
}

impl Shared {
    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tables)
    }
}

/// In-memory `Store`.
///
/// Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records directly, bypassing any pipeline.
    pub fn seed(&self, collection: &str, records: Vec<Record>) {
        self.shared.with_tables(|tables| {
            for record in records {
                tables.insert(collection, record);
            }
        });
    }

    /// Every committed record of `collection`, in insertion order.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.shared.with_tables(|tables| {
            tables
                .collections
                .get(collection)
                .cloned()
                .unwrap_or_default()
        })
    }

    /// Collections holding at least one committed record.
    pub fn collections(&self) -> Vec<String> {
        self.shared.with_tables(|tables| {
            tables
                .collections
                .iter()
                .filter(|(_, rows)| !rows.is_empty())
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    /// Number of `find_many`/`count` calls received, in or out of transactions.
    pub fn read_calls(&self) -> usize {
        self.shared.counters.reads.load(Ordering::SeqCst)
    }

    /// Number of `insert`/`update`/`delete` calls received.
    pub fn write_calls(&self) -> usize {
        self.shared.counters.writes.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.counters.rollbacks.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        let c = &self.shared.counters;
        for counter in [&c.reads, &c.writes, &c.begins, &c.commits, &c.rollbacks] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn begin<'a>(&'a self, _cx: &'a Cx) -> BoxOutcome<'a, Arc<dyn Transaction>> {
        self.shared.counters.begins.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.shared.with_tables(|tables| tables.clone());
        tracing::debug!(store = "memory", "Beginning transaction");
        let tx: Arc<dyn Transaction> = Arc::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            working: Mutex::new(Some(Working {
                tables: snapshot,
                log: Vec::new(),
            })),
        });
        Box::pin(ready(Outcome::Ok(tx)))
    }

    fn find_many<'a>(
        &'a self,
        _cx: &'a Cx,
        collection: &'a str,
        options: &'a FindOptions,
    ) -> BoxOutcome<'a, Vec<Record>> {
        self.shared.counters.reads.fetch_add(1, Ordering::SeqCst);
        let rows = self
            .shared
            .with_tables(|tables| tables.find_many(collection, options));
        Box::pin(ready(Outcome::Ok(rows)))
    }

    fn count<'a>(
        &'a self,
        _cx: &'a Cx,
        collection: &'a str,
        filter: Option<&'a Filter>,
    ) -> BoxOutcome<'a, u64> {
        self.shared.counters.reads.fetch_add(1, Ordering::SeqCst);
        let n = self
            .shared
            .with_tables(|tables| tables.count(collection, filter));
        Box::pin(ready(Outcome::Ok(n)))
    }
}

struct Working {
    tables: Tables,
    log: Vec<Write>,
}

/// Snapshot transaction over a [`MemoryStore`].
struct MemoryTransaction {
    shared: Arc<Shared>,
    working: Mutex<Option<Working>>,
}

impl MemoryTransaction {
    /// Run `f` against the working snapshot; fails once the transaction
    /// has been committed or rolled back.
    fn with_working<T>(&self, f: impl FnOnce(&mut Working) -> T) -> Outcome<T, Error> {
        let mut working = self.working.lock().unwrap_or_else(PoisonError::into_inner);
        match working.as_mut() {
            Some(working) => Outcome::Ok(f(working)),
            None => Outcome::Err(Error::Persistence("transaction is closed".to_string())),
        }
    }

    /// Apply `write` to the snapshot and log it for commit.
    fn write<T>(&self, write: Write, f: impl FnOnce(&mut Tables) -> T) -> Outcome<T, Error> {
        self.with_working(|working| {
            let out = f(&mut working.tables);
            working.log.push(write);
            out
        })
    }

    fn take(&self) -> Option<Working> {
        self.working
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Transaction for MemoryTransaction {
    fn find_many<'a>(
        &'a self,
        _cx: &'a Cx,
        collection: &'a str,
        options: &'a FindOptions,
    ) -> BoxOutcome<'a, Vec<Record>> {
        self.shared.counters.reads.fetch_add(1, Ordering::SeqCst);
        Box::pin(ready(
            self.with_working(|working| working.tables.find_many(collection, options)),
        ))
    }

    fn count<'a>(
        &'a self,
        _cx: &'a Cx,
        collection: &'a str,
        filter: Option<&'a Filter>,
    ) -> BoxOutcome<'a, u64> {
        self.shared.counters.reads.fetch_add(1, Ordering::SeqCst);
        Box::pin(ready(
            self.with_working(|working| working.tables.count(collection, filter)),
        ))
    }

    fn insert<'a>(
        &'a self,
        _cx: &'a Cx,
        collection: &'a str,
        mut record: Record,
    ) -> BoxOutcome<'a, Record> {
        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.shared
            .with_tables(|committed| committed.assign_id(collection, &mut record));
        let write = Write::Insert {
            collection: collection.to_string(),
            record: record.clone(),
        };
        Box::pin(ready(
            self.write(write, |tables| tables.insert(collection, record)),
        ))
    }

    fn update<'a>(
        &'a self,
        _cx: &'a Cx,
        collection: &'a str,
        filter: &'a Filter,
        patch: Record,
    ) -> BoxOutcome<'a, Vec<Record>> {
        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        let write = Write::Update {
            collection: collection.to_string(),
            filter: filter.clone(),
            patch: patch.clone(),
        };
        Box::pin(ready(
            self.write(write, |tables| tables.update(collection, filter, &patch)),
        ))
    }

    fn delete<'a>(
        &'a self,
        _cx: &'a Cx,
        collection: &'a str,
        filter: &'a Filter,
    ) -> BoxOutcome<'a, Vec<Record>> {
        self.shared.counters.writes.fetch_add(1, Ordering::SeqCst);
        let write = Write::Delete {
            collection: collection.to_string(),
            filter: filter.clone(),
        };
        Box::pin(ready(
            self.write(write, |tables| tables.delete(collection, filter)),
        ))
    }

    fn commit<'a>(&'a self, _cx: &'a Cx) -> BoxOutcome<'a, ()> {
        let outcome = match self.take() {
            Some(working) => {
                self.shared.with_tables(|committed| {
                    for write in &working.log {
                        committed.apply(write);
                    }
                });
                self.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(store = "memory", "Committed transaction");
                Outcome::Ok(())
            }
            None => Outcome::Err(Error::Persistence("transaction is closed".to_string())),
        };
        Box::pin(ready(outcome))
    }

    fn rollback<'a>(&'a self, _cx: &'a Cx) -> BoxOutcome<'a, ()> {
        if self.take().is_some() {
            self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(store = "memory", "Rolled back transaction");
        }
        Box::pin(ready(Outcome::Ok(())))
    }
}
