pub mod resolver;

use crate::error::ResolveError;
use crate::models::PollRecord;
use resolver::IdResolver;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn changed(self) -> bool {
        self != UpsertOutcome::Unchanged
    }
}

#[derive(Debug)]
struct Entry {
    // Insertion sequence, breaks timestamp ties in display order
    seq: u64,
    record: PollRecord,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// Canonical in-memory mapping of poll id to poll record.
#[derive(Debug, Default)]
pub struct PollStore {
    inner: RwLock<Inner>,
}

impl PollStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Records are replaced whole, so a poisoned lock still guards consistent data
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // Get a copy of one poll
    pub fn get(&self, id: &str) -> Option<PollRecord> {
        self.read().entries.get(id).map(|entry| entry.record.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().entries.keys().cloned().collect()
    }

    // Create or update the record for `id`. `merge` receives the current record
    // (if any) and returns the full replacement; the write lock is held throughout
    pub fn upsert<F>(&self, id: &str, merge: F) -> UpsertOutcome
    where
        F: FnOnce(Option<&PollRecord>) -> PollRecord,
    {
        let mut inner = self.write();

        if let Some(entry) = inner.entries.get_mut(id) {
            let merged = merge(Some(&entry.record));
            if merged == entry.record {
                return UpsertOutcome::Unchanged;
            }
            entry.record = merged;
            return UpsertOutcome::Updated;
        }

        let record = merge(None);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(id.to_string(), Entry { seq, record });
        UpsertOutcome::Inserted
    }

    // Discard everything and install `records`. Iteration order becomes insertion order.
    pub fn replace_all<I>(&self, records: I)
    where
        I: IntoIterator<Item = PollRecord>,
    {
        let mut fresh = Inner::default();
        for record in records {
            let seq = fresh.next_seq;
            fresh.next_seq += 1;
            // A repeated id keeps its first position but takes the later contents
            match fresh.entries.get_mut(&record.id) {
                Some(entry) => entry.record = record,
                None => {
                    fresh.entries.insert(record.id.clone(), Entry { seq, record });
                }
            }
        }
        *self.write() = fresh;
    }

    // Point-in-time copy, newest first. Equal timestamps keep insertion order.
    pub fn snapshot(&self) -> Vec<(String, PollRecord)> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.sort_by_key(|entry| Reverse(entry.record.timestamp));
        entries
            .into_iter()
            .map(|entry| (entry.record.id.clone(), entry.record.clone()))
            .collect()
    }

    pub fn clear(&self) {
        *self.write() = Inner::default();
    }
}

#[derive(Clone)]
pub struct PollReader {
    store: Arc<PollStore>,
    suffix_len: usize,
}

impl PollReader {
    pub fn new(store: Arc<PollStore>, suffix_len: usize) -> Self {
        Self { store, suffix_len }
    }

    pub fn get(&self, id: &str) -> Option<PollRecord> {
        self.store.get(id)
    }

    pub fn snapshot(&self) -> Vec<(String, PollRecord)> {
        self.store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn resolve(&self, suffix: &str) -> Result<String, ResolveError> {
        IdResolver::new(&self.store).resolve(suffix)
    }

    pub fn resolve_label(&self, label: &str) -> Result<String, ResolveError> {
        IdResolver::new(&self.store).resolve_label(label)
    }

    pub fn label(&self, record: &PollRecord) -> String {
        resolver::display_label(record, self.suffix_len)
    }

    // Display-ordered list labels, as a list view would show them
    pub fn labels(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|(_, record)| self.label(record))
            .collect()
    }
}
