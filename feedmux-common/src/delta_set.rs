//! Identity-keyed record sets
//!
//! A [`DeltaSet`] maps record identity to a shared [`Record`]. All set
//! algebra is O(|A| + |B|) using the hash index on identity.
//!
//! Adding a record whose identity is already present replaces the old one:
//! the newer version always wins. This also resolves duplicate identities
//! inside one fetched batch (last write wins).

use crate::record::{ItemRef, Record};
use std::collections::HashMap;
use std::sync::Arc;

/// Unordered collection of records keyed by identity
#[derive(Debug, Clone, Default)]
pub struct DeltaSet {
    items: HashMap<String, Arc<Record>>,
}

/// Result of diffing a published set against a freshly fetched one
#[derive(Debug, Clone, Default)]
pub struct SetDiff {
    /// Published identities absent from the fresh set
    pub removed: Vec<ItemRef>,
    /// Fresh identities absent from the published set
    pub added: Vec<Arc<Record>>,
    /// Identities in both whose property map differs (fresh value)
    pub changed: Vec<Arc<Record>>,
}

impl SetDiff {
    /// True when there is nothing to notify
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.changed.is_empty()
    }
}

impl DeltaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from records, later duplicates replacing earlier ones
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Arc<Record>>,
    {
        let mut set = Self::new();
        for record in records {
            set.put(record);
        }
        set
    }

    /// Insert or replace by identity, returning the replaced record
    pub fn put(&mut self, record: Arc<Record>) -> Option<Arc<Record>> {
        self.items.insert(record.identity().to_string(), record)
    }

    /// Look up by identity
    pub fn get(&self, identity: &str) -> Option<&Arc<Record>> {
        self.items.get(identity)
    }

    /// Remove by identity, handing the record back to the caller
    pub fn take(&mut self, identity: &str) -> Option<Arc<Record>> {
        self.items.remove(identity)
    }

    /// Remove by identity; returns whether it was present
    pub fn remove(&mut self, identity: &str) -> bool {
        self.items.remove(identity).is_some()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.items.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every record in place
    pub fn empty(&mut self) {
        self.items.clear();
    }

    /// Add every record of `from`, replacing on identity conflict
    pub fn extend_from(&mut self, from: &DeltaSet) {
        for record in from.items.values() {
            self.put(Arc::clone(record));
        }
    }

    /// Remove every identity present in `from`
    pub fn remove_from(&mut self, from: &DeltaSet) {
        for identity in from.items.keys() {
            self.items.remove(identity);
        }
    }

    /// Keep only the records matching `keep`; returns how many were removed
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Record) -> bool,
    {
        let before = self.items.len();
        self.items.retain(|_, record| keep(record));
        before - self.items.len()
    }

    /// New set with the records matching `pred`
    pub fn filter<F>(&self, mut pred: F) -> DeltaSet
    where
        F: FnMut(&Record) -> bool,
    {
        DeltaSet {
            items: self
                .items
                .iter()
                .filter(|(_, record)| pred(record))
                .map(|(id, record)| (id.clone(), Arc::clone(record)))
                .collect(),
        }
    }

    /// Identity-wise merge; on conflict the record from `b` wins
    pub fn union(a: &DeltaSet, b: &DeltaSet) -> DeltaSet {
        let mut set = a.clone();
        set.extend_from(b);
        set
    }

    /// Records of `a` whose identity is absent from `b`
    pub fn difference(a: &DeltaSet, b: &DeltaSet) -> DeltaSet {
        a.filter(|record| !b.contains(record.identity()))
    }

    /// Classify `fresh` against `published`
    ///
    /// An identity in both sets is reported as changed only when its property
    /// map differs; identical records appear in none of the three batches.
    pub fn diff(published: &DeltaSet, fresh: &DeltaSet) -> SetDiff {
        let removed = published
            .items
            .values()
            .filter(|record| !fresh.contains(record.identity()))
            .map(|record| record.item_ref())
            .collect();

        let mut added = Vec::new();
        let mut changed = Vec::new();
        for record in fresh.items.values() {
            match published.get(record.identity()) {
                None => added.push(Arc::clone(record)),
                Some(old) if !old.same_content(record) => changed.push(Arc::clone(record)),
                Some(_) => {}
            }
        }

        SetDiff {
            removed,
            added,
            changed,
        }
    }

    /// Snapshot of the records (unordered)
    pub fn as_list(&self) -> Vec<Arc<Record>> {
        self.items.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.items.values()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }
}
