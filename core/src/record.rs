//! Layered property records.
//!
//! A `Record` is one object's recorded properties at one point in history.
//! Its own slots shadow those of its base record; anything it does not
//! name falls through to the base. Records are immutable once built and
//! are shared between snapshots through `Rc`.

use crate::{types::SnapshotId, value::Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;

/// What one layer asserts about one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "slot", content = "value", rename_all = "snake_case")]
pub enum Slot {
    Value(Value),
    /// The property existed below this layer and is deleted here.
    Tombstone,
}

impl Slot {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Slot::Value(v) => Some(v),
            Slot::Tombstone => None,
        }
    }
}

#[derive(Debug)]
pub struct Record {
    owner: SnapshotId,
    name:  String,
    own:   IndexMap<String, Slot>,
    base:  Option<Rc<Record>>,
}

impl Record {
    pub(crate) fn from_parts(
        owner: SnapshotId,
        name: String,
        own: IndexMap<String, Slot>,
        base: Option<Rc<Record>>,
    ) -> Self {
        Self { owner, name, own, base }
    }

    /// The snapshot that produced this layer.
    pub fn owner(&self) -> SnapshotId {
        self.owner
    }

    /// Hierarchical path, for logs only.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&Rc<Record>> {
        self.base.as_ref()
    }

    pub fn own_slots(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.own.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn own_len(&self) -> usize {
        self.own.len()
    }

    pub fn has_own(&self, prop: &str) -> bool {
        self.own.contains_key(prop)
    }

    /// This record followed by every base below it.
    pub fn layers(&self) -> impl Iterator<Item = &Record> {
        std::iter::successors(Some(self), |r| r.base.as_deref())
    }

    pub fn depth(&self) -> usize {
        self.layers().count()
    }

    /// The slot from the nearest layer that names `prop`.
    /// `Some(Slot::Tombstone)` means deleted, `None` means never defined.
    pub fn lookup(&self, prop: &str) -> Option<&Slot> {
        self.layers().find_map(|layer| layer.own.get(prop))
    }

    pub fn get(&self, prop: &str) -> Option<&Value> {
        self.lookup(prop).and_then(Slot::value)
    }

    /// Every visible property, merged bottom-up through the chain.
    pub fn entries(&self) -> IndexMap<String, Value> {
        let layers: Vec<&Record> = self.layers().collect();
        let mut out = IndexMap::new();
        for layer in layers.into_iter().rev() {
            for (key, slot) in &layer.own {
                match slot {
                    Slot::Value(v) => {
                        out.insert(key.clone(), v.clone());
                    }
                    Slot::Tombstone => {
                        out.shift_remove(key);
                    }
                }
            }
        }
        out
    }
}

/// Builder for a record that asserts every property it is given.
pub struct Recorder {
    owner: SnapshotId,
    name:  String,
    own:   IndexMap<String, Slot>,
    base:  Option<Rc<Record>>,
}

impl Recorder {
    pub fn new(owner: SnapshotId, name: impl Into<String>, base: Option<Rc<Record>>) -> Self {
        Self {
            owner,
            name: name.into(),
            own: IndexMap::new(),
            base,
        }
    }

    pub fn set(&mut self, prop: &str, value: Value) {
        self.own.insert(prop.to_string(), Slot::Value(value));
    }

    pub fn delete(&mut self, prop: &str) {
        self.own.insert(prop.to_string(), Slot::Tombstone);
    }

    pub fn write(&mut self, prop: &str, slot: Slot) {
        self.own.insert(prop.to_string(), slot);
    }

    /// True iff this layer itself names `prop`.
    pub fn has(&self, prop: &str) -> bool {
        self.own.contains_key(prop)
    }

    pub fn finalize(self) -> Record {
        Record::from_parts(self.owner, self.name, self.own, self.base)
    }
}

/// Builder for a record that only keeps what differs from its base.
pub struct DeltaRecorder {
    inner:         Recorder,
    visited:       HashSet<String>,
    shorten_chain: bool,
}

impl DeltaRecorder {
    pub fn new(
        owner: SnapshotId,
        name: impl Into<String>,
        base: Option<Rc<Record>>,
        shorten_chain: bool,
    ) -> Self {
        Self {
            inner: Recorder::new(owner, name, base),
            visited: HashSet::new(),
            shorten_chain,
        }
    }

    fn base_value(&self, prop: &str) -> Option<&Value> {
        self.inner.base.as_deref().and_then(|b| b.get(prop))
    }

    pub fn set(&mut self, prop: &str, value: Value) {
        self.visited.insert(prop.to_string());
        if self.base_value(prop) == Some(&value) {
            self.inner.own.shift_remove(prop);
        } else {
            self.inner.set(prop, value);
        }
    }

    pub fn delete(&mut self, prop: &str) {
        self.visited.insert(prop.to_string());
        if self.base_value(prop).is_some() {
            self.inner.delete(prop);
        } else {
            self.inner.own.shift_remove(prop);
        }
    }

    pub fn has(&self, prop: &str) -> bool {
        self.inner.has(prop)
    }

    pub fn has_changes(&self) -> bool {
        !self.inner.own.is_empty()
    }

    /// Tombstones every base property this pass never wrote, then returns
    /// the record, or `None` when nothing differs from the base.
    pub fn finalize(mut self) -> Option<Record> {
        if let Some(base) = self.inner.base.clone() {
            for key in base.entries().into_keys() {
                if !self.visited.contains(&key) {
                    self.inner.delete(&key);
                }
            }
        }
        if !self.has_changes() {
            return None;
        }
        if self.shorten_chain {
            let base = self.inner.base.take();
            self.inner.base = nearest_contributing(&self.inner.own, base);
        }
        Some(self.inner.finalize())
    }
}

/// Walk down from `base` to the first layer that names a key not already
/// shadowed by `own` or by the layers skipped so far.
fn nearest_contributing(
    own: &IndexMap<String, Slot>,
    base: Option<Rc<Record>>,
) -> Option<Rc<Record>> {
    let mut shadowed: HashSet<String> = own.keys().cloned().collect();
    let mut current = base;
    while let Some(layer) = current {
        if layer.own.keys().any(|k| !shadowed.contains(k)) {
            return Some(layer);
        }
        shadowed.extend(layer.own.keys().cloned());
        current = layer.base.clone();
    }
    None
}
