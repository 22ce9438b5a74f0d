//! Snapshots of the live object graph.
//!
//! A full snapshot holds a complete record for every reachable object.
//! A delta snapshot holds records for changed objects only; lookups for
//! anything else fall through to its delta base. The nominal base is the
//! snapshot the delta was recorded against and never changes, while the
//! delta base may be shortened past layers this delta fully shadows.

use crate::{
    config::EngineConfig,
    record::{DeltaRecorder, Record, Recorder, Slot},
    snapshotable::Snapshotable,
    types::{ObjectId, SnapshotId, SnapshotTag},
    value::Value,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Root registry: stable key to long-lived root object.
pub type Roots = IndexMap<String, ObjectId>;

/// Heuristic cost per own property and per record.
const BYTES_PER_PROPERTY: usize = 16;
const BYTES_PER_RECORD: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Full,
    Delta,
}

pub(crate) struct DeltaBases {
    pub(crate) delta_base:   Rc<Snapshot>,
    pub(crate) nominal_base: Rc<Snapshot>,
}

pub struct Snapshot {
    id:            SnapshotId,
    tag:           SnapshotTag,
    name:          String,
    records:       IndexMap<ObjectId, Rc<Record>>,
    delta:         Option<DeltaBases>,
    size_estimate: usize,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("records", &self.records.len())
            .field("nominal_base", &self.nominal_base().map(|b| b.id))
            .field("delta_base", &self.delta_base().map(|b| b.id))
            .finish()
    }
}

/// Mutable phase of a snapshot. Nothing outside the crate ever sees a
/// snapshot before `build`/`finalize` freezes it.
pub(crate) struct SnapshotBuilder {
    id:      SnapshotId,
    tag:     SnapshotTag,
    name:    String,
    records: IndexMap<ObjectId, Rc<Record>>,
    delta:   Option<DeltaBases>,
}

impl SnapshotBuilder {
    pub(crate) fn full(name: &str) -> Self {
        Self {
            id:      SnapshotId::next(),
            tag:     SnapshotTag::new_v4(),
            name:    name.to_string(),
            records: IndexMap::new(),
            delta:   None,
        }
    }

    pub(crate) fn delta(name: &str, delta_base: Rc<Snapshot>, nominal_base: Rc<Snapshot>) -> Self {
        Self {
            delta: Some(DeltaBases { delta_base, nominal_base }),
            ..Self::full(name)
        }
    }

    /// Keep an identity assigned elsewhere, used when importing.
    pub(crate) fn with_identity(mut self, id: SnapshotId, tag: SnapshotTag) -> Self {
        self.id = id;
        self.tag = tag;
        self
    }

    pub(crate) fn id(&self) -> SnapshotId {
        self.id
    }

    pub(crate) fn insert(&mut self, object: ObjectId, record: Record) {
        self.records.insert(object, Rc::new(record));
    }

    /// Freeze, eliding the snapshot entirely when it recorded nothing.
    pub(crate) fn finalize(self, shorten: bool) -> Option<Rc<Snapshot>> {
        if self.records.is_empty() {
            return None;
        }
        Some(self.build(shorten))
    }

    pub(crate) fn build(self, shorten: bool) -> Rc<Snapshot> {
        let size_estimate = self
            .records
            .values()
            .map(|r| r.own_len() * BYTES_PER_PROPERTY + BYTES_PER_RECORD)
            .sum();

        let delta = self.delta.map(|bases| {
            let mut delta_base = bases.delta_base;
            // A base whose own objects are all re-recorded here adds
            // nothing to lookups; its own delta base answers the rest.
            while shorten {
                let next = match &delta_base.delta {
                    Some(inner)
                        if delta_base
                            .records
                            .keys()
                            .all(|o| self.records.contains_key(o)) =>
                    {
                        inner.delta_base.clone()
                    }
                    _ => break,
                };
                delta_base = next;
            }
            DeltaBases { delta_base, nominal_base: bases.nominal_base }
        });

        Rc::new(Snapshot {
            id: self.id,
            tag: self.tag,
            name: self.name,
            records: self.records,
            delta,
            size_estimate,
        })
    }
}

/// Where a recording pass reads property values from.
trait PropertySource {
    fn entries(&self, id: ObjectId) -> Option<Vec<(String, Value)>>;
}

struct Live<'a, G: ?Sized>(&'a G);

impl<G: Snapshotable + ?Sized> PropertySource for Live<'_, G> {
    fn entries(&self, id: ObjectId) -> Option<Vec<(String, Value)>> {
        self.0.entries(id)
    }
}

impl PropertySource for Snapshot {
    fn entries(&self, id: ObjectId) -> Option<Vec<(String, Value)>> {
        self.record(id)
            .map(|record| record.entries().into_iter().collect())
    }
}

enum AnyRecorder {
    Full(Recorder),
    Delta(DeltaRecorder),
}

impl AnyRecorder {
    fn set(&mut self, prop: &str, value: Value) {
        match self {
            AnyRecorder::Full(r) => r.set(prop, value),
            AnyRecorder::Delta(r) => r.set(prop, value),
        }
    }

    fn finalize(self) -> Option<Record> {
        match self {
            AnyRecorder::Full(r) => Some(r.finalize()),
            AnyRecorder::Delta(r) => r.finalize(),
        }
    }
}

/// Debug names longer than this restart from the object's handle.
const MAX_PATH_LEN: usize = 160;

fn child_path(parent: &str, prop: &str, child: ObjectId) -> String {
    if parent.len() + prop.len() < MAX_PATH_LEN {
        format!("{parent}.{prop}")
    } else {
        format!("{child}")
    }
}

/// An object whose properties are still being walked.
struct Frame {
    id:       ObjectId,
    path:     String,
    recorder: AnyRecorder,
    entries:  std::vec::IntoIter<(String, Value)>,
}

/// One depth-first recording pass. Frames live on an explicit stack, so
/// graph depth is bounded by memory rather than the thread stack.
struct Walk<'a> {
    source:  &'a dyn PropertySource,
    base:    Option<&'a Rc<Snapshot>>,
    config:  &'a EngineConfig,
    builder: SnapshotBuilder,
    seen:    HashSet<ObjectId>,
}

impl Walk<'_> {
    /// Children finalize before their parent, so records are inserted
    /// in post-order.
    fn visit(&mut self, root: ObjectId, key: &str) {
        let mut frames: Vec<Frame> = self.enter(root, key.to_string()).into_iter().collect();

        while let Some(frame) = frames.last_mut() {
            match frame.entries.next() {
                Some((prop, value)) => {
                    let child = value.as_object();
                    frame.recorder.set(&prop, value);
                    if let Some(child) = child {
                        let path = child_path(&frame.path, &prop, child);
                        if let Some(next) = self.enter(child, path) {
                            frames.push(next);
                        }
                    }
                }
                None => {
                    let Some(done) = frames.pop() else { break };
                    if let Some(record) = done.recorder.finalize() {
                        self.builder.insert(done.id, record);
                    }
                }
            }
        }
    }

    fn enter(&mut self, id: ObjectId, path: String) -> Option<Frame> {
        if !self.seen.insert(id) {
            if self.config.warn_on_revisit {
                log::warn!("[{}] walk: {path} revisits {id}, skipped", self.config.context);
            } else {
                log::debug!("[{}] walk: {path} revisits {id}, skipped", self.config.context);
            }
            return None;
        }
        let Some(entries) = self.source.entries(id) else {
            log::debug!("[{}] walk: {path} -> {id} is not a live object", self.config.context);
            return None;
        };

        let owner = self.builder.id();
        let recorder = match self.base {
            None => AnyRecorder::Full(Recorder::new(owner, path.as_str(), None)),
            Some(base) => AnyRecorder::Delta(DeltaRecorder::new(
                owner,
                path.as_str(),
                base.record(id).cloned(),
                self.config.shorten_delta_chains,
            )),
        };
        Some(Frame { id, path, recorder, entries: entries.into_iter() })
    }
}

impl Snapshot {
    /// Walk the live graph from `roots`. With a base this records a delta
    /// against it; without one, a full snapshot. Returns `None` when
    /// nothing was recorded.
    pub fn record_data<G: Snapshotable + ?Sized>(
        graph: &G,
        roots: &Roots,
        base: Option<&Rc<Snapshot>>,
        name: &str,
        config: &EngineConfig,
    ) -> Option<Rc<Snapshot>> {
        Self::walk(&Live(graph), roots, base, name, config)
    }

    /// Same walk as `record_data`, reading values out of `source`
    /// instead of the live graph.
    pub fn record_from_snapshot(
        source: &Snapshot,
        roots: &Roots,
        base: Option<&Rc<Snapshot>>,
        name: &str,
        config: &EngineConfig,
    ) -> Option<Rc<Snapshot>> {
        Self::walk(source, roots, base, name, config)
    }

    fn walk(
        source: &dyn PropertySource,
        roots: &Roots,
        base: Option<&Rc<Snapshot>>,
        name: &str,
        config: &EngineConfig,
    ) -> Option<Rc<Snapshot>> {
        let builder = match base {
            None => SnapshotBuilder::full(name),
            Some(b) => SnapshotBuilder::delta(name, b.clone(), b.clone()),
        };
        let mut walk = Walk {
            source,
            base,
            config,
            builder,
            seen: HashSet::new(),
        };
        for (key, root) in roots {
            walk.visit(*root, key);
        }
        walk.builder.finalize(config.shorten_delta_chains)
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn tag(&self) -> SnapshotTag {
        self.tag
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SnapshotKind {
        if self.delta.is_some() {
            SnapshotKind::Delta
        } else {
            SnapshotKind::Full
        }
    }

    pub fn is_delta(&self) -> bool {
        self.delta.is_some()
    }

    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    pub fn delta_base(&self) -> Option<&Rc<Snapshot>> {
        self.delta.as_ref().map(|d| &d.delta_base)
    }

    pub fn nominal_base(&self) -> Option<&Rc<Snapshot>> {
        self.delta.as_ref().map(|d| &d.nominal_base)
    }

    /// Records this snapshot itself holds, without fallthrough.
    pub fn own_records(&self) -> impl Iterator<Item = (ObjectId, &Rc<Record>)> {
        self.records.iter().map(|(id, r)| (*id, r))
    }

    pub fn own_record(&self, object: ObjectId) -> Option<&Rc<Record>> {
        self.records.get(&object)
    }

    pub fn own_record_count(&self) -> usize {
        self.records.len()
    }

    /// The record for `object`, falling through the delta base chain.
    pub fn record(&self, object: ObjectId) -> Option<&Rc<Record>> {
        let mut layer = self;
        loop {
            if let Some(record) = layer.records.get(&object) {
                return Some(record);
            }
            match &layer.delta {
                Some(bases) => layer = &bases.delta_base,
                None => return None,
            }
        }
    }

    pub fn lookup(&self, object: ObjectId, prop: &str) -> Option<&Slot> {
        self.record(object).and_then(|r| r.lookup(prop))
    }

    pub fn get(&self, object: ObjectId, prop: &str) -> Option<&Value> {
        self.record(object).and_then(|r| r.get(prop))
    }

    pub fn entries(&self, object: ObjectId) -> Option<IndexMap<String, Value>> {
        self.record(object).map(|r| r.entries())
    }

    /// Every object known through the chain; the nearest layer wins.
    pub fn objects(&self) -> IndexMap<ObjectId, &Rc<Record>> {
        let mut out = IndexMap::new();
        let mut layer = Some(self);
        while let Some(snapshot) = layer {
            for (id, record) in &snapshot.records {
                out.entry(*id).or_insert(record);
            }
            layer = snapshot.delta_base().map(|b| b.as_ref());
        }
        out
    }

    /// Overwrite every tracked property of every object this snapshot
    /// knows about, deleting live properties it does not record.
    pub fn apply_state<G: Snapshotable + ?Sized>(&self, graph: &mut G) -> usize {
        self.objects()
            .into_iter()
            .map(|(id, record)| apply_object(graph, id, record))
            .sum()
    }

    /// Apply only the objects this snapshot itself holds records for.
    pub fn apply_snapshot<G: Snapshotable + ?Sized>(&self, graph: &mut G) -> usize {
        self.records
            .iter()
            .map(|(id, record)| apply_object(graph, *id, record))
            .sum()
    }
}

/// Make the live object match `record` exactly. Returns the number of
/// properties written or deleted.
pub fn apply_object<G: Snapshotable + ?Sized>(graph: &mut G, id: ObjectId, record: &Record) -> usize {
    let target = record.entries();
    let mut changes = 0;
    for key in graph.keys(id) {
        if !target.contains_key(&key) {
            graph.delete(id, &key);
            changes += 1;
        }
    }
    for (key, value) in target {
        if graph.get(id, &key) != Some(&value) {
            graph.set(id, &key, value);
            changes += 1;
        }
    }
    changes
}
