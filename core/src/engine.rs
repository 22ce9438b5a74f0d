//! The recording engine: root registry plus the snapshot stack.
//!
//! STACK LAYOUT (oldest first):
//!   0.  "defaults", full snapshot recorded once at startup
//!   1.  "base", recorded after initial load against defaults
//!   2+. checkpoints recorded during play
//!
//! RULES:
//!   - Every delta on the stack has its nominal base lower on the stack.
//!   - Live objects are only written while applying a snapshot.
//!   - One engine per context. Engines never share live objects.

use crate::{
    config::EngineConfig,
    error::{DataError, DataResult},
    snapshot::{Roots, Snapshot},
    snapshotable::Snapshotable,
    types::{ObjectId, SnapshotId, SnapshotTag},
};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Ways to name a snapshot on the stack.
#[derive(Debug, Clone)]
pub enum SnapshotRef {
    /// Stack position; negative counts from the top (-1 is the top).
    Index(isize),
    /// Debug name, most recent match wins.
    Name(String),
    Tag(SnapshotTag),
    Id(SnapshotId),
    Snapshot(Rc<Snapshot>),
}

impl SnapshotRef {
    pub const TOP: SnapshotRef = SnapshotRef::Index(-1);
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotRef::Index(i) => write!(f, "index {i}"),
            SnapshotRef::Name(n) => write!(f, "{n}"),
            SnapshotRef::Tag(t) => write!(f, "tag {t}"),
            SnapshotRef::Id(id) => write!(f, "{id}"),
            SnapshotRef::Snapshot(s) => write!(f, "{} ({})", s.name(), s.id()),
        }
    }
}

impl From<isize> for SnapshotRef {
    fn from(i: isize) -> Self { SnapshotRef::Index(i) }
}

impl From<i32> for SnapshotRef {
    fn from(i: i32) -> Self { SnapshotRef::Index(i as isize) }
}

impl From<&str> for SnapshotRef {
    fn from(n: &str) -> Self { SnapshotRef::Name(n.to_string()) }
}

impl From<String> for SnapshotRef {
    fn from(n: String) -> Self { SnapshotRef::Name(n) }
}

impl From<SnapshotTag> for SnapshotRef {
    fn from(t: SnapshotTag) -> Self { SnapshotRef::Tag(t) }
}

impl From<SnapshotId> for SnapshotRef {
    fn from(id: SnapshotId) -> Self { SnapshotRef::Id(id) }
}

impl From<Rc<Snapshot>> for SnapshotRef {
    fn from(s: Rc<Snapshot>) -> Self { SnapshotRef::Snapshot(s) }
}

impl From<&Rc<Snapshot>> for SnapshotRef {
    fn from(s: &Rc<Snapshot>) -> Self { SnapshotRef::Snapshot(s.clone()) }
}

pub struct DataEngine {
    config: EngineConfig,
    roots:  Roots,
    stack:  Vec<Rc<Snapshot>>,
    /// Every snapshot this context has built or imported and that is
    /// still alive somewhere, by id.
    known:  HashMap<SnapshotId, Weak<Snapshot>>,
}

impl DataEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            roots: Roots::new(),
            stack: Vec::new(),
            known: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Roots ──────────────────────────────────────────────────

    /// Register a root object. Re-registering a key replaces its root.
    pub fn register(&mut self, key: &str, object: ObjectId) {
        if let Some(previous) = self.roots.insert(key.to_string(), object) {
            log::debug!("[{}] root '{key}' replaced: {previous} -> {object}", self.config.context);
        }
    }

    pub fn register_all<K, I>(&mut self, roots: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, ObjectId)>,
    {
        for (key, object) in roots {
            self.register(key.as_ref(), object);
        }
    }

    pub fn root(&self, key: &str) -> Option<ObjectId> {
        self.roots.get(key).copied()
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    // ── Stack inspection ───────────────────────────────────────

    pub fn stack(&self) -> &[Rc<Snapshot>] {
        &self.stack
    }

    /// Drop every snapshot. Roots stay registered.
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    fn resolve(&self, identifier: &SnapshotRef) -> DataResult<usize> {
        let len = self.stack.len();
        let found = match identifier {
            SnapshotRef::Index(i) if *i < 0 => len.checked_sub(i.unsigned_abs()),
            SnapshotRef::Index(i) => Some(*i as usize).filter(|i| *i < len),
            SnapshotRef::Name(name) => self.stack.iter().rposition(|s| s.name() == name),
            SnapshotRef::Tag(tag) => self.stack.iter().position(|s| s.tag() == *tag),
            SnapshotRef::Id(id) => self.stack.iter().position(|s| s.id() == *id),
            SnapshotRef::Snapshot(snap) => self.stack.iter().position(|s| Rc::ptr_eq(s, snap)),
        };
        found.ok_or_else(|| DataError::SnapshotNotFound {
            identifier: identifier.to_string(),
        })
    }

    pub fn get_snapshot(&self, identifier: impl Into<SnapshotRef>) -> DataResult<Rc<Snapshot>> {
        let index = self.resolve(&identifier.into())?;
        Ok(self.stack[index].clone())
    }

    /// Any live snapshot this context knows by id, on the stack or not.
    pub fn known_snapshot(&self, id: SnapshotId) -> Option<Rc<Snapshot>> {
        self.known.get(&id).and_then(Weak::upgrade)
    }

    pub(crate) fn track(&mut self, snapshot: &Rc<Snapshot>) {
        self.known.retain(|_, weak| weak.strong_count() > 0);
        self.known.insert(snapshot.id(), Rc::downgrade(snapshot));
    }

    /// Push a snapshot built elsewhere (e.g. imported). A delta's nominal
    /// base must already be on the stack.
    pub fn push_snapshot(&mut self, snapshot: Rc<Snapshot>) -> DataResult<()> {
        if let Some(base) = snapshot.nominal_base() {
            if !self.stack.iter().any(|s| Rc::ptr_eq(s, base)) {
                return Err(DataError::BaseNotOnStack { name: snapshot.name().to_string() });
            }
        }
        self.track(&snapshot);
        self.stack.push(snapshot);
        Ok(())
    }

    // ── Recording ──────────────────────────────────────────────

    fn record<G: Snapshotable + ?Sized>(
        &self,
        graph: &G,
        name: &str,
        base: Option<&Rc<Snapshot>>,
    ) -> Option<Rc<Snapshot>> {
        let started = Instant::now();
        let snapshot = Snapshot::record_data(graph, &self.roots, base, name, &self.config);
        log::debug!(
            "[{}] record '{name}': {} records, ~{} bytes in {:?}",
            self.config.context,
            snapshot.as_ref().map_or(0, |s| s.own_record_count()),
            snapshot.as_ref().map_or(0, |s| s.size_estimate()),
            started.elapsed()
        );
        snapshot
    }

    /// Clear the stack and record the full "defaults" snapshot at index 0.
    /// Call once, after registering roots and before anything else.
    pub fn record_defaults<G: Snapshotable + ?Sized>(&mut self, graph: &G) -> DataResult<Rc<Snapshot>> {
        let defaults = self
            .record(graph, "defaults", None)
            .ok_or(DataError::NothingToRecord)?;
        if !self.stack.is_empty() {
            log::warn!(
                "[{}] defaults recorded again, dropping {} snapshots",
                self.config.context,
                self.stack.len()
            );
            self.stack.clear();
        }
        self.push_snapshot(defaults.clone())?;
        log::info!("[{}] defaults recorded: {} objects", self.config.context, defaults.own_record_count());
        Ok(defaults)
    }

    /// Truncate to the defaults and record index 1 against them. Falls
    /// back to a full snapshot if nothing changed since the defaults.
    pub fn record_base<G: Snapshotable + ?Sized>(&mut self, graph: &G) -> DataResult<Rc<Snapshot>> {
        let defaults = self.stack.first().cloned().ok_or(DataError::EmptyStack)?;
        self.stack.truncate(1);
        let base = match self.record(graph, "base", Some(&defaults)) {
            Some(delta) => delta,
            None => self
                .record(graph, "base", None)
                .ok_or(DataError::NothingToRecord)?,
        };
        self.push_snapshot(base.clone())?;
        Ok(base)
    }

    /// Record a checkpoint. `base` of `None` records a full snapshot;
    /// `Some(SnapshotRef::TOP)` records a delta against the top.
    /// Returns `Ok(None)` and pushes nothing when nothing changed.
    pub fn record_snapshot<G: Snapshotable + ?Sized>(
        &mut self,
        graph: &G,
        name: &str,
        base: Option<SnapshotRef>,
    ) -> DataResult<Option<Rc<Snapshot>>> {
        let base = match base {
            Some(identifier) => Some(self.get_snapshot(identifier)?),
            None => None,
        };
        let snapshot = self.record(graph, name, base.as_ref());
        match &snapshot {
            Some(s) => self.push_snapshot(s.clone())?,
            None => log::debug!("[{}] '{name}': no changes, nothing pushed", self.config.context),
        }
        Ok(snapshot)
    }

    // ── Time travel ────────────────────────────────────────────

    /// Pop down to the target and overwrite the live graph with its full
    /// state. The target itself stays on the stack only if
    /// `keep_on_stack`.
    pub fn revert_to_snapshot<G: Snapshotable + ?Sized>(
        &mut self,
        graph: &mut G,
        identifier: impl Into<SnapshotRef>,
        keep_on_stack: bool,
    ) -> DataResult<Rc<Snapshot>> {
        let started = Instant::now();
        let index = self.resolve(&identifier.into())?;
        let target = self.stack[index].clone();
        self.stack.truncate(if keep_on_stack { index + 1 } else { index });

        let changes = target.apply_state(graph);
        log::debug!(
            "[{}] revert to '{}': {changes} properties changed in {:?}",
            self.config.context,
            target.name(),
            started.elapsed()
        );
        Ok(target)
    }

    /// Same end state as `revert_to_snapshot`, reached by applying one
    /// composed inverse delta that only touches objects that changed.
    /// On `NotADelta` or `TargetNotReached` neither the stack nor the
    /// graph is modified.
    pub fn rewind_to_snapshot<G: Snapshotable + ?Sized>(
        &mut self,
        graph: &mut G,
        identifier: impl Into<SnapshotRef>,
        keep_on_stack: bool,
    ) -> DataResult<Rc<Snapshot>> {
        let started = Instant::now();
        let identifier = identifier.into();
        let index = self.resolve(&identifier)?;
        let target = self.stack[index].clone();
        let shorten = self.config.shorten_delta_chains;

        // Walk the nominal-base links down to the target before touching
        // the stack, so a failed rewind leaves everything as it was.
        let mut undo = Vec::new();
        let mut cursor = self.stack.len().checked_sub(1).ok_or(DataError::EmptyStack)?;
        while cursor > index {
            let entry = &self.stack[cursor];
            let Some(nominal) = entry.nominal_base() else {
                return Err(DataError::NotADelta { name: entry.name().to_string() });
            };
            // Undoing `entry` lands on its nominal base, which may sit
            // several entries down. It must not be below the target.
            match self.stack[..cursor].iter().rposition(|s| Rc::ptr_eq(s, nominal)) {
                Some(base_index) if base_index >= index => {
                    undo.push(entry.clone());
                    cursor = base_index;
                }
                _ => return Err(DataError::TargetNotReached { target: identifier.to_string() }),
            }
        }

        // Whatever changed since the top is undone first.
        let top = self.stack.last().cloned().ok_or(DataError::EmptyStack)?;
        let mut running = match self.record(graph, "rewind-current", Some(&top)) {
            Some(current) => current.invert(shorten)?,
            None => None,
        };
        for entry in &undo {
            if let Some(inverse) = entry.invert(shorten)? {
                running = Some(match running {
                    Some(earlier) => earlier.compose_with(&inverse, shorten)?,
                    None => inverse,
                });
            }
        }

        self.stack.truncate(if keep_on_stack { index + 1 } else { index });
        let changes = running.map_or(0, |delta| delta.apply_snapshot(graph));
        log::debug!(
            "[{}] rewind to '{}': {changes} properties changed in {:?}",
            self.config.context,
            target.name(),
            started.elapsed()
        );
        Ok(target)
    }

    /// Truncate the stack down to the target without touching live state.
    pub fn discard_to_snapshot(&mut self, identifier: impl Into<SnapshotRef>) -> DataResult<Rc<Snapshot>> {
        let index = self.resolve(&identifier.into())?;
        self.stack.truncate(index + 1);
        Ok(self.stack[index].clone())
    }

    pub fn reset_to_defaults<G: Snapshotable + ?Sized>(&mut self, graph: &mut G) -> DataResult<Rc<Snapshot>> {
        self.revert_to_snapshot(graph, 0, true)
    }

    pub fn reset_to_base<G: Snapshotable + ?Sized>(&mut self, graph: &mut G) -> DataResult<Rc<Snapshot>> {
        self.revert_to_snapshot(graph, 1, true)
    }
}
