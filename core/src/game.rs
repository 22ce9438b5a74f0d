//! Minimal idle loop wired to the recording engine.
//!
//! This is the consumer side of the engine: it registers its roots once,
//! checkpoints while paused, and rewinds on request. All game state lives
//! in the heap so the engine can see it.

use crate::{
    clock::GameClock,
    config::EngineConfig,
    engine::{DataEngine, SnapshotRef},
    error::DataResult,
    heap::Heap,
    rng::{GameRng, RngStream},
    snapshot::Snapshot,
    snapshotable::Snapshotable,
    types::{ObjectId, Tick},
    value::Value,
};
use std::rc::Rc;

/// Completions needed before the starter hint disappears.
const HINT_COMPLETIONS: f64 = 3.0;
const DISCOVERY_CHANCE: f64 = 0.05;

pub struct IdleGame {
    pub heap:      Heap,
    pub engine:    DataEngine,
    pub clock:     GameClock,
    action_rng:    GameRng,
    discovery_rng: GameRng,
    resources:     ObjectId,
    stats:         ObjectId,
    actions:       Vec<ObjectId>,
}

impl IdleGame {
    /// Build the starting world, register its roots, and record the
    /// defaults and base snapshots.
    pub fn build(seed: u64, config: EngineConfig) -> DataResult<Self> {
        let mut heap = Heap::new();
        let resources = heap.object([("gold", 0.0), ("wood", 0.0)]);
        let stats = heap.object([
            ("ticks", Value::from(0)),
            ("completions", Value::from(0)),
            ("hint", Value::from("Try chopping some wood")),
        ]);
        // Both actions share one boost object.
        let boost = heap.object([("multiplier", 1.0)]);
        let chop = heap.object([
            ("name", Value::from("chop")),
            ("yields", Value::from("wood")),
            ("rate", Value::from(0.5)),
            ("progress", Value::from(0.0)),
            ("completions", Value::from(0)),
            ("boost", Value::Object(boost)),
        ]);
        let mine = heap.object([
            ("name", Value::from("mine")),
            ("yields", Value::from("gold")),
            ("rate", Value::from(0.2)),
            ("progress", Value::from(0.0)),
            ("completions", Value::from(0)),
            ("boost", Value::Object(boost)),
        ]);
        let action_list = heap.object([("chop", chop), ("mine", mine)]);

        let mut engine = DataEngine::new(config);
        engine.register_all([
            ("resources", resources),
            ("actions", action_list),
            ("stats", stats),
        ]);
        engine.record_defaults(&heap)?;
        engine.record_base(&heap)?;

        Ok(Self {
            heap,
            engine,
            clock: GameClock::new(),
            action_rng: GameRng::new(seed, RngStream::Actions),
            discovery_rng: GameRng::new(seed, RngStream::Discoveries),
            resources,
            stats,
            actions: vec![chop, mine],
        })
    }

    fn add(&mut self, id: ObjectId, prop: &str, amount: f64) {
        let current = self.heap.number(id, prop).unwrap_or(0.0);
        self.heap.set(id, prop, Value::from(current + amount));
    }

    /// Advance one tick of every action.
    pub fn tick(&mut self) -> Tick {
        let tick = self.clock.advance();

        for action in self.actions.clone() {
            let rate = self.heap.number(action, "rate").unwrap_or(0.0);
            let multiplier = self
                .heap
                .get(action, "boost")
                .and_then(Value::as_object)
                .and_then(|boost| self.heap.number(boost, "multiplier"))
                .unwrap_or(1.0);
            let jitter = 0.75 + self.action_rng.next_f64() * 0.5;
            self.add(action, "progress", rate * multiplier * jitter);

            if self.heap.number(action, "progress").unwrap_or(0.0) >= 1.0 {
                self.add(action, "progress", -1.0);
                self.add(action, "completions", 1.0);
                self.add(self.stats, "completions", 1.0);
                if let Some(resource) = self
                    .heap
                    .get(action, "yields")
                    .and_then(Value::as_text)
                    .map(str::to_string)
                {
                    self.add(self.resources, &resource, 1.0);
                }
            }
        }

        if self.discovery_rng.chance(DISCOVERY_CHANCE) {
            let found = format!("relic_{}", self.discovery_rng.next_u64_below(4));
            self.add(self.resources, &found, 1.0);
            log::debug!("tick={tick} game: discovered {found}");
        }

        let completions = self.heap.number(self.stats, "completions").unwrap_or(0.0);
        if completions >= HINT_COMPLETIONS && self.heap.get(self.stats, "hint").is_some() {
            self.heap.delete(self.stats, "hint");
        }
        self.heap.set(self.stats, "ticks", Value::from(tick as f64));
        tick
    }

    /// Run n ticks, leaving the clock paused.
    pub fn run_ticks(&mut self, n: u64) {
        self.clock.resume();
        for _ in 0..n {
            self.tick();
        }
        self.clock.pause();
    }

    /// Pause and record a checkpoint against the top of the stack.
    /// `None` when nothing changed since the last one.
    pub fn checkpoint(&mut self, name: &str) -> DataResult<Option<Rc<Snapshot>>> {
        self.clock.pause();
        self.engine
            .record_snapshot(&self.heap, name, Some(SnapshotRef::TOP))
    }

    /// Rewind live state to a checkpoint, keeping it on the stack.
    pub fn undo_to(&mut self, identifier: impl Into<SnapshotRef>) -> DataResult<Rc<Snapshot>> {
        let target = self
            .engine
            .rewind_to_snapshot(&mut self.heap, identifier, true)?;
        let tick = self.heap.number(self.stats, "ticks").unwrap_or(0.0) as Tick;
        self.clock.rewind_to(tick);
        log::info!("game: rewound to '{}' at tick {tick}", target.name());
        Ok(target)
    }

    pub fn resource(&self, name: &str) -> f64 {
        self.heap.number(self.resources, name).unwrap_or(0.0)
    }

    /// Every root rendered as JSON, keyed by root name.
    pub fn state(&self) -> serde_json::Value {
        let map = self
            .engine
            .roots()
            .iter()
            .map(|(key, id)| (key.clone(), self.heap.render(*id)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_records_defaults_and_base() {
        let game = IdleGame::build(1, EngineConfig::default_test()).expect("build");
        let stack = game.engine.stack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[0].name(), "defaults");
        assert_eq!(stack[1].name(), "base");
        // Nothing changed between defaults and base, so base is full.
        assert!(!stack[1].is_delta());
    }

    #[test]
    fn hint_disappears_after_enough_completions() {
        let mut game = IdleGame::build(3, EngineConfig::default_test()).expect("build");
        game.run_ticks(40);
        assert!(game.heap.get(game.stats, "hint").is_none());
        assert!(game.resource("wood") >= 1.0);
    }
}
