//! snap-runner: headless idle loop with checkpoints and rewinds.
//!
//! Usage:
//!   snap-runner --seed 12345 --ticks 200 --every 25
//!   snap-runner --config engine.json --rewind-to cp2

use anyhow::Result;
use snapstack_core::{game::IdleGame, DataEngine, EngineConfig, Heap, SnapshotRef};
use std::env;

#[derive(serde::Serialize)]
struct StackEntry {
    index: usize,
    name:  String,
    kind:  String,
    records: usize,
    size_estimate: usize,
}

#[derive(serde::Serialize)]
struct RunSummary {
    seed:         u64,
    final_tick:   u64,
    rewound_to:   Option<String>,
    stack:        Vec<StackEntry>,
    worker_match: bool,
    state:        serde_json::Value,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let ticks = parse_arg(&args, "--ticks", 200u64);
    let every = parse_arg(&args, "--every", 25u64).max(1);
    let rewind_to = string_arg(&args, "--rewind-to");
    let config = match string_arg(&args, "--config") {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };

    let mut game = IdleGame::build(seed, config.clone())?;
    let mut remaining = ticks;
    let mut checkpoint = 0;
    while remaining > 0 {
        let step = remaining.min(every);
        game.run_ticks(step);
        remaining -= step;
        if game.checkpoint(&format!("cp{checkpoint}"))?.is_some() {
            checkpoint += 1;
        }
    }

    if let Some(name) = &rewind_to {
        game.undo_to(name.as_str())?;
    }

    let worker_match = mirror_matches(&game, config)?;

    let summary = RunSummary {
        seed,
        final_tick: game.clock.current_tick,
        rewound_to: rewind_to,
        stack: game
            .engine
            .stack()
            .iter()
            .enumerate()
            .map(|(index, s)| StackEntry {
                index,
                name: s.name().to_string(),
                kind: format!("{:?}", s.kind()).to_lowercase(),
                records: s.own_record_count(),
                size_estimate: s.size_estimate(),
            })
            .collect(),
        worker_match,
        state: game.state(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Ship the whole stack to a fresh "worker" engine and check that the
/// state it materializes matches the top of the main stack.
fn mirror_matches(game: &IdleGame, config: EngineConfig) -> Result<bool> {
    let mut worker = DataEngine::new(config.with_context("worker"));
    worker.register_all(game.engine.roots().iter().map(|(k, v)| (k.as_str(), *v)));
    for snapshot in game.engine.stack() {
        let json = game.engine.export_json(snapshot)?;
        let imported = worker.import_json(&json)?;
        worker.push_snapshot(imported)?;
    }
    let mut heap = Heap::new();
    worker.revert_to_snapshot(&mut heap, SnapshotRef::TOP, true)?;

    let matches = game
        .engine
        .roots()
        .values()
        .all(|id| heap.render(*id) == game.heap.render(*id));
    if !matches {
        log::warn!("worker state diverged from main");
    }
    Ok(matches)
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}
