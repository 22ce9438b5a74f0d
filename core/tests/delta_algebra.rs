//! Delta algebra: invert, compose, fallthrough.
//!
//! Randomized cases use a seeded PCG stream so every run sees the same
//! graphs and mutations.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use snapstack_core::{
    EngineConfig, Heap, ObjectId, Roots, Slot, Snapshot, Snapshotable, Value,
};
use std::rc::Rc;

const OBJECTS: usize = 12;
const PROPS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn config() -> EngineConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    EngineConfig::default_test()
}

/// A random graph where every object stays reachable from the "all"
/// root, plus cross references that may form cycles.
fn random_world(rng: &mut Pcg64Mcg) -> (Heap, Roots, Vec<ObjectId>) {
    let mut heap = Heap::new();
    let objects: Vec<ObjectId> = (0..OBJECTS).map(|_| heap.alloc()).collect();
    for &id in &objects {
        for prop in PROPS {
            if rng.gen_bool(0.6) {
                heap.set(id, prop, Value::from(rng.gen_range(0..100i32)));
            }
        }
        if rng.gen_bool(0.3) {
            let target = objects[rng.gen_range(0..OBJECTS)];
            heap.set(id, "link", Value::Object(target));
        }
    }
    let all = heap.alloc();
    for (i, &id) in objects.iter().enumerate() {
        heap.set(all, &format!("o{i}"), Value::Object(id));
    }
    let roots: Roots = [("all".to_string(), all)].into_iter().collect();
    (heap, roots, objects)
}

fn mutate(rng: &mut Pcg64Mcg, heap: &mut Heap, objects: &[ObjectId], steps: usize) {
    for _ in 0..steps {
        let id = objects[rng.gen_range(0..objects.len())];
        let prop = PROPS[rng.gen_range(0..PROPS.len())];
        match rng.gen_range(0..4) {
            0 => heap.delete(id, prop),
            1 => {
                let target = objects[rng.gen_range(0..objects.len())];
                heap.set(id, "link", Value::Object(target));
            }
            2 => heap.set(id, prop, Value::from(format!("s{}", rng.gen_range(0..10u32)))),
            _ => heap.set(id, prop, Value::from(rng.gen_range(0..100i32))),
        }
    }
}

#[test]
fn inverse_restores_state_before_mutation() {
    let config = config();
    for seed in 0..25u64 {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let (mut heap, roots, objects) = random_world(&mut rng);
        let before = heap.clone();

        let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");
        mutate(&mut rng, &mut heap, &objects, 20);
        let Some(delta) = Snapshot::record_data(&heap, &roots, Some(&full), "delta", &config) else {
            assert_eq!(heap, before, "seed {seed}: no delta but state changed");
            continue;
        };

        let inverse = delta
            .invert(config.shorten_delta_chains)
            .expect("delta inverts")
            .expect("no new objects, so the inverse is non-empty");
        inverse.apply_snapshot(&mut heap);
        assert_eq!(heap, before, "seed {seed}: inverse did not restore state");
    }
}

#[test]
fn compose_equals_sequential_application() {
    let config = config();
    for seed in 100..125u64 {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let (mut heap, roots, objects) = random_world(&mut rng);
        let initial = heap.clone();

        let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");
        mutate(&mut rng, &mut heap, &objects, 10);
        let d1 = Snapshot::record_data(&heap, &roots, Some(&full), "d1", &config);
        mutate(&mut rng, &mut heap, &objects, 10);
        let after = heap.clone();
        let (Some(d1), Some(d2)) = (
            d1.clone(),
            d1.as_ref()
                .and_then(|d1| Snapshot::record_data(&heap, &roots, Some(d1), "d2", &config)),
        ) else {
            continue;
        };

        let composed = d1
            .compose_with(&d2, config.shorten_delta_chains)
            .expect("compose");
        assert!(Rc::ptr_eq(composed.nominal_base().expect("delta"), &full));

        let mut sequential = initial.clone();
        d1.apply_snapshot(&mut sequential);
        d2.apply_snapshot(&mut sequential);
        assert_eq!(sequential, after, "seed {seed}: sequential application");

        let mut at_once = initial.clone();
        composed.apply_snapshot(&mut at_once);
        assert_eq!(at_once, after, "seed {seed}: composed application");
    }
}

#[test]
fn compose_of_siblings_on_one_base_equals_sequential_application() {
    let config = config();
    for seed in 200..225u64 {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let (mut heap, roots, objects) = random_world(&mut rng);
        let initial = heap.clone();

        let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");
        mutate(&mut rng, &mut heap, &objects, 10);
        let d1 = Snapshot::record_data(&heap, &roots, Some(&full), "d1", &config);
        mutate(&mut rng, &mut heap, &objects, 10);
        let (Some(d1), Some(d2)) = (d1, Snapshot::record_data(&heap, &roots, Some(&full), "d2", &config))
        else {
            continue;
        };
        assert!(Rc::ptr_eq(d2.nominal_base().expect("delta"), &full));

        // Objects d2 has no record for keep whatever d1 left them at.
        let mut sequential = initial.clone();
        d1.apply_snapshot(&mut sequential);
        d2.apply_snapshot(&mut sequential);
        for (object, _) in d2.own_records() {
            assert_eq!(sequential.props(object), heap.props(object), "seed {seed}: {object}");
        }

        let composed = d1
            .compose_with(&d2, config.shorten_delta_chains)
            .expect("compose");
        assert!(Rc::ptr_eq(composed.nominal_base().expect("delta"), &full));
        let mut at_once = initial.clone();
        composed.apply_snapshot(&mut at_once);
        assert_eq!(at_once, sequential, "seed {seed}: composed application");
    }
}

#[test]
fn sibling_compose_keeps_a_value_restored_by_the_later_delta() {
    let config = config();
    let mut heap = Heap::new();
    let obj = heap.object([("x", 1), ("y", 1)]);
    let roots: Roots = [("obj".to_string(), obj)].into_iter().collect();
    let start = heap.clone();
    let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");

    heap.set(obj, "x", Value::from(2));
    let d1 = Snapshot::record_data(&heap, &roots, Some(&full), "d1", &config).expect("d1");
    heap.set(obj, "x", Value::from(1));
    heap.set(obj, "y", Value::from(5));
    let d2 = Snapshot::record_data(&heap, &roots, Some(&full), "d2", &config).expect("d2");

    let composed = d1.compose_with(&d2, true).expect("compose");
    assert_eq!(composed.get(obj, "x"), Some(&Value::from(1)));
    assert_eq!(composed.get(obj, "y"), Some(&Value::from(5)));

    let mut replay = start;
    composed.apply_snapshot(&mut replay);
    assert_eq!(replay, heap);
}

#[test]
fn older_snapshot_recorded_against_newer_takes_state_back() {
    let config = config();
    for seed in 300..325u64 {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let (mut heap, roots, objects) = random_world(&mut rng);
        let before = heap.clone();

        let old = Snapshot::record_data(&heap, &roots, None, "old", &config).expect("old");
        mutate(&mut rng, &mut heap, &objects, 15);
        let Some(newer) = Snapshot::record_data(&heap, &roots, Some(&old), "newer", &config) else {
            continue;
        };

        let back = Snapshot::record_from_snapshot(&old, &roots, Some(&newer), "back", &config)
            .expect("old and newer differ, so the delta is non-empty");
        assert!(back.is_delta());
        assert!(Rc::ptr_eq(back.nominal_base().expect("delta"), &newer));
        assert!(back.own_record_count() <= newer.own_record_count());

        back.apply_snapshot(&mut heap);
        assert_eq!(heap, before, "seed {seed}: delta from the older snapshot");
    }
}

#[test]
fn composed_inverses_walk_back_two_steps() {
    let config = config();
    let mut heap = Heap::new();
    let obj = heap.object([("x", 1), ("y", 1)]);
    let roots: Roots = [("obj".to_string(), obj)].into_iter().collect();
    let start = heap.clone();

    let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");
    heap.set(obj, "x", Value::from(2));
    let d1 = Snapshot::record_data(&heap, &roots, Some(&full), "d1", &config).expect("d1");
    heap.delete(obj, "y");
    heap.set(obj, "z", Value::from(3));
    let d2 = Snapshot::record_data(&heap, &roots, Some(&d1), "d2", &config).expect("d2");

    let back = d2
        .invert(true)
        .expect("invert d2")
        .expect("non-empty")
        .compose_with(&d1.invert(true).expect("invert d1").expect("non-empty"), true)
        .expect("compose");
    back.apply_snapshot(&mut heap);
    assert_eq!(heap, start);
}

#[test]
fn delta_lookups_fall_through_to_the_nearest_layer() {
    let config = config();
    let mut heap = Heap::new();
    let obj = heap.object([("x", 1), ("y", 2), ("z", 3)]);
    let other = heap.object([("w", 4)]);
    let root = heap.object([("obj", obj), ("other", other)]);
    let roots: Roots = [("root".to_string(), root)].into_iter().collect();

    let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");
    heap.set(obj, "x", Value::from(5));
    let s1 = Snapshot::record_data(&heap, &roots, Some(&full), "s1", &config).expect("s1");
    heap.delete(obj, "y");
    let s2 = Snapshot::record_data(&heap, &roots, Some(&s1), "s2", &config).expect("s2");

    assert!(!s2.own_record(obj).expect("obj changed").has_own("x"));
    assert_eq!(s2.get(obj, "x"), Some(&Value::from(5)));
    assert_eq!(s2.get(obj, "z"), Some(&Value::from(3)));
    assert_eq!(s2.lookup(obj, "y"), Some(&Slot::Tombstone));
    assert_eq!(s2.get(obj, "y"), None);
    assert_eq!(s2.lookup(obj, "nope"), None);

    assert!(s2.own_record(other).is_none());
    assert_eq!(s2.get(other, "w"), Some(&Value::from(4)));
    assert_eq!(s2.objects().len(), 3);
}

#[test]
fn inverse_leaves_out_objects_the_delta_introduced() {
    let config = config();
    let mut heap = Heap::new();
    let root = heap.object([("n", 1)]);
    let roots: Roots = [("root".to_string(), root)].into_iter().collect();
    let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");

    let fresh = heap.object([("v", 1)]);
    heap.set(root, "child", Value::Object(fresh));
    let delta = Snapshot::record_data(&heap, &roots, Some(&full), "adds", &config).expect("delta");
    assert!(delta.own_record(fresh).is_some());

    let inverse = delta.invert(true).expect("invert").expect("root changed");
    assert!(inverse.own_record(fresh).is_none());
    assert_eq!(
        inverse.own_record(root).expect("root").lookup("child"),
        Some(&Slot::Tombstone)
    );

    inverse.apply_snapshot(&mut heap);
    assert_eq!(heap.get(root, "child"), None);
    // The object itself is left as it was.
    assert_eq!(heap.number(fresh, "v"), Some(1.0));
}

#[test]
fn full_snapshots_cannot_be_inverted_or_composed() {
    let config = config();
    let mut heap = Heap::new();
    let obj = heap.object([("x", 1)]);
    let roots: Roots = [("obj".to_string(), obj)].into_iter().collect();
    let full = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");
    heap.set(obj, "x", Value::from(2));
    let delta = Snapshot::record_data(&heap, &roots, Some(&full), "d", &config).expect("d");

    assert!(full.invert(true).is_err());
    assert!(full.compose_with(&delta, true).is_err());
    assert!(delta.compose_with(&full, true).is_err());
}

#[test]
fn chains_stay_short_over_many_deltas() {
    let config = config();
    let mut heap = Heap::new();
    let obj = heap.object([("counter", 0), ("fixed", 1)]);
    let roots: Roots = [("obj".to_string(), obj)].into_iter().collect();

    let mut last = Snapshot::record_data(&heap, &roots, None, "full", &config).expect("full");
    for i in 1..=50 {
        heap.set(obj, "counter", Value::from(i));
        last = Snapshot::record_data(&heap, &roots, Some(&last), &format!("d{i}"), &config)
            .expect("counter changed");
    }
    let record = last.record(obj).expect("obj");
    assert_eq!(record.depth(), 2, "counter layer over the full record");
    assert_eq!(record.get("fixed"), Some(&Value::from(1)));
    assert!(last.delta_base().expect("delta").nominal_base().is_none());
}
