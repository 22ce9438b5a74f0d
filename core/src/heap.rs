//! Arena of dynamically-shaped objects, the default live graph.

use crate::{snapshotable::Snapshotable, types::ObjectId, value::Value};
use indexmap::IndexMap;
use std::collections::HashSet;

pub type Properties = IndexMap<String, Value>;

/// Objects are keyed by handle, so a set on a handle this heap never
/// allocated adds just that one object.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: IndexMap<ObjectId, Properties>,
    next:    u32,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty object and return its handle.
    pub fn alloc(&mut self) -> ObjectId {
        let id = ObjectId(self.next);
        self.next = self.next.saturating_add(1);
        self.objects.insert(id, Properties::new());
        id
    }

    /// Allocate an object with the given properties, in order.
    pub fn object<K, V, I>(&mut self, props: I) -> ObjectId
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let id = self.alloc();
        self.objects.insert(
            id,
            props.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        id
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn props(&self, id: ObjectId) -> Option<&Properties> {
        self.objects.get(&id)
    }

    /// Convenience numeric read used by the simulation glue.
    pub fn number(&self, id: ObjectId, prop: &str) -> Option<f64> {
        self.get(id, prop).and_then(Value::as_number)
    }

    /// Structural view of everything reachable from `id`, used to compare
    /// two graphs by value. A reference back to an object still being
    /// rendered is cut and shown as `<cycle #n>`.
    pub fn render(&self, id: ObjectId) -> serde_json::Value {
        struct Frame<'a> {
            id:    ObjectId,
            key:   Option<&'a str>,
            props: indexmap::map::Iter<'a, String, Value>,
            map:   serde_json::Map<String, serde_json::Value>,
        }

        let Some(props) = self.props(id) else {
            return serde_json::Value::Null;
        };
        let mut on_path = HashSet::from([id]);
        let mut frames = vec![Frame { id, key: None, props: props.iter(), map: serde_json::Map::new() }];

        loop {
            let Some(frame) = frames.last_mut() else {
                return serde_json::Value::Null;
            };
            match frame.props.next() {
                Some((key, Value::Object(child))) => {
                    let child = *child;
                    if on_path.contains(&child) {
                        frame.map.insert(key.clone(), format!("<cycle {child}>").into());
                    } else if let Some(props) = self.props(child) {
                        on_path.insert(child);
                        frames.push(Frame {
                            id:    child,
                            key:   Some(key.as_str()),
                            props: props.iter(),
                            map:   serde_json::Map::new(),
                        });
                    } else {
                        frame.map.insert(key.clone(), serde_json::Value::Null);
                    }
                }
                Some((key, value)) => {
                    frame.map.insert(key.clone(), render_scalar(value));
                }
                None => {
                    let Some(done) = frames.pop() else {
                        return serde_json::Value::Null;
                    };
                    on_path.remove(&done.id);
                    let rendered = serde_json::Value::Object(done.map);
                    match (frames.last_mut(), done.key) {
                        (Some(parent), Some(key)) => {
                            parent.map.insert(key.to_string(), rendered);
                        }
                        _ => return rendered,
                    }
                }
            }
        }
    }
}

fn render_scalar(value: &Value) -> serde_json::Value {
    match value {
        Value::Null | Value::Object(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::json!(n),
        Value::Text(s) => serde_json::Value::String(s.clone()),
    }
}

/// Two heaps are equal when they hold the same objects with the same
/// properties, whatever order they were created in.
impl PartialEq for Heap {
    fn eq(&self, other: &Self) -> bool {
        self.objects == other.objects
    }
}

impl Snapshotable for Heap {
    fn entries(&self, id: ObjectId) -> Option<Vec<(String, Value)>> {
        self.props(id)
            .map(|props| props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn get(&self, id: ObjectId, prop: &str) -> Option<&Value> {
        self.props(id).and_then(|props| props.get(prop))
    }

    /// Setting on an unknown handle creates that object, so a fresh heap
    /// can be materialized by applying a full snapshot onto it.
    fn set(&mut self, id: ObjectId, prop: &str, value: Value) {
        if id.0 >= self.next {
            self.next = id.0.saturating_add(1);
        }
        self.objects
            .entry(id)
            .or_default()
            .insert(prop.to_string(), value);
    }

    fn delete(&mut self, id: ObjectId, prop: &str) {
        if let Some(props) = self.objects.get_mut(&id) {
            props.shift_remove(prop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_on_unknown_handle_creates_only_that_object() {
        let mut heap = Heap::new();
        heap.set(ObjectId(3), "x", Value::from(1));
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.number(ObjectId(3), "x"), Some(1.0));
        assert_eq!(heap.entries(ObjectId(0)), None);
        assert_eq!(heap.alloc(), ObjectId(4));
    }

    #[test]
    fn huge_handle_does_not_allocate_the_gap() {
        let mut heap = Heap::new();
        heap.set(ObjectId(u32::MAX - 1), "x", Value::from(1));
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.alloc(), ObjectId(u32::MAX));
    }

    #[test]
    fn render_cuts_cycles() {
        let mut heap = Heap::new();
        let obj = heap.object([("n", Value::from(1))]);
        heap.set(obj, "self", Value::Object(obj));
        let rendered = heap.render(obj);
        assert_eq!(rendered["n"], serde_json::json!(1.0));
        assert!(rendered["self"].as_str().unwrap().starts_with("<cycle"));
    }

    #[test]
    fn render_repeats_shared_objects_that_are_not_cycles() {
        let mut heap = Heap::new();
        let shared = heap.object([("v", 7)]);
        let root = heap.object([("a", shared), ("b", shared)]);
        let rendered = heap.render(root);
        assert_eq!(rendered["a"], serde_json::json!({ "v": 7.0 }));
        assert_eq!(rendered["a"], rendered["b"]);
    }

    #[test]
    fn equality_ignores_creation_order() {
        let mut a = Heap::new();
        a.set(ObjectId(0), "x", Value::from(1));
        a.set(ObjectId(1), "y", Value::from(2));
        let mut b = Heap::new();
        b.set(ObjectId(1), "y", Value::from(2));
        b.set(ObjectId(0), "x", Value::from(1));
        assert_eq!(a, b);
    }
}
