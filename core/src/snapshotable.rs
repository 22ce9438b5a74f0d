//! The interface between the recording engine and the live object graph.
//!
//! RULE: The engine only reads live objects while recording.
//! It writes them only through `set`/`delete`, and only while applying
//! a snapshot.

use crate::{types::ObjectId, value::Value};

/// A graph of trackable objects addressed by handle.
pub trait Snapshotable {
    /// Own properties of `id` in a stable order, or `None` if the
    /// handle does not name a live object.
    fn entries(&self, id: ObjectId) -> Option<Vec<(String, Value)>>;

    fn get(&self, id: ObjectId, prop: &str) -> Option<&Value>;

    fn set(&mut self, id: ObjectId, prop: &str, value: Value);

    fn delete(&mut self, id: ObjectId, prop: &str);

    /// Names of the own properties of `id`.
    fn keys(&self, id: ObjectId) -> Vec<String> {
        self.entries(id)
            .map(|entries| entries.into_iter().map(|(k, _)| k).collect())
            .unwrap_or_default()
    }
}
