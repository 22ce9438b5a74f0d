//! Invert and compose for delta snapshots.
//!
//! Every record in a delta reads as "own slots over the nominal base's
//! record for the same object". Both operations below preserve that.

use crate::{
    error::{DataError, DataResult},
    record::Recorder,
    snapshot::{Snapshot, SnapshotBuilder},
    types::ObjectId,
};
use indexmap::IndexSet;
use std::rc::Rc;

impl Snapshot {
    /// A delta that takes state from this delta back to its nominal base.
    ///
    /// Objects with no record in the nominal base were introduced by this
    /// delta and are left out: going backward never touches them.
    /// Returns `None` if every changed object was new.
    pub fn invert(self: &Rc<Self>, shorten: bool) -> DataResult<Option<Rc<Snapshot>>> {
        let nominal = self.nominal_base().ok_or_else(|| DataError::NotADelta {
            name: self.name().to_string(),
        })?;

        let mut builder =
            SnapshotBuilder::delta(&format!("{}~inverse", self.name()), self.clone(), self.clone());
        for (object, record) in self.own_records() {
            let Some(before) = nominal.record(object) else {
                continue;
            };
            let mut recorder = Recorder::new(builder.id(), record.name(), Some(record.clone()));
            for (prop, _) in record.own_slots() {
                match before.get(prop) {
                    Some(value) => recorder.set(prop, value.clone()),
                    None => recorder.delete(prop),
                }
            }
            builder.insert(object, recorder.finalize());
        }
        Ok(builder.finalize(shorten))
    }

    /// A single delta equivalent to applying `self` and then `later`.
    /// The result is based on this delta's nominal base; `later` wins
    /// wherever both deltas write the same property.
    ///
    /// `later` is either based on `self` or, like `self`, on the same
    /// nominal base. In the second form a record in `later` already
    /// describes its whole object against that base, so `self`'s slots
    /// for that object are dropped.
    pub fn compose_with(self: &Rc<Self>, later: &Rc<Snapshot>, shorten: bool) -> DataResult<Rc<Snapshot>> {
        let base = self.nominal_base().ok_or_else(|| DataError::NotADelta {
            name: self.name().to_string(),
        })?;
        if !later.is_delta() {
            return Err(DataError::NotADelta { name: later.name().to_string() });
        }

        let siblings = later
            .nominal_base()
            .is_some_and(|later_base| Rc::ptr_eq(later_base, base));

        let objects: IndexSet<ObjectId> = self
            .own_records()
            .chain(later.own_records())
            .map(|(id, _)| id)
            .collect();

        let mut builder = SnapshotBuilder::delta(
            &format!("{}+{}", self.name(), later.name()),
            base.clone(),
            base.clone(),
        );
        for object in objects {
            let later_record = later.own_record(object);
            let earlier_record = match later_record {
                Some(_) if siblings => None,
                _ => self.own_record(object),
            };
            let name = later_record
                .or(earlier_record)
                .map(|r| r.name().to_string())
                .unwrap_or_default();

            let mut recorder = Recorder::new(builder.id(), name, base.record(object).cloned());
            for record in [earlier_record, later_record].into_iter().flatten() {
                for (prop, slot) in record.own_slots() {
                    recorder.write(prop, slot.clone());
                }
            }
            builder.insert(object, recorder.finalize());
        }
        Ok(builder.build(shorten))
    }
}
