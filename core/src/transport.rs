//! Export/import of snapshots across a context boundary (main thread to
//! worker). Only this serialized form ever crosses; each side rebuilds
//! records against its own copies of the bases.
//!
//! A receiving context must already hold every snapshot an export
//! depends on. If it does not, import fails with
//! `DataError::MissingDependencies` naming what to request; the caller
//! fetches those exports, imports them oldest first, and retries once.

use crate::{
    engine::{DataEngine, SnapshotRef},
    error::{DataError, DataResult},
    record::{Record, Slot},
    snapshot::{Snapshot, SnapshotBuilder, SnapshotKind},
    types::{ObjectId, SnapshotId, SnapshotTag},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordExport {
    pub object: ObjectId,
    pub name:   String,
    /// Own slots only; anything else comes from the nominal base.
    pub slots:  Vec<(String, Slot)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotExport {
    pub id:           SnapshotId,
    pub tag:          SnapshotTag,
    pub name:         String,
    pub kind:         SnapshotKind,
    pub nominal_base: Option<SnapshotId>,
    pub delta_base:   Option<SnapshotId>,
    /// Nominal base chain, nearest first, down to a full snapshot.
    pub depends_on:   Vec<SnapshotId>,
    pub records:      Vec<RecordExport>,
}

impl Snapshot {
    pub fn export(&self) -> SnapshotExport {
        let depends_on = std::iter::successors(self.nominal_base(), |s| s.nominal_base())
            .map(|s| s.id())
            .collect();
        let records = self
            .own_records()
            .map(|(object, record)| RecordExport {
                object,
                name: record.name().to_string(),
                slots: record
                    .own_slots()
                    .map(|(k, slot)| (k.to_string(), slot.clone()))
                    .collect(),
            })
            .collect();
        SnapshotExport {
            id: self.id(),
            tag: self.tag(),
            name: self.name().to_string(),
            kind: self.kind(),
            nominal_base: self.nominal_base().map(|s| s.id()),
            delta_base: self.delta_base().map(|s| s.id()),
            depends_on,
            records,
        }
    }
}

impl DataEngine {
    pub fn export_snapshot(&self, identifier: impl Into<SnapshotRef>) -> DataResult<SnapshotExport> {
        Ok(self.get_snapshot(identifier)?.export())
    }

    pub fn export_json(&self, identifier: impl Into<SnapshotRef>) -> DataResult<String> {
        Ok(serde_json::to_string(&self.export_snapshot(identifier)?)?)
    }

    /// Dependencies of `export` this context does not hold, oldest first.
    pub fn missing_dependencies(&self, export: &SnapshotExport) -> Vec<SnapshotId> {
        let mut missing: Vec<SnapshotId> = export
            .depends_on
            .iter()
            .copied()
            .take_while(|id| self.known_snapshot(*id).is_none())
            .collect();
        missing.reverse();
        missing
    }

    /// Rebuild an exported snapshot locally. A snapshot this context
    /// already holds is returned as is. The result is tracked but not
    /// pushed; use `push_snapshot` to put it on the stack.
    pub fn import_snapshot(&mut self, export: SnapshotExport) -> DataResult<Rc<Snapshot>> {
        if let Some(existing) = self.known_snapshot(export.id) {
            log::debug!("[{}] import {}: already present", self.config().context, export.id);
            return Ok(existing);
        }

        let missing = self.missing_dependencies(&export);
        if !missing.is_empty() {
            return Err(DataError::MissingDependencies { id: export.id, missing });
        }

        let shorten = self.config().shorten_delta_chains;
        let nominal = match (export.kind, export.nominal_base) {
            (SnapshotKind::Full, _) => None,
            (SnapshotKind::Delta, Some(id)) => Some(self.known_snapshot(id).ok_or(
                DataError::MissingDependencies { id: export.id, missing: vec![id] },
            )?),
            (SnapshotKind::Delta, None) => {
                return Err(DataError::Other(anyhow::anyhow!(
                    "delta export {} declares no base",
                    export.id
                )));
            }
        };

        let builder = match &nominal {
            None => SnapshotBuilder::full(&export.name),
            Some(nominal) => {
                // The recorded delta base may have been shortened past the
                // nominal base. Lookups are the same either way, so fall
                // back to the nominal base if it is unknown here.
                let delta_base = export
                    .delta_base
                    .and_then(|id| self.known_snapshot(id))
                    .unwrap_or_else(|| nominal.clone());
                SnapshotBuilder::delta(&export.name, delta_base, nominal.clone())
            }
        };
        let mut builder = builder.with_identity(export.id, export.tag);

        for record in export.records {
            let base = nominal
                .as_ref()
                .and_then(|n| n.record(record.object).cloned());
            let own: IndexMap<String, Slot> = record.slots.into_iter().collect();
            builder.insert(
                record.object,
                Record::from_parts(export.id, record.name, own, base),
            );
        }

        let snapshot = builder.build(shorten);
        self.track(&snapshot);
        log::debug!(
            "[{}] imported '{}' ({}): {} records",
            self.config().context,
            snapshot.name(),
            snapshot.id(),
            snapshot.own_record_count()
        );
        Ok(snapshot)
    }

    pub fn import_json(&mut self, json: &str) -> DataResult<Rc<Snapshot>> {
        let export: SnapshotExport = serde_json::from_str(json)?;
        self.import_snapshot(export)
    }
}
