//! Object instances and their snapshots.
//!
//! An id can be reused over the lifetime of a trace (an allocator hands the
//! same address out again after a free), so each id maps to a list of
//! non-overlapping instances, each with its own snapshots.

use serde::Serialize;
use serde_json::Value;

use super::object_collection::SnapshotRef;
use super::slice::ResolvedRef;
use crate::base::{find_low_index_in_sorted_intervals, find_preceding_index, string_color_id, IntervalHit, Range};
use crate::domain::ModelError;

/// Deletion timestamp of an instance that is still alive.
pub const ALIVE: f64 = f64::MAX;

/// The state of an object at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSnapshot {
    pub ts: f64,
    pub args: Value,
    /// Set for implicit snapshots: the top-level snapshot whose args
    /// contained this one.
    pub containing_snapshot: Option<SnapshotRef>,
    pub resolved_refs: Vec<ResolvedRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInstance {
    pub id: String,
    pub category: String,
    /// Type name of the object.
    pub name: String,
    pub base_type: Option<String>,
    pub color_id: usize,
    pub creation_ts: f64,
    pub creation_ts_was_explicit: bool,
    pub deletion_ts: f64,
    pub deletion_ts_was_explicit: bool,
    pub snapshots: Vec<ObjectSnapshot>,
    pub has_implicit_snapshots: bool,
    pub bounds: Range,
}

impl ObjectInstance {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        name: impl Into<String>,
        creation_ts: f64,
        base_type: Option<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            category: category.into(),
            color_id: string_color_id(&name),
            name,
            base_type,
            creation_ts,
            creation_ts_was_explicit: false,
            deletion_ts: ALIVE,
            deletion_ts_was_explicit: false,
            snapshots: Vec::new(),
            has_implicit_snapshots: false,
            bounds: Range::new(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.deletion_ts == ALIVE
    }

    /// Appends a snapshot, returning its index.
    ///
    /// A snapshot may rename the instance's type (a subclass becomes known
    /// later) only when it names the same base type.
    pub fn add_snapshot(
        &mut self,
        ts: f64,
        args: Value,
        name: Option<&str>,
        base_type: Option<&str>,
    ) -> Result<usize, ModelError> {
        if ts < self.creation_ts {
            return Err(ModelError::SnapshotBeforeCreation);
        }
        if ts >= self.deletion_ts {
            return Err(ModelError::SnapshotAfterDeletion);
        }
        if let Some(last) = self.snapshots.last() {
            if last.ts == ts {
                return Err(ModelError::DuplicateSnapshot);
            }
            if ts < last.ts {
                return Err(ModelError::SnapshotOutOfOrder);
            }
        }
        if let Some(new_name) = name {
            if new_name != self.name {
                let base = base_type.ok_or(ModelError::MissingBaseType)?;
                if self.base_type.as_deref().is_some_and(|b| b != base) {
                    return Err(ModelError::BaseTypeMismatch);
                }
                self.base_type = Some(base.to_string());
                self.name = new_name.to_string();
                self.color_id = string_color_id(&self.name);
            }
        }
        self.snapshots.push(ObjectSnapshot {
            ts,
            args,
            containing_snapshot: None,
            resolved_refs: Vec::new(),
        });
        Ok(self.snapshots.len() - 1)
    }

    /// Records the deletion of this instance at `ts`.
    pub fn was_deleted(&mut self, ts: f64) -> Result<(), ModelError> {
        if self.snapshots.last().is_some_and(|last| last.ts > ts) {
            return Err(ModelError::DeleteBeforeSnapshot { ts });
        }
        self.deletion_ts = ts;
        self.deletion_ts_was_explicit = true;
        Ok(())
    }

    /// Index of the snapshot describing the instance at `ts`: the newest
    /// snapshot not after `ts`, clamped to the first one.
    pub fn snapshot_index_at(&self, ts: f64) -> Option<usize> {
        if self.snapshots.is_empty() {
            return None;
        }
        Some(find_preceding_index(&self.snapshots, |s| s.ts, ts).unwrap_or(0))
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        self.bounds.add_value(self.creation_ts);
        if self.is_alive() {
            if let Some(last) = self.snapshots.last() {
                self.bounds.add_value(last.ts);
            }
        } else {
            self.bounds.add_value(self.deletion_ts);
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        self.creation_ts += amount;
        if !self.is_alive() {
            self.deletion_ts += amount;
        }
        for snapshot in &mut self.snapshots {
            snapshot.ts += amount;
        }
    }
}

/// All instances that carried one id, ordered by creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeToObjectInstanceMap {
    pub id: String,
    pub instances: Vec<ObjectInstance>,
}

impl TimeToObjectInstanceMap {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), instances: Vec::new() }
    }

    fn push_instance(&mut self, category: &str, name: &str, ts: f64, base_type: Option<&str>) -> usize {
        self.instances.push(ObjectInstance::new(
            self.id.clone(),
            category,
            name,
            ts,
            base_type.map(str::to_string),
        ));
        self.instances.len() - 1
    }

    fn lookup(&self, ts: f64) -> IntervalHit {
        find_low_index_in_sorted_intervals(
            &self.instances,
            |inst| inst.creation_ts,
            |inst, _| inst.deletion_ts - inst.creation_ts,
            ts,
        )
    }

    /// Explicit creation (`N` event). Returns the new instance's index.
    pub fn id_was_created(&mut self, category: &str, name: &str, ts: f64) -> Result<usize, ModelError> {
        if let Some(last) = self.instances.last() {
            if ts < last.deletion_ts {
                return Err(ModelError::InstanceOutOfOrder);
            }
        }
        let idx = self.push_instance(category, name, ts, None);
        self.instances[idx].creation_ts_was_explicit = true;
        Ok(idx)
    }

    /// Adds a snapshot to the instance alive at `ts`, creating one
    /// implicitly when needed. Returns `(instance, snapshot)` indices.
    pub fn add_snapshot(
        &mut self,
        category: &str,
        name: &str,
        ts: f64,
        args: Value,
        base_type: Option<&str>,
    ) -> Result<(usize, usize), ModelError> {
        if self.instances.is_empty() {
            self.push_instance(category, name, ts, base_type);
        }

        let idx = match self.lookup(ts) {
            IntervalHit::Before => {
                let first = &mut self.instances[0];
                if ts > first.deletion_ts || first.creation_ts_was_explicit {
                    return Err(ModelError::NoLiveInstance);
                }
                if let Some(snap) = first.snapshots.first() {
                    return Err(ModelError::CannotShiftCreation { first_snapshot_ts: snap.ts });
                }
                first.creation_ts = ts;
                0
            }
            IntervalHit::After => {
                let last_idx = self.instances.len() - 1;
                if ts >= self.instances[last_idx].deletion_ts {
                    self.push_instance(category, name, ts, base_type)
                } else {
                    // ts falls between instances; only an implicit instance
                    // without snapshots may have its creation moved back.
                    let mut candidate = None;
                    for (i, inst) in self.instances.iter().enumerate().rev() {
                        if ts >= inst.deletion_ts {
                            break;
                        }
                        if !inst.creation_ts_was_explicit && inst.snapshots.is_empty() {
                            candidate = Some(i);
                        }
                    }
                    let i = candidate.ok_or(ModelError::NoMutableInstance)?;
                    self.instances[i].creation_ts = ts;
                    i
                }
            }
            IntervalHit::Found(i) => i,
        };

        let snapshot = self.instances[idx].add_snapshot(ts, args, Some(name), base_type)?;
        Ok((idx, snapshot))
    }

    /// Deletion (`D` event). Deleting an unknown id creates an implicit
    /// instance that is born and dies at `ts`.
    pub fn id_was_deleted(&mut self, category: &str, name: &str, ts: f64) -> Result<usize, ModelError> {
        if self.instances.is_empty() {
            self.push_instance(category, name, ts, None);
        }
        let last_idx = self.instances.len() - 1;
        let last = &mut self.instances[last_idx];
        if ts < last.creation_ts {
            return Err(ModelError::DeleteBeforeCreation);
        }
        if last.is_alive() {
            last.was_deleted(ts)?;
            return Ok(last_idx);
        }
        if ts < last.deletion_ts {
            return Err(ModelError::AlreadyDeleted);
        }
        let idx = self.push_instance(category, name, ts, None);
        self.instances[idx].was_deleted(ts)?;
        Ok(idx)
    }

    /// Index of the instance alive at `ts`. Before the first instance, an
    /// implicitly created one still answers.
    pub fn instance_index_at(&self, ts: f64) -> Option<usize> {
        match self.lookup(ts) {
            IntervalHit::Found(i) => Some(i),
            IntervalHit::Before => {
                (!self.instances.first()?.creation_ts_was_explicit).then_some(0)
            }
            IntervalHit::After => None,
        }
    }
}
