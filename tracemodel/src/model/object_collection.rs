//! Per-process registry of object instances, keyed by id.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::object_instance::{ObjectInstance, ObjectSnapshot, TimeToObjectInstanceMap};
use crate::base::Range;
use crate::domain::ModelError;

/// Address of a snapshot inside an [`ObjectCollection`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SnapshotRef {
    pub id: String,
    pub instance: usize,
    pub snapshot: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectCollection {
    instance_maps: BTreeMap<String, TimeToObjectInstanceMap>,
    pub bounds: Range,
}

impl ObjectCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_maps.is_empty()
    }

    fn map_for(&mut self, id: &str) -> &mut TimeToObjectInstanceMap {
        self.instance_maps
            .entry(id.to_string())
            .or_insert_with(|| TimeToObjectInstanceMap::new(id))
    }

    fn check_category(instance: &ObjectInstance, category: &str) -> Result<(), ModelError> {
        if instance.category == category {
            Ok(())
        } else {
            Err(ModelError::CategoryMismatch {
                name: instance.name.clone(),
                category: category.to_string(),
                existing: instance.category.clone(),
            })
        }
    }

    pub fn id_was_created(&mut self, id: &str, category: &str, name: &str, ts: f64) -> Result<usize, ModelError> {
        self.map_for(id).id_was_created(category, name, ts)
    }

    pub fn add_snapshot(
        &mut self,
        id: &str,
        category: &str,
        name: &str,
        ts: f64,
        args: Value,
        base_type: Option<&str>,
    ) -> Result<SnapshotRef, ModelError> {
        let map = self.map_for(id);
        let (instance, snapshot) = map.add_snapshot(category, name, ts, args, base_type)?;
        let inst = &map.instances[instance];
        if let Err(err) = Self::check_category(inst, category) {
            map.instances[instance].snapshots.pop();
            return Err(err);
        }
        Ok(SnapshotRef { id: id.to_string(), instance, snapshot })
    }

    pub fn id_was_deleted(&mut self, id: &str, category: &str, name: &str, ts: f64) -> Result<usize, ModelError> {
        let map = self.map_for(id);
        let idx = map.id_was_deleted(category, name, ts)?;
        Self::check_category(&map.instances[idx], category)?;
        Ok(idx)
    }

    /// Closes every still-alive instance at `max_timestamp`.
    pub fn auto_delete_objects(&mut self, max_timestamp: f64) {
        for map in self.instance_maps.values_mut() {
            if let Some(last) = map.instances.last_mut() {
                if last.is_alive() && last.was_deleted(max_timestamp).is_ok() {
                    last.deletion_ts_was_explicit = false;
                }
            }
        }
    }

    pub fn instance_at(&self, id: &str, ts: f64) -> Option<&ObjectInstance> {
        let map = self.instance_maps.get(id)?;
        map.instances.get(map.instance_index_at(ts)?)
    }

    pub fn snapshot_at(&self, id: &str, ts: f64) -> Option<SnapshotRef> {
        let map = self.instance_maps.get(id)?;
        let instance = map.instance_index_at(ts)?;
        let snapshot = map.instances[instance].snapshot_index_at(ts)?;
        Some(SnapshotRef { id: id.to_string(), instance, snapshot })
    }

    pub fn instance(&self, r: &SnapshotRef) -> Option<&ObjectInstance> {
        self.instance_maps.get(&r.id)?.instances.get(r.instance)
    }

    pub fn snapshot(&self, r: &SnapshotRef) -> Option<&ObjectSnapshot> {
        self.instance(r)?.snapshots.get(r.snapshot)
    }

    pub fn snapshot_mut(&mut self, r: &SnapshotRef) -> Option<&mut ObjectSnapshot> {
        self.instance_maps
            .get_mut(&r.id)?
            .instances
            .get_mut(r.instance)?
            .snapshots
            .get_mut(r.snapshot)
    }

    pub fn instance_mut(&mut self, r: &SnapshotRef) -> Option<&mut ObjectInstance> {
        self.instance_maps.get_mut(&r.id)?.instances.get_mut(r.instance)
    }

    pub fn all_instances(&self) -> impl Iterator<Item = &ObjectInstance> {
        self.instance_maps.values().flat_map(|map| map.instances.iter())
    }

    pub fn all_instances_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ObjectInstance> + 'a {
        self.all_instances().filter(move |inst| inst.name == name)
    }

    /// Refs to every snapshot, in id then instance then timestamp order.
    pub fn all_snapshot_refs(&self) -> Vec<SnapshotRef> {
        self.instance_maps
            .iter()
            .flat_map(|(id, map)| {
                map.instances.iter().enumerate().flat_map(move |(instance, inst)| {
                    (0..inst.snapshots.len()).map(move |snapshot| SnapshotRef {
                        id: id.clone(),
                        instance,
                        snapshot,
                    })
                })
            })
            .collect()
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for map in self.instance_maps.values_mut() {
            for inst in &mut map.instances {
                inst.update_bounds();
                self.bounds.add_range(&inst.bounds);
            }
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for map in self.instance_maps.values_mut() {
            for inst in &mut map.instances {
                inst.shift_timestamps_forward(amount);
            }
        }
    }
}
