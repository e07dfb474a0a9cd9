//! Kernel-side state: one [`Cpu`] per core seen in the trace.

use serde::Serialize;
use std::collections::BTreeMap;

use super::counter::Counter;
use super::slice::Slice;
use crate::base::{find_low_index_in_sorted_intervals, Range};
use crate::domain::CpuId;

#[derive(Debug, Clone, Serialize)]
pub struct Cpu {
    pub cpu_number: CpuId,
    /// Scheduling slices (which thread ran), sorted by start.
    pub slices: Vec<Slice>,
    /// Keyed by `category.name` (frequency, idle state, ...).
    pub counters: BTreeMap<String, Counter>,
    pub bounds: Range,
}

impl Cpu {
    pub fn new(cpu_number: CpuId) -> Self {
        Self { cpu_number, slices: Vec::new(), counters: BTreeMap::new(), bounds: Range::new() }
    }

    pub fn get_or_create_counter(&mut self, category: &str, name: &str) -> &mut Counter {
        self.counters
            .entry(format!("{category}.{name}"))
            .or_insert_with(|| Counter::new(category, name, None))
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty() && self.counters.values().all(|c| c.series.iter().all(|s| s.values.is_empty()))
    }

    pub fn slice_at(&self, ts: f64) -> Option<usize> {
        find_low_index_in_sorted_intervals(&self.slices, |s| s.start, |s, _| s.duration, ts).found()
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for slice in &mut self.slices {
            slice.start += amount;
        }
        for counter in self.counters.values_mut() {
            counter.shift_timestamps_forward(amount);
        }
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        if let (Some(first), Some(last)) = (self.slices.first(), self.slices.last()) {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.end());
        }
        for counter in self.counters.values_mut() {
            counter.update_bounds();
            self.bounds.add_range(&counter.bounds);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Kernel {
    pub cpus: BTreeMap<CpuId, Cpu>,
    pub bounds: Range,
}

impl Kernel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_cpu(&mut self, cpu_number: CpuId) -> &mut Cpu {
        self.cpus.entry(cpu_number).or_insert_with(|| Cpu::new(cpu_number))
    }

    /// Drops CPUs that only appeared in the trace without recording any
    /// slice or counter sample.
    pub fn prune_empty_containers(&mut self) {
        self.cpus.retain(|_, cpu| !cpu.is_empty());
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for cpu in self.cpus.values_mut() {
            cpu.shift_timestamps_forward(amount);
        }
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for cpu in self.cpus.values_mut() {
            cpu.update_bounds();
            self.bounds.add_range(&cpu.bounds);
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.cpus.values().flat_map(|cpu| {
            cpu.slices
                .iter()
                .map(|s| s.category.as_str())
                .chain(cpu.counters.values().map(|c| c.category.as_str()))
        })
    }
}
