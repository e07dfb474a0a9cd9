//! Processes: threads, counters, instant events and objects of one pid.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::counter::Counter;
use super::instant_event::InstantEvent;
use super::object_collection::ObjectCollection;
use super::thread::Thread;
use crate::base::Range;
use crate::domain::{Pid, Tid};

#[derive(Debug, Clone, Serialize)]
pub struct Process {
    pub pid: Pid,
    pub name: Option<String>,
    labels: Vec<String>,
    pub sort_index: i64,
    pub threads: BTreeMap<Tid, Thread>,
    /// Keyed by `category.name`.
    pub counters: BTreeMap<String, Counter>,
    pub instant_events: Vec<InstantEvent>,
    pub objects: ObjectCollection,
    pub bounds: Range,
}

impl Process {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            name: None,
            labels: Vec::new(),
            sort_index: 0,
            threads: BTreeMap::new(),
            counters: BTreeMap::new(),
            instant_events: Vec::new(),
            objects: ObjectCollection::new(),
            bounds: Range::new(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Adds a label unless the process already carries it.
    pub fn push_label(&mut self, label: &str) {
        if !self.labels.iter().any(|l| l == label) {
            self.labels.push(label.to_string());
        }
    }

    pub fn get_or_create_thread(&mut self, tid: Tid) -> &mut Thread {
        let pid = self.pid;
        self.threads.entry(tid).or_insert_with(|| Thread::new(pid, tid))
    }

    pub fn get_or_create_counter(&mut self, category: &str, name: &str) -> &mut Counter {
        self.counters
            .entry(format!("{category}.{name}"))
            .or_insert_with(|| Counter::new(category, name, None))
    }

    pub fn find_all_threads_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Thread> + 'a {
        self.threads.values().filter(move |t| t.name.as_deref() == Some(name))
    }

    /// Drops threads that hold no data.
    pub fn prune_empty_containers(&mut self) {
        self.threads.retain(|_, thread| !thread.is_empty());
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for thread in self.threads.values_mut() {
            thread.shift_timestamps_forward(amount);
        }
        for counter in self.counters.values_mut() {
            counter.shift_timestamps_forward(amount);
        }
        for event in &mut self.instant_events {
            event.start += amount;
        }
        self.objects.shift_timestamps_forward(amount);
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for thread in self.threads.values_mut() {
            thread.update_bounds();
            self.bounds.add_range(&thread.bounds);
        }
        for counter in self.counters.values_mut() {
            counter.update_bounds();
            self.bounds.add_range(&counter.bounds);
        }
        for event in &self.instant_events {
            self.bounds.add_value(event.start);
        }
        self.objects.update_bounds();
        self.bounds.add_range(&self.objects.bounds);
    }

    pub fn auto_close_open_slices(&mut self, max_timestamp: Option<f64>) {
        for thread in self.threads.values_mut() {
            thread.auto_close_open_slices(max_timestamp);
        }
    }

    pub fn create_sub_slices(&mut self) {
        for thread in self.threads.values_mut() {
            thread.create_sub_slices();
        }
    }

    pub fn user_friendly_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} (pid {})", self.pid.0),
            None => format!("Process {}", self.pid.0),
        }
    }

    /// Orders processes by sort index, then name (named first), then pid.
    pub fn compare(&self, other: &Process) -> Ordering {
        self.sort_index
            .cmp(&other.sort_index)
            .then_with(|| match (&self.name, &other.name) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then(self.pid.cmp(&other.pid))
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.threads
            .values()
            .flat_map(Thread::categories)
            .chain(self.counters.values().map(|c| c.category.as_str()))
            .chain(self.instant_events.iter().map(|e| e.category.as_str()))
            .chain(self.objects.all_instances().map(|o| o.category.as_str()))
    }
}
