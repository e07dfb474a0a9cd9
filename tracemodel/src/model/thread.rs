//! Threads: everything recorded against one tid of one process.

use log::debug;
use serde::Serialize;
use std::cmp::Ordering;

use super::async_slice::AsyncSliceGroup;
use super::instant_event::InstantEvent;
use super::sample::Sample;
use super::slice::Slice;
use super::slice_group::SliceGroup;
use crate::base::{find_low_index_in_sorted_intervals, Range};
use crate::domain::{Args, ModelError, Pid, ThreadRef, Tid};

#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub pid: Pid,
    pub tid: Tid,
    pub name: Option<String>,
    pub sort_index: i64,
    pub slice_group: SliceGroup,
    pub kernel_slice_group: SliceGroup,
    pub async_slice_group: AsyncSliceGroup,
    /// Scheduling states (Running, Sleeping, ...) sorted by start.
    pub time_slices: Vec<Slice>,
    pub samples: Vec<Sample>,
    pub instant_events: Vec<InstantEvent>,
    pub bounds: Range,
}

impl Thread {
    pub fn new(pid: Pid, tid: Tid) -> Self {
        Self {
            pid,
            tid,
            name: None,
            sort_index: 0,
            slice_group: SliceGroup::new(),
            kernel_slice_group: SliceGroup::new(),
            async_slice_group: AsyncSliceGroup::new(),
            time_slices: Vec::new(),
            samples: Vec::new(),
            instant_events: Vec::new(),
            bounds: Range::new(),
        }
    }

    pub fn thread_ref(&self) -> ThreadRef {
        ThreadRef { pid: self.pid, tid: self.tid }
    }

    /// Appends a sample; samples must arrive in non-decreasing time order.
    pub fn add_sample(&mut self, category: &str, title: &str, ts: f64, args: Args) -> Result<&Sample, ModelError> {
        if self.samples.last().is_some_and(|last| ts < last.start) {
            return Err(ModelError::SampleOutOfOrder);
        }
        self.samples.push(Sample::new(category, title, ts, args));
        let last = self.samples.len() - 1;
        Ok(&self.samples[last])
    }

    pub fn is_empty(&self) -> bool {
        self.slice_group.is_empty()
            && self.slice_group.open_slice_count() == 0
            && self.kernel_slice_group.is_empty()
            && self.kernel_slice_group.open_slice_count() == 0
            && self.async_slice_group.is_empty()
            && self.time_slices.is_empty()
            && self.samples.is_empty()
            && self.instant_events.is_empty()
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        self.slice_group.shift_timestamps_forward(amount);
        self.kernel_slice_group.shift_timestamps_forward(amount);
        self.async_slice_group.shift_timestamps_forward(amount);
        for slice in &mut self.time_slices {
            slice.start += amount;
        }
        for sample in &mut self.samples {
            sample.start += amount;
        }
        for event in &mut self.instant_events {
            event.start += amount;
        }
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();

        self.slice_group.update_bounds();
        self.bounds.add_range(&self.slice_group.bounds);
        self.kernel_slice_group.update_bounds();
        self.bounds.add_range(&self.kernel_slice_group.bounds);
        self.async_slice_group.update_bounds();
        self.bounds.add_range(&self.async_slice_group.bounds);

        if let (Some(first), Some(last)) = (self.time_slices.first(), self.time_slices.last()) {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.end());
        }
        if let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.start);
        }
        for event in &self.instant_events {
            self.bounds.add_value(event.start);
        }
    }

    pub fn auto_close_open_slices(&mut self, max_timestamp: Option<f64>) {
        self.slice_group.auto_close_open_slices(max_timestamp);
        self.kernel_slice_group.auto_close_open_slices(max_timestamp);
    }

    /// Folds the kernel slices into the userland slice group.
    pub fn merge_kernel_with_userland(&mut self) -> Result<(), ModelError> {
        if self.kernel_slice_group.is_empty() {
            return Ok(());
        }
        debug!(
            "merging {} kernel slices into {}",
            self.kernel_slice_group.len(),
            self.thread_ref()
        );
        self.slice_group = SliceGroup::merge(&self.slice_group, &self.kernel_slice_group)?;
        self.kernel_slice_group = SliceGroup::new();
        self.update_bounds();
        Ok(())
    }

    pub fn create_sub_slices(&mut self) {
        self.slice_group.create_sub_slices();
    }

    /// The thread's name, or its tid when it has none.
    pub fn user_friendly_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.tid.0.to_string())
    }

    pub fn user_friendly_details(&self) -> String {
        match &self.name {
            Some(name) => format!("tid: {}, name: {}", self.tid.0, name),
            None => format!("tid: {}", self.tid.0),
        }
    }

    /// Index of the time slice covering `ts`.
    pub fn time_slice_at(&self, ts: f64) -> Option<usize> {
        find_low_index_in_sorted_intervals(&self.time_slices, |s| s.start, |s, _| s.duration, ts).found()
    }

    /// Orders threads of the same process: sort index, then named threads by
    /// name before unnamed ones, then tid.
    pub fn compare(&self, other: &Thread) -> Ordering {
        self.sort_index
            .cmp(&other.sort_index)
            .then_with(|| match (&self.name, &other.name) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then(self.tid.cmp(&other.tid))
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.slice_group
            .slices()
            .iter()
            .map(|s| s.category.as_str())
            .chain(self.kernel_slice_group.slices().iter().map(|s| s.category.as_str()))
            .chain(self.async_slice_group.slices.iter().map(|s| s.category.as_str()))
            .chain(self.samples.iter().map(|s| s.category.as_str()))
            .chain(self.instant_events.iter().map(|e| e.category.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread() -> Thread {
        Thread::new(Pid(1), Tid(2))
    }

    #[test]
    fn test_samples_must_be_ordered() {
        let mut t = thread();
        t.add_sample("cpu", "a", 2.0, Args::new()).unwrap();
        t.add_sample("cpu", "b", 2.0, Args::new()).unwrap();
        assert_eq!(t.add_sample("cpu", "c", 1.0, Args::new()).unwrap_err(), ModelError::SampleOutOfOrder);
        assert_eq!(t.samples.len(), 2);
    }

    #[test]
    fn test_is_empty_counts_open_slices() {
        let mut t = thread();
        assert!(t.is_empty());
        t.slice_group.begin_slice("", "open", 1.0, Args::new(), None).unwrap();
        assert!(!t.is_empty());

        let mut kernel_only = thread();
        kernel_only.kernel_slice_group.begin_slice("", "do_sys_open", 1.0, Args::new(), None).unwrap();
        assert!(!kernel_only.is_empty());
    }

    #[test]
    fn test_bounds_cover_every_group() {
        let mut t = thread();
        t.slice_group.push_complete_slice("", "a", 2.0, Some(1.0), None, None, Args::new());
        t.time_slices.push(Slice::new("", "Running", 0.5, Args::new()).with_duration(1.0));
        t.add_sample("", "s", 9.0, Args::new()).unwrap();
        t.update_bounds();
        assert_eq!(t.bounds.min(), Some(0.5));
        assert_eq!(t.bounds.max(), Some(9.0));
    }

    #[test]
    fn test_merge_kernel_with_userland_empties_kernel_group() {
        let mut t = thread();
        t.slice_group.push_complete_slice("", "user", 0.0, Some(10.0), None, None, Args::new());
        t.kernel_slice_group.push_complete_slice("", "sys_read", 1.0, Some(1.0), None, None, Args::new());
        t.merge_kernel_with_userland().unwrap();
        assert!(t.kernel_slice_group.is_empty());
        assert_eq!(t.slice_group.len(), 2);
        assert_eq!(t.slice_group.slices()[1].parent, Some(0));
    }

    #[test]
    fn test_time_slice_at() {
        let mut t = thread();
        t.time_slices.push(Slice::new("", "Running", 0.0, Args::new()).with_duration(2.0));
        t.time_slices.push(Slice::new("", "Sleeping", 2.0, Args::new()).with_duration(3.0));
        assert_eq!(t.time_slice_at(1.0), Some(0));
        assert_eq!(t.time_slice_at(4.0), Some(1));
        assert_eq!(t.time_slice_at(6.0), None);
    }

    #[test]
    fn test_compare_and_names() {
        let mut a = thread();
        let mut b = Thread::new(Pid(1), Tid(1));
        assert_eq!(a.user_friendly_name(), "2");
        assert_eq!(a.compare(&b), Ordering::Greater);
        a.name = Some("CrBrowserMain".to_string());
        assert_eq!(a.compare(&b), Ordering::Less);
        b.sort_index = -1;
        assert_eq!(a.compare(&b), Ordering::Greater);
        assert_eq!(a.user_friendly_details(), "tid: 2, name: CrBrowserMain");
    }
}
