//! The in-memory trace model and the import pipeline that builds it.
//!
//! A [`TraceModel`] owns a [`Kernel`] (per-CPU data) and a map of
//! [`Process`]es, each owning its [`Thread`]s, counters and objects.
//! Importers fill it in stages; [`TraceModel::from_traces`] runs those stages
//! in a fixed order so the finished model always satisfies the nesting and
//! ordering invariants documented on [`SliceGroup`].

pub mod async_slice;
pub mod counter;
pub mod flow_event;
pub mod instant_event;
pub mod kernel;
pub mod object_collection;
pub mod object_instance;
pub mod process;
pub mod sample;
pub mod slice;
pub mod slice_group;
pub mod thread;

pub use async_slice::{AsyncSlice, AsyncSliceGroup, AsyncStepKind};
pub use counter::{Counter, CounterSeries};
pub use flow_event::{FlowEvent, FlowPhase};
pub use instant_event::{InstantEvent, InstantScope};
pub use kernel::{Cpu, Kernel};
pub use object_collection::{ObjectCollection, SnapshotRef};
pub use object_instance::{ObjectInstance, ObjectSnapshot, TimeToObjectInstanceMap};
pub use process::Process;
pub use sample::Sample;
pub use slice::{ResolvedRef, Slice};
pub use slice_group::SliceGroup;
pub use thread::Thread;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::base::Range;
use crate::config::ImportOptions;
use crate::domain::{ImportError, ImportWarning, Pid, ThreadRef, WarningKind};
use crate::import::{create_importer, Importer, TraceInput};

/// A container-level field of a JSON trace (anything besides `traceEvents`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataEntry {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Default, Serialize)]
pub struct TraceModel {
    pub kernel: Kernel,
    pub processes: BTreeMap<Pid, Process>,
    pub metadata: Vec<MetadataEntry>,
    pub categories: Vec<String>,
    pub bounds: Range,
    /// Global-scope instant events.
    pub instant_events: Vec<InstantEvent>,
    pub flow_events: Vec<FlowEvent>,
    /// `(previous, next)` indices into `flow_events`.
    flow_pairs: Vec<(usize, usize)>,
    /// Longest `next.start - previous.start` over `flow_pairs`.
    #[serde(skip)]
    max_flow_span: f64,
    import_warnings: Vec<ImportWarning>,
    #[serde(skip)]
    reported_warning_kinds: HashSet<WarningKind>,
}

impl TraceModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports `traces` into a fresh model.
    ///
    /// Malformed content inside a trace is recorded as import warnings; only
    /// data that no importer recognises (or JSON that fails to parse) is an
    /// error.
    pub fn from_traces(traces: Vec<TraceInput>, options: &ImportOptions) -> Result<TraceModel, ImportError> {
        let mut model = TraceModel::new();
        model.import_traces(traces, options)?;
        Ok(model)
    }

    fn import_traces(&mut self, traces: Vec<TraceInput>, options: &ImportOptions) -> Result<(), ImportError> {
        debug!("creating importers for {} traces", traces.len());
        let mut importers: Vec<Box<dyn Importer>> =
            traces.into_iter().map(create_importer).collect::<Result<_, _>>()?;

        // Sub-traces may themselves carry sub-traces.
        let mut i = 0;
        while i < importers.len() {
            for subtrace in importers[i].extract_subtraces() {
                importers.push(create_importer(subtrace)?);
            }
            i += 1;
        }
        importers.sort_by_key(|imp| imp.import_priority());

        let total = importers.len();
        for (index, importer) in importers.iter_mut().enumerate() {
            debug!("importing {} of {total} ({})", index + 1, importer.name());
            importer.import_events(self, index > 0);
        }

        debug!("autoclosing open slices");
        self.update_bounds();
        let max = self.bounds.max();
        for process in self.processes.values_mut() {
            process.auto_close_open_slices(max);
            process.create_sub_slices();
        }

        for importer in &mut importers {
            importer.finalize_import(self);
        }

        if options.prune_empty_containers {
            debug!("pruning empty containers");
            self.kernel.prune_empty_containers();
            for process in self.processes.values_mut() {
                process.prune_empty_containers();
            }
        }

        debug!("merging kernel with userland");
        let mut merge_failures = Vec::new();
        for process in self.processes.values_mut() {
            for thread in process.threads.values_mut() {
                if let Err(err) = thread.merge_kernel_with_userland() {
                    merge_failures.push(format!("{}: {err}", thread.thread_ref()));
                }
            }
        }
        for message in merge_failures {
            self.import_warning(WarningKind::MergeError, message);
        }

        self.update_bounds();
        self.update_categories();
        if options.shift_world_to_zero {
            self.shift_world_to_zero();
        }

        self.build_flow_index();

        debug!("joining object refs");
        for importer in &mut importers {
            importer.join_refs(self);
        }

        if let Some(max) = self.bounds.max() {
            for process in self.processes.values_mut() {
                process.objects.auto_delete_objects(max);
            }
        }

        info!(
            "imported {} processes, {} threads, {} warnings",
            self.processes.len(),
            self.all_threads().count(),
            self.import_warnings.len()
        );
        Ok(())
    }

    pub fn get_or_create_process(&mut self, pid: Pid) -> &mut Process {
        self.processes.entry(pid).or_insert_with(|| Process::new(pid))
    }

    pub fn thread(&self, thread: ThreadRef) -> Option<&Thread> {
        self.processes.get(&thread.pid)?.threads.get(&thread.tid)
    }

    pub fn thread_mut(&mut self, thread: ThreadRef) -> Option<&mut Thread> {
        self.processes.get_mut(&thread.pid)?.threads.get_mut(&thread.tid)
    }

    pub fn all_processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    pub fn all_threads(&self) -> impl Iterator<Item = &Thread> {
        self.processes.values().flat_map(|p| p.threads.values())
    }

    /// Kernel (per-CPU) counters first, then process counters.
    pub fn all_counters(&self) -> impl Iterator<Item = &Counter> {
        self.kernel
            .cpus
            .values()
            .flat_map(|cpu| cpu.counters.values())
            .chain(self.processes.values().flat_map(|p| p.counters.values()))
    }

    pub fn find_all_threads_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Thread> + 'a {
        self.processes.values().flat_map(move |p| p.find_all_threads_named(name))
    }

    /// Processes in display order.
    pub fn sorted_processes(&self) -> Vec<&Process> {
        let mut processes: Vec<&Process> = self.processes.values().collect();
        processes.sort_by(|a, b| a.compare(b));
        processes
    }

    /// Threads in display order: by owning process, then by thread.
    pub fn sorted_threads(&self) -> Vec<&Thread> {
        self.sorted_processes()
            .into_iter()
            .flat_map(|p| {
                let mut threads: Vec<&Thread> = p.threads.values().collect();
                threads.sort_by(|a, b| a.compare(b));
                threads
            })
            .collect()
    }

    pub fn push_instant_event(&mut self, event: InstantEvent) {
        self.instant_events.push(event);
    }

    pub fn push_flow_event(&mut self, event: FlowEvent) -> usize {
        self.flow_events.push(event);
        self.flow_events.len() - 1
    }

    /// Links two flow events into a flow pair.
    pub fn link_flow_events(&mut self, previous: usize, next: usize) {
        self.flow_events[previous].next = Some(next);
        self.flow_events[next].previous = Some(previous);
        self.flow_pairs.push((previous, next));
    }

    pub fn flow_pairs(&self) -> &[(usize, usize)] {
        &self.flow_pairs
    }

    fn build_flow_index(&mut self) {
        let events = &self.flow_events;
        self.flow_pairs
            .sort_by(|a, b| events[a.0].start.total_cmp(&events[b.0].start));
        self.max_flow_span = self
            .flow_pairs
            .iter()
            .map(|&(prev, next)| events[next].start - events[prev].start)
            .fold(0.0, f64::max);
    }

    /// Flow pairs whose span `[previous.start, next.start]` overlaps
    /// `[lo, hi]`.
    ///
    /// Pairs starting before `lo - max_flow_span` cannot reach `lo`, so only
    /// the slice between the two binary searches is scanned.
    pub fn flow_pairs_in_range(&self, lo: f64, hi: f64) -> impl Iterator<Item = (usize, usize)> + '_ {
        let prev_start = |&(prev, _): &(usize, usize)| self.flow_events[prev].start;
        let begin = self.flow_pairs.partition_point(|pair| prev_start(pair) < lo - self.max_flow_span);
        let end = self.flow_pairs.partition_point(|pair| prev_start(pair) <= hi);
        self.flow_pairs[begin..end.max(begin)]
            .iter()
            .copied()
            .filter(move |&(_, next)| self.flow_events[next].start >= lo)
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        self.kernel.update_bounds();
        self.bounds.add_range(&self.kernel.bounds);
        for process in self.processes.values_mut() {
            process.update_bounds();
            self.bounds.add_range(&process.bounds);
        }
        for event in &self.instant_events {
            self.bounds.add_value(event.start);
        }
    }

    pub fn update_categories(&mut self) {
        let categories: BTreeSet<&str> = self
            .kernel
            .categories()
            .chain(self.processes.values().flat_map(Process::categories))
            .chain(self.instant_events.iter().map(|e| e.category.as_str()))
            .filter(|c| !c.is_empty())
            .collect();
        self.categories = categories.into_iter().map(str::to_string).collect();
    }

    /// Moves every timestamp so the model starts at 0.
    pub fn shift_world_to_zero(&mut self) {
        let Some(time_base) = self.bounds.min() else {
            return;
        };
        self.kernel.shift_timestamps_forward(-time_base);
        for process in self.processes.values_mut() {
            process.shift_timestamps_forward(-time_base);
        }
        for event in &mut self.instant_events {
            event.start -= time_base;
        }
        for event in &mut self.flow_events {
            event.start -= time_base;
        }
        self.update_bounds();
    }

    /// Records a warning. Only the first warning of each kind is logged.
    pub fn import_warning(&mut self, kind: WarningKind, message: impl Into<String>) {
        let warning = ImportWarning::new(kind, message);
        if self.reported_warning_kinds.insert(kind) {
            warn!("{}", warning.message);
        }
        self.import_warnings.push(warning);
    }

    pub fn has_import_warnings(&self) -> bool {
        !self.import_warnings.is_empty()
    }

    pub fn import_warnings(&self) -> &[ImportWarning] {
        &self.import_warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Args, Tid};

    #[test]
    fn test_import_warning_accumulates() {
        let mut model = TraceModel::new();
        assert!(!model.has_import_warnings());
        model.import_warning(WarningKind::ParseError, "first");
        model.import_warning(WarningKind::ParseError, "second");
        model.import_warning(WarningKind::CounterParseError, "third");
        assert_eq!(model.import_warnings().len(), 3);
        assert_eq!(model.reported_warning_kinds.len(), 2);
    }

    #[test]
    fn test_bounds_shift_and_categories() {
        let mut model = TraceModel::new();
        let thread = model.get_or_create_process(Pid(1)).get_or_create_thread(Tid(1));
        thread
            .slice_group
            .push_complete_slice("foo", "a", 100.0, Some(10.0), None, None, Args::new());
        model.push_instant_event(InstantEvent::new(InstantScope::Global, "bar", "mark", 150.0, Args::new()));

        model.update_bounds();
        assert_eq!(model.bounds.min(), Some(100.0));
        assert_eq!(model.bounds.max(), Some(150.0));

        model.update_categories();
        assert_eq!(model.categories, vec!["bar".to_string(), "foo".to_string()]);

        model.shift_world_to_zero();
        assert_eq!(model.bounds.min(), Some(0.0));
        assert_eq!(model.instant_events[0].start, 50.0);
        assert_eq!(model.thread(ThreadRef::new(1, 1)).unwrap().slice_group.slices()[0].start, 0.0);
    }

    #[test]
    fn test_flow_pairs_in_range() {
        let mut model = TraceModel::new();
        let t = ThreadRef::new(1, 1);
        let mut push = |ts| model_push(&mut model, t, ts);
        let a = push(1.0);
        let b = push(3.0);
        let c = push(10.0);
        let d = push(12.0);
        model.link_flow_events(c, d);
        model.link_flow_events(a, b);
        model.build_flow_index();

        assert_eq!(model.flow_pairs(), &[(a, b), (c, d)]);
        assert_eq!(model.flow_pairs_in_range(2.0, 4.0).collect::<Vec<_>>(), vec![(a, b)]);
        assert_eq!(model.flow_pairs_in_range(4.0, 9.0).count(), 0);
        assert_eq!(model.flow_pairs_in_range(0.0, 20.0).count(), 2);
        assert_eq!(model.flow_events[a].next, Some(b));
        assert_eq!(model.flow_events[b].previous, Some(a));
    }

    #[test]
    fn test_flow_pairs_in_range_skips_pairs_ending_before_window() {
        let mut model = TraceModel::new();
        let t = ThreadRef::new(1, 1);
        let mut pairs = Vec::new();
        for i in 0..100 {
            let start = f64::from(i) * 10.0;
            let prev = model_push(&mut model, t, start);
            let next = model_push(&mut model, t, start + 2.0);
            model.link_flow_events(prev, next);
            pairs.push((prev, next));
        }
        let long_prev = model_push(&mut model, t, 5.0);
        let long_next = model_push(&mut model, t, 505.0);
        model.link_flow_events(long_prev, long_next);
        model.build_flow_index();

        let mut found: Vec<_> = model.flow_pairs_in_range(501.0, 511.0).collect();
        found.sort_unstable();
        let mut expected = vec![pairs[50], pairs[51], (long_prev, long_next)];
        expected.sort_unstable();
        assert_eq!(found, expected);
        assert_eq!(model.flow_pairs_in_range(2000.0, 3000.0).count(), 0);
        assert_eq!(model.flow_pairs_in_range(-10.0, -1.0).count(), 0);
    }

    fn model_push(model: &mut TraceModel, thread: ThreadRef, ts: f64) -> usize {
        model.push_flow_event(FlowEvent::new("", "1", "flow", FlowPhase::Step, ts, thread, Args::new()))
    }

    #[test]
    fn test_all_counters_and_thread_lookup() {
        let mut model = TraceModel::new();
        model.kernel.get_or_create_cpu(crate::domain::CpuId(0)).get_or_create_counter("", "Clock Frequency");
        model.get_or_create_process(Pid(3)).get_or_create_counter("cat", "ctr");
        model.get_or_create_process(Pid(3)).get_or_create_thread(Tid(4)).name = Some("worker".to_string());
        assert_eq!(model.all_counters().count(), 2);
        assert_eq!(model.find_all_threads_named("worker").count(), 1);
        assert!(model.thread(ThreadRef::new(3, 4)).is_some());
        assert!(model.thread(ThreadRef::new(3, 5)).is_none());
    }
}
