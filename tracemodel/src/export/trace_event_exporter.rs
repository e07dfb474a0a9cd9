//! Writes a [`TraceModel`] back out as trace-event JSON.
//!
//! Model time is milliseconds; the file format is microseconds, so every
//! timestamp and duration is multiplied by 1000 on the way out.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;

use crate::domain::{Args, ExportError, ThreadRef, Tid};
use crate::model::{AsyncSlice, AsyncStepKind, Counter, FlowPhase, InstantEvent, InstantScope, Process, Thread, TraceModel};

/// One record of the `traceEvents` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct ExportedEvent {
    name: String,
    cat: String,
    ph: &'static str,
    /// Microseconds
    ts: f64,
    pid: i64,
    tid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tdur: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    /// Instant event scope
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Args>,
}

impl ExportedEvent {
    fn new(ph: &'static str, name: &str, cat: &str, ts_ms: f64, thread: ThreadRef) -> Self {
        Self {
            name: name.to_string(),
            cat: cat.to_string(),
            ph,
            ts: to_us(ts_ms),
            pid: thread.pid.0,
            tid: thread.tid.0,
            dur: None,
            tts: None,
            tdur: None,
            id: None,
            s: None,
            args: None,
        }
    }

    fn with_args(mut self, args: &Args) -> Self {
        if !args.is_empty() {
            self.args = Some(args.clone());
        }
        self
    }

    fn metadata(name: &str, thread: ThreadRef, key: &str, value: Value) -> Self {
        let mut args = Args::new();
        args.insert(key.to_string(), value);
        Self { args: Some(args), ..Self::new("M", name, "__metadata", 0.0, thread) }
    }
}

fn to_us(ms: f64) -> f64 {
    ms * 1000.0
}

/// Collects the events of a model in trace-event form.
pub struct TraceEventExporter {
    events: Vec<ExportedEvent>,
    metadata: Map<String, Value>,
}

impl TraceEventExporter {
    #[must_use]
    pub fn new(model: &TraceModel) -> Self {
        let mut exporter = Self { events: Vec::new(), metadata: Map::new() };
        for process in model.processes.values() {
            exporter.add_process(process);
        }
        for instant in &model.instant_events {
            exporter.add_instant(instant, ThreadRef::new(0, 0));
        }
        exporter.add_flows(model);
        for entry in &model.metadata {
            if entry.name != "displayTimeUnit" {
                exporter.metadata.insert(entry.name.clone(), entry.value.clone());
            }
        }
        exporter
    }

    fn add_process(&mut self, process: &Process) {
        let process_ref = ThreadRef { pid: process.pid, tid: Tid(0) };
        if let Some(name) = &process.name {
            self.events.push(ExportedEvent::metadata("process_name", process_ref, "name", name.as_str().into()));
        }
        if !process.labels().is_empty() {
            let labels = process.labels().join(",");
            self.events.push(ExportedEvent::metadata("process_labels", process_ref, "labels", labels.into()));
        }
        if process.sort_index != 0 {
            self.events.push(ExportedEvent::metadata(
                "process_sort_index",
                process_ref,
                "sort_index",
                process.sort_index.into(),
            ));
        }

        for thread in process.threads.values() {
            self.add_thread(thread);
        }
        for counter in process.counters.values() {
            self.add_counter(counter, process_ref);
        }
        for instant in &process.instant_events {
            self.add_instant(instant, process_ref);
        }
        self.add_objects(process, process_ref);
    }

    fn add_thread(&mut self, thread: &Thread) {
        let thread_ref = thread.thread_ref();
        if let Some(name) = &thread.name {
            self.events.push(ExportedEvent::metadata("thread_name", thread_ref, "name", name.as_str().into()));
        }
        if thread.sort_index != 0 {
            self.events.push(ExportedEvent::metadata(
                "thread_sort_index",
                thread_ref,
                "sort_index",
                thread.sort_index.into(),
            ));
        }

        for slice in thread.slice_group.slices().iter().chain(thread.kernel_slice_group.slices()) {
            let mut event = ExportedEvent::new("X", &slice.title, &slice.category, slice.start, thread_ref)
                .with_args(&slice.args);
            event.dur = Some(to_us(slice.duration));
            event.tts = slice.thread_start.map(to_us);
            event.tdur = slice.thread_duration.map(to_us);
            self.events.push(event);
        }
        for sample in &thread.samples {
            self.events.push(
                ExportedEvent::new("P", &sample.title, &sample.category, sample.start, thread_ref).with_args(&sample.args),
            );
        }
        for instant in &thread.instant_events {
            self.add_instant(instant, thread_ref);
        }
        for slice in &thread.async_slice_group.slices {
            self.add_async_slice(slice);
        }
    }

    fn add_instant(&mut self, instant: &InstantEvent, thread: ThreadRef) {
        let mut event =
            ExportedEvent::new("i", &instant.title, &instant.category, instant.start, thread).with_args(&instant.args);
        event.s = Some(instant.scope.as_scope_char());
        if instant.scope == InstantScope::Global {
            event.pid = 0;
            event.tid = 0;
        }
        self.events.push(event);
    }

    /// One `C` record per sample, carrying every series' value.
    fn add_counter(&mut self, counter: &Counter, process: ThreadRef) {
        let name = match &counter.id {
            Some(id) => counter.name.strip_suffix(&format!("[{id}]")).unwrap_or(&counter.name),
            None => &counter.name,
        };
        for (index, &ts) in counter.timestamps().iter().enumerate() {
            let args: Args = counter
                .series
                .iter()
                .filter_map(|series| Some((series.name.clone(), series.values.get(index).copied()?.into())))
                .collect();
            let mut event = ExportedEvent::new("C", name, &counter.category, ts, process).with_args(&args);
            event.id.clone_from(&counter.id);
            self.events.push(event);
        }
    }

    /// `S`, then the steps in the form they were read (`T` before each
    /// later segment, or `p` after each earlier one), then `F`. Every step
    /// carries the args of the segment it labels.
    fn add_async_slice(&mut self, slice: &AsyncSlice) {
        let event = |ph: &'static str, ts: f64, thread: ThreadRef, args: &Args| {
            let mut event = ExportedEvent::new(ph, &slice.title, &slice.category, ts, thread).with_args(args);
            event.id = Some(slice.id.clone());
            event
        };
        self.events.push(event("S", slice.start, slice.start_thread, &slice.args));

        let segments = &slice.sub_slices;
        match slice.step_kind {
            Some(AsyncStepKind::Begin) => {
                for segment in segments.iter().skip(1) {
                    self.events.push(event("T", segment.start, segment.start_thread, &segment.args));
                }
            }
            Some(AsyncStepKind::Past) => {
                for segment in segments.iter().take(segments.len().saturating_sub(1)) {
                    self.events.push(event("p", segment.end(), segment.end_thread, &segment.args));
                }
            }
            None => {}
        }

        let finish_args = segments.last().map_or_else(Args::new, |segment| segment.args.clone());
        self.events.push(event("F", slice.end(), slice.end_thread, &finish_args));
    }

    fn add_flows(&mut self, model: &TraceModel) {
        for flow in &model.flow_events {
            let ph = match flow.phase {
                FlowPhase::Start => "s",
                FlowPhase::Step => "t",
                FlowPhase::Finish => "f",
            };
            let mut event = ExportedEvent::new(ph, &flow.title, &flow.category, flow.start, flow.thread)
                .with_args(&flow.args);
            event.id = Some(flow.id.clone());
            self.events.push(event);
        }
    }

    /// Explicit object events only; implicit snapshots travel inside their
    /// containing snapshot.
    fn add_objects(&mut self, process: &Process, process_ref: ThreadRef) {
        for instance in process.objects.all_instances() {
            let object_event = |ph, ts| {
                let mut event = ExportedEvent::new(ph, &instance.name, &instance.category, ts, process_ref);
                event.id = Some(instance.id.clone());
                event
            };
            if instance.creation_ts_was_explicit {
                self.events.push(object_event("N", instance.creation_ts));
            }
            for snapshot in instance.snapshots.iter().filter(|s| s.containing_snapshot.is_none()) {
                let mut payload = snapshot.args.clone();
                if let (Some(base_type), Value::Object(map)) = (&instance.base_type, &mut payload) {
                    map.insert("base_type".to_string(), base_type.as_str().into());
                }
                let mut args = Args::new();
                args.insert("snapshot".to_string(), payload);
                let mut event = object_event("O", snapshot.ts);
                event.args = Some(args);
                self.events.push(event);
            }
            if instance.deletion_ts_was_explicit {
                self.events.push(object_event("D", instance.deletion_ts));
            }
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// The whole trace as a JSON object.
    ///
    /// # Errors
    /// Returns [`ExportError::Json`] if an event cannot be serialized.
    pub fn to_value(&self) -> Result<Value, ExportError> {
        let mut trace = self.metadata.clone();
        trace.insert("traceEvents".to_string(), serde_json::to_value(&self.events)?);
        trace.insert("displayTimeUnit".to_string(), "ms".into());
        Ok(Value::Object(trace))
    }

    /// Writes the trace to any writer (file, stdout, buffer).
    ///
    /// # Errors
    /// Returns [`ExportError`] when serialization or the write fails.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut writer, &self.to_value()?)?;
        writer.flush()?;
        Ok(())
    }
}
