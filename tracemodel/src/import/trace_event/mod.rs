//! Importer for the JSON trace-event format.
//!
//! Accepts either a bare array of events or a container object with a
//! `traceEvents` array. Events that need the whole trace before they can be
//! interpreted (async slices, flows, objects) are collected during import
//! and turned into model content in [`Importer::finalize_import`].

mod async_slices;
mod flows;
mod objects;
pub mod record;

use log::debug;
use serde_json::Value;

use super::{Importer, TraceInput};
use crate::domain::{ImportError, ThreadRef, WarningKind};
use crate::model::{InstantEvent, InstantScope, MetadataEntry, TraceModel};
use record::TraceEventRecord;

/// An event held back until finalization, with its arrival order.
#[derive(Debug, Clone)]
pub(crate) struct DeferredEvent {
    pub sequence: usize,
    pub record: TraceEventRecord,
    pub thread: ThreadRef,
}

/// Stable sort by timestamp, arrival order breaking ties.
pub(crate) fn sort_deferred(events: &mut [DeferredEvent]) {
    events.sort_by(|x, y| x.record.ts.total_cmp(&y.record.ts).then(x.sequence.cmp(&y.sequence)));
}

#[derive(Debug, Default)]
pub struct TraceEventImporter {
    events: Vec<Value>,
    system_trace_events: Option<String>,
    container_metadata: Vec<MetadataEntry>,
    async_events: Vec<DeferredEvent>,
    flow_events: Vec<DeferredEvent>,
    object_events: Vec<DeferredEvent>,
}

impl TraceEventImporter {
    pub fn can_import(input: &TraceInput) -> bool {
        match input {
            TraceInput::Text(text) => {
                let text = text.trim_start();
                text.starts_with('[') || text.starts_with('{')
            }
            TraceInput::Json(Value::Array(events)) => events.first().is_some_and(|e| e.get("ph").is_some()),
            TraceInput::Json(Value::Object(container)) => {
                container.get("traceEvents").is_some_and(Value::is_array)
            }
            TraceInput::Json(_) => false,
        }
    }

    /// Parses the input. Text beginning with `[` is forgiven a missing
    /// closing bracket or a trailing comma, which tracers that stop
    /// mid-write leave behind.
    ///
    /// # Errors
    /// Returns [`ImportError::Json`] when the text is not valid JSON.
    pub fn new(input: TraceInput) -> Result<Self, ImportError> {
        let value = match input {
            TraceInput::Text(text) => serde_json::from_str(&repair_truncated_array(&text))?,
            TraceInput::Json(value) => value,
        };

        let mut importer = Self::default();
        match value {
            Value::Array(events) => importer.events = events,
            Value::Object(container) if container.contains_key("traceEvents") => {
                for (name, value) in container {
                    match name.as_str() {
                        "traceEvents" => {
                            if let Value::Array(events) = value {
                                importer.events = events;
                            }
                        }
                        "systemTraceEvents" => {
                            importer.system_trace_events = value.as_str().map(str::to_string);
                        }
                        _ => importer.container_metadata.push(MetadataEntry { name, value }),
                    }
                }
            }
            _ => debug!("trace-event input has no traceEvents array"),
        }
        Ok(importer)
    }

    fn process_duration_event(model: &mut TraceModel, event: &TraceEventRecord) {
        let ts = event.ts_ms();
        let thread = model.get_or_create_process(event.pid).get_or_create_thread(event.tid);
        if !thread.slice_group.is_timestamp_valid_for_begin_or_end(ts) {
            model.import_warning(WarningKind::DurationParseError, "Timestamps are moving backward.");
            return;
        }

        if event.ph == "B" {
            // Ordering was checked above, so this cannot fail.
            let _ = thread
                .slice_group
                .begin_slice(&event.cat, event.title(), ts, event.args_map(), event.tts_ms());
            return;
        }

        if thread.slice_group.open_slice_count() == 0 {
            model.import_warning(
                WarningKind::DurationParseError,
                "E phase event without a matching B phase event.",
            );
            return;
        }

        let mut warnings = Vec::new();
        match thread.slice_group.end_slice(ts, event.tts_ms()) {
            Ok(slice) => {
                if let Some(name) = &event.name {
                    if !name.is_empty() && slice.title != *name {
                        warnings.push((
                            WarningKind::TitleMatchError,
                            format!(
                                "Titles do not match. Title is {} in openSlice, and is {} in endSlice",
                                slice.title, name
                            ),
                        ));
                    }
                }
                for (key, value) in event.args_map() {
                    if slice.args.contains_key(&key) {
                        warnings.push((
                            WarningKind::DurationParseError,
                            format!(
                                "Both the B and E phases of {} provided values for argument {}. \
                                 The value of the E phase event will be used.",
                                slice.title, key
                            ),
                        ));
                    }
                    slice.args.insert(key, value);
                }
            }
            Err(err) => warnings.push((WarningKind::DurationParseError, err.to_string())),
        }
        for (kind, message) in warnings {
            model.import_warning(kind, message);
        }
    }

    fn process_complete_event(model: &mut TraceModel, event: &TraceEventRecord) {
        model
            .get_or_create_process(event.pid)
            .get_or_create_thread(event.tid)
            .slice_group
            .push_complete_slice(
                &event.cat,
                event.title(),
                event.ts_ms(),
                event.dur_ms(),
                event.tts_ms(),
                event.tdur_ms(),
                event.args_map(),
            );
    }

    fn process_instant_event(model: &mut TraceModel, event: &TraceEventRecord) {
        let scope = InstantScope::from_scope_char(event.scope.as_deref());
        let instant = InstantEvent::new(scope, &event.cat, event.title(), event.ts_ms(), event.args_map());
        match scope {
            InstantScope::Global => model.push_instant_event(instant),
            InstantScope::Process => model.get_or_create_process(event.pid).instant_events.push(instant),
            InstantScope::Thread => model
                .get_or_create_process(event.pid)
                .get_or_create_thread(event.tid)
                .instant_events
                .push(instant),
        }
    }

    fn process_sample_event(model: &mut TraceModel, event: &TraceEventRecord) {
        let result = model
            .get_or_create_process(event.pid)
            .get_or_create_thread(event.tid)
            .add_sample(&event.cat, event.title(), event.ts_ms(), event.args_map())
            .map(|_| ());
        if let Err(err) = result {
            model.import_warning(WarningKind::SampleParseError, err.to_string());
        }
    }

    fn process_counter_event(model: &mut TraceModel, event: &TraceEventRecord) {
        let counter_name = match &event.id {
            Some(id) => format!("{}[{}]", event.title(), id),
            None => event.title().to_string(),
        };
        let args = event.args_map();
        let process = model.get_or_create_process(event.pid);
        let counter = process.get_or_create_counter(&event.cat, &counter_name);
        counter.id.clone_from(&event.id);

        if counter.num_series() == 0 {
            for series_name in args.keys() {
                counter.add_series(series_name);
            }
            if counter.num_series() == 0 {
                process.counters.remove(&format!("{}.{}", event.cat, counter_name));
                model.import_warning(
                    WarningKind::CounterParseError,
                    format!(
                        "Expected counter {} to have at least one argument to use as a value.",
                        event.title()
                    ),
                );
                return;
            }
        }

        let ts = event.ts_ms();
        for series in &mut counter.series {
            let value = args.get(&series.name).and_then(Value::as_f64).unwrap_or(0.0);
            series.add_sample(ts, value);
        }
    }

    fn process_metadata_event(model: &mut TraceModel, event: &TraceEventRecord) {
        let string_arg = |key| event.arg(key).and_then(Value::as_str).map(str::to_string);
        let sort_index = || event.arg("sort_index").and_then(Value::as_i64).unwrap_or(0);
        match event.title() {
            "process_name" => model.get_or_create_process(event.pid).name = string_arg("name"),
            "process_labels" => {
                let process = model.get_or_create_process(event.pid);
                for label in string_arg("labels").unwrap_or_default().split(',') {
                    process.push_label(label);
                }
            }
            "process_sort_index" => model.get_or_create_process(event.pid).sort_index = sort_index(),
            "thread_name" => {
                model.get_or_create_process(event.pid).get_or_create_thread(event.tid).name = string_arg("name");
            }
            "thread_sort_index" => {
                model
                    .get_or_create_process(event.pid)
                    .get_or_create_thread(event.tid)
                    .sort_index = sort_index();
            }
            other => model.import_warning(
                WarningKind::MetadataParseError,
                format!("Unrecognized metadata name: {other}"),
            ),
        }
    }

    fn defer(model: &mut TraceModel, queue: &mut Vec<DeferredEvent>, record: TraceEventRecord) {
        let thread = record.thread();
        model.get_or_create_process(thread.pid).get_or_create_thread(thread.tid);
        queue.push(DeferredEvent { sequence: queue.len(), record, thread });
    }
}

impl Importer for TraceEventImporter {
    fn name(&self) -> &'static str {
        "trace_event"
    }

    fn import_priority(&self) -> u32 {
        1
    }

    fn extract_subtraces(&mut self) -> Vec<TraceInput> {
        self.system_trace_events.take().map(TraceInput::Text).into_iter().collect()
    }

    fn import_events(&mut self, model: &mut TraceModel, _is_secondary: bool) {
        model.metadata.append(&mut self.container_metadata);

        let events = std::mem::take(&mut self.events);
        debug!("importing {} trace events", events.len());
        for value in &events {
            let Some(event) = TraceEventRecord::from_value(value) else {
                model.import_warning(WarningKind::ParseError, format!("Event is not an object: {value}"));
                continue;
            };
            match event.ph.as_str() {
                "B" | "E" => Self::process_duration_event(model, &event),
                "X" => Self::process_complete_event(model, &event),
                "S" | "T" | "p" | "F" => Self::defer(model, &mut self.async_events, event),
                // I is the historic instant phase.
                "I" | "i" => Self::process_instant_event(model, &event),
                "P" => Self::process_sample_event(model, &event),
                "C" => Self::process_counter_event(model, &event),
                "M" => Self::process_metadata_event(model, &event),
                "N" | "O" | "D" => Self::defer(model, &mut self.object_events, event),
                "s" | "t" | "f" => Self::defer(model, &mut self.flow_events, event),
                ph => model.import_warning(
                    WarningKind::ParseError,
                    format!("Unrecognized event phase: {ph} ({})", event.title()),
                ),
            }
        }
    }

    fn finalize_import(&mut self, model: &mut TraceModel) {
        async_slices::create_async_slices(model, &mut self.async_events);
        flows::create_flow_events(model, &mut self.flow_events);
        objects::create_explicit_objects(model, &mut self.object_events);
        objects::create_implicit_objects(model);
    }

    fn join_refs(&mut self, model: &mut TraceModel) {
        objects::join_object_refs(model);
    }
}

/// Fixes up a `[`-prefixed event list whose writer never closed it.
fn repair_truncated_array(text: &str) -> String {
    let text = text.trim_start();
    if !text.starts_with('[') {
        return text.to_string();
    }
    let mut repaired = text.trim_end_matches(['\r', '\n']).trim_end();
    if let Some(stripped) = repaired.strip_suffix(',') {
        repaired = stripped.trim_end();
    }
    let mut repaired = repaired.to_string();
    if !repaired.ends_with(']') {
        repaired.push(']');
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportOptions;
    use crate::domain::{Pid, Tid};
    use serde_json::json;

    fn import(events: Value) -> TraceModel {
        TraceModel::from_traces(vec![TraceInput::Json(events)], &ImportOptions::default()).unwrap()
    }

    fn import_unshifted(events: Value) -> TraceModel {
        let options = ImportOptions { shift_world_to_zero: false, ..ImportOptions::default() };
        TraceModel::from_traces(vec![TraceInput::Json(events)], &options).unwrap()
    }

    #[test]
    fn test_repair_truncated_array() {
        assert_eq!(repair_truncated_array("[{\"a\":1},\n"), "[{\"a\":1}]");
        assert_eq!(repair_truncated_array("  [{\"a\":1}]\n"), "[{\"a\":1}]");
        assert_eq!(repair_truncated_array("[{\"a\":1}\r\n"), "[{\"a\":1}]");
        assert_eq!(repair_truncated_array("{\"traceEvents\":[]}"), "{\"traceEvents\":[]}");
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let err = TraceEventImporter::new(TraceInput::from("{ not json")).unwrap_err();
        assert!(matches!(err, ImportError::Json(_)));
    }

    #[test]
    fn test_can_import() {
        assert!(TraceEventImporter::can_import(&TraceInput::from("  [")));
        assert!(TraceEventImporter::can_import(&TraceInput::from(json!([{"ph": "B"}]))));
        assert!(TraceEventImporter::can_import(&TraceInput::from(json!({"traceEvents": []}))));
        assert!(!TraceEventImporter::can_import(&TraceInput::from(json!({"events": []}))));
        assert!(!TraceEventImporter::can_import(&TraceInput::from("# tracer: nop")));
    }

    #[test]
    fn test_basic_begin_end() {
        let model = import(json!([
            {"name": "a", "args": {}, "pid": 52, "ts": 520, "cat": "foo", "tid": 53, "ph": "B"},
            {"name": "a", "args": {}, "pid": 52, "ts": 560, "cat": "foo", "tid": 53, "ph": "E"}
        ]));
        let thread = model.thread(ThreadRef::new(52, 53)).unwrap();
        let slice = &thread.slice_group.slices()[0];
        assert_eq!(slice.title, "a");
        assert_eq!(slice.category, "foo");
        assert_eq!(slice.start, 0.0);
        assert!((slice.duration - 0.04).abs() < 1e-9);
        assert!(!slice.did_not_finish);
        assert!(!model.has_import_warnings());
    }

    #[test]
    fn test_nested_slices() {
        let model = import(json!([
            {"name": "a", "pid": 1, "ts": 1, "tid": 1, "ph": "B"},
            {"name": "b", "pid": 1, "ts": 2, "tid": 1, "ph": "B"},
            {"name": "b", "pid": 1, "ts": 3, "tid": 1, "ph": "E"},
            {"name": "a", "pid": 1, "ts": 4, "tid": 1, "ph": "E"}
        ]));
        let group = &model.thread(ThreadRef::new(1, 1)).unwrap().slice_group;
        assert_eq!(group.slices()[0].title, "a");
        assert_eq!(group.slices()[1].title, "b");
        assert_eq!(group.slices()[1].parent, Some(0));
        assert_eq!(group.slices()[1].depth, 1);
    }

    #[test]
    fn test_unmatched_begin_auto_closes() {
        let model = import_unshifted(json!([
            {"name": "a", "pid": 1, "ts": 1000, "tid": 1, "ph": "B"},
            {"name": "b", "pid": 1, "ts": 5000, "tid": 2, "ph": "X", "dur": 1000}
        ]));
        let slice = &model.thread(ThreadRef::new(1, 1)).unwrap().slice_group.slices()[0];
        assert!(slice.did_not_finish);
        assert_eq!(slice.start, 1.0);
        assert_eq!(slice.end(), 6.0);
    }

    #[test]
    fn test_end_without_begin_and_backward_timestamps() {
        let model = import(json!([
            {"name": "a", "pid": 1, "ts": 1, "tid": 1, "ph": "E"},
            {"name": "b", "pid": 1, "ts": 10, "tid": 1, "ph": "B"},
            {"name": "c", "pid": 1, "ts": 5, "tid": 1, "ph": "B"},
            {"name": "b", "pid": 1, "ts": 12, "tid": 1, "ph": "E"}
        ]));
        let kinds: Vec<_> = model.import_warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::DurationParseError, WarningKind::DurationParseError]);
        assert_eq!(model.thread(ThreadRef::new(1, 1)).unwrap().slice_group.len(), 1);
    }

    #[test]
    fn test_end_args_merge_and_title_mismatch() {
        let model = import(json!([
            {"name": "a", "pid": 1, "ts": 1, "tid": 1, "ph": "B", "args": {"x": 1, "y": 2}},
            {"name": "b", "pid": 1, "ts": 2, "tid": 1, "ph": "E", "args": {"y": 3, "z": 4}}
        ]));
        let slice = &model.thread(ThreadRef::new(1, 1)).unwrap().slice_group.slices()[0];
        assert_eq!(slice.args["x"], 1);
        assert_eq!(slice.args["y"], 3);
        assert_eq!(slice.args["z"], 4);
        let kinds: Vec<_> = model.import_warnings().iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&WarningKind::TitleMatchError));
        assert!(kinds.contains(&WarningKind::DurationParseError));
    }

    #[test]
    fn test_complete_events_and_thread_times() {
        let model = import_unshifted(json!([
            {"name": "a", "pid": 1, "ts": 1000, "dur": 4000, "tts": 500, "tdur": 2000, "tid": 1, "ph": "X"},
            {"name": "b", "pid": 1, "ts": 2000, "dur": 1000, "tts": 1000, "tdur": 500, "tid": 1, "ph": "X"},
            {"name": "c", "pid": 1, "ts": 6000, "tid": 1, "ph": "X"}
        ]));
        let slices = model.thread(ThreadRef::new(1, 1)).unwrap().slice_group.slices();
        assert_eq!(slices[0].duration, 4.0);
        assert_eq!(slices[0].thread_duration, Some(2.0));
        assert_eq!(slices[0].self_time, 3.0);
        assert_eq!(slices[0].thread_self_time, Some(1.5));
        assert_eq!(slices[1].parent, Some(0));
        assert!(slices[2].did_not_finish);
    }

    #[test]
    fn test_instant_event_scopes() {
        let model = import(json!([
            {"name": "g", "pid": 1, "ts": 1, "tid": 1, "ph": "i", "s": "g"},
            {"name": "p", "pid": 1, "ts": 2, "tid": 1, "ph": "i", "s": "p"},
            {"name": "t", "pid": 1, "ts": 3, "tid": 1, "ph": "I"}
        ]));
        assert_eq!(model.instant_events.len(), 1);
        let process = &model.processes[&Pid(1)];
        assert_eq!(process.instant_events[0].title, "p");
        assert_eq!(process.threads[&Tid(1)].instant_events[0].title, "t");
        assert!(process.threads[&Tid(1)].slice_group.is_empty());
    }

    #[test]
    fn test_samples() {
        let model = import(json!([
            {"name": "a", "pid": 1, "ts": 10, "tid": 1, "ph": "P", "cat": "cpu"},
            {"name": "b", "pid": 1, "ts": 20, "tid": 1, "ph": "P", "cat": "cpu"},
            {"name": "c", "pid": 1, "ts": 5, "tid": 1, "ph": "P", "cat": "cpu"}
        ]));
        assert_eq!(model.thread(ThreadRef::new(1, 1)).unwrap().samples.len(), 2);
        assert_eq!(model.import_warnings()[0].kind, WarningKind::SampleParseError);
    }

    #[test]
    fn test_counters() {
        let model = import_unshifted(json!([
            {"name": "ctr", "pid": 1, "ts": 0, "ph": "C", "cat": "foo", "args": {"value": 0}},
            {"name": "ctr", "pid": 1, "ts": 10000, "ph": "C", "cat": "foo", "args": {"value": 10}},
            {"name": "ctr", "pid": 1, "ts": 20000, "ph": "C", "cat": "foo", "args": {"value": "x"}},
            {"name": "ctr", "pid": 1, "ts": 5000, "ph": "C", "cat": "foo", "id": 7, "args": {"a": 1, "b": 2}},
            {"name": "bad", "pid": 1, "ts": 5000, "ph": "C", "cat": "foo"}
        ]));
        let process = &model.processes[&Pid(1)];
        let ctr = &process.counters["foo.ctr"];
        assert_eq!(ctr.num_series(), 1);
        assert_eq!(ctr.timestamps(), &[0.0, 10.0, 20.0]);
        assert_eq!(ctr.series[0].values, vec![0.0, 10.0, 0.0]);

        let with_id = &process.counters["foo.ctr[7]"];
        assert_eq!(with_id.id.as_deref(), Some("7"));
        assert_eq!(with_id.num_series(), 2);
        assert_eq!(with_id.max_total(), 3.0);

        assert!(!process.counters.contains_key("foo.bad"));
        assert_eq!(model.import_warnings()[0].kind, WarningKind::CounterParseError);
    }

    #[test]
    fn test_metadata_events() {
        let model = import(json!([
            {"name": "process_name", "pid": 1, "ts": 0, "tid": 1, "ph": "M", "args": {"name": "Browser"}},
            {"name": "process_labels", "pid": 1, "ts": 0, "tid": 1, "ph": "M", "args": {"labels": "a,b,a"}},
            {"name": "process_sort_index", "pid": 1, "ts": 0, "tid": 1, "ph": "M", "args": {"sort_index": -3}},
            {"name": "thread_name", "pid": 1, "ts": 0, "tid": 2, "ph": "M", "args": {"name": "CrBrowserMain"}},
            {"name": "thread_sort_index", "pid": 1, "ts": 0, "tid": 2, "ph": "M", "args": {"sort_index": 4}},
            {"name": "a", "pid": 1, "ts": 1, "dur": 1, "tid": 2, "ph": "X"},
            {"name": "something_else", "pid": 1, "ts": 0, "tid": 1, "ph": "M", "args": {}}
        ]));
        let process = &model.processes[&Pid(1)];
        assert_eq!(process.name.as_deref(), Some("Browser"));
        assert_eq!(process.labels(), &["a".to_string(), "b".to_string()]);
        assert_eq!(process.sort_index, -3);
        let thread = &process.threads[&Tid(2)];
        assert_eq!(thread.name.as_deref(), Some("CrBrowserMain"));
        assert_eq!(thread.sort_index, 4);
        assert_eq!(model.import_warnings()[0].kind, WarningKind::MetadataParseError);
    }

    #[test]
    fn test_container_metadata_and_unknown_phase() {
        let model = import(json!({
            "traceEvents": [
                {"name": "a", "pid": 1, "ts": 1, "dur": 1, "tid": 1, "ph": "X"},
                {"name": "z", "pid": 1, "ts": 1, "tid": 1, "ph": "?"},
                "garbage"
            ],
            "otherData": {"version": "1.0"},
            "displayTimeUnit": "ns"
        }));
        let names: Vec<_> = model.metadata.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["displayTimeUnit", "otherData"]);
        let kinds: Vec<_> = model.import_warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::ParseError, WarningKind::ParseError]);
    }

    #[test]
    fn test_system_trace_events_become_subtrace() {
        let mut importer = TraceEventImporter::new(TraceInput::from(json!({
            "traceEvents": [],
            "systemTraceEvents": "# tracer: nop\n"
        })))
        .unwrap();
        let subtraces = importer.extract_subtraces();
        assert_eq!(subtraces, vec![TraceInput::from("# tracer: nop\n")]);
        assert!(importer.extract_subtraces().is_empty());
    }

    #[test]
    fn test_string_pids_and_tids() {
        let model = import(json!([
            {"name": "a", "pid": "12", "tid": "34", "ts": 1, "dur": 1, "ph": "X"}
        ]));
        assert!(model.thread(ThreadRef::new(12, 34)).is_some());
    }

    #[test]
    fn test_truncated_text_imports() {
        let text = "[{\"name\":\"a\",\"pid\":1,\"tid\":1,\"ts\":1,\"dur\":2,\"ph\":\"X\"},\n";
        let model = TraceModel::from_traces(vec![TraceInput::from(text)], &ImportOptions::default()).unwrap();
        assert_eq!(model.thread(ThreadRef::new(1, 1)).unwrap().slice_group.len(), 1);
    }
}
