//! `tracing_mark_write` records: clock sync markers and the `B|`, `E`, `C|`,
//! `S|`, `F|` markers written by Android's atrace.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::line_parser::LineEvent;
use super::{ClockSyncRecord, LineError, LineResult, LinuxPerfImporter};
use crate::domain::{Args, Pid, ThreadRef, Tid};
use crate::model::{AsyncSlice, TraceModel};

/// An `S|` marker waiting for its `F|`.
#[derive(Debug, Clone)]
struct OpenAsyncSlice {
    title: String,
    cookie: String,
    start: f64,
    thread: ThreadRef,
}

#[derive(Debug, Default)]
pub(super) struct AndroidState {
    /// Process of each thread that wrote a `B|` or `S|` marker; `E` carries
    /// no pid.
    ppids: HashMap<Tid, Pid>,
    /// Keyed by `name:cookie`.
    open_async: HashMap<String, OpenAsyncSlice>,
}

fn sub_event_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\w+):\s*(.*)$").expect("marker sub-event regex compiles"))
}

fn clock_sync_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"parent_ts=(\d+\.?\d*)").expect("clock sync regex compiles"))
}

const ANDROID_TAGS: [&str; 6] = ["B|", "E", "E|", "C|", "S|", "F|"];

pub(super) fn trace_marker_write(
    importer: &mut LinuxPerfImporter,
    model: &mut TraceModel,
    event: &LineEvent,
) -> LineResult {
    if let Some(caps) = sub_event_re().captures(&event.details) {
        return match &caps[1] {
            "trace_event_clock_sync" => clock_sync(importer, event.ts, &caps[2]),
            sub_event => Err(LineError::Message(format!(
                "Unknown trace_marking_write event {}:{sub_event}",
                event.event_name
            ))),
        };
    }

    let tag: String = event.details.chars().take(2).collect();
    if ANDROID_TAGS.contains(&tag.as_str()) {
        android_marker(importer, model, event)
    } else {
        Err(LineError::Malformed)
    }
}

/// `parent_ts=` of a clock sync record, in milliseconds.
fn parse_parent_ts(details: &str) -> Option<f64> {
    let caps = clock_sync_re().captures(details)?;
    caps[1].parse::<f64>().ok().map(|seconds| seconds * 1000.0)
}

/// The parent clock time of a `trace_event_clock_sync` marker, or `None`
/// for any other marker.
pub(super) fn clock_sync_parent_ts(details: &str) -> Option<f64> {
    let caps = sub_event_re().captures(details)?;
    if &caps[1] != "trace_event_clock_sync" {
        return None;
    }
    parse_parent_ts(&caps[2])
}

fn clock_sync(importer: &mut LinuxPerfImporter, ts: f64, details: &str) -> LineResult {
    let parent_ts = parse_parent_ts(details).ok_or(LineError::Malformed)?;
    importer.clock_sync_records.push(ClockSyncRecord { perf_ts: ts, parent_ts });
    Ok(())
}

/// `k1=v1;k2=v2` marker arguments.
fn parse_marker_args(raw: Option<&&str>) -> Args {
    let mut args = Args::new();
    for pair in raw.into_iter().flat_map(|raw| raw.split(';')) {
        if let Some((key, value)) = pair.split_once('=') {
            args.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
        }
    }
    args
}

fn parse_pid(field: Option<&&str>) -> Result<Pid, LineError> {
    field
        .and_then(|f| f.trim().parse().ok())
        .map(Pid)
        .ok_or(LineError::Malformed)
}

fn android_marker(importer: &mut LinuxPerfImporter, model: &mut TraceModel, event: &LineEvent) -> LineResult {
    let fields: Vec<&str> = event.details.split('|').collect();
    let tid = Tid(event.pid);
    let ts = event.ts;

    match fields[0] {
        "B" => {
            let pid = parse_pid(fields.get(1))?;
            let title = fields.get(2).ok_or(LineError::Malformed)?;
            let category = fields.get(4).copied().unwrap_or_default();
            let args = parse_marker_args(fields.get(3));
            let thread = importer.get_or_create_thread(model, pid, tid);
            thread.name = Some(event.thread_name.clone());
            if !thread.slice_group.is_timestamp_valid_for_begin_or_end(ts) {
                return Err(LineError::Message("Timestamps are moving backward.".to_string()));
            }
            thread
                .slice_group
                .begin_slice(category, title, ts, args, None)
                .map_err(|e| LineError::Message(e.to_string()))?;
            importer.android.ppids.insert(tid, pid);
        }
        "E" => {
            // An `E` from a thread that never began anything is ignored.
            let Some(&pid) = importer.android.ppids.get(&tid) else {
                return Ok(());
            };
            let thread = importer.get_or_create_thread(model, pid, tid);
            if thread.slice_group.open_slice_count() == 0 {
                return Ok(());
            }
            let slice = thread
                .slice_group
                .end_slice(ts, None)
                .map_err(|e| LineError::Message(e.to_string()))?;
            slice.args.extend(parse_marker_args(fields.get(1)));
        }
        "C" => {
            let pid = parse_pid(fields.get(1))?;
            let name = fields.get(2).ok_or(LineError::Malformed)?;
            let value: f64 = fields
                .get(3)
                .and_then(|v| v.trim().parse().ok())
                .ok_or(LineError::Malformed)?;
            let counter = model.get_or_create_process(pid).get_or_create_counter("", name);
            if counter.num_series() == 0 {
                counter.add_series("value");
            }
            for series in &mut counter.series {
                series.add_sample(ts, value);
            }
        }
        "S" => {
            let pid = parse_pid(fields.get(1))?;
            let title = fields.get(2).ok_or(LineError::Malformed)?;
            let cookie = fields.get(3).ok_or(LineError::Malformed)?;
            let thread = importer.get_or_create_thread(model, pid, tid);
            thread.name = Some(event.thread_name.clone());
            importer.android.ppids.insert(tid, pid);
            importer.android.open_async.insert(
                format!("{title}:{cookie}"),
                OpenAsyncSlice {
                    title: (*title).to_string(),
                    cookie: (*cookie).to_string(),
                    start: ts,
                    thread: ThreadRef { pid, tid },
                },
            );
        }
        "F" => {
            let pid = parse_pid(fields.get(1))?;
            let title = fields.get(2).ok_or(LineError::Malformed)?;
            let cookie = fields.get(3).ok_or(LineError::Malformed)?;
            let thread = importer.get_or_create_thread(model, pid, tid);
            thread.name = Some(event.thread_name.clone());
            let Some(open) = importer.android.open_async.remove(&format!("{title}:{cookie}")) else {
                return Ok(());
            };

            let mut slice = AsyncSlice::new("", &open.title, &open.cookie, open.start, open.thread, Args::new());
            slice.duration = ts - open.start;
            slice.end_thread = ThreadRef { pid, tid };
            let mut segment = slice.clone();
            segment.sub_slices.clear();
            slice.sub_slices.push(segment);
            if let Some(start_thread) = model.thread_mut(open.thread) {
                start_thread.async_slice_group.push(slice);
            }
        }
        _ => return Err(LineError::Malformed),
    }
    Ok(())
}
