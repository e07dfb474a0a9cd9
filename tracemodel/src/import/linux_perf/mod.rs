//! Importer for Linux ftrace text, as written by `trace-cmd`, `perf` and
//! Android's systrace.
//!
//! ftrace calls threads "pids"; inside this module a Linux pid is a
//! [`Tid`] and the thread group id is the process [`Pid`].

mod kfunc;
pub mod line_parser;
mod markers;
mod power;
mod sched;

use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

use super::{Importer, TraceInput};
use crate::domain::{CpuId, Pid, ThreadRef, Tid, WarningKind};
use crate::model::{Thread, TraceModel};
use line_parser::{LineEvent, LineFormat};
use markers::AndroidState;
use sched::{CpuState, Wakeup};

/// `perf_ts` is the ftrace clock, `parent_ts` the clock of the trace this
/// one is merged into; both in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClockSyncRecord {
    perf_ts: f64,
    parent_ts: f64,
}

/// Why a line could not be imported.
#[derive(Debug, Clone, PartialEq)]
enum LineError {
    /// The event is known but its details did not parse.
    Malformed,
    Message(String),
}

type LineResult = Result<(), LineError>;

#[derive(Debug, Default)]
pub struct LinuxPerfImporter {
    lines: Vec<String>,
    /// Offset of `lines[0]` in the original input, for warnings.
    line_number_base: usize,
    cpu_states: BTreeMap<CpuId, CpuState>,
    wakeups: Vec<Wakeup>,
    clock_sync_records: Vec<ClockSyncRecord>,
    /// Added to every line timestamp to move it onto the parent clock.
    time_shift: f64,
    threads_by_tid: HashMap<Tid, ThreadRef>,
    android: AndroidState,
}

impl LinuxPerfImporter {
    pub fn can_import(input: &TraceInput) -> bool {
        let TraceInput::Text(text) = input else {
            return false;
        };
        if extract_systrace_html(text).is_some() || text.starts_with("# tracer:") {
            return true;
        }
        let first_line = text.lines().next().unwrap_or_default();
        LineFormat::detect(first_line).is_some()
    }

    pub fn new(text: &str) -> Self {
        let (lines, line_number_base) = match extract_systrace_html(text) {
            Some(extracted) => extracted,
            None => (text.split('\n').map(str::to_string).collect(), 0),
        };
        Self { lines, line_number_base, ..Self::default() }
    }

    fn cpu_state(&mut self, model: &mut TraceModel, cpu: CpuId) -> &mut CpuState {
        model.kernel.get_or_create_cpu(cpu);
        self.cpu_states.entry(cpu).or_default()
    }

    /// Looks up (or creates) a thread and makes it the owner of `tid`.
    fn get_or_create_thread<'m>(&mut self, model: &'m mut TraceModel, pid: Pid, tid: Tid) -> &'m mut Thread {
        self.threads_by_tid.insert(tid, ThreadRef { pid, tid });
        model.get_or_create_process(pid).get_or_create_thread(tid)
    }

    fn build_thread_map(&mut self, model: &TraceModel) {
        for thread in model.all_threads() {
            self.threads_by_tid.insert(thread.tid, thread.thread_ref());
        }
    }

    fn import_cpu_data(&mut self, model: &mut TraceModel) {
        let lines = std::mem::take(&mut self.lines);
        let mut format = None;
        for (index, line) in lines.iter().enumerate() {
            let line_number = self.line_number_base + index + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let format = match format {
                Some(format) => format,
                None => match LineFormat::detect(line) {
                    Some(detected) => *format.insert(detected),
                    None => {
                        line_warning(model, line_number, format!("Cannot parse line: {line}"));
                        continue;
                    }
                },
            };
            let Some(mut event) = format.parse(line) else {
                line_warning(model, line_number, format!("Unrecognized line: {line}"));
                continue;
            };
            event.ts += self.time_shift;

            match self.handle_event(model, &event) {
                Ok(()) => {}
                Err(LineError::Malformed) => line_warning(
                    model,
                    line_number,
                    format!("Malformed {} event ({line})", event.event_name),
                ),
                Err(LineError::Message(message)) => line_warning(model, line_number, message),
            }
        }
        debug!("imported ftrace data for {} cpus", self.cpu_states.len());
    }

    fn handle_event(&mut self, model: &mut TraceModel, event: &LineEvent) -> LineResult {
        match event.event_name.as_str() {
            "sched_switch" => sched::sched_switch(self, model, event),
            "sched_wakeup" | "sched_wakeup_new" => sched::sched_wakeup(self, event),
            "cpu_frequency" => power::cpu_frequency(self, model, event),
            "cpu_idle" => power::cpu_idle(self, model, event),
            "graph_ent" => kfunc::graph_entry(self, model, event),
            "graph_ret" => kfunc::graph_return(self, model, event),
            // `0` is the marker event name used by pre-3.2 kernels.
            "tracing_mark_write" | "0" => markers::trace_marker_write(self, model, event),
            name => Err(LineError::Message(format!("Unknown event {name} ({})", event.details))),
        }
    }

    /// Finds the first clock sync marker before anything is imported, so
    /// every event can be placed on the parent clock as it is parsed.
    fn scan_clock_sync(&self) -> Option<ClockSyncRecord> {
        let mut format = None;
        for line in self.lines.iter().filter(|line| !line.is_empty() && !line.starts_with('#')) {
            let format = match format {
                Some(format) => format,
                None => match LineFormat::detect(line) {
                    Some(detected) => *format.insert(detected),
                    None => continue,
                },
            };
            let Some(event) = format.parse(line) else {
                continue;
            };
            if !matches!(event.event_name.as_str(), "tracing_mark_write" | "0") {
                continue;
            }
            if let Some(parent_ts) = markers::clock_sync_parent_ts(&event.details) {
                return Some(ClockSyncRecord { perf_ts: event.ts, parent_ts });
            }
        }
        None
    }
}

impl Importer for LinuxPerfImporter {
    fn name(&self) -> &'static str {
        "linux_perf"
    }

    fn import_priority(&self) -> u32 {
        2
    }

    fn import_events(&mut self, model: &mut TraceModel, is_secondary: bool) {
        match self.scan_clock_sync() {
            // A parent_ts of zero means both clocks already agree.
            Some(sync) if sync.parent_ts != 0.0 => {
                self.time_shift = sync.parent_ts - sync.perf_ts;
                debug!("shifting ftrace data by {} ms", self.time_shift);
            }
            None if is_secondary => {
                model.import_warning(WarningKind::ClockSyncError, "Cannot import kernel trace without a clock sync.");
                return;
            }
            _ => {}
        }

        self.build_thread_map(model);
        self.import_cpu_data(model);
        sched::build_per_thread_time_slices(self, model);
        info!(
            "ftrace import: {} cpus, {} wakeups, {} clock sync records",
            self.cpu_states.len(),
            self.wakeups.len(),
            self.clock_sync_records.len()
        );
    }
}

fn line_warning(model: &mut TraceModel, line_number: usize, message: String) {
    model.import_warning(WarningKind::LinuxPerfParseError, format!("Line {line_number}: {message}"));
}

/// Pulls the ftrace text out of a systrace HTML page.
///
/// The data sits in a `linuxPerfData` string literal whose lines end in
/// `\n\`; the last one ends in `\n";`. Returns the lines and the index of
/// the first one in the page.
fn extract_systrace_html(text: &str) -> Option<(Vec<String>, usize)> {
    if !text.starts_with("<!DOCTYPE HTML>") {
        return None;
    }
    let lines: Vec<&str> = text.split('\n').collect();
    let mut cursor = 1;
    let mut advance_to = |wanted: &str| -> Option<usize> {
        let found = lines[cursor.min(lines.len())..].iter().position(|line| *line == wanted)?;
        cursor += found;
        Some(cursor)
    };

    advance_to("  <script>")?;
    let begin = advance_to("  var linuxPerfData = \"\\")? + 1;
    let end = advance_to("  </script>")?;
    advance_to("</body>")?;
    advance_to("</html>")?;

    let mut events: Vec<String> = lines
        .get(begin..end)?
        .iter()
        .map(|&line| line.strip_suffix("\\n\\").unwrap_or(line).to_string())
        .collect();
    let last = events.last_mut()?;
    *last = last.strip_suffix("\\n\";")?.to_string();
    Some((events, begin))
}
