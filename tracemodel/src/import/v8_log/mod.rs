//! Importer for V8's own log (`v8.log`, written with `--prof` and
//! `--log-timer-events`).
//!
//! Everything lands in a synthetic process:
//! - `V8 Timers`: one slice per timer event (compile, parse, GC, ...)
//! - `V8 JavaScript`: the stacks of consecutive ticks folded into slices
//! - `V8 PC`: one sample per tick, named after the code at the pc
//!
//! Log times are microseconds.

mod code_map;
pub mod line_parser;

use log::{debug, info};
use serde_json::json;

use super::{Importer, TraceInput};
use crate::base::time_eq;
use crate::domain::{Args, Pid, Tid, WarningKind};
use crate::model::{Slice, SliceGroup, Thread, TraceModel};
use code_map::{CodeEntry, CodeMap};
use line_parser::{parse_address, parse_int, parse_stack, split_fields};

pub const V8_PID: Pid = Pid(-32);
pub const TIMER_TID: Tid = Tid(1);
pub const STACK_TID: Tid = Tid(2);
pub const SAMPLES_TID: Tid = Tid(3);

const CATEGORY: &str = "v8";
const UNKNOWN_CODE: &str = "UnknownCode";

const LOG_PREFIXES: [&str; 5] = ["timer-event,", "tick,", "shared-library,", "profiler,", "code-creation,"];

/// Default args of the timers V8 reports; other timer names are ignored.
fn timer_event_args(name: &str) -> Option<Args> {
    let (pause, no_execution) = match name {
        "V8.Execute" | "V8.RecompileParallel" => (false, false),
        "V8.External" => (false, true),
        "V8.CompileFullCode"
        | "V8.RecompileSynchronous"
        | "V8.CompileEval"
        | "V8.Parse"
        | "V8.PreParse"
        | "V8.ParseLazy"
        | "V8.GCScavenger"
        | "V8.GCCompactor"
        | "V8.GCContext" => (true, true),
        _ => return None,
    };
    let mut args = Args::new();
    args.insert("pause".to_string(), json!(pause));
    args.insert("no_execution".to_string(), json!(no_execution));
    Some(args)
}

/// Why a line could not be imported.
#[derive(Debug, Clone, PartialEq)]
enum LineError {
    /// A field is missing or is not a number.
    Malformed,
    Message(String),
}

type LineResult = Result<(), LineError>;

/// One frame of the folded stack timeline.
#[derive(Debug, Clone, PartialEq)]
struct StackRecord {
    name: String,
    start: f64,
    end: f64,
    children: Vec<StackRecord>,
}

impl StackRecord {
    fn new(name: String, ts: f64) -> Self {
        Self { name, start: ts, end: ts, children: Vec::new() }
    }
}

fn field(fields: &[String], index: usize) -> Result<&str, LineError> {
    fields.get(index).map(String::as_str).ok_or(LineError::Malformed)
}

fn int_field(fields: &[String], index: usize) -> Result<i64, LineError> {
    parse_int(field(fields, index)?).ok_or(LineError::Malformed)
}

fn address_field(fields: &[String], index: usize) -> Result<u64, LineError> {
    parse_address(field(fields, index)?).ok_or(LineError::Malformed)
}

/// Microsecond field as milliseconds.
#[allow(clippy::cast_precision_loss)]
fn time_field(fields: &[String], index: usize) -> Result<f64, LineError> {
    int_field(fields, index).map(|us| us as f64 / 1000.0)
}

fn v8_thread(model: &mut TraceModel, tid: Tid) -> &mut Thread {
    model.get_or_create_process(V8_PID).get_or_create_thread(tid)
}

#[derive(Debug, Default)]
pub struct V8LogImporter {
    lines: Vec<String>,
    code_map: CodeMap,
    /// Time of the last tick that carried a stack.
    last_tick_ts: Option<f64>,
    stack_timeline: Vec<StackRecord>,
}

impl V8LogImporter {
    pub fn can_import(input: &TraceInput) -> bool {
        let TraceInput::Text(text) = input else {
            return false;
        };
        LOG_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
    }

    pub fn new(text: &str) -> Self {
        Self { lines: text.split('\n').map(str::to_string).collect(), ..Self::default() }
    }

    fn handle_line(&mut self, model: &mut TraceModel, fields: &[String]) -> LineResult {
        match fields.first().map_or("", String::as_str) {
            "timer-event" => {
                let name = field(fields, 1)?;
                let Some(args) = timer_event_args(name) else {
                    return Ok(());
                };
                let start = time_field(fields, 2)?;
                let duration = time_field(fields, 3)?;
                v8_thread(model, TIMER_TID)
                    .slice_group
                    .push_complete_slice(CATEGORY, name, start, Some(duration), None, None, args);
                Ok(())
            }
            "timer-event-start" => {
                let name = field(fields, 1)?;
                let Some(args) = timer_event_args(name) else {
                    return Ok(());
                };
                let start = time_field(fields, 2)?;
                v8_thread(model, TIMER_TID)
                    .slice_group
                    .begin_slice(CATEGORY, name, start, args, None)
                    .map_err(|err| LineError::Message(err.to_string()))?;
                Ok(())
            }
            "timer-event-end" => {
                let end = time_field(fields, 2)?;
                v8_thread(model, TIMER_TID)
                    .slice_group
                    .end_slice(end, None)
                    .map_err(|err| LineError::Message(err.to_string()))?;
                Ok(())
            }
            "code-creation" => {
                let start = address_field(fields, 3)?;
                let size = address_field(fields, 4)?;
                let name = field(fields, 5)?;
                self.code_map.add_code(start, CodeEntry::new(size, name));
                Ok(())
            }
            "code-move" => {
                let (from, to) = (address_field(fields, 1)?, address_field(fields, 2)?);
                if !self.code_map.move_code(from, to) {
                    debug!("code-move from unknown address {from:#x}");
                }
                Ok(())
            }
            "code-delete" => {
                let start = address_field(fields, 1)?;
                if !self.code_map.delete_code(start) {
                    debug!("code-delete of unknown address {start:#x}");
                }
                Ok(())
            }
            "shared-library" => {
                let name = field(fields, 1)?;
                let start = address_field(fields, 2)?;
                let end = address_field(fields, 3)?;
                self.code_map.add_library(start, CodeEntry::new(end.saturating_sub(start), name));
                Ok(())
            }
            "tick" => self.tick(model, fields),
            // `distortion`, `plot-range` and `profiler` only matter to V8's
            // own plotting tools.
            _ => Ok(()),
        }
    }

    fn name_at(&self, address: u64) -> String {
        self.code_map
            .find_entry(address)
            .map_or_else(|| UNKNOWN_CODE.to_string(), |entry| entry.name.clone())
    }

    /// `tick,pc,ts,_,_,vmstate,frame...`
    fn tick(&mut self, model: &mut TraceModel, fields: &[String]) -> LineResult {
        let pc = address_field(fields, 1)?;
        let ts = time_field(fields, 2)?;
        let stack = parse_stack(pc, fields.get(6..).unwrap_or_default()).ok_or(LineError::Malformed)?;

        let title = self.name_at(pc);
        let sample = v8_thread(model, SAMPLES_TID)
            .add_sample(CATEGORY, &title, ts, Args::new())
            .map(|_| ())
            .map_err(|err| LineError::Message(err.to_string()));

        if !stack.is_empty() {
            self.fold_stack(&stack, ts);
            self.last_tick_ts = Some(ts);
        }
        sample
    }

    /// Extends each frame of the timeline that the previous tick also had at
    /// the same depth; opens a new record from the first frame that differs.
    fn fold_stack(&mut self, stack: &[u64], ts: f64) {
        let names: Vec<String> = stack.iter().rev().map(|&address| self.name_at(address)).collect();
        let last_tick_ts = self.last_tick_ts;
        let mut level = &mut self.stack_timeline;
        for name in names {
            let continues = level
                .last()
                .is_some_and(|record| record.name == name && last_tick_ts.is_some_and(|last| time_eq(record.end, last)));
            if !continues {
                level.push(StackRecord::new(name, ts));
            }
            let Some(record) = level.last_mut() else {
                break;
            };
            record.end = ts;
            level = &mut record.children;
        }
    }
}

/// Children go in before their parent so that zero-length frames of a
/// single tick still sort parent first.
fn push_stack_slices(records: Vec<StackRecord>, group: &mut SliceGroup) {
    for record in records {
        push_stack_slices(record.children, group);
        let duration = record.end - record.start;
        group.push_slice(Slice::new(CATEGORY, record.name, record.start, Args::new()).with_duration(duration));
    }
}

impl Importer for V8LogImporter {
    fn name(&self) -> &'static str {
        "v8_log"
    }

    fn import_priority(&self) -> u32 {
        3
    }

    fn import_events(&mut self, model: &mut TraceModel, _is_secondary: bool) {
        for (tid, name) in [(TIMER_TID, "V8 Timers"), (STACK_TID, "V8 JavaScript"), (SAMPLES_TID, "V8 PC")] {
            v8_thread(model, tid).name = Some(name.to_string());
        }

        let lines = std::mem::take(&mut self.lines);
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields = split_fields(line);
            let result = self.handle_line(model, &fields);
            let message = match result {
                Ok(()) => continue,
                Err(LineError::Malformed) => {
                    format!("Malformed {} entry ({line})", fields.first().map_or("", String::as_str))
                }
                Err(LineError::Message(message)) => message,
            };
            model.import_warning(WarningKind::V8LogParseError, format!("Line {}: {message}", index + 1));
        }

        let timeline = std::mem::take(&mut self.stack_timeline);
        push_stack_slices(timeline, &mut v8_thread(model, STACK_TID).slice_group);
        info!("v8 log import: {} lines, {} code entries", lines.len(), self.code_map.len());
    }
}
