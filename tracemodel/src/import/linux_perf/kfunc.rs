//! Function-graph tracer events (`graph_ent` / `graph_ret`) as kernel
//! slices on the calling thread.

use regex::Regex;
use std::sync::OnceLock;

use super::line_parser::LineEvent;
use super::{LineError, LineResult, LinuxPerfImporter};
use crate::domain::{Args, Pid, Tid};
use crate::model::{Thread, TraceModel};

fn func_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"func=(.+)").expect("graph func regex compiles"))
}

/// Kernel slices need the process, so these events require `print-tgid`.
fn graph_thread<'m>(
    importer: &mut LinuxPerfImporter,
    model: &'m mut TraceModel,
    event: &LineEvent,
) -> Result<&'m mut Thread, LineError> {
    let tgid = event.tgid.ok_or(LineError::Malformed)?;
    let thread = importer.get_or_create_thread(model, Pid(tgid), Tid(event.pid));
    thread.name = Some(event.thread_name.clone());
    if !thread.kernel_slice_group.is_timestamp_valid_for_begin_or_end(event.ts) {
        return Err(LineError::Message("Timestamps are moving backward.".to_string()));
    }
    Ok(thread)
}

pub(super) fn graph_entry(importer: &mut LinuxPerfImporter, model: &mut TraceModel, event: &LineEvent) -> LineResult {
    let caps = func_re().captures(&event.details).ok_or(LineError::Malformed)?;
    let name = caps[1].trim().to_string();
    let thread = graph_thread(importer, model, event)?;
    thread
        .kernel_slice_group
        .begin_slice("", &name, event.ts, Args::new(), None)
        .map_err(|e| LineError::Message(e.to_string()))?;
    Ok(())
}

pub(super) fn graph_return(importer: &mut LinuxPerfImporter, model: &mut TraceModel, event: &LineEvent) -> LineResult {
    let thread = graph_thread(importer, model, event)?;
    if thread.kernel_slice_group.open_slice_count() > 0 {
        thread
            .kernel_slice_group
            .end_slice(event.ts, None)
            .map_err(|e| LineError::Message(e.to_string()))?;
    }
    Ok(())
}
