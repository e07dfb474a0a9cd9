//! CPU frequency and idle-state counters.

use regex::Regex;
use std::sync::OnceLock;

use super::line_parser::LineEvent;
use super::{LineError, LineResult, LinuxPerfImporter};
use crate::domain::CpuId;
use crate::model::TraceModel;

/// `cpu_idle` reports this state when a CPU leaves idle.
const IDLE_EXIT_STATE: u64 = 4_294_967_295;

fn power_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"state=(\d+) cpu_id=(\d+)").expect("power event regex compiles"))
}

fn parse_power_event(event: &LineEvent) -> Result<(u64, CpuId), LineError> {
    let caps = power_re().captures(&event.details).ok_or(LineError::Malformed)?;
    let state = caps[1].parse().map_err(|_| LineError::Malformed)?;
    let cpu = caps[2].parse().map_err(|_| LineError::Malformed)?;
    Ok((state, CpuId(cpu)))
}

#[allow(clippy::cast_precision_loss)]
fn add_cpu_counter_sample(
    importer: &mut LinuxPerfImporter,
    model: &mut TraceModel,
    cpu: CpuId,
    name: &str,
    ts: f64,
    value: u64,
) {
    importer.cpu_state(model, cpu);
    let counter = model.kernel.get_or_create_cpu(cpu).get_or_create_counter("", name);
    if counter.num_series() == 0 {
        counter.add_series("state");
    }
    for series in &mut counter.series {
        series.add_sample(ts, value as f64);
    }
}

/// `cpu_frequency`: the `Clock Frequency` counter of the target CPU.
pub(super) fn cpu_frequency(importer: &mut LinuxPerfImporter, model: &mut TraceModel, event: &LineEvent) -> LineResult {
    let (state, cpu) = parse_power_event(event)?;
    add_cpu_counter_sample(importer, model, cpu, "Clock Frequency", event.ts, state);
    Ok(())
}

/// `cpu_idle`: the `C-State` counter of the target CPU, 0 when running.
pub(super) fn cpu_idle(importer: &mut LinuxPerfImporter, model: &mut TraceModel, event: &LineEvent) -> LineResult {
    let (state, cpu) = parse_power_event(event)?;
    let state = if state == IDLE_EXIT_STATE { 0 } else { state };
    add_cpu_counter_sample(importer, model, cpu, "C-State", event.ts, state);
    Ok(())
}
