//! Scheduler events and the per-thread run states derived from them.

use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::line_parser::LineEvent;
use super::{LineError, LineResult, LinuxPerfImporter};
use crate::domain::{Args, CpuId, ThreadRef, Tid, WarningKind};
use crate::model::{Slice, TraceModel};

/// The task a CPU has been running since `ts`.
#[derive(Debug, Clone, PartialEq)]
struct ActiveTask {
    ts: f64,
    pid: i64,
    comm: String,
    prio: i64,
}

#[derive(Debug, Clone, Default)]
pub(super) struct CpuState {
    active: Option<ActiveTask>,
}

/// A thread becoming runnable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Wakeup {
    pub ts: f64,
    pub tid: Tid,
    pub from_tid: i64,
}

fn sched_switch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"prev_comm=(.+) prev_pid=(\d+) prev_prio=(\d+) prev_state=(\S\+?|\S\|\S) ==> next_comm=(.+) next_pid=(\d+) next_prio=(\d+)",
        )
        .expect("sched_switch regex compiles")
    })
}

fn sched_wakeup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"comm=(.+) pid=(\d+) prio=(\d+)(?: success=\d+)? target_cpu=(\d+)")
            .expect("sched_wakeup regex compiles")
    })
}

/// `sched_switch`: closes the slice of whatever ran on the CPU so far. The
/// idle task (pid 0) gets no slice.
pub(super) fn sched_switch(importer: &mut LinuxPerfImporter, model: &mut TraceModel, event: &LineEvent) -> LineResult {
    let caps = sched_switch_re().captures(&event.details).ok_or(LineError::Malformed)?;
    let prev_state = caps[4].to_string();
    let next = ActiveTask {
        ts: event.ts,
        pid: caps[6].parse().map_err(|_| LineError::Malformed)?,
        comm: caps[5].to_string(),
        prio: caps[7].parse().map_err(|_| LineError::Malformed)?,
    };

    let cpu = CpuId(event.cpu);
    let previous = importer.cpu_state(model, cpu).active.replace(next);
    let Some(previous) = previous.filter(|task| task.pid != 0) else {
        return Ok(());
    };

    let title = importer
        .threads_by_tid
        .get(&Tid(previous.pid))
        .and_then(|thread_ref| model.thread(*thread_ref))
        .map_or_else(|| previous.comm.clone(), |thread| thread.user_friendly_name());
    let mut args = Args::new();
    args.insert("comm".to_string(), json!(previous.comm));
    args.insert("tid".to_string(), json!(previous.pid));
    args.insert("prio".to_string(), json!(previous.prio));
    args.insert("stateWhenDescheduled".to_string(), json!(prev_state));

    let slice = Slice::new("", title, previous.ts, args).with_duration(event.ts - previous.ts);
    model.kernel.get_or_create_cpu(cpu).slices.push(slice);
    Ok(())
}

/// `sched_wakeup` / `sched_wakeup_new`: the woken thread becomes runnable.
pub(super) fn sched_wakeup(importer: &mut LinuxPerfImporter, event: &LineEvent) -> LineResult {
    let caps = sched_wakeup_re().captures(&event.details).ok_or(LineError::Malformed)?;
    let tid: i64 = caps[2].parse().map_err(|_| LineError::Malformed)?;
    importer.wakeups.push(Wakeup { ts: event.ts, tid: Tid(tid), from_tid: event.pid });
    Ok(())
}

/// Name of the state a thread sits in after being descheduled in
/// `state`, and whether a wakeup splits it (the rest being Runnable).
fn descheduled_state(state: &str) -> Option<(&'static str, bool)> {
    Some(match state {
        "S" => ("Sleeping", true),
        "R" | "R+" => ("Runnable", false),
        "D" => ("Uninterruptible Sleep", true),
        "T" => ("__TASK_STOPPED", false),
        "t" => ("debug", false),
        "Z" => ("Zombie", false),
        "X" => ("Exit Dead", false),
        "x" => ("Task Dead", false),
        "K" => ("Wakekill", false),
        "W" => ("Waking", false),
        "D|K" => ("Uninterruptible Sleep | WakeKill", true),
        "D|W" => ("Uninterruptible Sleep | Waking", true),
        _ => return None,
    })
}

/// A run of a thread on some CPU.
struct Run {
    start: f64,
    duration: f64,
    state_when_descheduled: String,
}

impl Run {
    fn end(&self) -> f64 {
        self.start + self.duration
    }
}

fn state_slice(title: &str, start: f64, duration: f64, args: Args) -> Slice {
    Slice::new("", title, start, args).with_duration(duration)
}

fn runnable_after_wakeup(wakeup: &Wakeup, until: f64) -> Slice {
    let mut args = Args::new();
    args.insert("wakeup from tid".to_string(), json!(wakeup.from_tid));
    state_slice("Runnable", wakeup.ts, until - wakeup.ts, args)
}

/// Fills `Thread::time_slices` for every known thread that ran on a CPU
/// seen by this import: Running while on a CPU, and between runs a state
/// taken from how the thread was descheduled.
pub(super) fn build_per_thread_time_slices(importer: &LinuxPerfImporter, model: &mut TraceModel) {
    let mut runs: BTreeMap<ThreadRef, Vec<Run>> = BTreeMap::new();
    for cpu_number in importer.cpu_states.keys() {
        let Some(cpu) = model.kernel.cpus.get(cpu_number) else {
            continue;
        };
        for slice in &cpu.slices {
            let Some(thread_ref) = slice.args.get("tid").and_then(Value::as_i64).and_then(|tid| {
                importer.threads_by_tid.get(&Tid(tid)).copied()
            }) else {
                continue;
            };
            runs.entry(thread_ref).or_default().push(Run {
                start: slice.start,
                duration: slice.duration,
                state_when_descheduled: slice
                    .args
                    .get("stateWhenDescheduled")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    let mut wakeups: BTreeMap<ThreadRef, Vec<Wakeup>> = BTreeMap::new();
    for wakeup in &importer.wakeups {
        if let Some(thread_ref) = importer.threads_by_tid.get(&wakeup.tid) {
            wakeups.entry(*thread_ref).or_default().push(*wakeup);
        }
    }

    let mut unknown_states = Vec::new();
    for (thread_ref, mut runs) in runs {
        runs.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut pending = wakeups.remove(&thread_ref).unwrap_or_default();
        pending.sort_by(|a, b| a.ts.total_cmp(&b.ts));
        let mut pending = pending.into_iter().peekable();

        let mut slices = Vec::new();
        let Some(first) = runs.first() else {
            continue;
        };
        if let Some(wakeup) = pending.next_if(|w| w.ts < first.start) {
            slices.push(runnable_after_wakeup(&wakeup, first.start));
        }
        slices.push(state_slice("Running", first.start, first.duration, Args::new()));

        for pair in runs.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let gap = next.start - prev.end();

            let mut wakeup = None;
            while let Some(w) = pending.next_if(|w| w.ts < next.start) {
                if wakeup.is_none() && w.ts > prev.end() {
                    wakeup = Some(w);
                }
            }

            match descheduled_state(&prev.state_when_descheduled) {
                Some((title, true)) => match wakeup {
                    Some(w) => {
                        slices.push(state_slice(title, prev.end(), w.ts - prev.end(), Args::new()));
                        slices.push(runnable_after_wakeup(&w, next.start));
                    }
                    None => slices.push(state_slice(title, prev.end(), gap, Args::new())),
                },
                Some((title, false)) => slices.push(state_slice(title, prev.end(), gap, Args::new())),
                None => {
                    slices.push(state_slice("UNKNOWN", prev.end(), gap, Args::new()));
                    unknown_states.push(prev.state_when_descheduled.clone());
                }
            }
            slices.push(state_slice("Running", next.start, next.duration, Args::new()));
        }

        if let Some(thread) = model.thread_mut(thread_ref) {
            thread.time_slices = slices;
        }
    }

    for state in unknown_states {
        model.import_warning(WarningKind::LinuxPerfParseError, format!("Unrecognized sleep state: {state}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Pid, Tid};
    use crate::import::Importer;

    const SWITCHES: &str = "\
  <idle>-0     [000] d..3  1.000000: sched_switch: prev_comm=swapper prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=worker next_pid=12 next_prio=120
  worker-12    [000] d..3  2.000000: sched_switch: prev_comm=worker prev_pid=12 prev_prio=120 prev_state=S ==> next_comm=swapper next_pid=0 next_prio=120
  <idle>-0     [000] d..3  3.000000: sched_wakeup: comm=worker pid=12 prio=120 success=1 target_cpu=000
  <idle>-0     [000] d..3  4.000000: sched_switch: prev_comm=swapper prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=worker next_pid=12 next_prio=120
  worker-12    [000] d..3  5.000000: sched_switch: prev_comm=worker prev_pid=12 prev_prio=120 prev_state=R+ ==> next_comm=other next_pid=13 next_prio=110
  other-13     [000] d..3  6.000000: sched_switch: prev_comm=other prev_pid=13 prev_prio=110 prev_state=Q ==> next_comm=worker next_pid=12 next_prio=120
  worker-12    [000] d..3  7.000000: sched_switch: prev_comm=worker prev_pid=12 prev_prio=120 prev_state=D ==> next_comm=swapper next_pid=0 next_prio=120
";

    fn import(model: &mut TraceModel) {
        let mut importer = LinuxPerfImporter::new(SWITCHES);
        importer.import_events(model, false);
    }

    #[test]
    fn test_cpu_slices_skip_idle_task() {
        let mut model = TraceModel::new();
        import(&mut model);
        let cpu = &model.kernel.cpus[&CpuId(0)];
        let titles: Vec<_> = cpu.slices.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["worker", "worker", "other", "worker"]);
        assert_eq!(cpu.slices[0].start, 1000.0);
        assert_eq!(cpu.slices[0].duration, 1000.0);
        assert_eq!(cpu.slices[0].args["stateWhenDescheduled"], "S");
        assert_eq!(cpu.slices[0].args["tid"], 12);
        assert_eq!(cpu.slice_at(5500.0), Some(2));
    }

    #[test]
    fn test_known_thread_names_title_cpu_slices() {
        let mut model = TraceModel::new();
        model.get_or_create_process(Pid(10)).get_or_create_thread(Tid(12)).name = Some("Compositor".to_string());
        import(&mut model);
        assert_eq!(model.kernel.cpus[&CpuId(0)].slices[0].title, "Compositor");
    }

    #[test]
    fn test_thread_time_slices() {
        let mut model = TraceModel::new();
        let thread_ref = ThreadRef::new(10, 12);
        model.get_or_create_process(Pid(10)).get_or_create_thread(Tid(12));
        import(&mut model);

        let thread = model.thread(thread_ref).unwrap();
        let states: Vec<_> = thread
            .time_slices
            .iter()
            .map(|s| (s.title.as_str(), s.start, s.duration))
            .collect();
        assert_eq!(
            states,
            vec![
                ("Running", 1000.0, 1000.0),
                ("Sleeping", 2000.0, 1000.0),
                ("Runnable", 3000.0, 1000.0),
                ("Running", 4000.0, 1000.0),
                ("Runnable", 5000.0, 1000.0),
                ("Running", 6000.0, 1000.0),
            ]
        );
        assert_eq!(thread.time_slices[2].args["wakeup from tid"], 0);
        assert_eq!(thread.time_slice_at(3500.0), Some(2));
    }

    #[test]
    fn test_unknown_state_warns() {
        let mut model = TraceModel::new();
        model.get_or_create_process(Pid(13)).get_or_create_thread(Tid(13));
        let text = "\
  <idle>-0     [000] d..3  1.000000: sched_switch: prev_comm=swapper prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=other next_pid=13 next_prio=110
  other-13     [000] d..3  2.000000: sched_switch: prev_comm=other prev_pid=13 prev_prio=110 prev_state=Q ==> next_comm=swapper next_pid=0 next_prio=120
  <idle>-0     [000] d..3  3.000000: sched_switch: prev_comm=swapper prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=other next_pid=13 next_prio=110
  other-13     [000] d..3  4.000000: sched_switch: prev_comm=other prev_pid=13 prev_prio=110 prev_state=S ==> next_comm=swapper next_pid=0 next_prio=120
";
        LinuxPerfImporter::new(text).import_events(&mut model, false);
        assert!(model
            .import_warnings()
            .iter()
            .any(|w| w.message == "Unrecognized sleep state: Q"));
        let thread = model.thread(ThreadRef::new(13, 13)).unwrap();
        assert_eq!(thread.time_slices[1].title, "UNKNOWN");
        assert_eq!(thread.time_slices[1].duration, 1000.0);
    }

    #[test]
    fn test_malformed_switch_warns() {
        let mut model = TraceModel::new();
        let text = "  <idle>-0     [000] d..3  1.000000: sched_switch: nonsense\n";
        LinuxPerfImporter::new(text).import_events(&mut model, false);
        assert!(model.import_warnings()[0].message.starts_with("Line 1: Malformed sched_switch event"));
    }
}
