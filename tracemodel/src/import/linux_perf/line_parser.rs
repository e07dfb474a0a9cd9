//! ftrace text line formats.

use regex::Regex;
use std::sync::OnceLock;

/// One decoded ftrace line. `ts` is already in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvent {
    pub thread_name: String,
    /// Linux pid, i.e. the thread id.
    pub pid: i64,
    /// Thread group id (the process id), only present with `print-tgid`.
    pub tgid: Option<i64>,
    pub cpu: u32,
    pub ts: f64,
    pub event_name: String,
    pub details: String,
}

/// The three layouts ftrace has used for its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    /// `<idle>-0     (    0) [001] d...  1.23: sched_switch: ...`
    WithTgid,
    /// `<idle>-0     [001] d...  1.23: sched_switch: ...` (3.2 and later)
    WithIrqInfo,
    /// `<idle>-0     [001]  1.23: sched_switch: ...` (pre-3.2)
    Legacy,
}

fn tgid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(.+)-(\d+)\s+\(\s*(\d+|-+)\)\s\[(\d+)\]\s+[dX.][N.][Hhs.][0-9a-f.]\s+(\d+\.\d+):\s+(\S+):\s(.*)$",
        )
        .expect("tgid line regex compiles")
    })
}

fn irq_info_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(.+)-(\d+)\s+\[(\d+)\]\s+[dX.][N.][Hhs.][0-9a-f.]\s+(\d+\.\d+):\s+(\S+):\s(.*)$")
            .expect("irq-info line regex compiles")
    })
}

fn legacy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(.+)-(\d+)\s+\[(\d+)\]\s*(\d+\.\d+):\s+(\S+):\s(.*)$").expect("legacy line regex compiles")
    })
}

impl LineFormat {
    /// Picks the format `line` is written in. JSON is never ftrace.
    pub fn detect(line: &str) -> Option<Self> {
        if line.starts_with('{') {
            return None;
        }
        [LineFormat::WithTgid, LineFormat::WithIrqInfo, LineFormat::Legacy]
            .into_iter()
            .find(|format| format.regex().is_match(line))
    }

    fn regex(self) -> &'static Regex {
        match self {
            LineFormat::WithTgid => tgid_re(),
            LineFormat::WithIrqInfo => irq_info_re(),
            LineFormat::Legacy => legacy_re(),
        }
    }

    pub fn parse(self, line: &str) -> Option<LineEvent> {
        let caps = self.regex().captures(line)?;
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());

        let (tgid, rest) = match self {
            LineFormat::WithTgid => {
                let tgid = group(3);
                (if tgid.starts_with('-') { None } else { tgid.parse().ok() }, 4)
            }
            LineFormat::WithIrqInfo | LineFormat::Legacy => (None, 3),
        };
        let seconds: f64 = group(rest + 1).parse().ok()?;
        Some(LineEvent {
            thread_name: group(1).to_string(),
            pid: group(2).parse().ok()?,
            tgid,
            cpu: group(rest).parse().ok()?,
            ts: seconds * 1000.0,
            event_name: group(rest + 2).to_string(),
            details: group(rest + 3).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_each_format() {
        let tgid = "  SurfaceFlinger-198   (  198) [001] ...1  100.500000: tracing_mark_write: B|198|draw";
        let irq = "          <idle>-0     [001] d..3  1.000000: sched_switch: prev_comm=swapper";
        let legacy = "     kworker/0:1-10    [000]  2.500000: sched_wakeup: comm=foo pid=12 prio=120 success=1 target_cpu=000";
        assert_eq!(LineFormat::detect(tgid), Some(LineFormat::WithTgid));
        assert_eq!(LineFormat::detect(irq), Some(LineFormat::WithIrqInfo));
        assert_eq!(LineFormat::detect(legacy), Some(LineFormat::Legacy));
        assert_eq!(LineFormat::detect("{\"traceEvents\": []}"), None);
        assert_eq!(LineFormat::detect("not a trace line"), None);
    }

    #[test]
    fn test_parse_tgid_line() {
        let line = "  SurfaceFlinger-198   (  197) [001] ...1  100.500000: tracing_mark_write: B|197|draw";
        let event = LineFormat::WithTgid.parse(line).unwrap();
        assert_eq!(event.thread_name, "SurfaceFlinger");
        assert_eq!(event.pid, 198);
        assert_eq!(event.tgid, Some(197));
        assert_eq!(event.cpu, 1);
        assert_eq!(event.ts, 100_500.0);
        assert_eq!(event.event_name, "tracing_mark_write");
        assert_eq!(event.details, "B|197|draw");

        let no_tgid = "  <...>-198   (-----) [001] ...1  1.000000: sched_wakeup: comm=a pid=1 prio=1 success=1 target_cpu=000";
        assert_eq!(LineFormat::WithTgid.parse(no_tgid).unwrap().tgid, None);
    }

    #[test]
    fn test_parse_keeps_dashes_in_thread_names() {
        let line = "     kworker/0:1-H-10    [000]  2.500000: 0: trace_event_clock_sync: parent_ts=2.0";
        let event = LineFormat::Legacy.parse(line).unwrap();
        assert_eq!(event.thread_name, "kworker/0:1-H");
        assert_eq!(event.pid, 10);
        assert_eq!(event.event_name, "0");
        assert_eq!(event.details, "trace_event_clock_sync: parent_ts=2.0");
    }
}
