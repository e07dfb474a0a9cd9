//! Lenient decoding of a single trace-event record.

use serde_json::Value;

use crate::domain::{Args, Pid, ThreadRef, Tid};

/// One trace-event object with the fields the importer reads.
///
/// Timestamps stay in the file's microseconds; use [`ts_ms`](Self::ts_ms)
/// and friends for model time.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEventRecord {
    pub ph: String,
    pub name: Option<String>,
    pub cat: String,
    pub pid: Pid,
    pub tid: Tid,
    pub ts: f64,
    pub dur: Option<f64>,
    pub tts: Option<f64>,
    pub tdur: Option<f64>,
    pub id: Option<String>,
    /// Instant event scope (`s` field).
    pub scope: Option<String>,
    pub args: Option<Value>,
}

impl TraceEventRecord {
    /// Decodes `value`; `None` when it is not a JSON object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            ph: obj.get("ph").and_then(Value::as_str).unwrap_or_default().to_string(),
            name: obj.get("name").and_then(as_string),
            cat: obj.get("cat").and_then(Value::as_str).unwrap_or_default().to_string(),
            pid: Pid(obj.get("pid").and_then(as_int).unwrap_or(0)),
            tid: Tid(obj.get("tid").and_then(as_int).unwrap_or(0)),
            ts: obj.get("ts").and_then(as_number).unwrap_or(0.0),
            dur: obj.get("dur").and_then(as_number),
            tts: obj.get("tts").and_then(as_number),
            tdur: obj.get("tdur").and_then(as_number),
            id: obj.get("id").and_then(as_string),
            scope: obj.get("s").and_then(Value::as_str).map(str::to_string),
            args: obj.get("args").cloned(),
        })
    }

    pub fn thread(&self) -> ThreadRef {
        ThreadRef { pid: self.pid, tid: self.tid }
    }

    pub fn ts_ms(&self) -> f64 {
        self.ts / 1000.0
    }

    pub fn dur_ms(&self) -> Option<f64> {
        self.dur.map(|d| d / 1000.0)
    }

    pub fn tts_ms(&self) -> Option<f64> {
        self.tts.map(|t| t / 1000.0)
    }

    pub fn tdur_ms(&self) -> Option<f64> {
        self.tdur.map(|t| t / 1000.0)
    }

    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// The `args` object, or an empty map when absent or not an object.
    pub fn args_map(&self) -> Args {
        match &self.args {
            Some(Value::Object(map)) => map.clone(),
            _ => Args::new(),
        }
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.as_ref()?.get(key)
    }
}

/// Strings as-is, numbers rendered; ids are compared as strings.
pub(crate) fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
