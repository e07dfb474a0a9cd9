//! Import warnings
//!
//! Malformed trace content never aborts an import. Each problem is recorded
//! as an [`ImportWarning`] on the model so callers get a best-effort model
//! plus a list of what was skipped.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ParseError,
    DurationParseError,
    TitleMatchError,
    CounterParseError,
    MetadataParseError,
    SampleParseError,
    AsyncSliceParseError,
    FlowSliceParseError,
    FlowSliceStartError,
    FlowSliceOrderingError,
    ObjectParseError,
    ObjectSnapshotParseError,
    LinuxPerfParseError,
    V8LogParseError,
    ClockSyncError,
    MergeError,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::ParseError => "parse_error",
            WarningKind::DurationParseError => "duration_parse_error",
            WarningKind::TitleMatchError => "title_match_error",
            WarningKind::CounterParseError => "counter_parse_error",
            WarningKind::MetadataParseError => "metadata_parse_error",
            WarningKind::SampleParseError => "sample_parse_error",
            WarningKind::AsyncSliceParseError => "async_slice_parse_error",
            WarningKind::FlowSliceParseError => "flow_slice_parse_error",
            WarningKind::FlowSliceStartError => "flow_slice_start_error",
            WarningKind::FlowSliceOrderingError => "flow_slice_ordering_error",
            WarningKind::ObjectParseError => "object_parse_error",
            WarningKind::ObjectSnapshotParseError => "object_snapshot_parse_error",
            WarningKind::LinuxPerfParseError => "linux_perf_parse_error",
            WarningKind::V8LogParseError => "v8_log_parse_error",
            WarningKind::ClockSyncError => "clock_sync_error",
            WarningKind::MergeError => "merge_error",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl ImportWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
