//! # tracemodel - Trace Import and Model Construction
//!
//! Parses heterogeneous, loosely structured trace data into one consistent,
//! queryable in-memory model: processes, threads, nested slices, async
//! slices, counters, instant events, flows and object snapshots, plus
//! per-CPU scheduling data from the kernel.
//!
//! ## Architecture Overview
//!
//! ```text
//! trace.json(.gz)                      ftrace text / systrace HTML
//!       │                                         │
//!       ▼                                         ▼
//! TraceEventImporter ── systemTraceEvents ──▶ LinuxPerfImporter
//!       │                                         │
//!       └──────────────────┬──────────────────────┘
//!                          ▼
//!            TraceModel::from_traces (staged pipeline)
//!                          │
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!      analysis          export         hit-testing
//!   (slice stats)    (trace.json)   (base::sorted_array)
//! ```
//!
//! ## Module Structure
//!
//! - [`import`]: the [`Importer`](import::Importer) trait, importer
//!   selection and file loading
//!   - `trace_event`: Chrome trace-event JSON (B/E, X, S/T/p/F, s/t/f,
//!     i/I, P, C, M, N/O/D)
//!   - `linux_perf`: ftrace text (sched, power, function graph, atrace
//!     markers, clock sync)
//!   - `v8_log`: V8 `v8.log` timer events and profiler ticks
//! - [`model`]: the trace model and the import pipeline that builds it
//! - [`base`]: ranges, sorted-array searches and stable colour ids
//! - [`analysis`]: per-title slice statistics
//! - [`export`]: trace-event JSON writer
//! - [`domain`]: newtype ids, errors and import warnings
//! - [`config`]: import options
//! - [`cli`]: command-line argument parsing
//!
//! ## Errors
//!
//! Malformed trace content never fails an import. Each problem becomes an
//! [`ImportWarning`](domain::ImportWarning) on the model and the rest of the
//! trace is still imported. Only unreadable input, invalid JSON or input no
//! importer recognizes produce an [`ImportError`](domain::ImportError).
//!
//! ## Typical Usage
//!
//! ```no_run
//! use tracemodel::config::ImportOptions;
//! use tracemodel::import::load_trace_file;
//! use tracemodel::model::TraceModel;
//!
//! # fn example() -> Result<(), tracemodel::domain::ImportError> {
//! let input = load_trace_file("trace.json.gz")?;
//! let model = TraceModel::from_traces(vec![input], &ImportOptions::default())?;
//! for thread in model.all_threads() {
//!     println!("{}: {} slices", thread.user_friendly_name(), thread.slice_group.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod base;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod import;
pub mod model;
