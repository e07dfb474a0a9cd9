//! Trace export functionality
//!
//! Writes a finished model back out in the Chrome trace-event JSON format,
//! loadable by chrome://tracing, Perfetto and this crate's own importer.

pub mod trace_event_exporter;

pub use trace_event_exporter::TraceEventExporter;
