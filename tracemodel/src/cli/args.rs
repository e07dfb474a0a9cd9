//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::ImportOptions;

#[derive(Parser, Debug)]
#[command(
    name = "tracemodel",
    about = "Import trace-event JSON and ftrace text into one trace model",
    after_help = "\
EXAMPLES:
    tracemodel trace.json                    Summarize a trace
    tracemodel trace.json.gz ftrace.txt      Merge a JSON trace with kernel data
    tracemodel trace.json --export out.json  Write the normalized model back out"
)]
pub struct Args {
    /// Trace files (trace-event JSON, ftrace text or systrace HTML; may be gzipped)
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Keep original timestamps instead of shifting the trace to start at 0
    #[arg(long)]
    pub no_shift: bool,

    /// Keep threads that hold no data
    #[arg(long)]
    pub keep_empty: bool,

    /// Export the model as trace-event JSON
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Number of slice titles in the statistics table (0 = none)
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Print every import warning
    #[arg(short, long)]
    pub warnings: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions { shift_world_to_zero: !self.no_shift, prune_empty_containers: !self.keep_empty }
    }
}
