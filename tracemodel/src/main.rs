//! # tracemodel - Main Entry Point
//!
//! Loads one or more trace files, builds a single model from them and prints
//! a summary, the busiest slice titles and (optionally) every import warning.
//! `--export` writes the normalized model back out as trace-event JSON.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::fs::File;
use std::io::BufWriter;

use tracemodel::analysis::analyze_slices;
use tracemodel::cli::Args;
use tracemodel::export::TraceEventExporter;
use tracemodel::import::load_trace_file;
use tracemodel::model::TraceModel;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            // Nothing useful is left to do if the terminal is gone.
            let _ = e.print();
            std::process::exit(code);
        }
    };
    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run(args: &Args) -> Result<()> {
    let mut inputs = Vec::with_capacity(args.files.len());
    for path in &args.files {
        debug!("loading {}", path.display());
        let input = load_trace_file(path).with_context(|| format!("Failed to load {}", path.display()))?;
        inputs.push(input);
    }

    let model = TraceModel::from_traces(inputs, &args.import_options()).context("Failed to import traces")?;
    info!("imported {} file(s)", args.files.len());

    if !args.quiet {
        print_summary(&model);
    }
    if args.top > 0 && !args.quiet {
        print_slice_stats(&model, args.top);
    }
    if args.warnings {
        for warning in model.import_warnings() {
            println!("warning [{}]: {}", warning.kind.as_str(), warning.message);
        }
    }

    if let Some(export_path) = &args.export {
        let file = File::create(export_path)
            .with_context(|| format!("Failed to create export file: {}", export_path.display()))?;
        TraceEventExporter::new(&model)
            .export(BufWriter::new(file))
            .with_context(|| format!("Failed to write {}", export_path.display()))?;
        if !args.quiet {
            println!("saved: {}", export_path.display());
        }
    }
    Ok(())
}

fn print_summary(model: &TraceModel) {
    let threads: Vec<_> = model.all_threads().collect();
    let slices: usize = threads.iter().map(|t| t.slice_group.len()).sum();
    let async_slices: usize = threads.iter().map(|t| t.async_slice_group.len()).sum();

    println!("processes: {}", model.processes.len());
    println!("threads: {}", threads.len());
    println!("cpus: {}", model.kernel.cpus.len());
    println!("slices: {slices} ({async_slices} async)");
    println!("counters: {}", model.all_counters().count());
    println!("flow events: {}", model.flow_events.len());
    match (model.bounds.min(), model.bounds.max()) {
        (Some(min), Some(max)) => println!("bounds: {min:.3} ms .. {max:.3} ms ({:.3} ms)", max - min),
        _ => println!("bounds: empty"),
    }
    println!("warnings: {}", model.import_warnings().len());
}

fn print_slice_stats(model: &TraceModel, top: usize) {
    let summaries = analyze_slices(model);
    if summaries.is_empty() {
        return;
    }
    println!();
    println!("{:<40} {:>8} {:>12} {:>12} {:>7}", "TITLE", "COUNT", "SELF (ms)", "AVG (ms)", "SELF %");
    for summary in summaries.iter().take(top) {
        println!(
            "{:<40} {:>8} {:>12.3} {:>12.3} {:>6.1}%",
            truncate(&summary.title, 40),
            summary.occurrences,
            summary.total_self_time,
            summary.avg_duration,
            summary.percentage
        );
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let head: String = s.chars().take(width - 1).collect();
        format!("{head}…")
    }
}
