//! Per-title slice statistics.
//!
//! Aggregates slices by title to show where the time of a trace goes:
//! occurrences, wall and thread durations, self time, duration spread and
//! how often the slice recurs.
//!
//! # Architecture
//!
//! - **`SliceStats`** - aggregation as slices are recorded
//! - **`analyze_slices()`** - batch analysis over a whole `TraceModel`
//!
//! # Performance
//!
//! - `record_slice()`: O(1) amortized (HashMap insert/update)
//! - `to_summaries()`: O(n log n) over recorded slices (sorting start times)

// Counts are converted to f64 for averages and rates
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;

use crate::model::{Slice, TraceModel};

/// Aggregated statistics for all slices sharing a title.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceSummary {
    pub title: String,
    pub occurrences: usize,
    /// Sum of wall durations, ms.
    pub total_duration: f64,
    pub total_self_time: f64,
    /// Sums over the slices that carry thread timing; `None` when none do.
    pub total_thread_duration: Option<f64>,
    pub total_thread_self_time: Option<f64>,
    pub min_duration: f64,
    pub max_duration: f64,
    pub avg_duration: f64,
    /// Sample standard deviation of the durations; needs two slices.
    pub duration_stddev: Option<f64>,
    /// Occurrences per second between the first and last start; needs three
    /// slices spread over a positive time span.
    pub frequency: Option<f64>,
    pub frequency_stddev: Option<f64>,
    /// Share of the self time of every recorded slice (0.0 - 100.0).
    pub percentage: f64,
}

#[derive(Debug, Default)]
pub struct SliceStats {
    titles: HashMap<String, TitleStats>,
    total_self_time: f64,
}

#[derive(Debug, Default, Clone)]
struct TitleStats {
    durations: Vec<f64>,
    starts: Vec<f64>,
    self_time: f64,
    thread_duration: Option<f64>,
    thread_self_time: Option<f64>,
}

fn add_optional(total: &mut Option<f64>, value: Option<f64>) {
    if let Some(value) = value {
        *total = Some(total.unwrap_or(0.0) + value);
    }
}

impl SliceStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_slice(&mut self, slice: &Slice) {
        let stats = self.titles.entry(slice.title.clone()).or_default();
        stats.durations.push(slice.duration);
        stats.starts.push(slice.start);
        stats.self_time += slice.self_time;
        add_optional(&mut stats.thread_duration, slice.thread_duration);
        add_optional(&mut stats.thread_self_time, slice.thread_self_time.or(slice.thread_duration));
        self.total_self_time += slice.self_time;
    }

    pub fn total_slices(&self) -> usize {
        self.titles.values().map(|s| s.durations.len()).sum()
    }

    /// Summaries sorted by total self time, largest first.
    #[must_use]
    pub fn to_summaries(&self) -> Vec<SliceSummary> {
        let mut summaries: Vec<SliceSummary> = self
            .titles
            .iter()
            .map(|(title, stats)| stats.summarize(title, self.total_self_time))
            .collect();
        summaries.sort_by(|a, b| {
            b.total_self_time
                .total_cmp(&a.total_self_time)
                .then_with(|| a.title.cmp(&b.title))
        });
        summaries
    }
}

impl TitleStats {
    fn summarize(&self, title: &str, total_self_time: f64) -> SliceSummary {
        let n = self.durations.len();
        let total_duration: f64 = self.durations.iter().sum();
        let avg = total_duration / n as f64;
        let duration_stddev = (n > 1).then(|| {
            let squares: f64 = self.durations.iter().map(|d| (avg - d).powi(2)).sum();
            (squares / (n - 1) as f64).sqrt()
        });
        let (frequency, frequency_stddev) = self.frequency();

        SliceSummary {
            title: title.to_string(),
            occurrences: n,
            total_duration,
            total_self_time: self.self_time,
            total_thread_duration: self.thread_duration,
            total_thread_self_time: self.thread_self_time,
            min_duration: self.durations.iter().copied().fold(f64::INFINITY, f64::min),
            max_duration: self.durations.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg_duration: avg,
            duration_stddev,
            frequency,
            frequency_stddev,
            percentage: if total_self_time > 0.0 { self.self_time / total_self_time * 100.0 } else { 0.0 },
        }
    }

    /// Mean rate over the whole span, and the spread of the rates implied by
    /// each gap between consecutive starts. Zero gaps carry no rate.
    fn frequency(&self) -> (Option<f64>, Option<f64>) {
        let mut starts = self.starts.clone();
        starts.sort_by(f64::total_cmp);
        let (Some(first), Some(last)) = (starts.first(), starts.last()) else {
            return (None, None);
        };
        let elapsed = last - first;
        if starts.len() <= 2 || elapsed <= 0.0 {
            return (None, None);
        }

        let frequency = 1000.0 * (starts.len() - 1) as f64 / elapsed;
        let rates: Vec<f64> = starts
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|gap| *gap > 0.0)
            .map(|gap| 1000.0 / gap)
            .collect();
        let stddev = (rates.len() > 1).then(|| {
            let squares: f64 = rates.iter().map(|r| (frequency - r).powi(2)).sum();
            (squares / (rates.len() - 1) as f64).sqrt()
        });
        (Some(frequency), stddev)
    }
}

/// Statistics over every thread slice in the model (batch analysis).
///
/// Kernel slices are already merged into the thread slice groups by the time
/// a model is built, so they are counted too.
#[must_use]
pub fn analyze_slices(model: &TraceModel) -> Vec<SliceSummary> {
    let mut stats = SliceStats::new();
    for thread in model.all_threads() {
        for slice in thread.slice_group.slices() {
            stats.record_slice(slice);
        }
    }
    stats.to_summaries()
}
