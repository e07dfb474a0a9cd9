//! Counters: named, stacked numeric series sampled over time.

use serde::Serialize;

use crate::base::{find_preceding_index, string_color_id, Range};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSeries {
    pub name: String,
    pub color_id: usize,
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

impl CounterSeries {
    pub fn new(name: impl Into<String>, color_id: usize) -> Self {
        Self { name: name.into(), color_id, timestamps: Vec::new(), values: Vec::new() }
    }

    pub fn add_sample(&mut self, ts: f64, value: f64) {
        self.timestamps.push(ts);
        self.values.push(value);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counter {
    pub category: String,
    /// Name as shown; counters recorded with an id are named `name[id]`.
    pub name: String,
    pub id: Option<String>,
    pub series: Vec<CounterSeries>,
    pub bounds: Range,
    max_total: f64,
}

impl Counter {
    pub fn new(category: impl Into<String>, name: impl Into<String>, id: Option<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            id,
            series: Vec::new(),
            bounds: Range::new(),
            max_total: 0.0,
        }
    }

    /// Adds a series, colouring it by `counter.series`. Returns its index.
    pub fn add_series(&mut self, name: &str) -> usize {
        let color_id = string_color_id(&format!("{}.{}", self.name, name));
        self.series.push(CounterSeries::new(name, color_id));
        self.series.len() - 1
    }

    pub fn series_index(&self, name: &str) -> Option<usize> {
        self.series.iter().position(|s| s.name == name)
    }

    pub fn num_series(&self) -> usize {
        self.series.len()
    }

    pub fn num_samples(&self) -> usize {
        self.series.first().map_or(0, |s| s.timestamps.len())
    }

    /// Sample timestamps, shared by every series.
    pub fn timestamps(&self) -> &[f64] {
        self.series.first().map_or(&[][..], |s| s.timestamps.as_slice())
    }

    /// Index of the sample in effect at `ts` (the nearest preceding one).
    pub fn sample_index_at(&self, ts: f64) -> Option<usize> {
        find_preceding_index(self.timestamps(), |t| *t, ts)
    }

    /// Sum of all series at sample `index`.
    pub fn total_at(&self, index: usize) -> f64 {
        self.series.iter().filter_map(|s| s.values.get(index)).sum()
    }

    /// Largest stacked total seen, valid after `update_bounds`.
    pub fn max_total(&self) -> f64 {
        self.max_total
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for series in &mut self.series {
            for ts in &mut series.timestamps {
                *ts += amount;
            }
        }
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        let ts = self.timestamps();
        if let (Some(first), Some(last)) = (ts.first().copied(), ts.last().copied()) {
            self.bounds.add_value(first);
            self.bounds.add_value(last);
        }
        self.max_total = (0..self.num_samples())
            .map(|i| self.total_at(i))
            .fold(f64::NEG_INFINITY, f64::max)
            .max(0.0);
    }
}
