//! Min/max bounds accumulator used by every model container.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Range {
    min: Option<f64>,
    max: Option<f64>,
}

impl Range {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_values(lo: f64, hi: f64) -> Self {
        let mut r = Self::new();
        r.add_value(lo);
        r.add_value(hi);
        r
    }

    pub fn reset(&mut self) {
        self.min = None;
        self.max = None;
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none()
    }

    pub fn add_value(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn add_range(&mut self, other: &Range) {
        if let (Some(lo), Some(hi)) = (other.min, other.max) {
            self.add_value(lo);
            self.add_value(hi);
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Span between min and max, 0 when empty.
    pub fn duration(&self) -> f64 {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0.0,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => value >= lo && value <= hi,
            _ => false,
        }
    }
}
