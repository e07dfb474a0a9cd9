//! Async slices: operations that start on one thread and may finish on
//! another, optionally broken into steps.

use serde::Serialize;

use super::slice::ResolvedRef;
use crate::base::{string_color_id, Range};
use crate::domain::{Args, ThreadRef};

/// How the steps of an async slice name its segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AsyncStepKind {
    /// `T` steps: each step names the segment after it.
    Begin,
    /// `p` steps: each step names the segment before it.
    Past,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncSlice {
    pub category: String,
    pub title: String,
    pub color_id: usize,
    pub start: f64,
    pub duration: f64,
    pub id: String,
    pub args: Args,
    pub start_thread: ThreadRef,
    pub end_thread: ThreadRef,
    /// One entry per segment between consecutive events of the slice.
    pub sub_slices: Vec<AsyncSlice>,
    /// `None` when the slice has no steps.
    pub step_kind: Option<AsyncStepKind>,
    pub resolved_refs: Vec<ResolvedRef>,
}

impl AsyncSlice {
    pub fn new(
        category: impl Into<String>,
        title: impl Into<String>,
        id: impl Into<String>,
        start: f64,
        start_thread: ThreadRef,
        args: Args,
    ) -> Self {
        let title = title.into();
        Self {
            category: category.into(),
            color_id: string_color_id(&title),
            title,
            start,
            duration: 0.0,
            id: id.into(),
            args,
            start_thread,
            end_thread: start_thread,
            sub_slices: Vec::new(),
            step_kind: None,
            resolved_refs: Vec::new(),
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        self.start += amount;
        for sub in &mut self.sub_slices {
            sub.shift_timestamps_forward(amount);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AsyncSliceGroup {
    pub slices: Vec<AsyncSlice>,
    pub bounds: Range,
}

impl AsyncSliceGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, slice: AsyncSlice) {
        self.slices.push(slice);
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for slice in &mut self.slices {
            slice.shift_timestamps_forward(amount);
        }
    }

    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for slice in &self.slices {
            self.bounds.add_value(slice.start);
            self.bounds.add_value(slice.end());
        }
    }
}
