//! Slices: named time intervals on a thread (or CPU).

use serde::Serialize;

use crate::base::{string_color_id, time_le};
use crate::domain::Args;
use crate::model::object_collection::SnapshotRef;

/// An `id_ref` argument that was resolved to an object snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRef {
    /// JSON pointer (RFC 6901) of the referencing field inside the args.
    pub pointer: String,
    pub snapshot: SnapshotRef,
}

/// A named interval of time, e.g. one function execution on a thread.
///
/// `parent`, `sub_slices` and `depth` are filled in by
/// [`SliceGroup::create_sub_slices`](super::SliceGroup::create_sub_slices)
/// and index into the owning group's slice list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice {
    pub category: String,
    pub title: String,
    pub color_id: usize,
    pub start: f64,
    pub duration: f64,
    pub thread_start: Option<f64>,
    pub thread_duration: Option<f64>,
    pub args: Args,
    /// The slice was still open when the trace ended.
    pub did_not_finish: bool,
    pub parent: Option<usize>,
    pub sub_slices: Vec<usize>,
    pub depth: usize,
    pub self_time: f64,
    pub thread_self_time: Option<f64>,
    pub resolved_refs: Vec<ResolvedRef>,
}

impl Slice {
    pub fn new(category: impl Into<String>, title: impl Into<String>, start: f64, args: Args) -> Self {
        let title = title.into();
        Self {
            category: category.into(),
            color_id: string_color_id(&title),
            title,
            start,
            duration: 0.0,
            thread_start: None,
            thread_duration: None,
            args,
            did_not_finish: false,
            parent: None,
            sub_slices: Vec::new(),
            depth: 0,
            self_time: 0.0,
            thread_self_time: None,
            resolved_refs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self.self_time = duration;
        self
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn thread_end(&self) -> Option<f64> {
        Some(self.thread_start? + self.thread_duration?)
    }

    /// True when `other` lies entirely within this slice. Ends that differ
    /// only by rounding count as equal.
    pub fn bounds(&self, other: &Slice) -> bool {
        time_le(self.start, other.start) && time_le(other.end(), self.end())
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Copy of the slice's own data, without nesting links.
    pub(crate) fn detached_copy(&self) -> Slice {
        Slice {
            parent: None,
            sub_slices: Vec::new(),
            depth: 0,
            self_time: self.duration,
            thread_self_time: self.thread_duration,
            ..self.clone()
        }
    }
}
