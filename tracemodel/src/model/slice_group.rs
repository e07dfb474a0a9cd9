//! Slice groups: the per-thread nesting stack and the resulting slice list.
//!
//! Begin/end pairs are matched with a stack of open partial slices. Once an
//! import is complete, [`SliceGroup::create_sub_slices`] sorts the slices by
//! start time and links every slice to the innermost slice that contains it.
//! After that, `parent`/`sub_slices`/`depth` on every [`Slice`] are valid
//! and children always lie within their parent's interval.

use log::debug;
use serde::Serialize;
use std::mem;

use super::slice::Slice;
use crate::base::{find_low_index_in_sorted_intervals, time_lt, Range};
use crate::domain::{Args, ModelError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SliceGroup {
    slices: Vec<Slice>,
    #[serde(skip)]
    open_partial_slices: Vec<Slice>,
    top_level: Vec<usize>,
    pub bounds: Range,
}

impl SliceGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn slices_mut(&mut self) -> &mut [Slice] {
        &mut self.slices
    }

    /// Indices of the slices that have no parent. Valid after
    /// [`create_sub_slices`](Self::create_sub_slices).
    pub fn top_level_slices(&self) -> &[usize] {
        &self.top_level
    }

    pub fn push_slice(&mut self, slice: Slice) -> &mut Slice {
        self.slices.push(slice);
        let last = self.slices.len() - 1;
        &mut self.slices[last]
    }

    pub fn push_slices(&mut self, slices: impl IntoIterator<Item = Slice>) {
        self.slices.extend(slices);
    }

    /// Opens a new slice on top of the nesting stack.
    ///
    /// # Errors
    /// Returns [`ModelError::SliceOutOfOrder`] when `ts` is before the most
    /// recently opened slice.
    pub fn begin_slice(
        &mut self,
        category: &str,
        title: &str,
        ts: f64,
        args: Args,
        tts: Option<f64>,
    ) -> Result<&Slice, ModelError> {
        if !self.is_timestamp_valid_for_begin_or_end(ts) {
            return Err(ModelError::SliceOutOfOrder);
        }
        let mut slice = Slice::new(category, title, ts, args);
        slice.thread_start = tts;
        self.open_partial_slices.push(slice);
        let last = self.open_partial_slices.len() - 1;
        Ok(&self.open_partial_slices[last])
    }

    pub fn is_timestamp_valid_for_begin_or_end(&self, ts: f64) -> bool {
        self.open_partial_slices.last().map_or(true, |top| ts >= top.start)
    }

    /// Number of begun slices still waiting for their end.
    pub fn open_slice_count(&self) -> usize {
        self.open_partial_slices.len()
    }

    pub fn most_recently_opened_partial_slice(&self) -> Option<&Slice> {
        self.open_partial_slices.last()
    }

    /// Ends the most recently begun slice and moves it into the slice list.
    ///
    /// # Errors
    /// Fails when no slice is open or when `ts` precedes the slice's start;
    /// the open stack is left untouched in both cases.
    pub fn end_slice(&mut self, ts: f64, tts: Option<f64>) -> Result<&mut Slice, ModelError> {
        let top = self.open_partial_slices.last().ok_or(ModelError::NoOpenSlice)?;
        if ts < top.start {
            return Err(ModelError::EndBeforeStart { title: top.title.clone() });
        }
        let mut slice = self.open_partial_slices.pop().ok_or(ModelError::NoOpenSlice)?;
        slice.duration = ts - slice.start;
        slice.self_time = slice.duration;
        if let (Some(end_tts), Some(start_tts)) = (tts, slice.thread_start) {
            slice.thread_duration = Some(end_tts - start_tts);
            slice.thread_self_time = slice.thread_duration;
        }
        Ok(self.push_slice(slice))
    }

    /// Pushes an already-complete slice (an `X` event).
    ///
    /// A missing duration yields a zero-length slice flagged
    /// `did_not_finish`.
    #[allow(clippy::too_many_arguments)]
    pub fn push_complete_slice(
        &mut self,
        category: &str,
        title: &str,
        ts: f64,
        duration: Option<f64>,
        tts: Option<f64>,
        thread_duration: Option<f64>,
        args: Args,
    ) -> &mut Slice {
        let mut slice = Slice::new(category, title, ts, args).with_duration(duration.unwrap_or(0.0));
        slice.did_not_finish = duration.is_none();
        slice.thread_start = tts;
        slice.thread_duration = thread_duration;
        slice.thread_self_time = thread_duration;
        self.push_slice(slice)
    }

    /// Closes every open slice at `max_timestamp`, marking it as not finished.
    /// Without a timestamp the group's own max bound is used.
    pub fn auto_close_open_slices(&mut self, max_timestamp: Option<f64>) {
        if self.open_partial_slices.is_empty() {
            return;
        }
        let max_ts = match max_timestamp {
            Some(ts) => ts,
            None => {
                self.update_bounds();
                self.bounds.max().unwrap_or(0.0)
            }
        };
        while let Some(mut slice) = self.open_partial_slices.pop() {
            slice.duration = (max_ts - slice.start).max(0.0);
            slice.self_time = slice.duration;
            slice.did_not_finish = true;
            self.slices.push(slice);
        }
    }

    pub fn shift_timestamps_forward(&mut self, amount: f64) {
        for slice in self.slices.iter_mut().chain(self.open_partial_slices.iter_mut()) {
            slice.start += amount;
        }
    }

    /// Bounds over closed slices plus the starts of slices still open.
    pub fn update_bounds(&mut self) {
        self.bounds.reset();
        for slice in &self.slices {
            self.bounds.add_value(slice.start);
            self.bounds.add_value(slice.end());
        }
        if let (Some(first), Some(last)) =
            (self.open_partial_slices.first(), self.open_partial_slices.last())
        {
            self.bounds.add_value(first.start);
            self.bounds.add_value(last.start);
        }
    }

    /// Sorts slices by start and links each one to its innermost enclosing
    /// slice.
    ///
    /// Ties on start are broken by longer duration first, then by the slice
    /// that was pushed later (B/E pairs are pushed in end order, so the
    /// enclosing slice comes after its children).
    pub fn create_sub_slices(&mut self) {
        let mut indexed: Vec<(usize, Slice)> = mem::take(&mut self.slices).into_iter().enumerate().collect();
        indexed.sort_by(|(ix, x), (iy, y)| {
            x.start
                .total_cmp(&y.start)
                .then(y.duration.total_cmp(&x.duration))
                .then(iy.cmp(ix))
        });
        self.slices = indexed.into_iter().map(|(_, slice)| slice).collect();
        self.top_level.clear();

        for slice in &mut self.slices {
            slice.parent = None;
            slice.sub_slices.clear();
            slice.depth = 0;
        }
        if self.slices.is_empty() {
            return;
        }

        self.top_level.push(0);
        let mut root = Some(0);
        for i in 1..self.slices.len() {
            let mut candidate = root;
            while let Some(p) = candidate {
                if self.slices[p].bounds(&self.slices[i]) {
                    self.slices[i].parent = Some(p);
                    self.slices[i].depth = self.slices[p].depth + 1;
                    self.slices[p].sub_slices.push(i);
                    break;
                }
                candidate = self.slices[p].parent;
            }
            if candidate.is_none() {
                self.top_level.push(i);
            }
            root = Some(i);
        }

        for i in 0..self.slices.len() {
            let (child_time, child_thread_time) = self.slices[i].sub_slices.iter().fold(
                (0.0, 0.0),
                |(wall, cpu), &c| {
                    let child = &self.slices[c];
                    (wall + child.duration, cpu + child.thread_duration.unwrap_or(0.0))
                },
            );
            let slice = &mut self.slices[i];
            slice.self_time = slice.duration - child_time;
            slice.thread_self_time = slice.thread_duration.map(|td| td - child_thread_time);
        }
        debug!("built sub slices: {} slices, {} top level", self.slices.len(), self.top_level.len());
    }

    /// The top-level slice containing `ts`, if any.
    pub fn top_level_slice_at(&self, ts: f64) -> Option<usize> {
        self.child_containing(&self.top_level, ts)
    }

    /// The deepest slice containing `ts`.
    pub fn slice_at(&self, ts: f64) -> Option<usize> {
        let mut current = self.top_level_slice_at(ts)?;
        while let Some(child) = self.child_containing(&self.slices[current].sub_slices, ts) {
            current = child;
        }
        Some(current)
    }

    fn child_containing(&self, candidates: &[usize], ts: f64) -> Option<usize> {
        find_low_index_in_sorted_intervals(
            candidates,
            |&i| self.slices[i].start,
            |&i, _| self.slices[i].duration,
            ts,
        )
        .found()
        .map(|pos| candidates[pos])
    }

    /// Merges a userland group (`group_a`) with a kernel group (`group_b`).
    ///
    /// Kernel slices that do not nest properly with userland slices are split
    /// at the userland slice boundaries; the later parts of a split slice get
    /// a `" (cont.)"` suffix. Neither input is modified.
    ///
    /// # Errors
    /// Fails when either group still has open slices.
    pub fn merge(group_a: &SliceGroup, group_b: &SliceGroup) -> Result<SliceGroup, ModelError> {
        if !group_a.open_partial_slices.is_empty() || !group_b.open_partial_slices.is_empty() {
            return Err(ModelError::OpenSlicesDuringMerge);
        }

        let by_end = |group: &SliceGroup| {
            let mut slices: Vec<Slice> = group.slices.iter().map(Slice::detached_copy).collect();
            slices.sort_by(|x, y| x.end().total_cmp(&y.end()));
            slices
        };
        let slices_a = by_end(group_a);
        let slices_b = by_end(group_b);

        let mut merger = Merger::default();
        let mut idx_a = slices_a.len();
        let mut idx_b = slices_b.len();

        // Walk both groups backwards by end time.
        while idx_a > 0 || idx_b > 0 {
            let take_b = match (idx_a.checked_sub(1), idx_b.checked_sub(1)) {
                (None, _) => true,
                (Some(a), Some(b)) => time_lt(slices_a[a].end(), slices_b[b].end()),
                (Some(_), None) => false,
            };
            let next = if take_b {
                idx_b -= 1;
                slices_b[idx_b].clone()
            } else {
                idx_a -= 1;
                slices_a[idx_a].clone()
            };
            let next_end = next.end();

            merger.close_open_slices(next_end)?;
            merger.result.push(next);
            let pushed = merger.result.len() - 1;
            if take_b {
                merger.open_b.push(pushed);
            } else {
                merger.split_open_slices(next_end)?;
                merger.open_a.push(pushed);
            }
        }
        merger.close_open_slices(f64::NEG_INFINITY)?;

        merger.result.reverse();
        let mut group = SliceGroup::new();
        group.slices = merger.result;
        group.create_sub_slices();
        group.update_bounds();
        Ok(group)
    }
}

#[derive(Default)]
struct Merger {
    result: Vec<Slice>,
    open_a: Vec<usize>,
    open_b: Vec<usize>,
}

impl Merger {
    fn split_open_slices(&mut self, when: f64) -> Result<(), ModelError> {
        for i in 0..self.open_b.len() {
            let old = &mut self.result[self.open_b[i]];
            let old_end = old.end();
            if time_lt(when, old.start) || time_lt(old_end, when) {
                return Err(ModelError::InvalidSplit { title: old.title.clone(), ts: when });
            }
            let mut earlier = old.detached_copy();
            old.start = when;
            old.duration = (old_end - when).max(0.0);
            old.self_time = old.duration;
            old.title.push_str(" (cont.)");
            earlier.duration = (when - earlier.start).max(0.0);
            earlier.self_time = earlier.duration;

            self.result.push(earlier);
            self.open_b[i] = self.result.len() - 1;
        }
        Ok(())
    }

    fn close_open_slices(&mut self, up_to: f64) -> Result<(), ModelError> {
        loop {
            let start_a = self.open_a.last().map(|&i| self.result[i].start);
            let start_b = self.open_b.last().map(|&i| self.result[i].start);
            if start_a.is_none() && start_b.is_none() {
                return Ok(());
            }
            if start_a.map_or(true, |s| s < up_to) && start_b.map_or(true, |s| s < up_to) {
                return Ok(());
            }
            match (start_a, start_b) {
                (Some(a), None) => {
                    self.split_open_slices(a)?;
                    self.open_a.pop();
                }
                (Some(a), Some(b)) if a > b => {
                    self.split_open_slices(a)?;
                    self.open_a.pop();
                }
                _ => {
                    self.open_b.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(group: &mut SliceGroup, title: &str, start: f64, end: f64) {
        group.begin_slice("", title, start, Args::new(), None).unwrap();
        group.end_slice(end, None).unwrap();
    }

    #[test]
    fn test_begin_end_nesting() {
        let mut group = SliceGroup::new();
        group.begin_slice("cat", "a", 1.0, Args::new(), None).unwrap();
        group.begin_slice("cat", "b", 2.0, Args::new(), None).unwrap();
        assert_eq!(group.open_slice_count(), 2);
        let b = group.end_slice(3.0, None).unwrap();
        assert_eq!(b.title, "b");
        assert_eq!(b.duration, 1.0);
        group.end_slice(4.0, None).unwrap();
        assert_eq!(group.open_slice_count(), 0);

        group.create_sub_slices();
        let slices = group.slices();
        assert_eq!(slices[0].title, "a");
        assert_eq!(slices[0].sub_slices, vec![1]);
        assert_eq!(slices[1].parent, Some(0));
        assert_eq!(slices[1].depth, 1);
        assert_eq!(slices[0].self_time, 2.0);
        assert_eq!(group.top_level_slices(), &[0]);
    }

    #[test]
    fn test_ends_at_same_timestamp_stay_nested() {
        // Microsecond timestamps converted to ms; the recomputed inner end
        // rounds past the outer one.
        let mut group = SliceGroup::new();
        group.begin_slice("", "outer", 1.0 / 1000.0, Args::new(), None).unwrap();
        group.begin_slice("", "inner", 2.0 / 1000.0, Args::new(), None).unwrap();
        group.end_slice(18.0 / 1000.0, None).unwrap();
        group.end_slice(18.0 / 1000.0, None).unwrap();
        group.create_sub_slices();

        let slices = group.slices();
        assert_eq!(slices[0].title, "outer");
        assert_eq!(slices[1].parent, Some(0));
        assert_eq!(slices[1].depth, 1);
        assert_eq!(group.top_level_slices(), &[0]);
        assert_eq!(group.slice_at(10.0 / 1000.0), Some(1));
    }

    #[test]
    fn test_begin_rejects_backward_timestamp() {
        let mut group = SliceGroup::new();
        group.begin_slice("", "a", 5.0, Args::new(), None).unwrap();
        assert_eq!(group.begin_slice("", "b", 4.0, Args::new(), None).unwrap_err(), ModelError::SliceOutOfOrder);
        assert!(!group.is_timestamp_valid_for_begin_or_end(4.0));
        assert!(group.is_timestamp_valid_for_begin_or_end(5.0));
    }

    #[test]
    fn test_end_without_begin_and_before_start() {
        let mut group = SliceGroup::new();
        assert_eq!(group.end_slice(1.0, None).unwrap_err(), ModelError::NoOpenSlice);
        group.begin_slice("", "a", 5.0, Args::new(), None).unwrap();
        assert!(matches!(group.end_slice(4.0, None), Err(ModelError::EndBeforeStart { .. })));
        assert_eq!(group.open_slice_count(), 1);
    }

    #[test]
    fn test_thread_duration_from_tts() {
        let mut group = SliceGroup::new();
        group.begin_slice("", "a", 1.0, Args::new(), Some(0.5)).unwrap();
        let slice = group.end_slice(3.0, Some(1.25)).unwrap();
        assert_eq!(slice.thread_duration, Some(0.75));
    }

    #[test]
    fn test_auto_close_marks_did_not_finish() {
        let mut group = SliceGroup::new();
        closed(&mut group, "done", 0.0, 1.0);
        group.begin_slice("", "outer", 2.0, Args::new(), None).unwrap();
        group.begin_slice("", "inner", 3.0, Args::new(), None).unwrap();
        group.auto_close_open_slices(Some(10.0));
        assert_eq!(group.open_slice_count(), 0);
        let unfinished: Vec<_> = group.slices().iter().filter(|s| s.did_not_finish).collect();
        assert_eq!(unfinished.len(), 2);
        assert!(unfinished.iter().all(|s| s.end() == 10.0));
    }

    #[test]
    fn test_auto_close_without_timestamp_uses_bounds() {
        let mut group = SliceGroup::new();
        closed(&mut group, "done", 0.0, 6.0);
        group.begin_slice("", "open", 2.0, Args::new(), None).unwrap();
        group.auto_close_open_slices(None);
        let open = group.slices().iter().find(|s| s.title == "open").unwrap();
        assert_eq!(open.end(), 6.0);
    }

    #[test]
    fn test_bounds_include_open_slices() {
        let mut group = SliceGroup::new();
        closed(&mut group, "a", 1.0, 2.0);
        group.begin_slice("", "b", 7.0, Args::new(), None).unwrap();
        group.update_bounds();
        assert_eq!(group.bounds.min(), Some(1.0));
        assert_eq!(group.bounds.max(), Some(7.0));
    }

    #[test]
    fn test_complete_slices_nest_by_containment() {
        let mut group = SliceGroup::new();
        group.push_complete_slice("", "child", 1.0, Some(1.0), None, None, Args::new());
        group.push_complete_slice("", "parent", 0.0, Some(5.0), None, None, Args::new());
        group.push_complete_slice("", "same_start_child", 0.0, Some(0.5), None, None, Args::new());
        group.push_complete_slice("", "overlapping", 4.0, Some(3.0), None, None, Args::new());
        group.create_sub_slices();

        let titles: Vec<_> = group.slices().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["parent", "same_start_child", "child", "overlapping"]);
        let slices = group.slices();
        assert_eq!(slices[1].parent, Some(0));
        assert_eq!(slices[2].parent, Some(0));
        assert_eq!(slices[3].parent, None);
        assert_eq!(group.top_level_slices(), &[0, 3]);
        for slice in slices {
            if let Some(p) = slice.parent {
                assert!(slices[p].bounds(slice));
            }
        }
        assert_eq!(slices[0].self_time, 3.5);
    }

    #[test]
    fn test_complete_slice_without_duration() {
        let mut group = SliceGroup::new();
        let slice = group.push_complete_slice("", "x", 3.0, None, None, None, Args::new());
        assert!(slice.did_not_finish);
        assert_eq!(slice.duration, 0.0);
    }

    #[test]
    fn test_slice_at_descends_to_deepest() {
        let mut group = SliceGroup::new();
        group.begin_slice("", "a", 0.0, Args::new(), None).unwrap();
        group.begin_slice("", "b", 1.0, Args::new(), None).unwrap();
        group.end_slice(2.0, None).unwrap();
        group.end_slice(4.0, None).unwrap();
        closed(&mut group, "c", 5.0, 6.0);
        group.create_sub_slices();

        let title_at = |ts| group.slice_at(ts).map(|i| group.slices()[i].title.clone());
        assert_eq!(title_at(0.5), Some("a".to_string()));
        assert_eq!(title_at(1.5), Some("b".to_string()));
        assert_eq!(title_at(4.5), None);
        assert_eq!(title_at(5.5), Some("c".to_string()));
        assert_eq!(title_at(-1.0), None);
    }

    #[test]
    fn test_shift_timestamps() {
        let mut group = SliceGroup::new();
        closed(&mut group, "a", 10.0, 12.0);
        group.begin_slice("", "open", 13.0, Args::new(), None).unwrap();
        group.shift_timestamps_forward(-10.0);
        assert_eq!(group.slices()[0].start, 0.0);
        assert_eq!(group.most_recently_opened_partial_slice().unwrap().start, 3.0);
    }

    #[test]
    fn test_merge_properly_nested() {
        let mut user = SliceGroup::new();
        closed(&mut user, "user", 0.0, 10.0);
        let mut kernel = SliceGroup::new();
        closed(&mut kernel, "sys_read", 2.0, 3.0);

        let merged = SliceGroup::merge(&user, &kernel).unwrap();
        let titles: Vec<_> = merged.slices().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["user", "sys_read"]);
        assert_eq!(merged.slices()[1].parent, Some(0));
    }

    #[test]
    fn test_merge_splits_improperly_nested_kernel_slices() {
        // kernel enter sys_write, user begins some_function, kernel exits.
        let mut user = SliceGroup::new();
        closed(&mut user, "some_function", 2.0, 8.0);
        let mut kernel = SliceGroup::new();
        closed(&mut kernel, "sys_write", 1.0, 3.0);
        closed(&mut kernel, "sys_write", 7.0, 9.0);

        let merged = SliceGroup::merge(&user, &kernel).unwrap();
        let mut parts: Vec<(String, f64, f64)> =
            merged.slices().iter().map(|s| (s.title.clone(), s.start, s.end())).collect();
        parts.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        assert_eq!(
            parts,
            vec![
                ("sys_write".to_string(), 1.0, 2.0),
                ("some_function".to_string(), 2.0, 8.0),
                ("sys_write (cont.)".to_string(), 2.0, 3.0),
                ("sys_write".to_string(), 7.0, 8.0),
                ("sys_write (cont.)".to_string(), 8.0, 9.0),
            ]
        );
        for slice in merged.slices() {
            if let Some(p) = slice.parent {
                assert!(merged.slices()[p].bounds(slice));
            }
        }
    }

    #[test]
    fn test_merge_kernel_slice_ending_with_userland_slice() {
        let mut user = SliceGroup::new();
        closed(&mut user, "user", 1.0 / 1000.0, 18.0 / 1000.0);
        let mut kernel = SliceGroup::new();
        closed(&mut kernel, "sys_read", 2.0 / 1000.0, 18.0 / 1000.0);

        let merged = SliceGroup::merge(&user, &kernel).unwrap();
        let titles: Vec<_> = merged.slices().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["user", "sys_read"]);
        assert_eq!(merged.slices()[1].parent, Some(0));
    }

    #[test]
    fn test_merge_rejects_open_slices() {
        let mut user = SliceGroup::new();
        user.begin_slice("", "open", 0.0, Args::new(), None).unwrap();
        let kernel = SliceGroup::new();
        assert_eq!(SliceGroup::merge(&user, &kernel).unwrap_err(), ModelError::OpenSlicesDuringMerge);
    }
}
