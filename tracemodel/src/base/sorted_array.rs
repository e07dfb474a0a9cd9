//! Binary-search helpers over arrays sorted by a timestamp key.
//!
//! These back every hit-test in the model: "which slice is under this
//! timestamp", "which counter sample precedes it", "which object instance
//! was alive then". All lookups are O(log n).

use std::ops::Range as IndexRange;

/// Result of a containment query over sorted intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalHit {
    /// The value lies before the first interval (or there are no intervals).
    Before,
    /// The value lies inside the interval at this index.
    Found(usize),
    /// The value lies after, or between, the intervals.
    After,
}

impl IntervalHit {
    pub fn found(self) -> Option<usize> {
        match self {
            IntervalHit::Found(i) => Some(i),
            _ => None,
        }
    }
}

/// First index whose key is `>= value` (lower bound). Returns `items.len()`
/// when every key is smaller.
pub fn find_low_index_in_sorted_array<T>(items: &[T], key: impl Fn(&T) -> f64, value: f64) -> usize {
    items.partition_point(|item| key(item) < value)
}

/// Index of the last element whose key is `<= value`.
pub fn find_preceding_index<T>(items: &[T], key: impl Fn(&T) -> f64, value: f64) -> Option<usize> {
    let upper = items.partition_point(|item| key(item) <= value);
    upper.checked_sub(1)
}

/// Finds the interval containing `value` in an array of intervals sorted by
/// start, where interval `i` covers `[lo(i), lo(i) + width(i, idx))`.
pub fn find_low_index_in_sorted_intervals<T>(
    items: &[T],
    lo: impl Fn(&T) -> f64,
    width: impl Fn(&T, usize) -> f64,
    value: f64,
) -> IntervalHit {
    if items.is_empty() {
        return IntervalHit::Before;
    }
    let contains = |i: usize| {
        let start = lo(&items[i]);
        value >= start && value < start + width(&items[i], i)
    };

    let first = find_low_index_in_sorted_array(items, &lo, value);
    if first == 0 {
        if contains(0) {
            IntervalHit::Found(0)
        } else {
            IntervalHit::Before
        }
    } else if first < items.len() {
        if contains(first) {
            IntervalHit::Found(first)
        } else if contains(first - 1) {
            IntervalHit::Found(first - 1)
        } else {
            IntervalHit::After
        }
    } else if contains(first - 1) {
        IntervalHit::Found(first - 1)
    } else {
        IntervalHit::After
    }
}

/// Indices of the intervals intersecting `[range_lo, range_hi)`.
///
/// Intervals must be sorted by start and non-overlapping (a slice group's
/// top-level slices, a thread's time slices).
pub fn intersecting_intervals<T>(
    items: &[T],
    lo: impl Fn(&T) -> f64,
    width: impl Fn(&T) -> f64,
    range_lo: f64,
    range_hi: f64,
) -> IndexRange<usize> {
    if items.is_empty() || range_lo > range_hi {
        return 0..0;
    }
    let mut start = find_low_index_in_sorted_array(items, &lo, range_lo);
    if start > 0 {
        let prev = &items[start - 1];
        if lo(prev) + width(prev) > range_lo {
            start -= 1;
        }
    }
    let end = items.partition_point(|item| lo(item) < range_hi);
    start..end.max(start)
}

/// Element whose key is closest to `value`, provided the distance does not
/// exceed `max_diff`.
pub fn find_closest_element_in_sorted_array<T>(
    items: &[T],
    key: impl Fn(&T) -> f64,
    value: f64,
    max_diff: f64,
) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let i = find_low_index_in_sorted_array(items, &key, value);
    let candidates = [i.checked_sub(1), (i < items.len()).then_some(i)];
    candidates
        .into_iter()
        .flatten()
        .map(|idx| (idx, (key(&items[idx]) - value).abs()))
        .filter(|(_, diff)| *diff <= max_diff)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    // (start, duration)
    fn intervals() -> Vec<(f64, f64)> {
        vec![(0.0, 1.0), (2.0, 1.0), (4.0, 2.0)]
    }

    #[test]
    fn test_lower_bound() {
        let ts = [1.0, 2.0, 2.0, 5.0];
        assert_eq!(find_low_index_in_sorted_array(&ts, |v| *v, 0.5), 0);
        assert_eq!(find_low_index_in_sorted_array(&ts, |v| *v, 2.0), 1);
        assert_eq!(find_low_index_in_sorted_array(&ts, |v| *v, 3.0), 3);
        assert_eq!(find_low_index_in_sorted_array(&ts, |v| *v, 6.0), 4);
    }

    #[test]
    fn test_preceding_index() {
        let ts = [1.0, 2.0, 5.0];
        assert_eq!(find_preceding_index(&ts, |v| *v, 0.5), None);
        assert_eq!(find_preceding_index(&ts, |v| *v, 2.0), Some(1));
        assert_eq!(find_preceding_index(&ts, |v| *v, 4.9), Some(1));
        assert_eq!(find_preceding_index(&ts, |v| *v, 9.0), Some(2));
    }

    #[test]
    fn test_interval_containment() {
        let iv = intervals();
        let find = |v| find_low_index_in_sorted_intervals(&iv, |i| i.0, |i, _| i.1, v);
        assert_eq!(find(-1.0), IntervalHit::Before);
        assert_eq!(find(0.0), IntervalHit::Found(0));
        assert_eq!(find(0.999), IntervalHit::Found(0));
        assert_eq!(find(1.5), IntervalHit::After);
        assert_eq!(find(2.5), IntervalHit::Found(1));
        assert_eq!(find(5.9), IntervalHit::Found(2));
        assert_eq!(find(6.0), IntervalHit::After);
    }

    #[test]
    fn test_interval_containment_empty() {
        let iv: Vec<(f64, f64)> = Vec::new();
        assert_eq!(find_low_index_in_sorted_intervals(&iv, |i| i.0, |i, _| i.1, 1.0), IntervalHit::Before);
    }

    #[test]
    fn test_intersecting_intervals() {
        let iv = intervals();
        assert_eq!(intersecting_intervals(&iv, |i| i.0, |i| i.1, 0.5, 2.5), 0..2);
        assert_eq!(intersecting_intervals(&iv, |i| i.0, |i| i.1, 1.2, 1.8), 1..1);
        assert_eq!(intersecting_intervals(&iv, |i| i.0, |i| i.1, 3.5, 10.0), 2..3);
    }

    #[test]
    fn test_closest_element() {
        let ts = [1.0, 4.0, 10.0];
        assert_eq!(find_closest_element_in_sorted_array(&ts, |v| *v, 3.0, 5.0), Some(1));
        assert_eq!(find_closest_element_in_sorted_array(&ts, |v| *v, 2.0, 5.0), Some(0));
        assert_eq!(find_closest_element_in_sorted_array(&ts, |v| *v, 7.5, 1.0), None);
    }
}
