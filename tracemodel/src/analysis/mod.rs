//! Analysis over a finished trace model
//!
//! Pure aggregation logic, kept apart from the command-line presentation.

pub mod slice_stats;

pub use slice_stats::{analyze_slices, SliceStats, SliceSummary};
