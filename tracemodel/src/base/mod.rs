//! Small building blocks shared by the model and the importers.

pub mod color;
pub mod range;
pub mod sorted_array;
pub mod time;

pub use color::string_color_id;
pub use range::Range;
pub use sorted_array::{
    find_closest_element_in_sorted_array, find_low_index_in_sorted_array,
    find_low_index_in_sorted_intervals, find_preceding_index, intersecting_intervals, IntervalHit,
};
pub use time::{time_eq, time_le, time_lt};
