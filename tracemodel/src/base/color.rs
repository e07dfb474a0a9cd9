//! Stable colour ids for titles.
//!
//! Renderers map these to their own palettes; the model only guarantees that
//! the same title always yields the same id.

/// Number of distinct colour ids handed out.
pub const NUM_COLOR_IDS: usize = 30;

/// Hashes a title into `0..NUM_COLOR_IDS`.
#[must_use]
pub fn string_color_id(name: &str) -> usize {
    let mut hash: u64 = 0;
    for unit in name.encode_utf16() {
        hash = (hash + 37 * hash + 11 * u64::from(unit)) % 0xFFFF_FFFF;
    }
    // hash < 2^32, fits usize on every supported target
    #[allow(clippy::cast_possible_truncation)]
    let id = (hash % NUM_COLOR_IDS as u64) as usize;
    id
}
