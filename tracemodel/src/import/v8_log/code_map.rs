//! Address → code name lookup for v8.log ticks.
//!
//! Shared libraries are static for the life of the process; generated code
//! is created, moved and deleted as the log goes on. Lookups try the
//! libraries first.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    pub size: u64,
    pub name: String,
}

impl CodeEntry {
    pub fn new(size: u64, name: impl Into<String>) -> Self {
        Self { size, name: name.into() }
    }
}

/// Entries keyed by start address; entries never overlap.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    dynamic: BTreeMap<u64, CodeEntry>,
    libraries: BTreeMap<u64, CodeEntry>,
}

/// Inserts `entry` at `start`, dropping entries it covers.
fn insert_replacing(map: &mut BTreeMap<u64, CodeEntry>, start: u64, entry: CodeEntry) {
    let end = start.saturating_add(entry.size);
    let covered: Vec<u64> = map.range(start..end).map(|(&addr, _)| addr).collect();
    for addr in covered {
        map.remove(&addr);
    }
    map.insert(start, entry);
}

fn find_in(map: &BTreeMap<u64, CodeEntry>, address: u64) -> Option<&CodeEntry> {
    map.range(..=address)
        .next_back()
        .filter(|&(&start, entry)| address < start.saturating_add(entry.size))
        .map(|(_, entry)| entry)
}

impl CodeMap {
    pub fn add_code(&mut self, start: u64, entry: CodeEntry) {
        insert_replacing(&mut self.dynamic, start, entry);
    }

    /// Returns false when nothing starts at `from`.
    pub fn move_code(&mut self, from: u64, to: u64) -> bool {
        match self.dynamic.remove(&from) {
            Some(entry) => {
                self.add_code(to, entry);
                true
            }
            None => false,
        }
    }

    /// Returns false when nothing starts at `start`.
    pub fn delete_code(&mut self, start: u64) -> bool {
        self.dynamic.remove(&start).is_some()
    }

    pub fn add_library(&mut self, start: u64, entry: CodeEntry) {
        insert_replacing(&mut self.libraries, start, entry);
    }

    pub fn find_entry(&self, address: u64) -> Option<&CodeEntry> {
        find_in(&self.libraries, address).or_else(|| find_in(&self.dynamic, address))
    }

    pub fn len(&self) -> usize {
        self.dynamic.len() + self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_within_entry_bounds() {
        let mut map = CodeMap::default();
        map.add_code(0x100, CodeEntry::new(0x10, "a"));
        map.add_code(0x200, CodeEntry::new(0x10, "b"));
        assert_eq!(map.find_entry(0x100).map(|e| e.name.as_str()), Some("a"));
        assert_eq!(map.find_entry(0x10f).map(|e| e.name.as_str()), Some("a"));
        assert_eq!(map.find_entry(0x110), None);
        assert_eq!(map.find_entry(0x50), None);
        assert_eq!(map.find_entry(0x205).map(|e| e.name.as_str()), Some("b"));
    }

    #[test]
    fn test_libraries_win_over_generated_code() {
        let mut map = CodeMap::default();
        map.add_code(0x1000, CodeEntry::new(0x100, "stub"));
        map.add_library(0x0, CodeEntry::new(0x2000, "/usr/lib/libc.so"));
        assert_eq!(map.find_entry(0x1010).map(|e| e.name.as_str()), Some("/usr/lib/libc.so"));
    }

    #[test]
    fn test_move_delete_and_overwrite() {
        let mut map = CodeMap::default();
        map.add_code(0x100, CodeEntry::new(0x10, "a"));
        assert!(map.move_code(0x100, 0x300));
        assert_eq!(map.find_entry(0x100), None);
        assert_eq!(map.find_entry(0x305).map(|e| e.name.as_str()), Some("a"));
        assert!(!map.move_code(0x100, 0x400));

        map.add_code(0x308, CodeEntry::new(0x4, "inner"));
        map.add_code(0x300, CodeEntry::new(0x20, "outer"));
        assert_eq!(map.len(), 1);
        assert!(map.delete_code(0x300));
        assert!(!map.delete_code(0x300));
        assert_eq!(map.find_entry(0x305), None);
    }
}
