//! Import configuration.

/// Knobs for [`TraceModel::from_traces`](crate::model::TraceModel::from_traces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Shift every timestamp so the earliest event sits at 0.
    pub shift_world_to_zero: bool,

    /// Drop threads that ended up with no data.
    pub prune_empty_containers: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { shift_world_to_zero: true, prune_empty_containers: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ImportOptions::default();
        assert!(opts.shift_world_to_zero);
        assert!(opts.prune_empty_containers);
    }
}
