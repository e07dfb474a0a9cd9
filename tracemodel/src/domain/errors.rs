//! Structured error types for tracemodel
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Only [`ImportError`] and [`ExportError`] escape the public pipeline;
//! [`ModelError`] is raised by model mutators and turned into import
//! warnings by the importers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Could not find an importer for the provided trace data")]
    NoImporter,

    #[error("Trace data is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Slices must be added in increasing timestamp order")]
    SliceOutOfOrder,

    #[error("endSlice called without an open slice")]
    NoOpenSlice,

    #[error("Slice {title} end time is before its start")]
    EndBeforeStart { title: String },

    #[error("Samples must be added in increasing timestamp order")]
    SampleOutOfOrder,

    #[error("Cannot merge slice groups with open partial slices")]
    OpenSlicesDuringMerge,

    #[error("Slice {title} should not be split at {ts}")]
    InvalidSplit { title: String, ts: f64 },

    #[error("Snapshots must be >= instance.creationTs")]
    SnapshotBeforeCreation,

    #[error("Snapshots cannot be added after an objects deletion timestamp")]
    SnapshotAfterDeletion,

    #[error("Snapshots already exists at this time!")]
    DuplicateSnapshot,

    #[error("Snapshots must be added in increasing timestamp order")]
    SnapshotOutOfOrder,

    #[error("Must provide base type name for name update")]
    MissingBaseType,

    #[error("Cannot update type name: base types dont match")]
    BaseTypeMismatch,

    #[error("Instance cannot be deleted at ts={ts}. A snapshot exists that is older")]
    DeleteBeforeSnapshot { ts: f64 },

    #[error("Mutation of the instance map must be done in ascending timestamp order")]
    InstanceOutOfOrder,

    #[error("At the provided timestamp, no instance was still alive")]
    NoLiveInstance,

    #[error("Cannot shift creationTs forward, snapshots have been added. First snap was at ts={first_snapshot_ts}")]
    CannotShiftCreation { first_snapshot_ts: f64 },

    #[error("Cannot add snapshot. No instance was alive that was mutable")]
    NoMutableInstance,

    #[error("Cannot delete an id before it was created")]
    DeleteBeforeCreation,

    #[error("id was already deleted earlier")]
    AlreadyDeleted,

    #[error("Object {name} used with cat={category}, but its instance has cat={existing}")]
    CategoryMismatch { name: String, category: String, existing: String },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize trace data: {0}")]
    SerializationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_display() {
        let err = ModelError::EndBeforeStart { title: "MessageLoop::Run".to_string() };
        assert_eq!(err.to_string(), "Slice MessageLoop::Run end time is before its start");
    }

    #[test]
    fn test_import_error_wraps_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid").unwrap_err();
        let err = ImportError::from(json_err);
        assert!(matches!(err, ImportError::Json(_)));
    }
}
