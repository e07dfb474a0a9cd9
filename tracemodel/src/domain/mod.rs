//! Domain model for tracemodel
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling and accumulated import warnings

pub mod errors;
pub mod types;
pub mod warnings;

// Re-export common types for convenience
pub use types::{Args, CpuId, Pid, ThreadRef, Tid};

pub use errors::{ExportError, ImportError, ModelError};
pub use warnings::{ImportWarning, WarningKind};
