//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a TID where a
//! PID is expected, and make model lookups more expressive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process ID
///
/// Trace producers occasionally emit negative or synthetic pids (pid 0 is
/// used for pseudo kernel threads), so this is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid(pub i64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i64> for Pid {
    fn from(pid: i64) -> Self {
        Pid(pid)
    }
}

/// Thread ID
///
/// On Linux this is the kernel "pid" of a task; the trace model calls it a
/// tid and keeps the kernel's tgid as the [`Pid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tid(pub i64);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<i64> for Tid {
    fn from(tid: i64) -> Self {
        Tid(tid)
    }
}

/// CPU ID
///
/// Represents a CPU core number as reported by ftrace (`[001]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Address of a thread inside the model.
///
/// Slices that span threads (async slices, flows) refer to threads through
/// this instead of holding references into the process map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadRef {
    pub pid: Pid,
    pub tid: Tid,
}

impl ThreadRef {
    pub fn new(pid: impl Into<Pid>, tid: impl Into<Tid>) -> Self {
        Self { pid: pid.into(), tid: tid.into() }
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid, self.tid)
    }
}

/// Argument dictionary attached to slices, samples, snapshots, etc.
pub type Args = serde_json::Map<String, serde_json::Value>;
