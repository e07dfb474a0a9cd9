//! Instant events: zero-duration markers at global, process or thread scope.

use serde::Serialize;

use crate::base::string_color_id;
use crate::domain::Args;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstantScope {
    Global,
    Process,
    Thread,
}

impl InstantScope {
    /// Parses the trace-event `s` field. Anything but `g` or `p` is thread
    /// scoped.
    pub fn from_scope_char(scope: Option<&str>) -> Self {
        match scope {
            Some("g") => InstantScope::Global,
            Some("p") => InstantScope::Process,
            _ => InstantScope::Thread,
        }
    }

    pub fn as_scope_char(self) -> &'static str {
        match self {
            InstantScope::Global => "g",
            InstantScope::Process => "p",
            InstantScope::Thread => "t",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantEvent {
    pub scope: InstantScope,
    pub category: String,
    pub title: String,
    pub color_id: usize,
    pub start: f64,
    pub args: Args,
}

impl InstantEvent {
    pub fn new(
        scope: InstantScope,
        category: impl Into<String>,
        title: impl Into<String>,
        start: f64,
        args: Args,
    ) -> Self {
        let title = title.into();
        Self { scope, category: category.into(), color_id: string_color_id(&title), title, start, args }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parsing() {
        assert_eq!(InstantScope::from_scope_char(Some("g")), InstantScope::Global);
        assert_eq!(InstantScope::from_scope_char(Some("p")), InstantScope::Process);
        assert_eq!(InstantScope::from_scope_char(Some("t")), InstantScope::Thread);
        assert_eq!(InstantScope::from_scope_char(None), InstantScope::Thread);
        assert_eq!(InstantScope::Process.as_scope_char(), "p");
    }
}
