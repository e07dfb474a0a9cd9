//! Flow events: arrows connecting causally related points on threads.

use serde::Serialize;

use crate::base::string_color_id;
use crate::domain::{Args, ThreadRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowPhase {
    Start,
    Step,
    Finish,
}

impl FlowPhase {
    pub fn from_phase(ph: &str) -> Option<Self> {
        match ph {
            "s" => Some(FlowPhase::Start),
            "t" => Some(FlowPhase::Step),
            "f" => Some(FlowPhase::Finish),
            _ => None,
        }
    }

    pub fn as_phase(self) -> &'static str {
        match self {
            FlowPhase::Start => "s",
            FlowPhase::Step => "t",
            FlowPhase::Finish => "f",
        }
    }
}

/// One point of a flow. `previous`/`next` index into the model's flow
/// event list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEvent {
    pub category: String,
    pub id: String,
    pub title: String,
    pub color_id: usize,
    pub phase: FlowPhase,
    pub start: f64,
    pub args: Args,
    pub thread: ThreadRef,
    pub previous: Option<usize>,
    pub next: Option<usize>,
}

impl FlowEvent {
    pub fn new(
        category: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        phase: FlowPhase,
        start: f64,
        thread: ThreadRef,
        args: Args,
    ) -> Self {
        let title = title.into();
        Self {
            category: category.into(),
            id: id.into(),
            color_id: string_color_id(&title),
            title,
            phase,
            start,
            args,
            thread,
            previous: None,
            next: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(FlowPhase::from_phase("s"), Some(FlowPhase::Start));
        assert_eq!(FlowPhase::from_phase("f"), Some(FlowPhase::Finish));
        assert_eq!(FlowPhase::from_phase("X"), None);
        assert_eq!(FlowPhase::Step.as_phase(), "t");
    }
}
