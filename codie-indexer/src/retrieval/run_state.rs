//! Lifecycle of a single indexing run.
//!
//! ```text
//! Idle → Discovering → Dispatching → Draining → Persisting → Done
//!             │                                     │
//!             └──────────────→ Failed ←─────────────┘
//! ```
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Discovering,
    Dispatching,
    Draining,
    Persisting,
    Done,
    Failed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Discovering)
                | (Discovering, Dispatching)
                | (Discovering, Failed)
                | (Dispatching, Draining)
                | (Draining, Persisting)
                | (Persisting, Done)
                | (Persisting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Discovering => "discovering",
            RunState::Dispatching => "dispatching",
            RunState::Draining => "draining",
            RunState::Persisting => "persisting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}
