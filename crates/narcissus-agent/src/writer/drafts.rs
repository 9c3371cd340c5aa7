use serde::{Deserialize, Serialize};

/// Draft counter driving the write/reflect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftProgress {
    pub completed: u32,
    pub required: u32,
}

/// What the write step does on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftTransition {
    /// Write draft number `draft` (1-based). `last` means it is the final one.
    Write { draft: u32, last: bool },
    /// Enough drafts exist; stop with the current text.
    Finish,
}

impl DraftProgress {
    pub fn new(required: u32) -> Self {
        Self {
            completed: 0,
            required,
        }
    }

    /// Advance the counter. Returns the transition taken.
    pub fn advance(&mut self) -> DraftTransition {
        if self.completed >= self.required {
            return DraftTransition::Finish;
        }
        self.completed += 1;
        DraftTransition::Write {
            draft: self.completed,
            last: self.completed == self.required,
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.required
    }
}
