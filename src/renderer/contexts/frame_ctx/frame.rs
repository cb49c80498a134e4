use std::fmt;

use crate::renderer::error::{ensure_contract, Result};

/// Position of the orchestrator within a frame.
///
/// `Idle -> PreDraw -> Recording -> PostDraw -> Submit -> Idle`
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FrameState {
    Idle,
    PreDraw,
    Recording,
    PostDraw,
    Submit,
}

impl FrameState {
    pub(super) fn require(self, expected: FrameState, operation: &str) -> Result<()> {
        ensure_contract!(
            self == expected,
            "{} is only allowed in the {} frame state, current state is {}",
            operation,
            expected,
            self
        );
        Ok(())
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct FrameStats {
    pub frames_submitted: u64,
    pub barriers_recorded: u64,
    pub resizes: u64,
}
