//! Rules for moving resources between states.

use crate::renderer::error::{ensure_contract, Result};
use crate::renderer::types::ResourceState;

/// Decides whether a barrier `before -> after` has to be recorded for a
/// resource currently tracked in `tracked`.
///
/// Returns `Ok(true)` when a barrier is needed and `Ok(false)` when the
/// transition is a no-op. A `before` that does not match the tracked state is
/// a contract violation.
pub fn check_transition(
    name: &str,
    tracked: ResourceState,
    before: ResourceState,
    after: ResourceState,
) -> Result<bool> {
    ensure_contract!(
        tracked == before,
        "transition of '{}' expects {} but the resource is tracked in {}",
        name,
        before,
        tracked
    );
    Ok(before != after)
}

/// Guards an operation that needs the resource in one of `allowed`.
pub fn require_state(name: &str, tracked: ResourceState, allowed: &[ResourceState], usage: &str) -> Result<()> {
    ensure_contract!(
        allowed.contains(&tracked),
        "{} needs '{}' in {:?} but it is tracked in {}",
        usage,
        name,
        allowed,
        tracked
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::error::ErrorKind;

    #[test]
    fn matching_before_state_needs_a_barrier() {
        let needed = check_transition("rt", ResourceState::Present, ResourceState::Present, ResourceState::RenderTarget);
        assert!(needed.unwrap());
    }

    #[test]
    fn same_state_is_skipped() {
        let needed = check_transition("rt", ResourceState::Present, ResourceState::Present, ResourceState::Present);
        assert!(!needed.unwrap());
    }

    #[test]
    fn stale_before_state_is_rejected() {
        let err = check_transition("rt", ResourceState::RenderTarget, ResourceState::Present, ResourceState::CopyDest)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert!(err.to_string().contains("'rt'"));
    }

    #[test]
    fn require_state_lists_allowed_states() {
        require_state("buf", ResourceState::GenericRead, &[ResourceState::CopySource, ResourceState::GenericRead], "copy")
            .unwrap();
        let err = require_state("buf", ResourceState::Common, &[ResourceState::CopyDest], "copy").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
    }
}
