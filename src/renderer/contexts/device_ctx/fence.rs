use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::renderer::backend::Backend;
use crate::renderer::error::{Error, Result};

/// Abandons a blocked fence wait from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arms the token after a cancelled wait was handled.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Limits applied to a fence wait.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub cancel: Option<CancellationToken>,
}

impl WaitPolicy {
    pub fn unbounded(poll_interval: Duration) -> Self {
        Self {
            timeout: None,
            poll_interval,
            cancel: None,
        }
    }
}

/// Blocks until `fence` reaches `value`, waking up every poll interval to
/// check the deadline and the cancellation token.
pub fn wait_for_fence<B: Backend>(backend: &B, fence: &B::Fence, value: u64, policy: &WaitPolicy) -> Result<()> {
    let started = Instant::now();
    let slice = policy.poll_interval.max(Duration::from_millis(1));

    loop {
        if policy.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            log::warn!("wait for fence value {} cancelled", value);
            return Err(Error::Cancelled { value });
        }

        let wait = match policy.timeout {
            Some(timeout) => {
                let remaining = timeout.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    let completed = backend.completed_value(fence)?;
                    if completed >= value {
                        return Ok(());
                    }
                    log::error!(
                        "fence value {} not reached within {:?} (completed {})",
                        value,
                        timeout,
                        completed
                    );
                    return Err(Error::SyncTimeout {
                        value,
                        completed,
                        timeout,
                    });
                }
                remaining.min(slice)
            }
            None => slice,
        };

        if backend.wait_for_value(fence, value, wait)? {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
    use crate::renderer::error::ErrorKind;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::create(HeadlessDesc::default(), false).unwrap()
    }

    #[test]
    fn reached_value_returns_immediately() {
        let backend = backend();
        let fence = backend.create_fence(3).unwrap();
        let policy = WaitPolicy {
            timeout: Some(Duration::ZERO),
            poll_interval: Duration::from_millis(1),
            cancel: None,
        };
        wait_for_fence(&backend, &fence, 3, &policy).unwrap();
    }

    #[test]
    fn unreached_value_times_out() {
        let backend = backend();
        let fence = backend.create_fence(0).unwrap();
        let policy = WaitPolicy {
            timeout: Some(Duration::from_millis(30)),
            poll_interval: Duration::from_millis(5),
            cancel: None,
        };
        let err = wait_for_fence(&backend, &fence, 1, &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyncTimeout);
    }

    #[test]
    fn cancelled_token_stops_the_wait() {
        let backend = backend();
        let fence = backend.create_fence(0).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let policy = WaitPolicy {
            timeout: None,
            poll_interval: Duration::from_millis(5),
            cancel: Some(token.clone()),
        };
        let err = wait_for_fence(&backend, &fence, 1, &policy).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        token.reset();
        assert!(!token.is_cancelled());
    }
}
