mod fence;
mod recorder;

pub use fence::{wait_for_fence, CancellationToken, WaitPolicy};
pub use recorder::CommandRecorder;

use std::time::Duration;

use crate::renderer::backend::Backend;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::resource_ctx::ResourceFactory;
use crate::renderer::error::{ensure_contract, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SubmissionState {
    /// The command list is open and accepts commands.
    Recording,
    /// The list was submitted with the current fence value and the wait for
    /// it did not finish.
    InFlight,
}

/// Responsibilities:
/// - Own the device, the single command list, and the submission fence
/// - Submit recorded work and block until the device finished it
/// - Hand out recorders and a resource factory
pub struct RenderDeviceContext<B: Backend> {
    list: B::CommandList,
    fence: B::Fence,
    fence_value: u64,
    state: SubmissionState,
    timeout: Option<Duration>,
    poll_interval: Duration,
    cancel: Option<CancellationToken>,
    barriers_recorded: u64,
    // Dropped last so every object above is released while the device lives.
    backend: B,
}

impl<B: Backend> RenderDeviceContext<B> {
    pub fn initialize(init: B::InitDesc, config: &RenderConfig) -> Result<Self> {
        let backend = B::create(init, config.debug)?;
        let list = backend.create_command_list()?;
        let fence = backend.create_fence(0)?;
        log::info!("initialized {} device context", backend.name());

        Ok(Self {
            list,
            fence,
            fence_value: 0,
            state: SubmissionState::Recording,
            timeout: config.fence_timeout,
            poll_interval: config.fence_poll_interval,
            cancel: None,
            barriers_recorded: 0,
            backend,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Last value written to the fence by a submission.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn completed_value(&self) -> Result<u64> {
        self.backend.completed_value(&self.fence)
    }

    /// Total number of transition barriers recorded so far.
    pub fn barriers_recorded(&self) -> u64 {
        self.barriers_recorded
    }

    pub fn is_in_flight(&self) -> bool {
        self.state == SubmissionState::InFlight
    }

    /// Installs a token that abandons a blocked [`submit_and_wait`](Self::submit_and_wait).
    pub fn set_cancellation_token(&mut self, token: Option<CancellationToken>) {
        self.cancel = token;
    }

    pub fn set_fence_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn recorder(&mut self) -> Result<CommandRecorder<'_, B>> {
        ensure_contract!(
            self.state == SubmissionState::Recording,
            "the previous submission (fence value {}) has not completed",
            self.fence_value
        );
        Ok(CommandRecorder::new(&self.backend, &mut self.list, &mut self.barriers_recorded))
    }

    pub fn factory(&self) -> ResourceFactory<'_, B> {
        ResourceFactory::new(&self.backend)
    }

    /// Closes the command list, submits it, and blocks until the device has
    /// executed it. The list is reopened for recording afterwards.
    ///
    /// On a timeout or cancellation the submission stays in flight and the
    /// list stays closed; [`wait_idle`](Self::wait_idle) completes it.
    pub fn submit_and_wait(&mut self) -> Result<()> {
        ensure_contract!(
            self.state == SubmissionState::Recording,
            "submit_and_wait called while fence value {} is still in flight",
            self.fence_value
        );

        self.backend.close_command_list(&mut self.list)?;
        let value = self.fence_value + 1;
        self.backend.submit(&mut self.list, &self.fence, value)?;
        self.fence_value = value;
        self.state = SubmissionState::InFlight;

        let policy = WaitPolicy {
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            cancel: self.cancel.clone(),
        };
        wait_for_fence(&self.backend, &self.fence, value, &policy)?;

        self.reopen()
    }

    /// Waits without a deadline for any in-flight submission, then for the
    /// whole device.
    pub fn wait_idle(&mut self) -> Result<()> {
        if self.state == SubmissionState::InFlight {
            log::debug!("completing in-flight fence value {}", self.fence_value);
            wait_for_fence(
                &self.backend,
                &self.fence,
                self.fence_value,
                &WaitPolicy::unbounded(self.poll_interval),
            )?;
            self.reopen()?;
        }
        self.backend.wait_idle()
    }

    /// Records `record` into the command list and submits it right away.
    pub fn immediate_submit<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&mut CommandRecorder<'_, B>) -> Result<()>,
    {
        {
            let mut recorder = self.recorder()?;
            record(&mut recorder)?;
        }
        self.submit_and_wait()
    }

    fn reopen(&mut self) -> Result<()> {
        self.backend.reset_command_list(&mut self.list)?;
        self.state = SubmissionState::Recording;
        Ok(())
    }
}

impl<B: Backend> Drop for RenderDeviceContext<B> {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::error!("failed to drain the device on shutdown: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
    use crate::renderer::error::ErrorKind;
    use crate::renderer::types::{BufferDesc, HeapKind, ResourceState};

    fn context() -> RenderDeviceContext<HeadlessBackend> {
        let config = RenderConfig {
            fence_timeout: Some(Duration::from_millis(50)),
            fence_poll_interval: Duration::from_millis(2),
            ..RenderConfig::default()
        };
        RenderDeviceContext::initialize(HeadlessDesc::default(), &config).unwrap()
    }

    #[test]
    fn fence_value_grows_by_one_per_submission() {
        let mut ctx = context();
        assert_eq!(ctx.fence_value(), 0);
        ctx.submit_and_wait().unwrap();
        ctx.submit_and_wait().unwrap();
        assert_eq!(ctx.fence_value(), 2);
        assert_eq!(ctx.completed_value().unwrap(), 2);
    }

    #[test]
    fn timed_out_submission_blocks_recording_until_drained() {
        let mut ctx = context();
        ctx.backend().pause_queue();
        let err = ctx.submit_and_wait().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyncTimeout);
        assert!(ctx.is_in_flight());
        assert_eq!(ctx.recorder().err().map(|e| e.kind()), Some(ErrorKind::ContractViolation));

        ctx.backend().resume_queue();
        ctx.wait_idle().unwrap();
        assert!(!ctx.is_in_flight());
        assert_eq!(ctx.completed_value().unwrap(), 1);
    }

    #[test]
    fn rejected_transition_records_nothing() {
        let mut ctx = context();
        let desc = BufferDesc {
            size: 64,
            heap: HeapKind::Default,
            name: "scratch".into(),
        };
        let mut buffer = ctx.factory().create_buffer(&desc, ResourceState::CopyDest).unwrap();

        let mut recorder = ctx.recorder().unwrap();
        let err = recorder
            .transition(&mut buffer, ResourceState::Common, ResourceState::CopySource)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert_eq!(buffer.state(), ResourceState::CopyDest);
        assert!(!recorder.transition_to(&mut buffer, ResourceState::CopyDest).unwrap());
        assert!(recorder.transition_to(&mut buffer, ResourceState::CopySource).unwrap());

        assert_eq!(ctx.barriers_recorded(), 1);
        ctx.submit_and_wait().unwrap();
        assert!(ctx.backend().validation_messages().is_empty());
    }
}
