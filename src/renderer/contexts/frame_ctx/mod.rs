mod frame;

pub use frame::{FrameState, FrameStats};

use glam::Vec4;

use crate::renderer::backend::Backend;
use crate::renderer::config::{RenderConfig, BUFFER_COUNT};
use crate::renderer::contexts::descriptor_ctx::DescriptorHeaps;
use crate::renderer::contexts::device_ctx::{CancellationToken, CommandRecorder, RenderDeviceContext};
use crate::renderer::contexts::resource_ctx::ResourceFactory;
use crate::renderer::contexts::target_ctx::{RenderTargetManager, SwapChain};
use crate::renderer::error::Result;
use crate::renderer::types::{ResourceState, SwapChainDesc};

/// Everything a caller needs while recording a frame.
pub struct FrameParts<'a, B: Backend> {
    pub recorder: CommandRecorder<'a, B>,
    pub heaps: &'a mut DescriptorHeaps<B>,
    pub render_targets: &'a RenderTargetManager<B>,
    pub swap_chain: &'a SwapChain<B>,
}

/// Responsibilities:
/// - Drive a frame through pre-draw, recording, post-draw, and submission
/// - Refuse every call that arrives out of frame order
/// - Resize the swap chain and the render targets in a safe order
pub struct FrameOrchestrator<B: Backend> {
    render_targets: RenderTargetManager<B>,
    swap_chain: SwapChain<B>,
    heaps: DescriptorHeaps<B>,
    device: RenderDeviceContext<B>,
    state: FrameState,
    stats: FrameStats,
}

impl<B: Backend> FrameOrchestrator<B> {
    pub fn initialize(init: B::InitDesc, width: u32, height: u32, config: &RenderConfig) -> Result<Self> {
        let device = RenderDeviceContext::initialize(init, config)?;
        let backend = device.backend();

        let mut heaps = DescriptorHeaps::initialize(backend, &config.heap_capacities)?;
        let swap_chain = SwapChain::initialize(
            backend,
            &SwapChainDesc {
                width,
                height,
                format: config.back_buffer_format,
                buffer_count: BUFFER_COUNT,
                vsync: config.vsync,
            },
        )?;
        let render_targets = RenderTargetManager::initialize(
            backend,
            &mut heaps,
            &swap_chain,
            config.depth_format,
            config.clear_color.to_array(),
        )?;

        Ok(Self {
            render_targets,
            swap_chain,
            heaps,
            device,
            state: FrameState::Idle,
            stats: FrameStats::default(),
        })
    }

    pub fn frame_state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            barriers_recorded: self.device.barriers_recorded(),
            ..self.stats
        }
    }

    pub fn backend(&self) -> &B {
        self.device.backend()
    }

    pub fn device(&self) -> &RenderDeviceContext<B> {
        &self.device
    }

    pub fn factory(&self) -> ResourceFactory<'_, B> {
        self.device.factory()
    }

    pub fn heaps(&self) -> &DescriptorHeaps<B> {
        &self.heaps
    }

    /// The heaps together with the backend their views are written through.
    pub fn heaps_with_backend(&mut self) -> (&mut DescriptorHeaps<B>, &B) {
        (&mut self.heaps, self.device.backend())
    }

    pub fn swap_chain(&self) -> &SwapChain<B> {
        &self.swap_chain
    }

    pub fn render_targets(&self) -> &RenderTargetManager<B> {
        &self.render_targets
    }

    pub fn set_clear_color(&mut self, color: Vec4) {
        self.render_targets.set_clear_color(color.to_array());
    }

    pub fn set_cancellation_token(&mut self, token: Option<CancellationToken>) {
        self.device.set_cancellation_token(token);
    }

    /// Prepares the current back buffer for drawing: transitions it to a
    /// render target, binds it with the depth buffer, sets viewport and
    /// scissor, and clears both targets.
    pub fn pre_draw(&mut self) -> Result<()> {
        self.state.require(FrameState::Idle, "pre_draw")?;
        self.state = FrameState::PreDraw;
        match self.record_pre_draw() {
            Ok(()) => {
                self.state = FrameState::Recording;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = self.roll_back_pre_draw() {
                    log::warn!("failed to roll back an aborted pre_draw: {}", rollback);
                }
                self.state = FrameState::Idle;
                Err(err)
            }
        }
    }

    /// Returns a back buffer left in `RenderTarget` by an aborted pre-draw
    /// to `Present`, then flushes the partial recording so the next frame
    /// starts from an empty list.
    fn roll_back_pre_draw(&mut self) -> Result<()> {
        let index = self.swap_chain.current_back_buffer_index(self.device.backend())?;
        let buffer = self.swap_chain.back_buffer_mut(index)?;
        if buffer.state() == ResourceState::RenderTarget {
            self.device
                .recorder()?
                .transition(buffer, ResourceState::RenderTarget, ResourceState::Present)?;
        }
        self.device.submit_and_wait()
    }

    fn record_pre_draw(&mut self) -> Result<()> {
        let index = self.swap_chain.current_back_buffer_index(self.device.backend())?;
        let mut recorder = self.device.recorder()?;

        recorder.transition(
            self.swap_chain.back_buffer_mut(index)?,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;
        recorder.transition_to(self.render_targets.depth_buffer_mut()?, ResourceState::DepthWrite)?;

        self.render_targets
            .set_render_target(&mut recorder, &self.heaps, &mut self.swap_chain)?;
        recorder.set_viewport(self.render_targets.viewport());
        recorder.set_scissor(self.render_targets.scissor());
        self.render_targets
            .clear_render_target(&mut recorder, &self.heaps, &mut self.swap_chain)?;
        self.render_targets.clear_depth_stencil(&mut recorder, &self.heaps)
    }

    /// Recorder for draw commands between `pre_draw` and `post_draw`.
    pub fn recorder(&mut self) -> Result<CommandRecorder<'_, B>> {
        self.state.require(FrameState::Recording, "recorder")?;
        self.device.recorder()
    }

    /// Like [`recorder`](Self::recorder), together with the descriptor heaps
    /// and the render targets of the frame.
    pub fn frame(&mut self) -> Result<FrameParts<'_, B>> {
        self.state.require(FrameState::Recording, "frame")?;
        Ok(FrameParts {
            recorder: self.device.recorder()?,
            heaps: &mut self.heaps,
            render_targets: &self.render_targets,
            swap_chain: &self.swap_chain,
        })
    }

    /// Transitions the back buffer back to the present state.
    pub fn post_draw(&mut self) -> Result<()> {
        self.state.require(FrameState::Recording, "post_draw")?;
        let index = self.swap_chain.current_back_buffer_index(self.device.backend())?;
        let mut recorder = self.device.recorder()?;
        recorder.transition(
            self.swap_chain.back_buffer_mut(index)?,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;
        self.state = FrameState::PostDraw;
        Ok(())
    }

    /// Submits the frame, waits for it, and presents.
    ///
    /// A timed-out or cancelled wait leaves the orchestrator in
    /// [`FrameState::Submit`]; [`wait_idle`](Self::wait_idle) finishes the
    /// frame. A failed present still ends the frame.
    pub fn command_execute(&mut self) -> Result<()> {
        self.state.require(FrameState::PostDraw, "command_execute")?;
        self.state = FrameState::Submit;
        self.device.submit_and_wait()?;
        log::debug!("frame {} completed at fence value {}", self.stats.frames_submitted, self.device.fence_value());
        self.finish_frame()
    }

    fn finish_frame(&mut self) -> Result<()> {
        let presented = self.swap_chain.present(self.device.backend());
        self.state = FrameState::Idle;
        self.stats.frames_submitted += 1;
        presented
    }

    /// Resizes the swap chain and the render targets. Only allowed between
    /// frames. Returns whether anything was recreated.
    ///
    /// A zero-sized request (a minimised window) is remembered by the swap
    /// chain and skipped.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        self.state.require(FrameState::Idle, "resize")?;
        if width == 0 || height == 0 || (width, height) == self.swap_chain.requested_size() {
            // Nothing to rebuild; this only records or clears a deferred size.
            return self.swap_chain.resize(self.device.backend(), width, height);
        }

        self.rebuild_targets(|swap_chain, backend| swap_chain.resize(backend, width, height).map(|_| ()))?;
        Ok(true)
    }

    /// Recreates the swap chain at its current size after the platform
    /// reported it as outdated. Only allowed between frames.
    pub fn recreate_swap_chain(&mut self) -> Result<()> {
        self.state.require(FrameState::Idle, "recreate_swap_chain")?;
        self.rebuild_targets(|swap_chain, backend| swap_chain.recreate(backend))
    }

    /// Flushes the device, then releases the back-buffer views before the swap
    /// chain lets go of its buffers, and recreates the views last.
    fn rebuild_targets<F>(&mut self, rebuild: F) -> Result<()>
    where
        F: FnOnce(&mut SwapChain<B>, &B) -> Result<()>,
    {
        self.device.wait_idle()?;
        let backend = self.device.backend();
        self.render_targets.release_views(backend, &mut self.heaps)?;
        rebuild(&mut self.swap_chain, backend)?;
        self.render_targets.resize(backend, &mut self.heaps, &self.swap_chain)?;

        self.stats.resizes += 1;
        Ok(())
    }

    /// Records `record` outside of a frame and waits for it to finish.
    pub fn immediate_submit<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&mut CommandRecorder<'_, B>) -> Result<()>,
    {
        self.state.require(FrameState::Idle, "immediate_submit")?;
        self.device.immediate_submit(record)
    }

    /// Drains the device. A frame stuck in submission after a timeout or a
    /// cancellation is completed and presented.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        if self.state == FrameState::Submit {
            log::debug!("finishing frame left in submission");
            self.finish_frame()?;
        }
        Ok(())
    }
}

impl<B: Backend> Drop for FrameOrchestrator<B> {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::error!("failed to drain frames on shutdown: {}", err);
        }
    }
}
