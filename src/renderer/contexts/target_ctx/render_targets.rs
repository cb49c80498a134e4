use crate::renderer::backend::Backend;
use crate::renderer::contexts::descriptor_ctx::{CpuDescriptorHandle, DescriptorHeaps, DescriptorSlot};
use crate::renderer::contexts::device_ctx::CommandRecorder;
use crate::renderer::contexts::resource_ctx::{Resource, ResourceFactory};
use crate::renderer::error::{ensure_contract, Error, Result};
use crate::renderer::types::{Format, ResourceState, ScissorRect, Viewport};

use super::SwapChain;

/// Owns the depth buffer and the render-target and depth-stencil views of
/// the back buffers. Slots are allocated once; a resize rewrites the views in
/// place.
pub struct RenderTargetManager<B: Backend> {
    viewport: Viewport,
    scissor: ScissorRect,
    rtv_slots: Vec<DescriptorSlot>,
    dsv_slot: DescriptorSlot,
    // Empty only while a resize swaps the old buffer for a new one.
    depth_buffer: Option<Resource<B>>,
    depth_format: Format,
    clear_color: [f32; 4],
}

impl<B: Backend> RenderTargetManager<B> {
    pub fn initialize(
        backend: &B,
        heaps: &mut DescriptorHeaps<B>,
        swap_chain: &SwapChain<B>,
        depth_format: Format,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let (width, height) = (swap_chain.width(), swap_chain.height());

        let mut rtv_slots = Vec::with_capacity(swap_chain.buffer_count() as usize);
        for i in 0..swap_chain.buffer_count() {
            let slot = heaps.render_target.allocate()?;
            heaps
                .render_target
                .create_render_target_view(backend, slot, swap_chain.back_buffer(i)?)?;
            rtv_slots.push(slot);
        }

        let depth_buffer = ResourceFactory::new(backend).create_depth_stencil_texture(
            width,
            height,
            depth_format,
            ResourceState::DepthWrite,
        )?;
        let dsv_slot = heaps.depth_stencil.allocate()?;
        heaps
            .depth_stencil
            .create_depth_stencil_view(backend, dsv_slot, &depth_buffer)?;

        Ok(Self {
            viewport: Viewport::from_size(width, height),
            scissor: ScissorRect::from_size(width, height),
            rtv_slots,
            dsv_slot,
            depth_buffer: Some(depth_buffer),
            depth_format,
            clear_color,
        })
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn scissor(&self) -> &ScissorRect {
        &self.scissor
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    pub fn depth_buffer(&self) -> Result<&Resource<B>> {
        self.depth_buffer
            .as_ref()
            .ok_or_else(|| Error::contract("depth buffer is missing after a failed resize"))
    }

    pub fn depth_buffer_mut(&mut self) -> Result<&mut Resource<B>> {
        self.depth_buffer
            .as_mut()
            .ok_or_else(|| Error::contract("depth buffer is missing after a failed resize"))
    }

    pub fn rtv_slot(&self, index: u32) -> Result<DescriptorSlot> {
        self.rtv_slots
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::contract(format!("no render-target view for back buffer {index}")))
    }

    pub fn dsv_slot(&self) -> DescriptorSlot {
        self.dsv_slot
    }

    pub fn rtv_handle(&self, heaps: &DescriptorHeaps<B>, index: u32) -> Result<CpuDescriptorHandle> {
        heaps.render_target.cpu_handle(self.rtv_slot(index)?.index)
    }

    pub fn dsv_handle(&self, heaps: &DescriptorHeaps<B>) -> Result<CpuDescriptorHandle> {
        heaps.depth_stencil.cpu_handle(self.dsv_slot.index)
    }

    /// Binds the current back buffer and the depth buffer.
    pub fn set_render_target(
        &self,
        recorder: &mut CommandRecorder<'_, B>,
        heaps: &DescriptorHeaps<B>,
        swap_chain: &mut SwapChain<B>,
    ) -> Result<()> {
        let index = swap_chain.current_back_buffer_index(recorder.backend())?;
        recorder.set_render_targets(
            &heaps.render_target,
            self.rtv_slot(index)?,
            Some((&heaps.depth_stencil, self.dsv_slot)),
        )
    }

    pub fn clear_render_target(
        &self,
        recorder: &mut CommandRecorder<'_, B>,
        heaps: &DescriptorHeaps<B>,
        swap_chain: &mut SwapChain<B>,
    ) -> Result<()> {
        let index = swap_chain.current_back_buffer_index(recorder.backend())?;
        recorder.clear_render_target(
            &heaps.render_target,
            self.rtv_slot(index)?,
            swap_chain.back_buffer(index)?,
            self.clear_color,
        )
    }

    /// Clears depth to 1.0 and stencil to 0.
    pub fn clear_depth_stencil(&self, recorder: &mut CommandRecorder<'_, B>, heaps: &DescriptorHeaps<B>) -> Result<()> {
        recorder.clear_depth_stencil(&heaps.depth_stencil, self.dsv_slot, self.depth_buffer()?, 1.0, 0)
    }

    /// Drops the back-buffer views so the swap chain can release its buffers.
    pub fn release_views(&self, backend: &B, heaps: &mut DescriptorHeaps<B>) -> Result<()> {
        for slot in &self.rtv_slots {
            heaps.render_target.release_view(backend, *slot)?;
        }
        Ok(())
    }

    /// Recreates the depth buffer and every view for the new swap chain size.
    /// Must run after the swap chain recreated its buffers.
    pub fn resize(&mut self, backend: &B, heaps: &mut DescriptorHeaps<B>, swap_chain: &SwapChain<B>) -> Result<()> {
        ensure_contract!(
            self.rtv_slots.len() == swap_chain.buffer_count() as usize,
            "{} render-target views for {} back buffers",
            self.rtv_slots.len(),
            swap_chain.buffer_count()
        );
        let (width, height) = (swap_chain.width(), swap_chain.height());
        self.viewport = Viewport::from_size(width, height);
        self.scissor = ScissorRect::from_size(width, height);

        // The old depth buffer is released before its replacement exists.
        heaps.depth_stencil.release_view(backend, self.dsv_slot)?;
        self.depth_buffer = None;
        let depth_buffer = ResourceFactory::new(backend).create_depth_stencil_texture(
            width,
            height,
            self.depth_format,
            ResourceState::DepthWrite,
        )?;
        heaps
            .depth_stencil
            .create_depth_stencil_view(backend, self.dsv_slot, &depth_buffer)?;
        self.depth_buffer = Some(depth_buffer);

        for (i, slot) in self.rtv_slots.iter().enumerate() {
            heaps
                .render_target
                .create_render_target_view(backend, *slot, swap_chain.back_buffer(i as u32)?)?;
        }
        log::debug!("render targets resized to {}x{}", width, height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
    use crate::renderer::config::{HeapCapacities, BUFFER_COUNT};
    use crate::renderer::types::SwapChainDesc;

    #[test]
    fn views_are_rewritten_into_the_same_slots() {
        let backend = HeadlessBackend::create(HeadlessDesc::default(), false).unwrap();
        let mut heaps = DescriptorHeaps::initialize(&backend, &HeapCapacities::default()).unwrap();
        let mut chain = SwapChain::initialize(
            &backend,
            &SwapChainDesc {
                width: 32,
                height: 32,
                format: Format::Bgra8UnormSrgb,
                buffer_count: BUFFER_COUNT,
                vsync: false,
            },
        )
        .unwrap();
        let mut targets =
            RenderTargetManager::initialize(&backend, &mut heaps, &chain, Format::D32Float, [0.0; 4]).unwrap();
        let before = (targets.rtv_handle(&heaps, 1).unwrap(), targets.dsv_handle(&heaps).unwrap());
        let depth_id = targets.depth_buffer().unwrap().id();

        targets.release_views(&backend, &mut heaps).unwrap();
        assert!(chain.resize(&backend, 48, 16).unwrap());
        targets.resize(&backend, &mut heaps, &chain).unwrap();

        assert_eq!(before, (targets.rtv_handle(&heaps, 1).unwrap(), targets.dsv_handle(&heaps).unwrap()));
        assert_ne!(targets.depth_buffer().unwrap().id(), depth_id);
        assert_eq!(targets.viewport().width, 48.0);
        assert_eq!(targets.scissor().height(), 16);
        assert_eq!(heaps.render_target.live_slots(), 2);
    }
}
