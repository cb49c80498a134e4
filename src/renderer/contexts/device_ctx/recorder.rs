use crate::renderer::backend::Backend;
use crate::renderer::contexts::descriptor_ctx::{DescriptorHeap, DescriptorSlot};
use crate::renderer::contexts::resource_ctx::state::{check_transition, require_state};
use crate::renderer::contexts::resource_ctx::{range_fits, Resource};
use crate::renderer::error::{ensure_contract, Error, Result};
use crate::renderer::types::{DescriptorHeapKind, ResourceDesc, ResourceState, ScissorRect, Viewport};

/// Records commands into the open command list of a
/// [`RenderDeviceContext`](super::RenderDeviceContext).
///
/// Every state-dependent command checks the tracked state of the resources it
/// touches before anything reaches the list.
pub struct CommandRecorder<'a, B: Backend> {
    backend: &'a B,
    list: &'a mut B::CommandList,
    barriers: &'a mut u64,
}

impl<'a, B: Backend> CommandRecorder<'a, B> {
    pub(super) fn new(backend: &'a B, list: &'a mut B::CommandList, barriers: &'a mut u64) -> Self {
        Self { backend, list, barriers }
    }

    pub fn backend(&self) -> &B {
        self.backend
    }

    /// Records a transition barrier `before -> after`.
    ///
    /// `before` must equal the tracked state of `resource`, otherwise nothing
    /// is recorded and a contract violation is returned. A transition into the
    /// current state records nothing. Returns whether a barrier was recorded.
    pub fn transition(&mut self, resource: &mut Resource<B>, before: ResourceState, after: ResourceState) -> Result<bool> {
        if !check_transition(resource.name(), resource.state(), before, after)? {
            return Ok(false);
        }
        self.backend.cmd_resource_barrier(self.list, resource.raw(), before, after)?;
        resource.set_state(after);
        *self.barriers += 1;
        log::trace!("'{}' {} -> {}", resource.name(), before, after);
        Ok(true)
    }

    /// Transitions from whatever state `resource` is tracked in.
    pub fn transition_to(&mut self, resource: &mut Resource<B>, after: ResourceState) -> Result<bool> {
        let before = resource.state();
        self.transition(resource, before, after)
    }

    pub fn require_state(&self, resource: &Resource<B>, allowed: &[ResourceState], usage: &str) -> Result<()> {
        require_state(resource.name(), resource.state(), allowed, usage)
    }

    pub fn set_render_targets(
        &mut self,
        rtv_heap: &DescriptorHeap<B>,
        rtv: DescriptorSlot,
        dsv: Option<(&DescriptorHeap<B>, DescriptorSlot)>,
    ) -> Result<()> {
        rtv_heap.check_slot(rtv, DescriptorHeapKind::RenderTarget)?;
        let dsv = match dsv {
            Some((heap, slot)) => {
                heap.check_slot(slot, DescriptorHeapKind::DepthStencil)?;
                Some((heap.raw(), slot.index))
            }
            None => None,
        };
        self.backend.cmd_set_render_targets(self.list, rtv_heap.raw(), rtv.index, dsv)
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.backend.cmd_set_viewport(self.list, viewport);
    }

    pub fn set_scissor(&mut self, rect: &ScissorRect) {
        self.backend.cmd_set_scissor(self.list, rect);
    }

    /// Clears the color target behind `slot`. `target` is the resource the
    /// view was created for and must be in the render-target state.
    pub fn clear_render_target(
        &mut self,
        heap: &DescriptorHeap<B>,
        slot: DescriptorSlot,
        target: &Resource<B>,
        color: [f32; 4],
    ) -> Result<()> {
        heap.check_slot(slot, DescriptorHeapKind::RenderTarget)?;
        self.require_state(target, &[ResourceState::RenderTarget], "clear_render_target")?;
        self.backend.cmd_clear_render_target(self.list, heap.raw(), slot.index, color)
    }

    pub fn clear_depth_stencil(
        &mut self,
        heap: &DescriptorHeap<B>,
        slot: DescriptorSlot,
        target: &Resource<B>,
        depth: f32,
        stencil: u8,
    ) -> Result<()> {
        heap.check_slot(slot, DescriptorHeapKind::DepthStencil)?;
        self.require_state(target, &[ResourceState::DepthWrite], "clear_depth_stencil")?;
        ensure_contract!((0.0..=1.0).contains(&depth), "depth clear value {} outside [0, 1]", depth);
        self.backend
            .cmd_clear_depth_stencil(self.list, heap.raw(), slot.index, depth, stencil)
    }

    /// Copies `size` bytes between two buffers.
    pub fn copy_buffer(
        &mut self,
        dst: &Resource<B>,
        dst_offset: u64,
        src: &Resource<B>,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        let dst_size = buffer_size(dst)?;
        let src_size = buffer_size(src)?;
        ensure_contract!(
            range_fits(dst_offset, size, dst_size) && range_fits(src_offset, size, src_size),
            "copy of {} bytes from '{}'+{} to '{}'+{} is out of bounds",
            size,
            src.name(),
            src_offset,
            dst.name(),
            dst_offset
        );
        self.require_state(dst, &[ResourceState::CopyDest], "copy_buffer")?;
        self.require_state(src, &[ResourceState::CopySource, ResourceState::GenericRead], "copy_buffer")?;
        self.backend
            .cmd_copy_buffer(self.list, dst.raw(), dst_offset, src.raw(), src_offset, size)
    }

    /// Uploads a tightly packed buffer into a whole texture.
    pub fn copy_buffer_to_texture(&mut self, dst: &Resource<B>, src: &Resource<B>) -> Result<()> {
        let (width, height, bpp) = texture_footprint(dst)?;
        let size = buffer_size(src)?;
        ensure_contract!(
            size >= width as u64 * height as u64 * bpp as u64,
            "'{}' is too small to fill '{}'",
            src.name(),
            dst.name()
        );
        self.require_state(dst, &[ResourceState::CopyDest], "copy_buffer_to_texture")?;
        self.require_state(
            src,
            &[ResourceState::CopySource, ResourceState::GenericRead],
            "copy_buffer_to_texture",
        )?;
        self.backend.cmd_copy_buffer_to_texture(self.list, dst.raw(), src.raw())
    }

    /// Reads a whole texture back into a tightly packed buffer.
    pub fn copy_texture_to_buffer(&mut self, dst: &Resource<B>, src: &Resource<B>) -> Result<()> {
        let (width, height, bpp) = texture_footprint(src)?;
        let size = buffer_size(dst)?;
        ensure_contract!(
            size >= width as u64 * height as u64 * bpp as u64,
            "'{}' is too small to hold '{}'",
            dst.name(),
            src.name()
        );
        self.require_state(dst, &[ResourceState::CopyDest], "copy_texture_to_buffer")?;
        self.require_state(src, &[ResourceState::CopySource], "copy_texture_to_buffer")?;
        self.backend.cmd_copy_texture_to_buffer(self.list, dst.raw(), src.raw())
    }
}

fn buffer_size<B: Backend>(resource: &Resource<B>) -> Result<u64> {
    match resource.desc() {
        ResourceDesc::Buffer(desc) => Ok(desc.size),
        ResourceDesc::Texture(_) => Err(Error::contract(format!(
            "'{}' is a texture where a buffer is expected",
            resource.name()
        ))),
    }
}

fn texture_footprint<B: Backend>(resource: &Resource<B>) -> Result<(u32, u32, u32)> {
    match resource.desc() {
        ResourceDesc::Texture(desc) => Ok((desc.width, desc.height, desc.format.bytes_per_texel())),
        ResourceDesc::Buffer(_) => Err(Error::contract(format!(
            "'{}' is a buffer where a texture is expected",
            resource.name()
        ))),
    }
}
