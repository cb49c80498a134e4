//! The production backend, driving a Vulkan 1.3 device through `ash`.
//!
//! D3D-style concepts map onto Vulkan as follows:
//! - command allocator + list: a command pool with one primary buffer
//! - fence: a timeline semaphore
//! - render-target and depth-stencil heaps: host tables of image views
//! - shader-visible heaps: a descriptor set with a partially bound array
//! - resource barriers: synchronization2 barriers derived from [`sync::state_access`]
//! - bound render targets: dynamic rendering

mod command;
mod descriptor;
mod device;
mod instance;
mod resource;
mod swapchain;
mod sync;
mod transfer_ctx;

pub use command::VulkanCommandList;
pub use descriptor::VulkanDescriptorHeap;
pub use resource::VulkanResource;
pub use swapchain::VulkanSwapChain;
pub use sync::VulkanFence;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use winit::window::Window;

use crate::renderer::backend::{Backend, HeapAddressing};
use crate::renderer::error::{Error, Result};
use crate::renderer::types::{
    BufferDesc, DescriptorHeapKind, Format, ResourceState, ScissorRect, SwapChainDesc,
    TextureDesc, Viewport,
};

use device::RawDevice;
use instance::Instance;
use sync::{image_barrier, state_access, UNDEFINED};
use transfer_ctx::TransferContext;

/// Host-side view tables are addressed in units of one image view handle.
const VIEW_INCREMENT: u32 = std::mem::size_of::<vk::ImageView>() as u32;

pub struct VulkanDesc {
    pub window: Arc<Window>,
}

pub struct VulkanBackend {
    transfer: TransferContext,
    device: Arc<RawDevice>,
    window: Arc<Window>,
    next_heap_address: AtomicU64,
}

impl VulkanBackend {
    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Moves a new image from `UNDEFINED` into the layout of `state`.
    fn initialize_layout(&self, resource: &VulkanResource, state: ResourceState) -> Result<()> {
        let image = resource.image()?;
        let barrier = [image_barrier(
            image.image,
            image.aspect,
            vk::ImageLayout::UNDEFINED,
            UNDEFINED,
            state_access(state),
        )];
        self.transfer.immediate_submit(|cmd, device| {
            let dependency = vk::DependencyInfo::default().image_memory_barriers(&barrier);
            unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
        })
    }
}

impl Backend for VulkanBackend {
    type InitDesc = VulkanDesc;
    type Resource = VulkanResource;
    type DescriptorHeap = VulkanDescriptorHeap;
    type CommandList = VulkanCommandList;
    type Fence = VulkanFence;
    type SwapChain = VulkanSwapChain;

    fn create(init: VulkanDesc, debug: bool) -> Result<Self> {
        let instance = Instance::new(&init.window, debug)?;
        let device = Arc::new(RawDevice::new(instance)?);
        let transfer = TransferContext::new(device.clone())?;

        Ok(Self {
            transfer,
            device,
            window: init.window,
            next_heap_address: AtomicU64::new(0x1000),
        })
    }

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.logical.queue_wait_idle(self.device.queue)? };
        Ok(())
    }

    fn create_command_list(&self) -> Result<VulkanCommandList> {
        VulkanCommandList::new(self.device.clone())
    }

    fn close_command_list(&self, list: &mut VulkanCommandList) -> Result<()> {
        list.close()
    }

    fn reset_command_list(&self, list: &mut VulkanCommandList) -> Result<()> {
        list.reset()
    }

    fn submit(&self, list: &mut VulkanCommandList, fence: &VulkanFence, value: u64) -> Result<()> {
        if list.is_open() {
            return Err(Error::contract("command list must be closed before submission"));
        }
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(list.buffer)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&cmd_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe {
            self.device
                .logical
                .queue_submit2(self.device.queue, &[submit], vk::Fence::null())?;
        }
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<VulkanFence> {
        VulkanFence::new(self.device.clone(), initial_value)
    }

    fn completed_value(&self, fence: &VulkanFence) -> Result<u64> {
        fence.completed_value()
    }

    fn wait_for_value(&self, fence: &VulkanFence, value: u64, timeout: Duration) -> Result<bool> {
        fence.wait(value, timeout)
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<VulkanDescriptorHeap> {
        let span = (capacity as u64 * VIEW_INCREMENT as u64).max(1).next_power_of_two();
        let base = self.next_heap_address.fetch_add(span, Ordering::Relaxed);
        VulkanDescriptorHeap::new(self.device.clone(), kind, capacity, shader_visible, base)
    }

    fn heap_addressing(&self, heap: &VulkanDescriptorHeap) -> HeapAddressing {
        HeapAddressing {
            cpu_start: heap.base,
            // Shaders index the descriptor array; the handle only has to be
            // unique per slot.
            gpu_start: heap.descriptor_set().map(|_| heap.base | 1 << 48),
            increment: VIEW_INCREMENT,
        }
    }

    fn create_render_target_view(
        &self,
        heap: &mut VulkanDescriptorHeap,
        index: u32,
        resource: &VulkanResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::RenderTarget, index, resource, format)
    }

    fn create_depth_stencil_view(
        &self,
        heap: &mut VulkanDescriptorHeap,
        index: u32,
        resource: &VulkanResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::DepthStencil, index, resource, format)
    }

    fn create_shader_resource_view(
        &self,
        heap: &mut VulkanDescriptorHeap,
        index: u32,
        resource: &VulkanResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::ShaderResource, index, resource, format)
    }

    fn create_unordered_access_view(
        &self,
        heap: &mut VulkanDescriptorHeap,
        index: u32,
        resource: &VulkanResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::UnorderedAccess, index, resource, format)
    }

    fn release_view(&self, heap: &mut VulkanDescriptorHeap, index: u32) {
        heap.release(index);
    }

    fn create_texture(&self, desc: &TextureDesc, initial_state: ResourceState) -> Result<VulkanResource> {
        let texture = VulkanResource::new_texture(self.device.clone(), desc)?;
        self.initialize_layout(&texture, initial_state)?;
        log::debug!("created texture '{}' in {}", desc.name, initial_state);
        Ok(texture)
    }

    fn create_buffer(&self, desc: &BufferDesc, _initial_state: ResourceState) -> Result<VulkanResource> {
        // Buffers have no layout; their state only matters for barriers.
        VulkanResource::new_buffer(self.device.clone(), desc)
    }

    fn write_buffer(&self, resource: &VulkanResource, offset: u64, data: &[u8]) -> Result<()> {
        resource.write(offset, data)
    }

    fn read_buffer(&self, resource: &VulkanResource, offset: u64, out: &mut [u8]) -> Result<()> {
        resource.read(offset, out)
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<VulkanSwapChain> {
        VulkanSwapChain::new(self.device.clone(), desc)
    }

    fn swap_chain_buffers(&self, swap_chain: &VulkanSwapChain) -> Result<Vec<VulkanResource>> {
        Ok(swap_chain.buffers())
    }

    fn swap_chain_extent(&self, swap_chain: &VulkanSwapChain) -> (u32, u32) {
        swap_chain.extent()
    }

    fn resize_swap_chain(&self, swap_chain: &mut VulkanSwapChain, width: u32, height: u32) -> Result<()> {
        swap_chain.resize(width, height)
    }

    fn current_back_buffer_index(&self, swap_chain: &mut VulkanSwapChain) -> Result<u32> {
        swap_chain.current_index()
    }

    fn present(&self, swap_chain: &mut VulkanSwapChain) -> Result<()> {
        swap_chain.present()
    }

    fn cmd_resource_barrier(
        &self,
        list: &mut VulkanCommandList,
        resource: &VulkanResource,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        list.resource_barrier(resource, before, after)
    }

    fn cmd_set_render_targets(
        &self,
        list: &mut VulkanCommandList,
        rtv_heap: &VulkanDescriptorHeap,
        rtv_index: u32,
        dsv: Option<(&VulkanDescriptorHeap, u32)>,
    ) -> Result<()> {
        list.set_render_targets(rtv_heap, rtv_index, dsv)
    }

    fn cmd_set_viewport(&self, list: &mut VulkanCommandList, viewport: &Viewport) {
        list.set_viewport(viewport);
    }

    fn cmd_set_scissor(&self, list: &mut VulkanCommandList, rect: &ScissorRect) {
        list.set_scissor(rect);
    }

    fn cmd_clear_render_target(
        &self,
        list: &mut VulkanCommandList,
        heap: &VulkanDescriptorHeap,
        index: u32,
        color: [f32; 4],
    ) -> Result<()> {
        list.clear_render_target(heap, index, color)
    }

    fn cmd_clear_depth_stencil(
        &self,
        list: &mut VulkanCommandList,
        heap: &VulkanDescriptorHeap,
        index: u32,
        depth: f32,
        stencil: u8,
    ) -> Result<()> {
        list.clear_depth_stencil(heap, index, depth, stencil)
    }

    fn cmd_copy_buffer(
        &self,
        list: &mut VulkanCommandList,
        dst: &VulkanResource,
        dst_offset: u64,
        src: &VulkanResource,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        list.copy_buffer(dst, dst_offset, src, src_offset, size)
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        list: &mut VulkanCommandList,
        dst: &VulkanResource,
        src: &VulkanResource,
    ) -> Result<()> {
        list.copy_buffer_to_texture(dst, src)
    }

    fn cmd_copy_texture_to_buffer(
        &self,
        list: &mut VulkanCommandList,
        dst: &VulkanResource,
        src: &VulkanResource,
    ) -> Result<()> {
        list.copy_texture_to_buffer(dst, src)
    }
}
