//! The seam between the frame contexts and a concrete graphics API.
//!
//! The contexts own all bookkeeping (fence values, descriptor cursors, tracked
//! resource states, frame order). A backend only has to translate the
//! resulting calls to its API. Two backends exist:
//! - [`vulkan::VulkanBackend`] drives a real device through `ash`
//! - [`headless::HeadlessBackend`] executes command lists on a CPU queue
//!   thread and validates every barrier, which makes it useful for tests

pub mod headless;
pub mod vulkan;

use std::fmt;
use std::time::Duration;

use crate::renderer::error::Result;
use crate::renderer::types::{
    BufferDesc, DescriptorHeapKind, Format, ResourceState, ScissorRect, SwapChainDesc,
    TextureDesc, Viewport,
};

/// Addressing information for a descriptor heap. Handles are derived as
/// `start + index * increment`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapAddressing {
    pub cpu_start: u64,
    pub gpu_start: Option<u64>,
    pub increment: u32,
}

pub trait Backend: Sized + 'static {
    /// Whatever the backend needs to reach the device and the window.
    type InitDesc;
    type Resource: fmt::Debug;
    type DescriptorHeap;
    type CommandList;
    type Fence;
    type SwapChain;

    fn create(init: Self::InitDesc, debug: bool) -> Result<Self>;

    fn name(&self) -> &'static str;

    /// Blocks until the device has no outstanding work.
    fn wait_idle(&self) -> Result<()>;

    // Command recording lifecycle

    /// Creates a command allocator/list pair. The list starts open.
    fn create_command_list(&self) -> Result<Self::CommandList>;

    fn close_command_list(&self, list: &mut Self::CommandList) -> Result<()>;

    /// Resets the allocator and reopens the list. The device must be done
    /// with everything previously recorded into it.
    fn reset_command_list(&self, list: &mut Self::CommandList) -> Result<()>;

    /// Submits a closed list and has the queue write `value` into `fence`
    /// once the list finished executing.
    fn submit(&self, list: &mut Self::CommandList, fence: &Self::Fence, value: u64) -> Result<()>;

    // Fences

    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence>;

    fn completed_value(&self, fence: &Self::Fence) -> Result<u64>;

    /// Waits at most `timeout` for `fence` to reach `value`. Returns whether
    /// the value was reached.
    fn wait_for_value(&self, fence: &Self::Fence, value: u64, timeout: Duration) -> Result<bool>;

    // Descriptor heaps

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Self::DescriptorHeap>;

    fn heap_addressing(&self, heap: &Self::DescriptorHeap) -> HeapAddressing;

    fn create_render_target_view(
        &self,
        heap: &mut Self::DescriptorHeap,
        index: u32,
        resource: &Self::Resource,
        format: Format,
    ) -> Result<()>;

    fn create_depth_stencil_view(
        &self,
        heap: &mut Self::DescriptorHeap,
        index: u32,
        resource: &Self::Resource,
        format: Format,
    ) -> Result<()>;

    fn create_shader_resource_view(
        &self,
        heap: &mut Self::DescriptorHeap,
        index: u32,
        resource: &Self::Resource,
        format: Format,
    ) -> Result<()>;

    fn create_unordered_access_view(
        &self,
        heap: &mut Self::DescriptorHeap,
        index: u32,
        resource: &Self::Resource,
        format: Format,
    ) -> Result<()>;

    /// Drops whatever view lives in slot `index`.
    fn release_view(&self, heap: &mut Self::DescriptorHeap, index: u32);

    // Resources

    fn create_texture(&self, desc: &TextureDesc, initial_state: ResourceState) -> Result<Self::Resource>;

    fn create_buffer(&self, desc: &BufferDesc, initial_state: ResourceState) -> Result<Self::Resource>;

    fn write_buffer(&self, resource: &Self::Resource, offset: u64, data: &[u8]) -> Result<()>;

    fn read_buffer(&self, resource: &Self::Resource, offset: u64, out: &mut [u8]) -> Result<()>;

    // Swap chain

    /// Creates the swap chain. Its buffers are tracked in
    /// [`ResourceState::Present`]; a backend may leave their device layout
    /// undefined until the first barrier after acquisition.
    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<Self::SwapChain>;

    fn swap_chain_buffers(&self, swap_chain: &Self::SwapChain) -> Result<Vec<Self::Resource>>;

    /// Size of the buffers the chain was actually built with. The platform
    /// may clamp or override the requested size.
    fn swap_chain_extent(&self, swap_chain: &Self::SwapChain) -> (u32, u32);

    /// Resizes the chain. Every reference to the old buffers must have been
    /// released by the caller.
    fn resize_swap_chain(&self, swap_chain: &mut Self::SwapChain, width: u32, height: u32) -> Result<()>;

    fn current_back_buffer_index(&self, swap_chain: &mut Self::SwapChain) -> Result<u32>;

    fn present(&self, swap_chain: &mut Self::SwapChain) -> Result<()>;

    // Commands

    fn cmd_resource_barrier(
        &self,
        list: &mut Self::CommandList,
        resource: &Self::Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()>;

    fn cmd_set_render_targets(
        &self,
        list: &mut Self::CommandList,
        rtv_heap: &Self::DescriptorHeap,
        rtv_index: u32,
        dsv: Option<(&Self::DescriptorHeap, u32)>,
    ) -> Result<()>;

    fn cmd_set_viewport(&self, list: &mut Self::CommandList, viewport: &Viewport);

    fn cmd_set_scissor(&self, list: &mut Self::CommandList, rect: &ScissorRect);

    fn cmd_clear_render_target(
        &self,
        list: &mut Self::CommandList,
        heap: &Self::DescriptorHeap,
        index: u32,
        color: [f32; 4],
    ) -> Result<()>;

    fn cmd_clear_depth_stencil(
        &self,
        list: &mut Self::CommandList,
        heap: &Self::DescriptorHeap,
        index: u32,
        depth: f32,
        stencil: u8,
    ) -> Result<()>;

    fn cmd_copy_buffer(
        &self,
        list: &mut Self::CommandList,
        dst: &Self::Resource,
        dst_offset: u64,
        src: &Self::Resource,
        src_offset: u64,
        size: u64,
    ) -> Result<()>;

    fn cmd_copy_buffer_to_texture(
        &self,
        list: &mut Self::CommandList,
        dst: &Self::Resource,
        src: &Self::Resource,
    ) -> Result<()>;

    fn cmd_copy_texture_to_buffer(
        &self,
        list: &mut Self::CommandList,
        dst: &Self::Resource,
        src: &Self::Resource,
    ) -> Result<()>;
}
