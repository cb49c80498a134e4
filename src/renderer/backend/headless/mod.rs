//! A software device. Command lists are recorded into plain command vectors
//! and executed in order on a dedicated queue thread, which updates CPU-side
//! texel and byte storage and then signals the fence.
//!
//! Every barrier, clear, copy, and present is checked against the state the
//! device actually left the resource in. Mismatches are logged and collected
//! in [`HeadlessBackend::validation_messages`].

mod descriptor;
mod memory;
mod queue;

pub use descriptor::HeadlessDescriptorHeap;
pub use memory::{AllocationKind, HeadlessResource};
pub use queue::{HeadlessCommandList, HeadlessFence};

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::renderer::backend::{Backend, HeapAddressing};
use crate::renderer::error::{Error, Result};
use crate::renderer::types::{
    BufferDesc, DescriptorHeapKind, Format, ResourceState, ScissorRect, SwapChainDesc,
    TextureDesc, Viewport,
};

use memory::{Allocation, Storage};
use memory::byte_range;
use queue::{Command, Queue, QueueGate, Validation};

const DESCRIPTOR_INCREMENT: u32 = 32;

#[derive(Debug, Clone, Default)]
pub struct HeadlessDesc {
    /// Refuse to create more than this many live resources. Models a device
    /// running out of memory.
    pub max_live_resources: Option<usize>,
    /// Largest swap chain the "surface" allows. Bigger requests are clamped,
    /// the way a window manager can override the requested size.
    pub max_extent: Option<(u32, u32)>,
}

#[derive(Debug)]
pub struct HeadlessSwapChain {
    desc: SwapChainDesc,
    buffers: Vec<HeadlessResource>,
    current: u32,
    presented: u64,
}

impl HeadlessSwapChain {
    pub fn presented_frames(&self) -> u64 {
        self.presented
    }
}

pub struct HeadlessBackend {
    desc: HeadlessDesc,
    queue: Queue,
    validation: Arc<Validation>,
    gate: Arc<QueueGate>,
    live: Arc<AtomicUsize>,
    next_heap_address: AtomicU64,
    debug: bool,
}

impl HeadlessBackend {
    /// Number of resources whose memory is still allocated.
    pub fn live_resources(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn validation_messages(&self) -> Vec<String> {
        self.validation.messages()
    }

    /// Stops the queue thread from picking up new submissions. Already
    /// queued work stays pending until [`resume_queue`](Self::resume_queue).
    pub fn pause_queue(&self) {
        self.gate.set_paused(true);
    }

    pub fn resume_queue(&self) {
        self.gate.set_paused(false);
    }

    fn allocate(&self, name: &str, kind: AllocationKind, state: ResourceState) -> Result<HeadlessResource> {
        if let Some(max) = self.desc.max_live_resources {
            if self.live_resources() >= max {
                return Err(Error::device(format!(
                    "out of device memory creating '{name}' ({max} live resources)"
                )));
            }
        }
        Ok(HeadlessResource(Arc::new(Allocation::new(
            name,
            kind,
            state,
            self.live.clone(),
        ))))
    }

    fn clamp_extent(&self, width: u32, height: u32) -> (u32, u32) {
        match self.desc.max_extent {
            Some((max_width, max_height)) => (width.min(max_width), height.min(max_height)),
            None => (width, height),
        }
    }

    fn create_back_buffers(&self, desc: &SwapChainDesc) -> Result<Vec<HeadlessResource>> {
        (0..desc.buffer_count)
            .map(|i| {
                self.allocate(
                    &format!("back buffer {i}"),
                    AllocationKind::Texture {
                        width: desc.width,
                        height: desc.height,
                        format: desc.format,
                    },
                    ResourceState::Present,
                )
            })
            .collect()
    }

    fn record(list: &mut HeadlessCommandList, command: Command) -> Result<()> {
        if !list.open {
            return Err(Error::contract(format!("recording {command:?} into a closed command list")));
        }
        list.commands.push(command);
        Ok(())
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        // A paused queue would never drain and the join below would hang.
        self.gate.set_paused(false);
        if self.debug {
            let leaked = self.live_resources();
            if leaked > 0 {
                log::warn!("headless device dropped with {} live resources", leaked);
            }
        }
    }
}

impl Backend for HeadlessBackend {
    type InitDesc = HeadlessDesc;
    type Resource = HeadlessResource;
    type DescriptorHeap = HeadlessDescriptorHeap;
    type CommandList = HeadlessCommandList;
    type Fence = HeadlessFence;
    type SwapChain = HeadlessSwapChain;

    fn create(init: HeadlessDesc, debug: bool) -> Result<Self> {
        let validation = Arc::new(Validation::default());
        let gate = Arc::new(QueueGate::default());
        let queue = Queue::spawn(validation.clone(), gate.clone())?;
        log::info!("created headless device (validation: {})", debug);

        Ok(Self {
            desc: init,
            queue,
            validation,
            gate,
            live: Arc::new(AtomicUsize::new(0)),
            next_heap_address: AtomicU64::new(0x1000),
            debug,
        })
    }

    fn name(&self) -> &'static str {
        "headless"
    }

    fn wait_idle(&self) -> Result<()> {
        self.queue.flush()
    }

    fn create_command_list(&self) -> Result<HeadlessCommandList> {
        Ok(HeadlessCommandList {
            commands: Vec::new(),
            open: true,
        })
    }

    fn close_command_list(&self, list: &mut HeadlessCommandList) -> Result<()> {
        if !list.open {
            return Err(Error::contract("command list is already closed"));
        }
        list.open = false;
        Ok(())
    }

    fn reset_command_list(&self, list: &mut HeadlessCommandList) -> Result<()> {
        list.commands.clear();
        list.open = true;
        Ok(())
    }

    fn submit(&self, list: &mut HeadlessCommandList, fence: &HeadlessFence, value: u64) -> Result<()> {
        if list.open {
            return Err(Error::contract("command list must be closed before submission"));
        }
        let commands = std::mem::take(&mut list.commands);
        self.queue.submit(commands, fence.clone(), value)
    }

    fn create_fence(&self, initial_value: u64) -> Result<HeadlessFence> {
        Ok(HeadlessFence::new(initial_value))
    }

    fn completed_value(&self, fence: &HeadlessFence) -> Result<u64> {
        fence.completed()
    }

    fn wait_for_value(&self, fence: &HeadlessFence, value: u64, timeout: Duration) -> Result<bool> {
        fence.wait(value, timeout)
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<HeadlessDescriptorHeap> {
        let span = capacity as u64 * DESCRIPTOR_INCREMENT as u64;
        let cpu_start = self.next_heap_address.fetch_add(span.max(1).next_power_of_two(), Ordering::Relaxed);
        Ok(HeadlessDescriptorHeap::new(kind, capacity, shader_visible, cpu_start))
    }

    fn heap_addressing(&self, heap: &HeadlessDescriptorHeap) -> HeapAddressing {
        HeapAddressing {
            cpu_start: heap.cpu_start,
            gpu_start: heap.shader_visible.then_some(heap.cpu_start | 1 << 48),
            increment: DESCRIPTOR_INCREMENT,
        }
    }

    fn create_render_target_view(
        &self,
        heap: &mut HeadlessDescriptorHeap,
        index: u32,
        resource: &HeadlessResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::RenderTarget, index, resource, format)
    }

    fn create_depth_stencil_view(
        &self,
        heap: &mut HeadlessDescriptorHeap,
        index: u32,
        resource: &HeadlessResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::DepthStencil, index, resource, format)
    }

    fn create_shader_resource_view(
        &self,
        heap: &mut HeadlessDescriptorHeap,
        index: u32,
        resource: &HeadlessResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::ShaderResource, index, resource, format)
    }

    fn create_unordered_access_view(
        &self,
        heap: &mut HeadlessDescriptorHeap,
        index: u32,
        resource: &HeadlessResource,
        format: Format,
    ) -> Result<()> {
        heap.write(DescriptorHeapKind::UnorderedAccess, index, resource, format)
    }

    fn release_view(&self, heap: &mut HeadlessDescriptorHeap, index: u32) {
        heap.release(index);
    }

    fn create_texture(&self, desc: &TextureDesc, initial_state: ResourceState) -> Result<HeadlessResource> {
        let texture = self.allocate(
            &desc.name,
            AllocationKind::Texture {
                width: desc.width,
                height: desc.height,
                format: desc.format,
            },
            initial_state,
        )?;
        log::trace!("created texture '{}' ({})", desc.name, texture.id());
        Ok(texture)
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_state: ResourceState) -> Result<HeadlessResource> {
        self.allocate(
            &desc.name,
            AllocationKind::Buffer {
                size: desc.size,
                heap: desc.heap,
            },
            initial_state,
        )
    }

    fn write_buffer(&self, resource: &HeadlessResource, offset: u64, data: &[u8]) -> Result<()> {
        match &mut *resource.0.storage()? {
            Storage::Bytes(bytes) => {
                byte_range(offset, data.len())
                    .and_then(|range| bytes.get_mut(range))
                    .ok_or_else(|| Error::contract("write past the end of the buffer"))?
                    .copy_from_slice(data);
                Ok(())
            }
            Storage::Texels(_) => Err(Error::contract("cannot map a texture")),
        }
    }

    fn read_buffer(&self, resource: &HeadlessResource, offset: u64, out: &mut [u8]) -> Result<()> {
        match &*resource.0.storage()? {
            Storage::Bytes(bytes) => {
                let src = byte_range(offset, out.len())
                    .and_then(|range| bytes.get(range))
                    .ok_or_else(|| Error::contract("read past the end of the buffer"))?;
                out.copy_from_slice(src);
                Ok(())
            }
            Storage::Texels(_) => Err(Error::contract("cannot map a texture")),
        }
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<HeadlessSwapChain> {
        let (width, height) = self.clamp_extent(desc.width, desc.height);
        let desc = &SwapChainDesc { width, height, ..*desc };
        let buffers = self.create_back_buffers(desc)?;
        log::info!(
            "created headless swap chain {}x{} with {} buffers",
            desc.width,
            desc.height,
            desc.buffer_count
        );
        Ok(HeadlessSwapChain {
            desc: *desc,
            buffers,
            current: 0,
            presented: 0,
        })
    }

    fn swap_chain_buffers(&self, swap_chain: &HeadlessSwapChain) -> Result<Vec<HeadlessResource>> {
        Ok(swap_chain.buffers.clone())
    }

    fn swap_chain_extent(&self, swap_chain: &HeadlessSwapChain) -> (u32, u32) {
        (swap_chain.desc.width, swap_chain.desc.height)
    }

    fn resize_swap_chain(&self, swap_chain: &mut HeadlessSwapChain, width: u32, height: u32) -> Result<()> {
        for (i, buffer) in swap_chain.buffers.iter().enumerate() {
            let references = Arc::strong_count(&buffer.0);
            if references > 1 {
                return Err(Error::contract(format!(
                    "back buffer {i} still has {} outstanding references during resize",
                    references - 1
                )));
            }
        }
        swap_chain.buffers.clear();

        let (width, height) = self.clamp_extent(width, height);
        swap_chain.desc.width = width;
        swap_chain.desc.height = height;
        swap_chain.buffers = self.create_back_buffers(&swap_chain.desc)?;
        swap_chain.current = 0;
        Ok(())
    }

    fn current_back_buffer_index(&self, swap_chain: &mut HeadlessSwapChain) -> Result<u32> {
        Ok(swap_chain.current)
    }

    fn present(&self, swap_chain: &mut HeadlessSwapChain) -> Result<()> {
        let buffer = &swap_chain.buffers[swap_chain.current as usize];
        let state = *buffer.0.device_state()?;
        if state != ResourceState::Present {
            let message = format!(
                "presenting back buffer {} while the device has it in {state}",
                swap_chain.current
            );
            self.validation.report(message.clone());
            return Err(Error::contract(message));
        }
        swap_chain.presented += 1;
        swap_chain.current = (swap_chain.current + 1) % swap_chain.desc.buffer_count;
        Ok(())
    }

    fn cmd_resource_barrier(
        &self,
        list: &mut HeadlessCommandList,
        resource: &HeadlessResource,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        Self::record(
            list,
            Command::Barrier {
                target: resource.0.clone(),
                before,
                after,
            },
        )
    }

    fn cmd_set_render_targets(
        &self,
        list: &mut HeadlessCommandList,
        rtv_heap: &HeadlessDescriptorHeap,
        rtv_index: u32,
        dsv: Option<(&HeadlessDescriptorHeap, u32)>,
    ) -> Result<()> {
        let (color, _) = rtv_heap.resolve(rtv_index)?;
        let depth = match dsv {
            Some((heap, index)) => Some(heap.resolve(index)?.0),
            None => None,
        };
        Self::record(list, Command::BindTargets { color, depth })
    }

    fn cmd_set_viewport(&self, _list: &mut HeadlessCommandList, viewport: &Viewport) {
        log::trace!("viewport {}x{}", viewport.width, viewport.height);
    }

    fn cmd_set_scissor(&self, _list: &mut HeadlessCommandList, rect: &ScissorRect) {
        log::trace!("scissor {}x{}", rect.width(), rect.height());
    }

    fn cmd_clear_render_target(
        &self,
        list: &mut HeadlessCommandList,
        heap: &HeadlessDescriptorHeap,
        index: u32,
        color: [f32; 4],
    ) -> Result<()> {
        let (target, _) = heap.resolve(index)?;
        Self::record(list, Command::ClearColor { target, color })
    }

    fn cmd_clear_depth_stencil(
        &self,
        list: &mut HeadlessCommandList,
        heap: &HeadlessDescriptorHeap,
        index: u32,
        depth: f32,
        stencil: u8,
    ) -> Result<()> {
        let (target, _) = heap.resolve(index)?;
        Self::record(list, Command::ClearDepth { target, depth, stencil })
    }

    fn cmd_copy_buffer(
        &self,
        list: &mut HeadlessCommandList,
        dst: &HeadlessResource,
        dst_offset: u64,
        src: &HeadlessResource,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        Self::record(
            list,
            Command::CopyBuffer {
                dst: dst.0.clone(),
                dst_offset,
                src: src.0.clone(),
                src_offset,
                size,
            },
        )
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        list: &mut HeadlessCommandList,
        dst: &HeadlessResource,
        src: &HeadlessResource,
    ) -> Result<()> {
        Self::record(
            list,
            Command::CopyBufferToTexture {
                dst: dst.0.clone(),
                src: src.0.clone(),
            },
        )
    }

    fn cmd_copy_texture_to_buffer(
        &self,
        list: &mut HeadlessCommandList,
        dst: &HeadlessResource,
        src: &HeadlessResource,
    ) -> Result<()> {
        Self::record(
            list,
            Command::CopyTextureToBuffer {
                dst: dst.0.clone(),
                src: src.0.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::create(HeadlessDesc::default(), true).unwrap()
    }

    fn texture_desc(name: &str) -> TextureDesc {
        TextureDesc {
            width: 4,
            height: 4,
            format: Format::Rgba8Unorm,
            usage: crate::renderer::types::TextureUsage::RENDER_TARGET,
            clear_value: None,
            name: name.into(),
        }
    }

    #[test]
    fn queue_signals_fence_after_execution() {
        let backend = backend();
        let fence = backend.create_fence(0).unwrap();
        let mut list = backend.create_command_list().unwrap();
        backend.close_command_list(&mut list).unwrap();
        backend.submit(&mut list, &fence, 1).unwrap();
        assert!(backend.wait_for_value(&fence, 1, Duration::from_secs(5)).unwrap());
        assert_eq!(backend.completed_value(&fence).unwrap(), 1);
    }

    #[test]
    fn submitting_an_open_list_is_rejected() {
        let backend = backend();
        let fence = backend.create_fence(0).unwrap();
        let mut list = backend.create_command_list().unwrap();
        let err = backend.submit(&mut list, &fence, 1).unwrap_err();
        assert_eq!(err.kind(), crate::renderer::error::ErrorKind::ContractViolation);
    }

    #[test]
    fn paused_queue_holds_the_fence_back() {
        let backend = backend();
        let fence = backend.create_fence(0).unwrap();
        let mut list = backend.create_command_list().unwrap();
        backend.close_command_list(&mut list).unwrap();

        backend.pause_queue();
        backend.submit(&mut list, &fence, 1).unwrap();
        assert!(!backend.wait_for_value(&fence, 1, Duration::from_millis(20)).unwrap());

        backend.resume_queue();
        assert!(backend.wait_for_value(&fence, 1, Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn mismatched_barrier_is_reported() {
        let backend = backend();
        let texture = backend.create_texture(&texture_desc("t"), ResourceState::Common).unwrap();
        let fence = backend.create_fence(0).unwrap();
        let mut list = backend.create_command_list().unwrap();
        backend
            .cmd_resource_barrier(&mut list, &texture, ResourceState::CopyDest, ResourceState::RenderTarget)
            .unwrap();
        backend.close_command_list(&mut list).unwrap();
        backend.submit(&mut list, &fence, 1).unwrap();
        assert!(backend.wait_for_value(&fence, 1, Duration::from_secs(5)).unwrap());

        let messages = backend.validation_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("before-state"));
        assert_eq!(texture.device_state().unwrap(), ResourceState::RenderTarget);
    }

    #[test]
    fn views_do_not_keep_resources_alive() {
        let backend = backend();
        let mut heap = backend
            .create_descriptor_heap(DescriptorHeapKind::RenderTarget, 1, false)
            .unwrap();
        let texture = backend.create_texture(&texture_desc("rt"), ResourceState::RenderTarget).unwrap();
        backend
            .create_render_target_view(&mut heap, 0, &texture, Format::Rgba8Unorm)
            .unwrap();
        assert_eq!(backend.live_resources(), 1);
        drop(texture);
        assert_eq!(backend.live_resources(), 0);
        assert!(heap.resolve(0).is_err());
    }

    #[test]
    fn resize_refuses_while_back_buffers_are_referenced() {
        let backend = backend();
        let desc = SwapChainDesc {
            width: 8,
            height: 8,
            format: Format::Bgra8Unorm,
            buffer_count: 2,
            vsync: true,
        };
        let mut swap_chain = backend.create_swap_chain(&desc).unwrap();
        let held = backend.swap_chain_buffers(&swap_chain).unwrap();
        assert!(backend.resize_swap_chain(&mut swap_chain, 4, 4).is_err());
        drop(held);
        backend.resize_swap_chain(&mut swap_chain, 4, 4).unwrap();
        assert_eq!(backend.live_resources(), 2);
    }

    #[test]
    fn offsets_near_the_address_limit_are_out_of_bounds() {
        let backend = backend();
        let desc = BufferDesc {
            size: 16,
            heap: crate::renderer::types::HeapKind::Upload,
            name: "mapped".into(),
        };
        let buffer = backend.create_buffer(&desc, ResourceState::GenericRead).unwrap();
        let err = backend.write_buffer(&buffer, u64::MAX, &[1]).unwrap_err();
        assert_eq!(err.kind(), crate::renderer::error::ErrorKind::ContractViolation);
        let mut out = [0u8; 2];
        assert!(backend.read_buffer(&buffer, u64::MAX - 1, &mut out).is_err());
    }

    #[test]
    fn surface_limit_clamps_the_swap_chain() {
        let backend = HeadlessBackend::create(
            HeadlessDesc {
                max_extent: Some((100, 100)),
                ..Default::default()
            },
            false,
        )
        .unwrap();
        let desc = SwapChainDesc {
            width: 200,
            height: 50,
            format: Format::Bgra8Unorm,
            buffer_count: 2,
            vsync: true,
        };
        let mut swap_chain = backend.create_swap_chain(&desc).unwrap();
        assert_eq!(backend.swap_chain_extent(&swap_chain), (100, 50));
        backend.resize_swap_chain(&mut swap_chain, 40, 300).unwrap();
        assert_eq!(backend.swap_chain_extent(&swap_chain), (40, 100));
    }

    #[test]
    fn out_of_memory_is_a_device_failure() {
        let backend = HeadlessBackend::create(
            HeadlessDesc {
                max_live_resources: Some(1),
                ..Default::default()
            },
            false,
        )
        .unwrap();
        let _first = backend.create_texture(&texture_desc("a"), ResourceState::Common).unwrap();
        let err = backend.create_texture(&texture_desc("b"), ResourceState::Common).unwrap_err();
        assert!(err.is_fatal());
    }
}
