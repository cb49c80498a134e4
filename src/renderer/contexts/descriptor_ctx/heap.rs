use crate::renderer::backend::{Backend, HeapAddressing};
use crate::renderer::contexts::resource_ctx::Resource;
use crate::renderer::error::{ensure_contract, Error, Result};
use crate::renderer::types::{DescriptorHeapKind, Format};

/// CPU-side address of a descriptor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CpuDescriptorHandle {
    pub ptr: u64,
}

/// Shader-visible address of a descriptor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

/// A slot handed out by [`DescriptorHeap::allocate`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorSlot {
    pub kind: DescriptorHeapKind,
    pub index: u32,
}

/// A fixed-size descriptor heap.
///
/// Slots come from a free list first and from the CPU cursor after that, so
/// freed slots are reused before the heap grows. The GPU cursor walks the
/// shader-visible range on its own and never touches the free list.
pub struct DescriptorHeap<B: Backend> {
    raw: B::DescriptorHeap,
    kind: DescriptorHeapKind,
    capacity: u32,
    shader_visible: bool,
    addressing: HeapAddressing,
    cpu_cursor: u32,
    gpu_cursor: u32,
    free_list: Vec<u32>,
    live: Vec<bool>,
}

impl<B: Backend> DescriptorHeap<B> {
    pub fn initialize(backend: &B, kind: DescriptorHeapKind, capacity: u32, shader_visible: bool) -> Result<Self> {
        ensure_contract!(capacity > 0, "{:?} heap needs at least one slot", kind);
        ensure_contract!(
            !shader_visible || kind.supports_shader_visibility(),
            "{:?} heaps cannot be shader visible",
            kind
        );

        let raw = backend.create_descriptor_heap(kind, capacity, shader_visible)?;
        let addressing = backend.heap_addressing(&raw);
        log::debug!(
            "initialized {:?} heap with {} slots (shader visible: {})",
            kind,
            capacity,
            shader_visible
        );

        Ok(Self {
            raw,
            kind,
            capacity,
            shader_visible,
            addressing,
            cpu_cursor: 0,
            gpu_cursor: 0,
            free_list: Vec::new(),
            live: vec![false; capacity as usize],
        })
    }

    pub fn raw(&self) -> &B::DescriptorHeap {
        &self.raw
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    pub fn increment(&self) -> u32 {
        self.addressing.increment
    }

    /// Number of slots currently handed out.
    pub fn live_slots(&self) -> usize {
        self.live.iter().filter(|live| **live).count()
    }

    /// Takes a slot, preferring previously freed ones.
    pub fn allocate(&mut self) -> Result<DescriptorSlot> {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                ensure_contract!(
                    self.cpu_cursor < self.capacity,
                    "{:?} heap exhausted: all {} slots are in use",
                    self.kind,
                    self.capacity
                );
                let index = self.cpu_cursor;
                self.cpu_cursor += 1;
                index
            }
        };
        self.live[index as usize] = true;
        Ok(DescriptorSlot { kind: self.kind, index })
    }

    /// Returns a slot to the free list and drops whatever view it held.
    pub fn free(&mut self, backend: &B, slot: DescriptorSlot) -> Result<()> {
        self.check_slot(slot, self.kind)?;
        backend.release_view(&mut self.raw, slot.index);
        self.live[slot.index as usize] = false;
        self.free_list.push(slot.index);
        Ok(())
    }

    /// Allocates the next unused slot and returns its CPU handle.
    pub fn next_cpu_handle(&mut self) -> Result<CpuDescriptorHandle> {
        let slot = self.allocate()?;
        self.cpu_handle(slot.index)
    }

    /// Advances the GPU cursor and returns its handle.
    pub fn next_gpu_handle(&mut self) -> Result<GpuDescriptorHandle> {
        ensure_contract!(
            self.gpu_cursor < self.capacity,
            "{:?} heap exhausted: GPU cursor reached capacity {}",
            self.kind,
            self.capacity
        );
        let handle = self.gpu_handle(self.gpu_cursor)?;
        self.gpu_cursor += 1;
        Ok(handle)
    }

    pub fn cpu_handle(&self, index: u32) -> Result<CpuDescriptorHandle> {
        self.check_index(index)?;
        Ok(CpuDescriptorHandle {
            ptr: self.addressing.cpu_start + index as u64 * self.addressing.increment as u64,
        })
    }

    pub fn gpu_handle(&self, index: u32) -> Result<GpuDescriptorHandle> {
        self.check_index(index)?;
        let start = self
            .addressing
            .gpu_start
            .filter(|_| self.shader_visible)
            .ok_or_else(|| Error::contract(format!("{:?} heap is not shader visible", self.kind)))?;
        Ok(GpuDescriptorHandle {
            ptr: start + index as u64 * self.addressing.increment as u64,
        })
    }

    pub fn create_render_target_view(&mut self, backend: &B, slot: DescriptorSlot, resource: &Resource<B>) -> Result<()> {
        let format = self.view_format(slot, DescriptorHeapKind::RenderTarget, resource)?;
        ensure_contract!(!format.is_depth(), "'{}' has a depth format and cannot be a render target", resource.name());
        backend.create_render_target_view(&mut self.raw, slot.index, resource.raw(), format)
    }

    pub fn create_depth_stencil_view(&mut self, backend: &B, slot: DescriptorSlot, resource: &Resource<B>) -> Result<()> {
        let format = self.view_format(slot, DescriptorHeapKind::DepthStencil, resource)?;
        ensure_contract!(format.is_depth(), "'{}' has no depth format", resource.name());
        backend.create_depth_stencil_view(&mut self.raw, slot.index, resource.raw(), format)
    }

    pub fn create_shader_resource_view(&mut self, backend: &B, slot: DescriptorSlot, resource: &Resource<B>) -> Result<()> {
        let format = self.view_format(slot, DescriptorHeapKind::ShaderResource, resource)?;
        backend.create_shader_resource_view(&mut self.raw, slot.index, resource.raw(), format)
    }

    pub fn create_unordered_access_view(&mut self, backend: &B, slot: DescriptorSlot, resource: &Resource<B>) -> Result<()> {
        let format = self.view_format(slot, DescriptorHeapKind::UnorderedAccess, resource)?;
        backend.create_unordered_access_view(&mut self.raw, slot.index, resource.raw(), format)
    }

    /// Clears the view in `slot` without giving the slot back.
    pub fn release_view(&mut self, backend: &B, slot: DescriptorSlot) -> Result<()> {
        self.check_slot(slot, self.kind)?;
        backend.release_view(&mut self.raw, slot.index);
        Ok(())
    }

    /// Checks that `slot` was handed out by this heap and is still live.
    pub fn check_slot(&self, slot: DescriptorSlot, expected: DescriptorHeapKind) -> Result<()> {
        ensure_contract!(
            slot.kind == expected && self.kind == expected,
            "{:?} slot used where a {:?} slot of this {:?} heap is expected",
            slot.kind,
            expected,
            self.kind
        );
        self.check_index(slot.index)?;
        ensure_contract!(
            self.live[slot.index as usize],
            "{:?} slot {} is not allocated",
            self.kind,
            slot.index
        );
        Ok(())
    }

    fn check_index(&self, index: u32) -> Result<()> {
        ensure_contract!(
            index < self.capacity,
            "descriptor index {} outside {:?} heap of {}",
            index,
            self.kind,
            self.capacity
        );
        Ok(())
    }

    fn view_format(&self, slot: DescriptorSlot, view: DescriptorHeapKind, resource: &Resource<B>) -> Result<Format> {
        self.check_slot(slot, view)?;
        resource
            .format()
            .ok_or_else(|| Error::contract(format!("'{}' is a buffer and has no texture view", resource.name())))
    }
}
