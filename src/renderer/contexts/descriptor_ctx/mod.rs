mod heap;

pub use heap::{CpuDescriptorHandle, DescriptorHeap, DescriptorSlot, GpuDescriptorHandle};

use crate::renderer::backend::Backend;
use crate::renderer::config::HeapCapacities;
use crate::renderer::error::Result;
use crate::renderer::types::DescriptorHeapKind;

/// The four descriptor heaps of the renderer. Render-target and depth-stencil
/// heaps stay CPU only; the resource heaps are shader visible.
pub struct DescriptorHeaps<B: Backend> {
    pub render_target: DescriptorHeap<B>,
    pub depth_stencil: DescriptorHeap<B>,
    pub shader_resource: DescriptorHeap<B>,
    pub unordered_access: DescriptorHeap<B>,
}

impl<B: Backend> DescriptorHeaps<B> {
    pub fn initialize(backend: &B, capacities: &HeapCapacities) -> Result<Self> {
        let heap = |kind: DescriptorHeapKind| {
            DescriptorHeap::initialize(backend, kind, capacities.get(kind), kind.supports_shader_visibility())
        };

        Ok(Self {
            render_target: heap(DescriptorHeapKind::RenderTarget)?,
            depth_stencil: heap(DescriptorHeapKind::DepthStencil)?,
            shader_resource: heap(DescriptorHeapKind::ShaderResource)?,
            unordered_access: heap(DescriptorHeapKind::UnorderedAccess)?,
        })
    }

    pub fn get(&self, kind: DescriptorHeapKind) -> &DescriptorHeap<B> {
        match kind {
            DescriptorHeapKind::RenderTarget => &self.render_target,
            DescriptorHeapKind::DepthStencil => &self.depth_stencil,
            DescriptorHeapKind::ShaderResource => &self.shader_resource,
            DescriptorHeapKind::UnorderedAccess => &self.unordered_access,
        }
    }

    pub fn get_mut(&mut self, kind: DescriptorHeapKind) -> &mut DescriptorHeap<B> {
        match kind {
            DescriptorHeapKind::RenderTarget => &mut self.render_target,
            DescriptorHeapKind::DepthStencil => &mut self.depth_stencil,
            DescriptorHeapKind::ShaderResource => &mut self.shader_resource,
            DescriptorHeapKind::UnorderedAccess => &mut self.unordered_access,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};

    #[test]
    fn heaps_follow_configured_capacities() {
        let backend = HeadlessBackend::create(HeadlessDesc::default(), false).unwrap();
        let heaps = DescriptorHeaps::initialize(&backend, &HeapCapacities::default()).unwrap();
        for kind in DescriptorHeapKind::ALL {
            let heap = heaps.get(kind);
            assert_eq!(heap.kind(), kind);
            assert_eq!(heap.is_shader_visible(), kind.supports_shader_visibility());
        }
        assert_eq!(heaps.render_target.capacity(), 2);
        assert_eq!(heaps.shader_resource.capacity(), 128);
    }
}
