use std::time::Duration;

use glam::Vec4;

use crate::renderer::types::{DescriptorHeapKind, Format};

/// Number of back buffers in the swap chain. Frame pacing is built around
/// exactly two.
pub const BUFFER_COUNT: u32 = 2;

/// Slot counts of the four descriptor heaps.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapCapacities {
    pub render_target: u32,
    pub depth_stencil: u32,
    pub shader_resource: u32,
    pub unordered_access: u32,
}

impl HeapCapacities {
    pub fn get(&self, kind: DescriptorHeapKind) -> u32 {
        match kind {
            DescriptorHeapKind::RenderTarget => self.render_target,
            DescriptorHeapKind::DepthStencil => self.depth_stencil,
            DescriptorHeapKind::ShaderResource => self.shader_resource,
            DescriptorHeapKind::UnorderedAccess => self.unordered_access,
        }
    }
}

impl Default for HeapCapacities {
    fn default() -> Self {
        Self {
            render_target: BUFFER_COUNT,
            depth_stencil: 1,
            shader_resource: 128,
            unordered_access: 16,
        }
    }
}

/// Contains configuration options for the renderer like vsync, validation,
/// and synchronization limits
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub vsync: bool,
    /// Enables the validation layer of the backend.
    pub debug: bool,
    pub clear_color: Vec4,
    pub back_buffer_format: Format,
    pub depth_format: Format,
    pub heap_capacities: HeapCapacities,
    /// Upper bound for a single `submit_and_wait`. `None` waits forever.
    pub fence_timeout: Option<Duration>,
    /// How often a blocked fence wait checks its cancellation token.
    pub fence_poll_interval: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            debug: cfg!(debug_assertions),
            clear_color: Vec4::new(0.0, 0.2, 0.4, 1.0),
            back_buffer_format: Format::Bgra8UnormSrgb,
            depth_format: Format::D32Float,
            heap_capacities: HeapCapacities::default(),
            fence_timeout: Some(Duration::from_secs(5)),
            fence_poll_interval: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacities() {
        let caps = HeapCapacities::default();
        assert_eq!(caps.get(DescriptorHeapKind::RenderTarget), 2);
        assert_eq!(caps.get(DescriptorHeapKind::DepthStencil), 1);
        assert_eq!(caps.get(DescriptorHeapKind::ShaderResource), 128);
        assert_eq!(caps.get(DescriptorHeapKind::UnorderedAccess), 16);
    }
}
