use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use super::device::RawDevice;
use crate::renderer::error::Result;
use crate::renderer::types::ResourceState;

/// A timeline semaphore. The queue writes the submission's value into it when
/// the submission completes.
pub struct VulkanFence {
    pub(super) semaphore: vk::Semaphore,
    device: Arc<RawDevice>,
}

impl VulkanFence {
    pub fn new(device: Arc<RawDevice>, initial_value: u64) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { device.logical.create_semaphore(&info, None)? };
        Ok(Self { semaphore, device })
    }

    pub fn completed_value(&self) -> Result<u64> {
        Ok(unsafe { self.device.logical.get_semaphore_counter_value(self.semaphore)? })
    }

    pub fn wait(&self, value: u64, timeout: Duration) -> Result<bool> {
        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.logical.wait_semaphores(&info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.device.logical.destroy_semaphore(self.semaphore, None) };
    }
}

/// How a [`ResourceState`] looks to the Vulkan synchronization model.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StateAccess {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

/// Source scope for an image whose contents may be discarded.
pub const UNDEFINED: StateAccess = StateAccess {
    layout: vk::ImageLayout::UNDEFINED,
    stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
    access: vk::AccessFlags2::NONE,
};

/// Source scope of a barrier leaving `before`. An image that has never been
/// transitioned is still `UNDEFINED` on the device, whatever state it is
/// tracked in.
pub fn barrier_source(before: ResourceState, first_use: bool) -> StateAccess {
    if first_use {
        UNDEFINED
    } else {
        state_access(before)
    }
}

pub fn state_access(state: ResourceState) -> StateAccess {
    use vk::AccessFlags2 as A;
    use vk::PipelineStageFlags2 as S;

    let (layout, stage, access) = match state {
        ResourceState::Common => (vk::ImageLayout::GENERAL, S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        ResourceState::Present => (vk::ImageLayout::PRESENT_SRC_KHR, S::BOTTOM_OF_PIPE, A::NONE),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthWrite => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthRead => (
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS | S::FRAGMENT_SHADER,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::SHADER_READ,
        ),
        ResourceState::CopyDest => (vk::ImageLayout::TRANSFER_DST_OPTIMAL, S::ALL_TRANSFER, A::TRANSFER_WRITE),
        ResourceState::CopySource => (vk::ImageLayout::TRANSFER_SRC_OPTIMAL, S::ALL_TRANSFER, A::TRANSFER_READ),
        ResourceState::GenericRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            S::ALL_COMMANDS,
            A::SHADER_READ | A::TRANSFER_READ | A::UNIFORM_READ | A::VERTEX_ATTRIBUTE_READ | A::INDEX_READ,
        ),
        ResourceState::PixelShaderResource => {
            (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, S::FRAGMENT_SHADER, A::SHADER_SAMPLED_READ)
        }
        ResourceState::UnorderedAccess => (
            vk::ImageLayout::GENERAL,
            S::COMPUTE_SHADER | S::FRAGMENT_SHADER,
            A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE,
        ),
    };
    StateAccess { layout, stage, access }
}

pub fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    before: StateAccess,
    after: StateAccess,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(before.stage)
        .src_access_mask(before.access)
        .dst_stage_mask(after.stage)
        .dst_access_mask(after.access)
        .old_layout(old_layout)
        .new_layout(after.layout)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .level_count(1)
                .layer_count(1),
        )
}

pub fn buffer_barrier(buffer: vk::Buffer, before: StateAccess, after: StateAccess) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(before.stage)
        .src_access_mask(before.access)
        .dst_stage_mask(after.stage)
        .dst_access_mask(after.access)
        .buffer(buffer)
        .size(vk::WHOLE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentable_and_attachment_layouts() {
        assert_eq!(state_access(ResourceState::Present).layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            state_access(ResourceState::RenderTarget).layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            state_access(ResourceState::DepthWrite).layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn first_barrier_of_a_swap_chain_image_starts_undefined() {
        let first = barrier_source(ResourceState::Present, true);
        assert_eq!(first.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.access, vk::AccessFlags2::NONE);
        assert_eq!(
            barrier_source(ResourceState::Present, false).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn copy_states_use_transfer_stage() {
        for state in [ResourceState::CopyDest, ResourceState::CopySource] {
            assert_eq!(state_access(state).stage, vk::PipelineStageFlags2::ALL_TRANSFER);
        }
        assert!(state_access(ResourceState::CopyDest)
            .access
            .contains(vk::AccessFlags2::TRANSFER_WRITE));
    }
}
