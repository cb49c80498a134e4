use std::sync::Arc;

use ash::vk;

use super::device::RawDevice;
use crate::renderer::error::Result;

/// One-off command submission outside the frame loop. Used to move freshly
/// created images out of `UNDEFINED` into the layout of their initial state.
pub struct TransferContext {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    device: Arc<RawDevice>,
}

impl TransferContext {
    pub fn new(device: Arc<RawDevice>) -> Result<Self> {
        let fence = unsafe { device.logical.create_fence(&vk::FenceCreateInfo::default(), None)? };

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.logical.create_command_pool(&command_pool_info, None)? };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe { device.logical.allocate_command_buffers(&command_buffer_info)?[0] };

        Ok(Self {
            fence,
            command_pool,
            command_buffer,
            device,
        })
    }

    /// Records `func` into a one-time command buffer, submits it and blocks
    /// until it finished executing.
    pub fn immediate_submit<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device),
    {
        let device = &self.device.logical;
        let cmd = self.command_buffer;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info)? };

        func(cmd, device);

        unsafe { device.end_command_buffer(cmd)? };

        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
        unsafe {
            device.queue_submit2(self.device.queue, &[submit], self.fence)?;
            device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            device.reset_fences(&[self.fence])?;
            device.reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for TransferContext {
    fn drop(&mut self) {
        unsafe {
            self.device.logical.destroy_command_pool(self.command_pool, None);
            self.device.logical.destroy_fence(self.fence, None);
        }
    }
}
