use std::sync::Arc;

use ash::vk;

use super::descriptor::VulkanDescriptorHeap;
use super::device::RawDevice;
use super::resource::VulkanResource;
use super::sync::{barrier_source, buffer_barrier, image_barrier, state_access};
use crate::renderer::error::{Error, Result};
use crate::renderer::types::{ResourceState, ScissorRect, Viewport};

/// Attachments bound by `set_render_targets`. Rendering is begun lazily and
/// suspended around barriers, copies and clears, which are not allowed inside
/// a dynamic rendering scope.
struct BoundTargets {
    color: VulkanResource,
    depth: Option<VulkanResource>,
}

/// A command pool with one primary command buffer.
pub struct VulkanCommandList {
    pool: vk::CommandPool,
    pub(super) buffer: vk::CommandBuffer,
    open: bool,
    rendering: bool,
    bound: Option<BoundTargets>,
    device: Arc<RawDevice>,
}

impl VulkanCommandList {
    pub fn new(device: Arc<RawDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(device.queue_family);
        let pool = unsafe { device.logical.create_command_pool(&pool_info, None)? };

        let buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let buffer = match unsafe { device.logical.allocate_command_buffers(&buffer_info) } {
            Ok(buffers) => buffers[0],
            Err(err) => {
                unsafe { device.logical.destroy_command_pool(pool, None) };
                return Err(err.into());
            }
        };

        let mut list = Self {
            pool,
            buffer,
            open: false,
            rendering: false,
            bound: None,
            device,
        };
        list.begin()?;
        Ok(list)
    }

    fn begin(&mut self) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.logical.begin_command_buffer(self.buffer, &info)? };
        self.open = true;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::contract("recording into a closed command list"))
        }
    }

    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::contract("command list is already closed"));
        }
        self.suspend_rendering();
        unsafe { self.device.logical.end_command_buffer(self.buffer)? };
        self.open = false;
        Ok(())
    }

    /// The device must have finished executing the previous recording.
    pub fn reset(&mut self) -> Result<()> {
        unsafe {
            self.device
                .logical
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        self.rendering = false;
        self.bound = None;
        self.begin()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn suspend_rendering(&mut self) {
        if self.rendering {
            unsafe { self.device.logical.cmd_end_rendering(self.buffer) };
            self.rendering = false;
        }
    }

    fn resume_rendering(&mut self) -> Result<()> {
        if self.rendering {
            return Ok(());
        }
        let Some(bound) = &self.bound else {
            return Ok(());
        };
        let color = bound.color.image()?;
        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(color.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let depth_attachment = match &bound.depth {
            Some(depth) => Some(
                vk::RenderingAttachmentInfo::default()
                    .image_view(depth.image()?.view)
                    .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE),
            ),
            None => None,
        };

        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: color.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            info = info.depth_attachment(depth);
        }
        unsafe { self.device.logical.cmd_begin_rendering(self.buffer, &info) };
        self.rendering = true;
        Ok(())
    }

    pub fn resource_barrier(
        &mut self,
        resource: &VulkanResource,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        self.ensure_open()?;
        self.suspend_rendering();

        let dst = state_access(after);
        match &resource.0.backing {
            super::resource::Backing::Image(img) => {
                let src = barrier_source(before, img.take_first_use());
                let barriers = [image_barrier(img.image, img.aspect, src.layout, src, dst)];
                let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
                unsafe { self.device.logical.cmd_pipeline_barrier2(self.buffer, &dependency) };
            }
            super::resource::Backing::Buffer(buf) => {
                let barriers = [buffer_barrier(buf.buffer, state_access(before), dst)];
                let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
                unsafe { self.device.logical.cmd_pipeline_barrier2(self.buffer, &dependency) };
            }
        }
        log::trace!("barrier '{}' {} -> {}", resource.name(), before, after);
        Ok(())
    }

    pub fn set_render_targets(
        &mut self,
        rtv_heap: &VulkanDescriptorHeap,
        rtv_index: u32,
        dsv: Option<(&VulkanDescriptorHeap, u32)>,
    ) -> Result<()> {
        self.ensure_open()?;
        let color = rtv_heap.resolve(rtv_index)?;
        let depth = match dsv {
            Some((heap, index)) => Some(heap.resolve(index)?),
            None => None,
        };
        self.suspend_rendering();
        self.bound = Some(BoundTargets { color, depth });
        self.resume_rendering()
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        let viewports = [vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        }];
        unsafe { self.device.logical.cmd_set_viewport(self.buffer, 0, &viewports) };
    }

    pub fn set_scissor(&mut self, rect: &ScissorRect) {
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.left,
                y: rect.top,
            },
            extent: vk::Extent2D {
                width: rect.width(),
                height: rect.height(),
            },
        }];
        unsafe { self.device.logical.cmd_set_scissor(self.buffer, 0, &scissors) };
    }

    /// Clears through a rendering scope of its own with a clearing load op.
    pub fn clear_render_target(&mut self, heap: &VulkanDescriptorHeap, index: u32, color: [f32; 4]) -> Result<()> {
        self.ensure_open()?;
        let target = heap.resolve(index)?;
        let image = target.image()?;
        let attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            })];
        let info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: image.extent,
            })
            .layer_count(1)
            .color_attachments(&attachments);

        self.suspend_rendering();
        unsafe {
            self.device.logical.cmd_begin_rendering(self.buffer, &info);
            self.device.logical.cmd_end_rendering(self.buffer);
        }
        self.resume_rendering()
    }

    pub fn clear_depth_stencil(&mut self, heap: &VulkanDescriptorHeap, index: u32, depth: f32, stencil: u8) -> Result<()> {
        self.ensure_open()?;
        let target = heap.resolve(index)?;
        let image = target.image()?;
        let attachment = vk::RenderingAttachmentInfo::default()
            .image_view(image.view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth,
                    stencil: stencil as u32,
                },
            });
        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: image.extent,
            })
            .layer_count(1)
            .depth_attachment(&attachment);
        if image.aspect.contains(vk::ImageAspectFlags::STENCIL) {
            info = info.stencil_attachment(&attachment);
        }

        self.suspend_rendering();
        unsafe {
            self.device.logical.cmd_begin_rendering(self.buffer, &info);
            self.device.logical.cmd_end_rendering(self.buffer);
        }
        self.resume_rendering()
    }

    pub fn copy_buffer(
        &mut self,
        dst: &VulkanResource,
        dst_offset: u64,
        src: &VulkanResource,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        let regions = [vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        }];
        let (dst, src) = (dst.buffer()?.buffer, src.buffer()?.buffer);
        self.suspend_rendering();
        unsafe { self.device.logical.cmd_copy_buffer(self.buffer, src, dst, &regions) };
        Ok(())
    }

    pub fn copy_buffer_to_texture(&mut self, dst: &VulkanResource, src: &VulkanResource) -> Result<()> {
        self.ensure_open()?;
        let image = dst.image()?;
        let buffer = src.buffer()?;
        let regions = [full_image_copy(image.aspect, image.extent)];
        self.suspend_rendering();
        unsafe {
            self.device.logical.cmd_copy_buffer_to_image(
                self.buffer,
                buffer.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }
        Ok(())
    }

    pub fn copy_texture_to_buffer(&mut self, dst: &VulkanResource, src: &VulkanResource) -> Result<()> {
        self.ensure_open()?;
        let buffer = dst.buffer()?;
        let image = src.image()?;
        let regions = [full_image_copy(image.aspect, image.extent)];
        self.suspend_rendering();
        unsafe {
            self.device.logical.cmd_copy_image_to_buffer(
                self.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer.buffer,
                &regions,
            );
        }
        Ok(())
    }
}

fn full_image_copy(aspect: vk::ImageAspectFlags, extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        unsafe { self.device.logical.destroy_command_pool(self.pool, None) };
    }
}
