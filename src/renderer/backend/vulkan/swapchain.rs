use std::sync::Arc;

use ash::vk;

use super::device::RawDevice;
use super::resource::{vk_format, VulkanResource};
use crate::renderer::error::{ensure_contract, Error, Result};
use crate::renderer::types::{Format, SwapChainDesc};

pub struct VulkanSwapChain {
    desc: SwapChainDesc,
    raw: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    images: Vec<VulkanResource>,
    /// Image acquired from the presentation engine and not yet presented.
    acquired: Option<u32>,
    acquire_fence: vk::Fence,
    device: Arc<RawDevice>,
}

impl VulkanSwapChain {
    pub fn new(device: Arc<RawDevice>, desc: &SwapChainDesc) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(&device.instance.raw, &device.logical);
        let acquire_fence = unsafe { device.logical.create_fence(&vk::FenceCreateInfo::default(), None)? };

        let mut swap_chain = Self {
            desc: *desc,
            raw: vk::SwapchainKHR::null(),
            loader,
            images: Vec::new(),
            acquired: None,
            acquire_fence,
            device,
        };
        swap_chain.recreate(desc.width, desc.height)?;
        Ok(swap_chain)
    }

    pub fn buffers(&self) -> Vec<VulkanResource> {
        self.images.clone()
    }

    /// Size of the images the presentation engine actually created.
    pub fn extent(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        for (i, image) in self.images.iter().enumerate() {
            let references = Arc::strong_count(&image.0);
            if references > 1 {
                return Err(Error::contract(format!(
                    "back buffer {i} still has {} outstanding references during resize",
                    references - 1
                )));
            }
        }
        self.recreate(width, height)
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        let physical = self.device.physical;
        let surface = self.device.instance.surface;
        let surface_loader = &self.device.instance.surface_loader;
        let capabilities = unsafe { surface_loader.get_physical_device_surface_capabilities(physical, surface)? };
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical, surface)? };
        let present_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical, surface)? };

        let wanted = vk_format(self.desc.format);
        let surface_format = formats
            .iter()
            .find(|format| format.format == wanted && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .ok_or_else(|| Error::device(format!("surface does not support {:?}", self.desc.format)))?;

        let present_mode = if self.desc.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            present_modes
                .iter()
                .copied()
                .find(|mode| *mode == vk::PresentModeKHR::MAILBOX || *mode == vk::PresentModeKHR::IMMEDIATE)
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let image_extent = choose_extent(&capabilities, width, height);
        let min_image_count = image_count(&capabilities, self.desc.buffer_count)?;
        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        let old_swapchain = self.raw;
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);
        let raw = unsafe { self.loader.create_swapchain(&info, None)? };

        // Views of the old images go before the old swap chain does.
        self.images.clear();
        self.acquired = None;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.raw = raw;

        let images = unsafe { self.loader.get_swapchain_images(raw)? };
        ensure_contract!(
            images.len() as u32 == self.desc.buffer_count,
            "presentation engine created {} images for a chain of {} back buffers",
            images.len(),
            self.desc.buffer_count
        );
        self.images = images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                VulkanResource::from_swap_chain_image(self.device.clone(), *image, self.desc.format, image_extent, i)
            })
            .collect::<Result<Vec<_>>>()?;
        self.desc.width = image_extent.width;
        self.desc.height = image_extent.height;

        log::info!(
            "created swap chain {}x{} ({:?}, {:?})",
            image_extent.width,
            image_extent.height,
            surface_format.format,
            present_mode
        );
        Ok(())
    }

    /// Acquires the next image if none is held and returns its index.
    pub fn current_index(&mut self) -> Result<u32> {
        if let Some(index) = self.acquired {
            return Ok(index);
        }
        let (index, suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.raw, u64::MAX, vk::Semaphore::null(), self.acquire_fence)?
        };
        unsafe {
            self.device.logical.wait_for_fences(&[self.acquire_fence], true, u64::MAX)?;
            self.device.logical.reset_fences(&[self.acquire_fence])?;
        }
        if suboptimal {
            log::debug!("swap chain is suboptimal for the surface");
        }
        self.acquired = Some(index);
        Ok(index)
    }

    pub fn present(&mut self) -> Result<()> {
        let index = self.current_index()?;
        let swapchains = [self.raw];
        let indices = [index];
        let info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&indices);
        self.acquired = None;
        let suboptimal = unsafe { self.loader.queue_present(self.device.queue, &info)? };
        if suboptimal {
            log::debug!("presented to a suboptimal swap chain");
        }
        Ok(())
    }

    pub fn format(&self) -> Format {
        self.desc.format
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        self.images.clear();
        unsafe {
            if let Err(err) = self.device.logical.queue_wait_idle(self.device.queue) {
                log::error!("queue_wait_idle failed while destroying the swap chain: {}", err);
            }
            self.loader.destroy_swapchain(self.raw, None);
            self.device.logical.destroy_fence(self.acquire_fence, None);
        }
    }
}

/// The surface's own extent when it dictates one, the requested size clamped
/// to the surface limits otherwise.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// The chain is built with exactly `wanted` images. A surface that cannot
/// provide that many is an unsupported configuration, not a device fault.
fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR, wanted: u32) -> Result<u32> {
    let max = capabilities.max_image_count;
    ensure_contract!(
        capabilities.min_image_count <= wanted && (max == 0 || wanted <= max),
        "surface supports {} to {} swap chain images (0: no limit), {} back buffers are configured",
        capabilities.min_image_count,
        max,
        wanted
    );
    Ok(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::error::ErrorKind;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_is_exactly_the_buffer_count() {
        assert_eq!(image_count(&capabilities(2, 8), 2).unwrap(), 2);
        assert_eq!(image_count(&capabilities(1, 0), 2).unwrap(), 2);
    }

    #[test]
    fn surface_needing_more_images_is_unsupported() {
        let err = image_count(&capabilities(3, 8), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert!(!err.is_fatal());
        assert!(image_count(&capabilities(1, 1), 2).is_err());
    }

    #[test]
    fn extent_follows_the_surface() {
        let mut caps = capabilities(2, 0);
        let clamped = choose_extent(&caps, 4096, 300);
        assert_eq!((clamped.width, clamped.height), (1024, 300));

        caps.current_extent = vk::Extent2D { width: 800, height: 600 };
        let fixed = choose_extent(&caps, 1920, 1080);
        assert_eq!((fixed.width, fixed.height), (800, 600));
    }
}
