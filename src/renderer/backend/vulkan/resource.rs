use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::device::RawDevice;
use crate::renderer::error::{Error, Result};
use crate::renderer::types::{BufferDesc, Format, HeapKind, TextureDesc, TextureUsage};

pub fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn aspect_of(format: Format) -> vk::ImageAspectFlags {
    match format {
        Format::D32Float => vk::ImageAspectFlags::DEPTH,
        Format::D24UnormS8Uint => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn image_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::RENDER_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::SHADER_RESOURCE) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::UNORDERED_ACCESS) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

pub struct ImageResource {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    /// `None` for swap chain images, whose memory belongs to the swap chain.
    allocation: Mutex<Option<Allocation>>,
    /// Set until the first barrier on the image is recorded.
    first_use: AtomicBool,
}

impl ImageResource {
    /// Whether this is the first barrier recorded on the image.
    pub fn take_first_use(&self) -> bool {
        self.first_use.swap(false, Ordering::AcqRel)
    }
}

pub struct BufferResource {
    pub buffer: vk::Buffer,
    pub size: u64,
    allocation: Mutex<Option<Allocation>>,
}

pub enum Backing {
    Image(ImageResource),
    Buffer(BufferResource),
}

pub struct ResourceInner {
    pub name: String,
    pub backing: Backing,
    device: Arc<RawDevice>,
}

/// A committed image or buffer. Clones share the underlying handles, which
/// are destroyed with the last clone.
#[derive(Clone)]
pub struct VulkanResource(pub(super) Arc<ResourceInner>);

impl fmt::Debug for VulkanResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.backing {
            Backing::Image(img) => f
                .debug_struct("VulkanResource")
                .field("name", &self.0.name)
                .field("image", &img.image)
                .field("format", &img.format)
                .finish(),
            Backing::Buffer(buf) => f
                .debug_struct("VulkanResource")
                .field("name", &self.0.name)
                .field("buffer", &buf.buffer)
                .field("size", &buf.size)
                .finish(),
        }
    }
}

impl VulkanResource {
    pub fn new_texture(device: Arc<RawDevice>, desc: &TextureDesc) -> Result<Self> {
        let format = vk_format(desc.format);
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let aspect = aspect_of(desc.format);

        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(format)
                .usage(image_usage(desc.usage))
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.logical.create_image(&info, None)? }
        };
        let requirements = unsafe { device.logical.get_image_memory_requirements(image) };
        let allocation = device.memory_allocator()?.allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::DedicatedImage(image),
        })?;
        unsafe { device.logical.bind_image_memory(image, allocation.memory(), allocation.offset())? };
        let view = create_view(&device.logical, image, format, aspect)?;

        Ok(Self(Arc::new(ResourceInner {
            name: desc.name.clone(),
            backing: Backing::Image(ImageResource {
                image,
                view,
                format: desc.format,
                extent,
                aspect,
                allocation: Mutex::new(Some(allocation)),
                first_use: AtomicBool::new(false),
            }),
            device,
        })))
    }

    /// Wraps an image owned by the swap chain. The image is left `UNDEFINED`
    /// until it has been acquired; its first barrier discards the contents.
    pub fn from_swap_chain_image(
        device: Arc<RawDevice>,
        image: vk::Image,
        format: Format,
        extent: vk::Extent2D,
        index: usize,
    ) -> Result<Self> {
        let view = create_view(&device.logical, image, vk_format(format), vk::ImageAspectFlags::COLOR)?;
        Ok(Self(Arc::new(ResourceInner {
            name: format!("back buffer {index}"),
            backing: Backing::Image(ImageResource {
                image,
                view,
                format,
                extent,
                aspect: vk::ImageAspectFlags::COLOR,
                allocation: Mutex::new(None),
                first_use: AtomicBool::new(true),
            }),
            device,
        })))
    }

    pub fn new_buffer(device: Arc<RawDevice>, desc: &BufferDesc) -> Result<Self> {
        let buffer = {
            let info = vk::BufferCreateInfo::default()
                .size(desc.size)
                .usage(
                    vk::BufferUsageFlags::TRANSFER_SRC
                        | vk::BufferUsageFlags::TRANSFER_DST
                        | vk::BufferUsageFlags::UNIFORM_BUFFER
                        | vk::BufferUsageFlags::STORAGE_BUFFER
                        | vk::BufferUsageFlags::VERTEX_BUFFER
                        | vk::BufferUsageFlags::INDEX_BUFFER,
                )
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe { device.logical.create_buffer(&info, None)? }
        };
        let location = match desc.heap {
            HeapKind::Default => MemoryLocation::GpuOnly,
            HeapKind::Upload => MemoryLocation::CpuToGpu,
            HeapKind::Readback => MemoryLocation::GpuToCpu,
        };
        let requirements = unsafe { device.logical.get_buffer_memory_requirements(buffer) };
        let allocation = device.memory_allocator()?.allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
        })?;
        unsafe { device.logical.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())? };

        Ok(Self(Arc::new(ResourceInner {
            name: desc.name.clone(),
            backing: Backing::Buffer(BufferResource {
                buffer,
                size: desc.size,
                allocation: Mutex::new(Some(allocation)),
            }),
            device,
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn image(&self) -> Result<&ImageResource> {
        match &self.0.backing {
            Backing::Image(img) => Ok(img),
            Backing::Buffer(_) => Err(Error::contract(format!("'{}' is a buffer, not a texture", self.0.name))),
        }
    }

    pub fn buffer(&self) -> Result<&BufferResource> {
        match &self.0.backing {
            Backing::Buffer(buf) => Ok(buf),
            Backing::Image(_) => Err(Error::contract(format!("'{}' is a texture, not a buffer", self.0.name))),
        }
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.buffer()?;
        let allocation = buffer
            .allocation
            .lock()
            .map_err(|e| Error::device(format!("allocation poisoned: {e}")))?;
        let (ptr, size) = mapped_range(allocation.as_ref(), &self.0.name)?;

        let mut raw_allocation = presser::RawAllocation::from_raw_parts(ptr, size);
        // SAFETY: the mapping stays valid while the allocation lock is held.
        let mut slab = unsafe { raw_allocation.borrow_as_slab() };
        let offset = usize::try_from(offset)
            .map_err(|_| Error::contract(format!("write past the end of '{}'", self.0.name)))?;
        presser::copy_from_slice_to_offset(data, &mut slab, offset)
            .map_err(|e| Error::contract(format!("write into '{}' failed: {e:?}", self.0.name)))?;
        Ok(())
    }

    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let buffer = self.buffer()?;
        let allocation = buffer
            .allocation
            .lock()
            .map_err(|e| Error::device(format!("allocation poisoned: {e}")))?;
        let mapped = allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .ok_or_else(|| Error::contract(format!("'{}' is not host visible", self.0.name)))?;
        let src = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(out.len())?))
            .and_then(|range| mapped.get(range))
            .ok_or_else(|| Error::contract(format!("read past the end of '{}'", self.0.name)))?;
        out.copy_from_slice(src);
        Ok(())
    }
}

fn mapped_range(allocation: Option<&Allocation>, name: &str) -> Result<(NonNull<u8>, usize)> {
    let allocation = allocation.ok_or_else(|| Error::contract(format!("'{name}' has no memory")))?;
    let ptr = allocation
        .mapped_ptr()
        .ok_or_else(|| Error::contract(format!("'{name}' is not host visible")))?;
    Ok((ptr.cast(), allocation.size() as usize))
}

fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::default()
        .view_type(vk::ImageViewType::TYPE_2D)
        .image(image)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    Ok(unsafe { device.create_image_view(&info, None)? })
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        let logical = &self.device.logical;
        let allocation = match &mut self.backing {
            Backing::Image(img) => {
                unsafe { logical.destroy_image_view(img.view, None) };
                let allocation = img.allocation.get_mut().ok().and_then(Option::take);
                if allocation.is_some() {
                    unsafe { logical.destroy_image(img.image, None) };
                }
                allocation
            }
            Backing::Buffer(buf) => {
                unsafe { logical.destroy_buffer(buf.buffer, None) };
                buf.allocation.get_mut().ok().and_then(Option::take)
            }
        };

        if let Some(allocation) = allocation {
            match self.device.memory_allocator() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("failed to free memory of '{}': {}", self.name, err);
                    }
                }
                Err(err) => log::error!("leaking memory of '{}': {}", self.name, err),
            }
        }
    }
}
