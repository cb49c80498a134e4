use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::{Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_descriptor::{
    CreatePoolError, DescriptorAllocator, DescriptorDevice, DescriptorPoolCreateFlags,
    DescriptorTotalCount, DeviceAllocationError,
};

use super::instance::Instance;
use crate::renderer::error::{Error, Result};

pub type SetAllocator = DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>;

const MAX_UPDATE_AFTER_BIND_DESCRIPTORS: u32 = 1024;

/// Everything tied to the lifetime of the logical device. Shared by every
/// object that has to destroy Vulkan handles on drop.
pub struct RawDevice {
    pub logical: ash::Device,
    pub physical: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family: u32,
    memory_allocator: ManuallyDrop<Mutex<Allocator>>,
    descriptor_allocator: ManuallyDrop<Mutex<SetAllocator>>,
    // Dropped after the device and the allocators.
    pub instance: Instance,
}

impl RawDevice {
    pub fn new(instance: Instance) -> Result<Self> {
        let (physical, queue_family) = Self::select_physical_device(&instance)?;
        let logical = Self::create_logical_device(&instance.raw, physical, queue_family)?;
        let queue = unsafe { logical.get_device_queue(queue_family, 0) };

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw.clone(),
            device: logical.clone(),
            physical_device: physical,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: false,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let props = unsafe { instance.raw.get_physical_device_properties(physical) };
        log::info!(
            "selected {:?} (queue family {})",
            props.device_name_as_c_str().unwrap_or(c"unknown device"),
            queue_family
        );

        Ok(Self {
            logical,
            physical,
            queue,
            queue_family,
            memory_allocator: ManuallyDrop::new(Mutex::new(memory_allocator)),
            descriptor_allocator: ManuallyDrop::new(Mutex::new(DescriptorAllocator::new(MAX_UPDATE_AFTER_BIND_DESCRIPTORS))),
            instance,
        })
    }

    pub fn memory_allocator(&self) -> Result<MutexGuard<'_, Allocator>> {
        self.memory_allocator
            .lock()
            .map_err(|e| Error::device(format!("memory allocator poisoned: {e}")))
    }

    pub fn descriptor_allocator(&self) -> Result<MutexGuard<'_, SetAllocator>> {
        self.descriptor_allocator
            .lock()
            .map_err(|e| Error::device(format!("descriptor allocator poisoned: {e}")))
    }

    fn select_physical_device(instance: &Instance) -> Result<(vk::PhysicalDevice, u32)> {
        let surface = &instance.surface;
        let surface_loader = &instance.surface_loader;
        let instance = &instance.raw;
        let req_device_exts = Self::required_device_extensions();

        let devices = unsafe { instance.enumerate_physical_devices()? };
        devices
            .into_iter()
            // Filter out devices that do not support the required device extensions
            .filter(|device| {
                let supported = unsafe { instance.enumerate_device_extension_properties(*device) }
                    .unwrap_or_default();
                req_device_exts.iter().all(|req_ext| {
                    let found = supported
                        .iter()
                        .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *req_ext));
                    if !found {
                        log::debug!("device extension not supported: {:?}", req_ext);
                    }
                    found
                })
            })
            // One queue family has to do graphics and presentation
            .filter_map(|device| {
                let props = unsafe { instance.get_physical_device_queue_family_properties(device) };
                props
                    .iter()
                    .enumerate()
                    .position(|(i, q)| {
                        let supports_present = unsafe {
                            surface_loader.get_physical_device_surface_support(device, i as u32, *surface)
                        }
                        .unwrap_or(false);
                        q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && supports_present
                    })
                    .map(|index| (device, index as u32))
            })
            .min_by_key(|(device, _)| {
                let props = unsafe { instance.get_physical_device_properties(*device) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    _ => 4,
                }
            })
            .ok_or_else(|| Error::device("no suitable physical device found"))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        let enabled_extension_names = Self::required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let mut enabled_features = RequiredDeviceFeatures::new();
        let device_create_info = enabled_features
            .device_create_info()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names);

        Ok(unsafe { instance.create_device(physical_device, &device_create_info, None)? })
    }

    fn required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,
            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl Drop for RawDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {}", err);
            }
            if let Ok(descriptors) = self.descriptor_allocator.get_mut() {
                descriptors.cleanup(&DescriptorAshDevice(&self.logical));
            }
            ManuallyDrop::drop(&mut self.descriptor_allocator);
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_device(None);
        }
    }
}

/// Core 1.3 features the backend relies on: synchronization2 for barriers and
/// submission, dynamic rendering for render targets, timeline semaphores for
/// the fence, and partially bound descriptor arrays for the resource heaps.
struct RequiredDeviceFeatures<'a> {
    vulkan12: vk::PhysicalDeviceVulkan12Features<'a>,
    vulkan13: vk::PhysicalDeviceVulkan13Features<'a>,
}

impl<'a> RequiredDeviceFeatures<'a> {
    fn new() -> Self {
        Self {
            vulkan12: vk::PhysicalDeviceVulkan12Features::default()
                .timeline_semaphore(true)
                .descriptor_indexing(true)
                .runtime_descriptor_array(true)
                .descriptor_binding_partially_bound(true)
                .descriptor_binding_sampled_image_update_after_bind(true)
                .descriptor_binding_storage_image_update_after_bind(true),
            vulkan13: vk::PhysicalDeviceVulkan13Features::default()
                .synchronization2(true)
                .dynamic_rendering(true),
        }
    }

    fn device_create_info(&'a mut self) -> vk::DeviceCreateInfo<'a> {
        vk::DeviceCreateInfo::default()
            .push_next(&mut self.vulkan12)
            .push_next(&mut self.vulkan13)
    }
}

/// Adapter letting `gpu-descriptor` manage pools on an `ash` device.
pub struct DescriptorAshDevice<'a>(pub &'a ash::Device);

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
    for DescriptorAshDevice<'_>
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> std::result::Result<vk::DescriptorPool, CreatePoolError> {
        let counts = [
            (vk::DescriptorType::SAMPLER, descriptor_count.sampler),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count.combined_image_sampler),
            (vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image),
            (vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image),
            (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, descriptor_count.uniform_texel_buffer),
            (vk::DescriptorType::STORAGE_TEXEL_BUFFER, descriptor_count.storage_texel_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer),
            (vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count.uniform_buffer_dynamic),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, descriptor_count.storage_buffer_dynamic),
            (vk::DescriptorType::INPUT_ATTACHMENT, descriptor_count.input_attachment),
        ];
        let pool_sizes: smallvec::SmallVec<[vk::DescriptorPoolSize; 11]> = counts
            .into_iter()
            .filter(|(_, count)| *count != 0)
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
            .collect();

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }
        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                log::error!("vkCreateDescriptorPool failed: {}", err);
                Err(CreatePoolError::OutOfHostMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.0.destroy_descriptor_pool(pool, None) }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> std::result::Result<(), DeviceAllocationError> {
        let set_layouts: smallvec::SmallVec<[_; 16]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };
        match result {
            Ok(allocated) => {
                sets.extend(allocated);
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(DeviceAllocationError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
            Err(err) => {
                log::error!("vkAllocateDescriptorSets failed: {}", err);
                Err(DeviceAllocationError::OutOfHostMemory)
            }
        }
    }

    unsafe fn dealloc_descriptor_sets(&self, pool: &mut vk::DescriptorPool, sets: impl Iterator<Item = vk::DescriptorSet>) {
        let sets: smallvec::SmallVec<[_; 16]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("vkFreeDescriptorSets failed: {}", err);
        }
    }
}
