use std::sync::{Arc, Weak};

use ash::vk;
use gpu_descriptor::{DescriptorSetLayoutCreateFlags, DescriptorTotalCount};

use super::device::{DescriptorAshDevice, RawDevice};
use super::resource::{ResourceInner, VulkanResource};
use crate::renderer::error::{Error, Result};
use crate::renderer::types::{DescriptorHeapKind, Format};

/// A view written into a heap slot. Holds a weak reference so a stale view
/// is detected instead of touching destroyed handles.
#[derive(Clone)]
pub struct BoundView {
    pub target: Weak<ResourceInner>,
}

impl BoundView {
    pub fn resolve(&self, kind: DescriptorHeapKind, index: u32) -> Result<VulkanResource> {
        self.target.upgrade().map(VulkanResource).ok_or_else(|| {
            Error::contract(format!("{kind:?} descriptor {index} refers to a released resource"))
        })
    }
}

/// Shader-visible part of a resource heap: one descriptor set whose binding 0
/// is a partially bound array with one element per slot.
struct ShaderTable {
    ty: vk::DescriptorType,
    layout: vk::DescriptorSetLayout,
    set: Option<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,
}

/// Render-target and depth-stencil heaps are host-side tables of image views.
/// Shader-visible heaps additionally own a descriptor set the views are
/// written into.
pub struct VulkanDescriptorHeap {
    pub(super) kind: DescriptorHeapKind,
    pub(super) base: u64,
    views: Vec<Option<BoundView>>,
    shader: Option<ShaderTable>,
    device: Arc<RawDevice>,
}

impl VulkanDescriptorHeap {
    pub fn new(
        device: Arc<RawDevice>,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
        base: u64,
    ) -> Result<Self> {
        let shader = if shader_visible {
            Some(Self::create_shader_table(&device, kind, capacity)?)
        } else {
            None
        };
        log::debug!(
            "created {:?} descriptor heap with {} slots (shader visible: {})",
            kind,
            capacity,
            shader_visible
        );
        Ok(Self {
            kind,
            base,
            views: vec![None; capacity as usize],
            shader,
            device,
        })
    }

    fn create_shader_table(device: &RawDevice, kind: DescriptorHeapKind, capacity: u32) -> Result<ShaderTable> {
        let (ty, total) = match kind {
            DescriptorHeapKind::ShaderResource => (
                vk::DescriptorType::SAMPLED_IMAGE,
                DescriptorTotalCount {
                    sampled_image: capacity,
                    ..Default::default()
                },
            ),
            DescriptorHeapKind::UnorderedAccess => (
                vk::DescriptorType::STORAGE_IMAGE,
                DescriptorTotalCount {
                    storage_image: capacity,
                    ..Default::default()
                },
            ),
            other => {
                return Err(Error::contract(format!("{other:?} heaps cannot be shader visible")));
            }
        };

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(ty)
            .descriptor_count(capacity)
            .stage_flags(vk::ShaderStageFlags::ALL)];
        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut flags_info);
        let layout = unsafe { device.logical.create_descriptor_set_layout(&layout_info, None)? };

        let allocated = unsafe {
            device.descriptor_allocator()?.allocate(
                &DescriptorAshDevice(&device.logical),
                &layout,
                DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND,
                &total,
                1,
            )
        };
        let set = match allocated {
            Ok(mut sets) => sets.pop(),
            Err(err) => {
                unsafe { device.logical.destroy_descriptor_set_layout(layout, None) };
                return Err(err.into());
            }
        };

        Ok(ShaderTable { ty, layout, set })
    }

    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.shader.as_ref().and_then(|table| table.set.as_ref()).map(|set| *set.raw())
    }

    pub fn descriptor_set_layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.shader.as_ref().map(|table| table.layout)
    }

    pub fn write(
        &mut self,
        view_kind: DescriptorHeapKind,
        index: u32,
        resource: &VulkanResource,
        format: Format,
    ) -> Result<()> {
        if view_kind != self.kind {
            return Err(Error::contract(format!(
                "cannot write a {view_kind:?} view into a {:?} heap",
                self.kind
            )));
        }
        let capacity = self.views.len();
        let slot = self
            .views
            .get_mut(index as usize)
            .ok_or_else(|| Error::contract(format!("descriptor index {index} outside heap of {capacity}")))?;
        let image = resource.image()?;
        // Views reuse the image's own view, so they cannot reinterpret it.
        if format != image.format {
            return Err(Error::contract(format!(
                "{view_kind:?} view as {format:?} of '{}', which is {:?}",
                resource.name(),
                image.format
            )));
        }

        if let Some(table) = &self.shader {
            if let Some(set) = &table.set {
                let image_layout = match table.ty {
                    vk::DescriptorType::STORAGE_IMAGE => vk::ImageLayout::GENERAL,
                    _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                };
                let image_info = [vk::DescriptorImageInfo::default()
                    .image_view(image.view)
                    .image_layout(image_layout)];
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(*set.raw())
                    .dst_binding(0)
                    .dst_array_element(index)
                    .descriptor_type(table.ty)
                    .image_info(&image_info);
                unsafe { self.device.logical.update_descriptor_sets(&[write], &[]) };
            }
        }

        *slot = Some(BoundView {
            target: Arc::downgrade(&resource.0),
        });
        Ok(())
    }

    pub fn release(&mut self, index: u32) {
        if let Some(slot) = self.views.get_mut(index as usize) {
            *slot = None;
        }
    }

    pub fn resolve(&self, index: u32) -> Result<VulkanResource> {
        self.views
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::contract(format!("{:?} descriptor {index} holds no view", self.kind)))?
            .resolve(self.kind, index)
    }
}

impl Drop for VulkanDescriptorHeap {
    fn drop(&mut self) {
        let Some(table) = self.shader.take() else {
            return;
        };
        if let Some(set) = table.set {
            match self.device.descriptor_allocator() {
                Ok(mut allocator) => unsafe {
                    allocator.free(&DescriptorAshDevice(&self.device.logical), std::iter::once(set));
                },
                Err(err) => log::error!("leaking descriptor set: {}", err),
            }
        }
        unsafe { self.device.logical.destroy_descriptor_set_layout(table.layout, None) };
    }
}
