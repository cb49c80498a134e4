mod resource;
pub mod state;

pub use resource::{Resource, ResourceId};

use crate::renderer::backend::Backend;
use crate::renderer::error::{ensure_contract, Error, Result};
use crate::renderer::types::{
    BufferDesc, ClearValue, Format, HeapKind, ResourceDesc, ResourceState, TextureDesc, TextureUsage,
};

/// Creates committed resources, each in its own allocation.
pub struct ResourceFactory<'a, B: Backend> {
    backend: &'a B,
}

impl<'a, B: Backend> ResourceFactory<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Creates a depth texture usable as a depth-stencil target, cleared to
    /// depth 1.0 and stencil 0 by default.
    pub fn create_depth_stencil_texture(
        &self,
        width: u32,
        height: u32,
        format: Format,
        initial_state: ResourceState,
    ) -> Result<Resource<B>> {
        ensure_contract!(format.is_depth(), "{:?} is not a depth format", format);
        self.create_texture(&TextureDesc {
            width,
            height,
            format,
            usage: TextureUsage::DEPTH_STENCIL,
            clear_value: Some(ClearValue::DepthStencil { depth: 1.0, stencil: 0 }),
            name: "depth buffer".into(),
        }, initial_state)
    }

    pub fn create_texture(&self, desc: &TextureDesc, initial_state: ResourceState) -> Result<Resource<B>> {
        ensure_contract!(
            desc.width > 0 && desc.height > 0,
            "texture '{}' has zero extent {}x{}",
            desc.name,
            desc.width,
            desc.height
        );
        let depth_usage = desc.usage.contains(TextureUsage::DEPTH_STENCIL);
        ensure_contract!(
            desc.format.is_depth() == depth_usage,
            "texture '{}' combines format {:?} with usage {:?}",
            desc.name,
            desc.format,
            desc.usage
        );
        ensure_contract!(
            !desc.usage.contains(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_STENCIL),
            "texture '{}' cannot be both a render target and a depth target",
            desc.name
        );
        ensure_contract!(
            !initial_state.is_depth() || depth_usage,
            "texture '{}' cannot start in {} without depth usage",
            desc.name,
            initial_state
        );

        let raw = self.backend.create_texture(desc, initial_state)?;
        Ok(Resource::new(raw, ResourceDesc::Texture(desc.clone()), initial_state))
    }

    pub fn create_buffer(&self, desc: &BufferDesc, initial_state: ResourceState) -> Result<Resource<B>> {
        ensure_contract!(desc.size > 0, "buffer '{}' has zero size", desc.name);
        match desc.heap {
            HeapKind::Upload => ensure_contract!(
                initial_state == ResourceState::GenericRead,
                "upload buffer '{}' must start in GenericRead, not {}",
                desc.name,
                initial_state
            ),
            HeapKind::Readback => ensure_contract!(
                initial_state == ResourceState::CopyDest,
                "readback buffer '{}' must start in CopyDest, not {}",
                desc.name,
                initial_state
            ),
            HeapKind::Default => ensure_contract!(
                !initial_state.is_depth(),
                "buffer '{}' cannot start in {}",
                desc.name,
                initial_state
            ),
        }

        let raw = self.backend.create_buffer(desc, initial_state)?;
        log::trace!("created {:?} buffer '{}' ({} bytes)", desc.heap, desc.name, desc.size);
        Ok(Resource::new(raw, ResourceDesc::Buffer(desc.clone()), initial_state))
    }

    /// Writes `data` into an upload buffer.
    pub fn write_buffer(&self, resource: &Resource<B>, offset: u64, data: &[u8]) -> Result<()> {
        self.check_mappable(resource, HeapKind::Upload, offset, data.len())?;
        self.backend.write_buffer(resource.raw(), offset, data)
    }

    /// Reads from a readback buffer. Only meaningful once the copy into it
    /// has been submitted and waited for.
    pub fn read_buffer(&self, resource: &Resource<B>, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_mappable(resource, HeapKind::Readback, offset, out.len())?;
        self.backend.read_buffer(resource.raw(), offset, out)
    }

    fn check_mappable(&self, resource: &Resource<B>, heap: HeapKind, offset: u64, len: usize) -> Result<()> {
        let ResourceDesc::Buffer(desc) = resource.desc() else {
            return Err(Error::contract(format!(
                "'{}' is a texture and cannot be mapped",
                resource.name()
            )));
        };
        ensure_contract!(
            desc.heap == heap,
            "'{}' lives in the {:?} heap, expected {:?}",
            desc.name,
            desc.heap,
            heap
        );
        ensure_contract!(
            range_fits(offset, len as u64, desc.size),
            "access of {} bytes at {} exceeds '{}' ({} bytes)",
            len,
            offset,
            desc.name,
            desc.size
        );
        Ok(())
    }
}

/// Whether `len` bytes at `offset` lie inside a buffer of `size` bytes.
pub(crate) fn range_fits(offset: u64, len: u64, size: u64) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
    use crate::renderer::error::ErrorKind;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::create(HeadlessDesc::default(), false).unwrap()
    }

    fn buffer(size: u64, heap: HeapKind) -> BufferDesc {
        BufferDesc {
            size,
            heap,
            name: "buffer".into(),
        }
    }

    #[test]
    fn depth_texture_starts_in_requested_state() {
        let backend = backend();
        let factory = ResourceFactory::new(&backend);
        let depth = factory
            .create_depth_stencil_texture(960, 540, Format::D32Float, ResourceState::DepthWrite)
            .unwrap();
        assert_eq!(depth.state(), ResourceState::DepthWrite);
        assert_eq!(depth.dimensions(), Some((960, 540)));
        assert_eq!(depth.format(), Some(Format::D32Float));

        let color = factory.create_depth_stencil_texture(4, 4, Format::Rgba8Unorm, ResourceState::DepthWrite);
        assert_eq!(color.err().map(|e| e.kind()), Some(ErrorKind::ContractViolation));
    }

    #[test]
    fn invalid_descriptions_are_contract_violations() {
        let backend = backend();
        let factory = ResourceFactory::new(&backend);
        let cases = [
            factory.create_buffer(&buffer(0, HeapKind::Default), ResourceState::Common),
            factory.create_buffer(&buffer(16, HeapKind::Upload), ResourceState::Common),
            factory.create_buffer(&buffer(16, HeapKind::Readback), ResourceState::GenericRead),
        ];
        for case in cases {
            assert_eq!(case.err().map(|e| e.kind()), Some(ErrorKind::ContractViolation));
        }

        let mismatched = TextureDesc {
            width: 4,
            height: 4,
            format: Format::D32Float,
            usage: TextureUsage::SHADER_RESOURCE,
            clear_value: None,
            name: "depth without usage".into(),
        };
        let err = factory.create_texture(&mismatched, ResourceState::Common).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn upload_buffers_are_writable_only() {
        let backend = backend();
        let factory = ResourceFactory::new(&backend);
        let upload = factory.create_buffer(&buffer(8, HeapKind::Upload), ResourceState::GenericRead).unwrap();
        factory.write_buffer(&upload, 4, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        let err = factory.read_buffer(&upload, 0, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        let err = factory.write_buffer(&upload, 6, &[0; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
    }

    #[test]
    fn mapping_at_the_end_of_the_address_space_is_rejected() {
        let backend = backend();
        let factory = ResourceFactory::new(&backend);
        let upload = factory.create_buffer(&buffer(8, HeapKind::Upload), ResourceState::GenericRead).unwrap();
        let err = factory.write_buffer(&upload, u64::MAX, &[1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);

        let readback = factory.create_buffer(&buffer(8, HeapKind::Readback), ResourceState::CopyDest).unwrap();
        let mut out = [0u8; 4];
        let err = factory.read_buffer(&readback, u64::MAX - 2, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
    }

    #[test]
    fn range_fits_without_overflowing() {
        assert!(range_fits(4, 4, 8));
        assert!(!range_fits(5, 4, 8));
        assert!(!range_fits(1, u64::MAX, u64::MAX));
        assert!(!range_fits(u64::MAX, 1, 8));
    }

    #[test]
    fn every_resource_gets_a_new_id() {
        let backend = backend();
        let factory = ResourceFactory::new(&backend);
        let a = factory.create_buffer(&buffer(4, HeapKind::Default), ResourceState::Common).unwrap();
        let b = factory.create_buffer(&buffer(4, HeapKind::Default), ResourceState::Common).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(backend.live_resources(), 2);
        drop((a, b));
        assert_eq!(backend.live_resources(), 0);
    }
}
