mod common;

use bytemuck::{Pod, Zeroable};
use sable::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
use sable::renderer::types::{
    BufferDesc, DescriptorHeapKind, Format, HeapKind, ResourceState, TextureDesc, TextureUsage,
};
use sable::renderer::{DescriptorHeap, ErrorKind, RenderDeviceContext};

use common::{assert_no_validation_errors, config, init_logger, orchestrator};

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
struct Rgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

fn device() -> RenderDeviceContext<HeadlessBackend> {
    init_logger();
    RenderDeviceContext::initialize(HeadlessDesc::default(), &config()).unwrap()
}

fn buffer(name: &str, size: u64, heap: HeapKind) -> BufferDesc {
    BufferDesc {
        size,
        heap,
        name: name.into(),
    }
}

#[test]
fn every_heap_kind_stops_at_capacity() {
    let device = device();
    for kind in DescriptorHeapKind::ALL {
        let mut heap = DescriptorHeap::initialize(device.backend(), kind, 2, kind.supports_shader_visibility()).unwrap();
        let first = heap.next_cpu_handle().unwrap();
        let second = heap.next_cpu_handle().unwrap();
        assert!(second.ptr > first.ptr);

        let err = heap.next_cpu_handle().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation, "{kind:?}");
        assert_eq!(heap.allocate().unwrap_err().kind(), ErrorKind::ContractViolation);
        assert_eq!(heap.live_slots(), 2);
    }
}

#[test]
fn transition_chain_tracks_the_last_state() {
    let mut device = device();
    let mut texture = device
        .factory()
        .create_texture(
            &TextureDesc {
                width: 4,
                height: 4,
                format: Format::Rgba8Unorm,
                usage: TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
                clear_value: None,
                name: "chain".into(),
            },
            ResourceState::Common,
        )
        .unwrap();

    device
        .immediate_submit(|recorder| {
            assert!(recorder.transition(&mut texture, ResourceState::Common, ResourceState::CopyDest)?);
            assert!(recorder.transition(&mut texture, ResourceState::CopyDest, ResourceState::PixelShaderResource)?);
            let stale = recorder.transition(&mut texture, ResourceState::CopyDest, ResourceState::CopySource);
            assert_eq!(stale.unwrap_err().kind(), ErrorKind::ContractViolation);
            Ok(())
        })
        .unwrap();

    assert_eq!(texture.state(), ResourceState::PixelShaderResource);
    assert_eq!(texture.raw().device_state().unwrap(), ResourceState::PixelShaderResource);
    assert_eq!(device.barriers_recorded(), 2);
    assert!(device.backend().validation_messages().is_empty());
}

#[test]
fn back_to_back_submissions_advance_the_fence_once_each() {
    let mut device = device();
    device.submit_and_wait().unwrap();
    device.submit_and_wait().unwrap();
    assert_eq!(device.fence_value(), 2);
    assert_eq!(device.completed_value().unwrap(), 2);

    device.wait_idle().unwrap();
    assert_eq!(device.fence_value(), 2);
}

#[test]
fn texture_round_trips_through_upload_and_readback() {
    let mut frames = orchestrator(8, 8);
    let texels: Vec<Rgba8> = (0..16u8)
        .map(|i| Rgba8 {
            r: i * 16,
            g: 255 - i,
            b: i,
            a: 255,
        })
        .collect();
    let bytes: &[u8] = bytemuck::cast_slice(&texels);

    let factory = frames.factory();
    let upload = factory
        .create_buffer(&buffer("upload", bytes.len() as u64, HeapKind::Upload), ResourceState::GenericRead)
        .unwrap();
    factory.write_buffer(&upload, 0, bytes).unwrap();
    let readback = factory
        .create_buffer(&buffer("readback", bytes.len() as u64, HeapKind::Readback), ResourceState::CopyDest)
        .unwrap();
    let mut texture = factory
        .create_texture(
            &TextureDesc {
                width: 4,
                height: 4,
                format: Format::Rgba8Unorm,
                usage: TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
                clear_value: None,
                name: "uploaded".into(),
            },
            ResourceState::CopyDest,
        )
        .unwrap();

    frames
        .immediate_submit(|recorder| {
            recorder.copy_buffer_to_texture(&texture, &upload)?;
            recorder.transition(&mut texture, ResourceState::CopyDest, ResourceState::CopySource)?;
            recorder.copy_texture_to_buffer(&readback, &texture)?;
            recorder.transition(&mut texture, ResourceState::CopySource, ResourceState::PixelShaderResource)?;
            Ok(())
        })
        .unwrap();

    let mut out = vec![0u8; bytes.len()];
    frames.factory().read_buffer(&readback, 0, &mut out).unwrap();
    let read: &[Rgba8] = bytemuck::cast_slice(&out);
    assert_eq!(read, texels.as_slice());

    let (heaps, backend) = frames.heaps_with_backend();
    let slot = heaps.shader_resource.allocate().unwrap();
    heaps.shader_resource.create_shader_resource_view(backend, slot, &texture).unwrap();
    assert!(heaps.shader_resource.gpu_handle(slot.index).is_ok());
    heaps.shader_resource.free(backend, slot).unwrap();
    assert_eq!(heaps.shader_resource.allocate().unwrap(), slot);

    assert_no_validation_errors(&frames);
}

#[test]
fn copies_check_tracked_states_before_recording() {
    let mut device = device();
    let factory = device.factory();
    let src = factory.create_buffer(&buffer("src", 64, HeapKind::Default), ResourceState::Common).unwrap();
    let dst = factory.create_buffer(&buffer("dst", 64, HeapKind::Default), ResourceState::CopyDest).unwrap();

    let mut recorder = device.recorder().unwrap();
    let err = recorder.copy_buffer(&dst, 0, &src, 0, 64).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    let err = recorder.copy_buffer(&dst, 32, &src, 0, 64).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    let err = recorder.copy_buffer(&dst, 1, &src, 0, u64::MAX).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    let err = recorder.copy_buffer(&dst, 0, &src, u64::MAX, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);

    device.submit_and_wait().unwrap();
    assert!(device.backend().validation_messages().is_empty());
}

#[test]
fn views_must_match_their_heap() {
    let device = device();
    let backend = device.backend();
    let depth = device
        .factory()
        .create_depth_stencil_texture(4, 4, Format::D32Float, ResourceState::DepthWrite)
        .unwrap();

    let mut rtv = DescriptorHeap::initialize(backend, DescriptorHeapKind::RenderTarget, 1, false).unwrap();
    let mut dsv = DescriptorHeap::initialize(backend, DescriptorHeapKind::DepthStencil, 1, false).unwrap();
    let rtv_slot = rtv.allocate().unwrap();
    let dsv_slot = dsv.allocate().unwrap();

    let err = rtv.create_render_target_view(backend, rtv_slot, &depth).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    let err = dsv.create_depth_stencil_view(backend, rtv_slot, &depth).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    dsv.create_depth_stencil_view(backend, dsv_slot, &depth).unwrap();
}
