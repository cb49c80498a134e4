mod common;

use std::io::Cursor;

use glam::Vec4;
use sable::renderer::backend::headless::HeadlessDesc;
use sable::renderer::types::ResourceState;
use sable::renderer::{CancellationToken, ErrorKind, FrameState};

use common::{assert_no_validation_errors, orchestrator, orchestrator_with, run_frame};

#[test]
fn cleared_frame_reaches_the_back_buffer() {
    let mut frames = orchestrator(64, 32);
    let target = frames.swap_chain().back_buffer(0).unwrap().raw().clone();

    run_frame(&mut frames).unwrap();

    assert_eq!(frames.frame_state(), FrameState::Idle);
    assert_eq!(frames.device().completed_value().unwrap(), frames.device().fence_value());
    assert_eq!(frames.device().fence_value(), 1);
    assert!(target.texels().unwrap().iter().all(|t| *t == [0.0, 0.0, 0.0, 1.0]));
    assert_eq!(target.device_state().unwrap(), ResourceState::Present);
    assert_eq!(frames.swap_chain().raw().presented_frames(), 1);
    assert_no_validation_errors(&frames);
}

#[test]
fn frames_alternate_between_back_buffers() {
    let mut frames = orchestrator(16, 16);
    let colors = [Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::new(0.0, 0.0, 1.0, 1.0)];
    for color in colors {
        frames.set_clear_color(color);
        run_frame(&mut frames).unwrap();
    }

    for (i, color) in colors.iter().enumerate() {
        let buffer = frames.swap_chain().back_buffer(i as u32).unwrap();
        let texels = buffer.raw().texels().unwrap();
        assert_eq!(texels[0], color.to_array());
    }
    let stats = frames.stats();
    assert_eq!(stats.frames_submitted, 2);
    // Back buffer in and out, plus the depth buffer's first transition is skipped.
    assert_eq!(stats.barriers_recorded, 4);
    assert_no_validation_errors(&frames);
}

#[test]
fn captured_back_buffer_encodes_as_png() {
    let mut frames = orchestrator(8, 4);
    frames.set_clear_color(Vec4::new(1.0, 0.5, 0.0, 1.0));
    run_frame(&mut frames).unwrap();

    let image = frames.swap_chain().back_buffer(0).unwrap().raw().capture().unwrap();
    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, image::ImageFormat::Png).unwrap();

    let decoded = image::load_from_memory(png.get_ref()).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (8, 4));
    assert_eq!(decoded.get_pixel(3, 2).0, [255, 128, 0, 255]);
}

#[test]
fn out_of_order_calls_are_rejected() {
    let mut frames = orchestrator(16, 16);

    let contract = |result: sable::renderer::Result<()>| {
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::ContractViolation));
    };
    contract(frames.post_draw());
    contract(frames.command_execute());
    assert_eq!(frames.recorder().err().map(|e| e.kind()), Some(ErrorKind::ContractViolation));

    frames.pre_draw().unwrap();
    contract(frames.pre_draw());
    contract(frames.command_execute());
    assert_eq!(frames.resize(32, 32).err().map(|e| e.kind()), Some(ErrorKind::ContractViolation));
    contract(frames.immediate_submit(|_| Ok(())));
    assert_eq!(frames.frame_state(), FrameState::Recording);

    frames.post_draw().unwrap();
    contract(frames.post_draw());
    frames.command_execute().unwrap();
    assert_eq!(frames.frame_state(), FrameState::Idle);
    assert_no_validation_errors(&frames);
}

#[test]
fn aborted_pre_draw_leaves_the_back_buffer_presentable() {
    let mut frames = orchestrator(16, 16);
    let slot = frames.render_targets().rtv_slot(0).unwrap();
    {
        let (heaps, backend) = frames.heaps_with_backend();
        heaps.render_target.free(backend, slot).unwrap();
    }

    // Binding fails on the freed view after the back buffer was transitioned.
    let err = frames.pre_draw().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    assert_eq!(frames.frame_state(), FrameState::Idle);
    let buffer = frames.swap_chain().back_buffer(0).unwrap();
    assert_eq!(buffer.state(), ResourceState::Present);
    assert_eq!(buffer.raw().device_state().unwrap(), ResourceState::Present);
    assert_eq!(frames.device().completed_value().unwrap(), frames.device().fence_value());

    {
        let (heaps, _) = frames.heaps_with_backend();
        assert_eq!(heaps.render_target.allocate().unwrap(), slot);
    }
    assert!(frames.resize(32, 32).unwrap());
    run_frame(&mut frames).unwrap();
    run_frame(&mut frames).unwrap();
    assert_eq!(frames.stats().frames_submitted, 2);
    assert_no_validation_errors(&frames);
}

#[test]
fn timed_out_frame_is_finished_by_wait_idle() {
    let mut frames = orchestrator(16, 16);
    frames.pre_draw().unwrap();
    frames.post_draw().unwrap();

    frames.backend().pause_queue();
    let err = frames.command_execute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyncTimeout);
    assert!(!err.is_fatal());
    assert_eq!(frames.frame_state(), FrameState::Submit);
    assert_eq!(frames.pre_draw().unwrap_err().kind(), ErrorKind::ContractViolation);

    frames.backend().resume_queue();
    frames.wait_idle().unwrap();
    assert_eq!(frames.frame_state(), FrameState::Idle);
    assert_eq!(frames.stats().frames_submitted, 1);
    assert_eq!(frames.swap_chain().raw().presented_frames(), 1);

    run_frame(&mut frames).unwrap();
    assert_no_validation_errors(&frames);
}

#[test]
fn cancelled_wait_leaves_the_frame_in_submission() {
    let mut frames = orchestrator(16, 16);
    let token = CancellationToken::new();
    frames.set_cancellation_token(Some(token.clone()));

    frames.pre_draw().unwrap();
    frames.post_draw().unwrap();
    token.cancel();
    let err = frames.command_execute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(frames.frame_state(), FrameState::Submit);

    token.reset();
    frames.wait_idle().unwrap();
    run_frame(&mut frames).unwrap();
    assert_eq!(frames.stats().frames_submitted, 2);
}

#[test]
fn device_failure_is_fatal() {
    // Two back buffers and a depth buffer fit; a fourth resource does not.
    let mut frames = orchestrator_with(
        HeadlessDesc {
            max_live_resources: Some(3),
            ..Default::default()
        },
        16,
        16,
    );
    let desc = sable::renderer::types::BufferDesc {
        size: 16,
        heap: sable::renderer::types::HeapKind::Default,
        name: "extra".into(),
    };
    let err = frames.factory().create_buffer(&desc, ResourceState::Common).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceFailure);
    assert!(err.is_fatal());

    run_frame(&mut frames).unwrap();
}
