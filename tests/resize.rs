mod common;

use sable::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
use sable::renderer::types::{ResourceState, ScissorRect};
use sable::renderer::{ErrorKind, FrameOrchestrator, FrameState};

use common::{assert_no_validation_errors, orchestrator, orchestrator_with, run_frame};

fn assert_target_size(frames: &FrameOrchestrator<HeadlessBackend>, (width, height): (u32, u32)) {
    let targets = frames.render_targets();
    assert_eq!((frames.swap_chain().width(), frames.swap_chain().height()), (width, height));
    assert_eq!((targets.viewport().width, targets.viewport().height), (width as f32, height as f32));
    assert_eq!(*targets.scissor(), ScissorRect::from_size(width, height));
    assert_eq!(targets.depth_buffer().unwrap().dimensions(), Some((width, height)));
}

#[test]
fn resize_to_half_hd_rebinds_views_without_leaking() {
    // Three live resources at most: the old buffers must be gone before the
    // new ones are created.
    let mut frames = orchestrator_with(
        HeadlessDesc {
            max_live_resources: Some(3),
            ..Default::default()
        },
        1920,
        1080,
    );
    assert_eq!(frames.backend().live_resources(), 3);

    assert!(frames.resize(960, 540).unwrap());

    let targets = frames.render_targets();
    assert_eq!((targets.viewport().width, targets.viewport().height), (960.0, 540.0));
    assert_eq!(*targets.scissor(), ScissorRect::from_size(960, 540));
    assert_eq!(targets.depth_buffer().unwrap().dimensions(), Some((960, 540)));
    assert_eq!(frames.backend().live_resources(), 3);

    // Both render-target views point at the new back buffers.
    run_frame(&mut frames).unwrap();
    run_frame(&mut frames).unwrap();
    for i in 0..2 {
        let buffer = frames.swap_chain().back_buffer(i).unwrap();
        assert_eq!(buffer.dimensions(), Some((960, 540)));
        assert_eq!(buffer.state(), ResourceState::Present);
        let texels = buffer.raw().texels().unwrap();
        assert_eq!(texels.len(), 960 * 540);
        assert_eq!(texels[960 * 540 - 1], [0.0, 0.0, 0.0, 1.0]);
    }
    assert_eq!(frames.stats().resizes, 1);
    assert_no_validation_errors(&frames);
}

#[test]
fn resize_to_the_same_size_is_a_no_op() {
    let mut frames = orchestrator(320, 240);
    run_frame(&mut frames).unwrap();
    assert!(frames.resize(640, 480).unwrap());

    let generation = frames.swap_chain().generation();
    let ids: Vec<_> = (0..2)
        .map(|i| frames.swap_chain().back_buffer(i).unwrap().id())
        .collect();
    let depth = frames.render_targets().depth_buffer().unwrap().id();

    assert!(!frames.resize(640, 480).unwrap());

    assert_eq!(frames.swap_chain().generation(), generation);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(frames.swap_chain().back_buffer(i as u32).unwrap().id(), *id);
    }
    assert_eq!(frames.render_targets().depth_buffer().unwrap().id(), depth);
    assert_eq!(frames.stats().resizes, 1);
}

#[test]
fn minimised_window_defers_the_resize() {
    let mut frames = orchestrator(64, 64);
    assert!(!frames.resize(0, 0).unwrap());
    assert_eq!(frames.swap_chain().pending_size(), Some((0, 0)));
    assert_eq!((frames.swap_chain().width(), frames.swap_chain().height()), (64, 64));

    assert!(frames.resize(128, 32).unwrap());
    assert_eq!(frames.swap_chain().pending_size(), None);
    run_frame(&mut frames).unwrap();
    assert_no_validation_errors(&frames);
}

#[test]
fn restoring_the_original_size_after_a_minimise_resumes_drawing() {
    let mut frames = orchestrator(64, 64);
    run_frame(&mut frames).unwrap();
    assert!(!frames.resize(0, 0).unwrap());
    assert_eq!(frames.swap_chain().pending_size(), Some((0, 0)));

    assert!(!frames.resize(64, 64).unwrap());
    assert_eq!(frames.swap_chain().pending_size(), None);
    assert_eq!(frames.swap_chain().generation(), 0);
    run_frame(&mut frames).unwrap();
    assert_eq!(frames.stats().frames_submitted, 2);
    assert_no_validation_errors(&frames);
}

#[test]
fn targets_follow_the_extent_the_surface_allows() {
    let mut frames = orchestrator_with(
        HeadlessDesc {
            max_extent: Some((800, 600)),
            ..Default::default()
        },
        1920,
        1080,
    );
    assert_target_size(&frames, (800, 600));

    assert!(frames.resize(1000, 500).unwrap());
    assert_target_size(&frames, (800, 500));
    assert_eq!(frames.swap_chain().requested_size(), (1000, 500));
    assert!(!frames.resize(1000, 500).unwrap());

    run_frame(&mut frames).unwrap();
    let texels = frames.swap_chain().back_buffer(0).unwrap().raw().texels().unwrap();
    assert_eq!(texels.len(), 800 * 500);
    assert_no_validation_errors(&frames);
}

#[test]
fn resize_mid_frame_is_refused() {
    let mut frames = orchestrator(64, 64);
    frames.pre_draw().unwrap();
    let err = frames.resize(32, 32).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    assert_eq!(frames.frame_state(), FrameState::Recording);
    assert_eq!(frames.swap_chain().generation(), 0);

    frames.post_draw().unwrap();
    frames.command_execute().unwrap();
    assert!(frames.resize(32, 32).unwrap());
}

#[test]
fn outdated_chain_is_recreated_at_the_same_size() {
    let mut frames = orchestrator(48, 48);
    let before = frames.swap_chain().back_buffer(0).unwrap().id();
    frames.recreate_swap_chain().unwrap();
    assert_eq!(frames.swap_chain().generation(), 1);
    assert_ne!(frames.swap_chain().back_buffer(0).unwrap().id(), before);
    assert_eq!((frames.swap_chain().width(), frames.swap_chain().height()), (48, 48));
    run_frame(&mut frames).unwrap();
    assert_no_validation_errors(&frames);
}
