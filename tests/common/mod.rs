#![allow(dead_code)]

use std::time::Duration;

use glam::Vec4;
use sable::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
use sable::renderer::{FrameOrchestrator, RenderConfig};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config() -> RenderConfig {
    RenderConfig {
        debug: true,
        clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        fence_timeout: Some(Duration::from_millis(100)),
        fence_poll_interval: Duration::from_millis(2),
        ..RenderConfig::default()
    }
}

pub fn orchestrator(width: u32, height: u32) -> FrameOrchestrator<HeadlessBackend> {
    orchestrator_with(HeadlessDesc::default(), width, height)
}

pub fn orchestrator_with(desc: HeadlessDesc, width: u32, height: u32) -> FrameOrchestrator<HeadlessBackend> {
    init_logger();
    FrameOrchestrator::initialize(desc, width, height, &config()).expect("headless orchestrator")
}

/// Runs one complete frame that only clears.
pub fn run_frame(frames: &mut FrameOrchestrator<HeadlessBackend>) -> sable::renderer::Result<()> {
    frames.pre_draw()?;
    frames.post_draw()?;
    frames.command_execute()
}

pub fn assert_no_validation_errors(frames: &FrameOrchestrator<HeadlessBackend>) {
    let messages = frames.backend().validation_messages();
    assert!(messages.is_empty(), "validation errors: {messages:#?}");
}
