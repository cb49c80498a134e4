//! Command submission and resource synchronization for a double-buffered
//! renderer.
//!
//! [`renderer::FrameOrchestrator`] is the entry point. It is generic over a
//! [`renderer::backend::Backend`]: Vulkan for real windows, or the headless
//! software device for tests and offscreen use.

pub mod renderer;
