mod render_targets;
mod swapchain;

pub use render_targets::RenderTargetManager;
pub use swapchain::SwapChain;
