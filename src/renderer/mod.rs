pub mod backend;
pub mod config;
pub mod contexts;
pub mod error;
pub mod types;

pub use config::{HeapCapacities, RenderConfig, BUFFER_COUNT};
pub use contexts::descriptor_ctx::{
    CpuDescriptorHandle, DescriptorHeap, DescriptorHeaps, DescriptorSlot, GpuDescriptorHandle,
};
pub use contexts::device_ctx::{CancellationToken, CommandRecorder, RenderDeviceContext};
pub use contexts::frame_ctx::{FrameOrchestrator, FrameParts, FrameState, FrameStats};
pub use contexts::resource_ctx::{Resource, ResourceFactory, ResourceId};
pub use contexts::target_ctx::{RenderTargetManager, SwapChain};
pub use error::{Error, ErrorKind, Result};
