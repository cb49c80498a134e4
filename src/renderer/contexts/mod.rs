pub mod descriptor_ctx;
pub mod device_ctx;
pub mod frame_ctx;
pub mod resource_ctx;
pub mod target_ctx;
