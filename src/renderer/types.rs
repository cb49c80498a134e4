//! Plain data shared by the contexts and the backends.

use std::fmt;

/// Usage state of a GPU resource. Every state-dependent operation requires the
/// resource to be in a particular state, reached through a transition barrier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopyDest,
    CopySource,
    GenericRead,
    PixelShaderResource,
    UnorderedAccess,
}

impl ResourceState {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::DepthWrite | Self::DepthRead)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    D32Float,
    D24UnormS8Uint,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8Uint)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint)
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::R32Float
            | Self::D32Float
            | Self::D24UnormS8Uint => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags::bitflags! {
    /// How a texture may be used once created.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct TextureUsage: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const SHADER_RESOURCE = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
    }
}

/// Memory heap a committed buffer lives in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HeapKind {
    /// Device-local memory, not CPU visible.
    Default,
    /// CPU-writable memory the device reads from.
    Upload,
    /// Memory the device writes to and the CPU reads back.
    Readback,
}

/// Flavour of a descriptor heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorHeapKind {
    RenderTarget,
    DepthStencil,
    ShaderResource,
    UnorderedAccess,
}

impl DescriptorHeapKind {
    pub const ALL: [Self; 4] = [
        Self::RenderTarget,
        Self::DepthStencil,
        Self::ShaderResource,
        Self::UnorderedAccess,
    ];

    /// Render-target and depth-stencil heaps only ever live on the CPU side.
    pub fn supports_shader_visibility(self) -> bool {
        matches!(self, Self::ShaderResource | Self::UnorderedAccess)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: TextureUsage,
    pub clear_value: Option<ClearValue>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub size: u64,
    pub heap: HeapKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

impl ResourceDesc {
    pub fn name(&self) -> &str {
        match self {
            Self::Texture(desc) => &desc.name,
            Self::Buffer(desc) => &desc.name,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels; `right` and `bottom` are exclusive.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: u32,
    pub vsync: bool,
}
