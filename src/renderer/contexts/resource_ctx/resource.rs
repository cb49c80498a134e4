use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::renderer::backend::Backend;
use crate::renderer::types::{Format, ResourceDesc, ResourceState};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Resource`]. Never reused, so a recreated resource always
/// has a new id.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A GPU resource together with the state it is tracked in.
///
/// The tracked state only changes through barriers recorded by a
/// [`CommandRecorder`](crate::renderer::contexts::device_ctx::CommandRecorder),
/// which needs `&mut` access. That keeps the tracked state equal to the state
/// the device will see once the recorded work executes.
pub struct Resource<B: Backend> {
    id: ResourceId,
    raw: B::Resource,
    desc: ResourceDesc,
    state: ResourceState,
}

impl<B: Backend> Resource<B> {
    pub(crate) fn new(raw: B::Resource, desc: ResourceDesc, state: ResourceState) -> Self {
        Self {
            id: ResourceId::next(),
            raw,
            desc,
            state,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn raw(&self) -> &B::Resource {
        &self.raw
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        self.desc.name()
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }

    /// Texture format, `None` for buffers.
    pub fn format(&self) -> Option<Format> {
        match &self.desc {
            ResourceDesc::Texture(desc) => Some(desc.format),
            ResourceDesc::Buffer(_) => None,
        }
    }

    /// Width and height of a texture, `None` for buffers.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.desc {
            ResourceDesc::Texture(desc) => Some((desc.width, desc.height)),
            ResourceDesc::Buffer(_) => None,
        }
    }
}

impl<B: Backend> fmt::Debug for Resource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("name", &self.desc.name())
            .field("state", &self.state)
            .field("raw", &self.raw)
            .finish()
    }
}
