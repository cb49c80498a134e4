use crate::renderer::backend::Backend;
use crate::renderer::contexts::resource_ctx::Resource;
use crate::renderer::error::{ensure_contract, Error, Result};
use crate::renderer::types::{
    ClearValue, Format, ResourceDesc, ResourceState, SwapChainDesc, TextureDesc, TextureUsage,
};

/// The presentation chain and the back buffers it owns.
pub struct SwapChain<B: Backend> {
    buffers: Vec<Resource<B>>,
    raw: B::SwapChain,
    desc: SwapChainDesc,
    requested_size: (u32, u32),
    generation: u64,
    pending_size: Option<(u32, u32)>,
}

impl<B: Backend> SwapChain<B> {
    pub fn initialize(backend: &B, desc: &SwapChainDesc) -> Result<Self> {
        ensure_contract!(
            desc.width > 0 && desc.height > 0,
            "swap chain needs a non-zero size, got {}x{}",
            desc.width,
            desc.height
        );
        ensure_contract!(desc.buffer_count >= 2, "swap chain needs at least two buffers");

        let raw = backend.create_swap_chain(desc)?;
        let (width, height) = backend.swap_chain_extent(&raw);
        let mut swap_chain = Self {
            buffers: Vec::new(),
            raw,
            desc: SwapChainDesc { width, height, ..*desc },
            requested_size: (desc.width, desc.height),
            generation: 0,
            pending_size: None,
        };
        swap_chain.wrap_buffers(backend)?;
        log::info!(
            "swap chain {}x{} {:?} with {} back buffers",
            width,
            height,
            desc.format,
            desc.buffer_count
        );
        Ok(swap_chain)
    }

    pub fn raw(&self) -> &B::SwapChain {
        &self.raw
    }

    /// Width of the back buffers, which may differ from the requested width.
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> Format {
        self.desc.format
    }

    pub fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    /// The last size asked for through [`initialize`](Self::initialize) or
    /// [`resize`](Self::resize).
    pub fn requested_size(&self) -> (u32, u32) {
        self.requested_size
    }

    /// Incremented every time the back buffers are recreated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A zero-sized resize that is waiting for a usable size.
    pub fn pending_size(&self) -> Option<(u32, u32)> {
        self.pending_size
    }

    /// Index of the back buffer the next frame renders into.
    pub fn current_back_buffer_index(&mut self, backend: &B) -> Result<u32> {
        let index = backend.current_back_buffer_index(&mut self.raw)?;
        ensure_contract!(
            index < self.desc.buffer_count,
            "backend reported back buffer {} of {}",
            index,
            self.desc.buffer_count
        );
        Ok(index)
    }

    pub fn back_buffer(&self, index: u32) -> Result<&Resource<B>> {
        self.buffers
            .get(index as usize)
            .ok_or_else(|| Error::contract(format!("no back buffer {index} in a chain of {}", self.buffers.len())))
    }

    pub fn back_buffer_mut(&mut self, index: u32) -> Result<&mut Resource<B>> {
        let count = self.buffers.len();
        self.buffers
            .get_mut(index as usize)
            .ok_or_else(|| Error::contract(format!("no back buffer {index} in a chain of {count}")))
    }

    /// Hands the current back buffer to the display.
    pub fn present(&mut self, backend: &B) -> Result<()> {
        let index = self.current_back_buffer_index(backend)?;
        let buffer = self.back_buffer(index)?;
        ensure_contract!(
            buffer.state() == ResourceState::Present,
            "presenting back buffer {} tracked in {}",
            index,
            buffer.state()
        );
        backend.present(&mut self.raw)
    }

    /// Resizes the back buffers. Returns whether they were recreated.
    ///
    /// The caller must have flushed the queue and released every view of the
    /// old buffers. A zero-sized request is remembered and skipped.
    pub fn resize(&mut self, backend: &B, width: u32, height: u32) -> Result<bool> {
        if width == 0 || height == 0 {
            log::debug!("deferring swap chain resize to {}x{}", width, height);
            self.pending_size = Some((width, height));
            return Ok(false);
        }
        self.pending_size = None;
        if (width, height) == self.requested_size {
            return Ok(false);
        }
        self.rebuild(backend, width, height)?;
        Ok(true)
    }

    /// Recreates the back buffers at the current size, for a chain the
    /// platform reported as outdated. Same preconditions as [`resize`](Self::resize).
    pub fn recreate(&mut self, backend: &B) -> Result<()> {
        let (width, height) = self.requested_size;
        self.rebuild(backend, width, height)
    }

    fn rebuild(&mut self, backend: &B, width: u32, height: u32) -> Result<()> {
        self.buffers.clear();
        let resized = backend.resize_swap_chain(&mut self.raw, width, height);
        if resized.is_ok() {
            self.requested_size = (width, height);
        }
        (self.desc.width, self.desc.height) = backend.swap_chain_extent(&self.raw);
        // The wrappers are gone either way; rewrap whatever the chain now has.
        self.generation += 1;
        let rewrapped = self.wrap_buffers(backend);
        resized?;
        rewrapped?;

        log::info!(
            "swap chain recreated at {}x{} (requested {}x{})",
            self.desc.width,
            self.desc.height,
            width,
            height
        );
        Ok(())
    }

    fn wrap_buffers(&mut self, backend: &B) -> Result<()> {
        let raw_buffers = backend.swap_chain_buffers(&self.raw)?;
        ensure_contract!(
            raw_buffers.len() == self.desc.buffer_count as usize,
            "swap chain returned {} buffers, expected {}",
            raw_buffers.len(),
            self.desc.buffer_count
        );
        self.buffers = raw_buffers
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let desc = TextureDesc {
                    width: self.desc.width,
                    height: self.desc.height,
                    format: self.desc.format,
                    usage: TextureUsage::RENDER_TARGET,
                    clear_value: Some(ClearValue::Color([0.0; 4])),
                    name: format!("back buffer {i}"),
                };
                Resource::new(raw, ResourceDesc::Texture(desc), ResourceState::Present)
            })
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::headless::{HeadlessBackend, HeadlessDesc};
    use crate::renderer::config::BUFFER_COUNT;
    use crate::renderer::error::ErrorKind;

    fn desc() -> SwapChainDesc {
        SwapChainDesc {
            width: 64,
            height: 32,
            format: Format::Bgra8UnormSrgb,
            buffer_count: BUFFER_COUNT,
            vsync: true,
        }
    }

    #[test]
    fn back_buffers_start_presentable() {
        let backend = HeadlessBackend::create(HeadlessDesc::default(), false).unwrap();
        let mut chain = SwapChain::initialize(&backend, &desc()).unwrap();
        assert_eq!(chain.current_back_buffer_index(&backend).unwrap(), 0);
        for i in 0..BUFFER_COUNT {
            assert_eq!(chain.back_buffer(i).unwrap().state(), ResourceState::Present);
        }
        assert_eq!(chain.back_buffer(2).unwrap_err().kind(), ErrorKind::ContractViolation);
    }

    #[test]
    fn present_rotates_the_index() {
        let backend = HeadlessBackend::create(HeadlessDesc::default(), false).unwrap();
        let mut chain = SwapChain::initialize(&backend, &desc()).unwrap();
        chain.present(&backend).unwrap();
        assert_eq!(chain.current_back_buffer_index(&backend).unwrap(), 1);
        chain.present(&backend).unwrap();
        assert_eq!(chain.current_back_buffer_index(&backend).unwrap(), 0);
    }

    #[test]
    fn same_size_resize_keeps_the_buffers() {
        let backend = HeadlessBackend::create(HeadlessDesc::default(), false).unwrap();
        let mut chain = SwapChain::initialize(&backend, &desc()).unwrap();
        let id = chain.back_buffer(0).unwrap().id();

        assert!(!chain.resize(&backend, 64, 32).unwrap());
        assert_eq!(chain.generation(), 0);
        assert_eq!(chain.back_buffer(0).unwrap().id(), id);

        assert!(chain.resize(&backend, 96, 48).unwrap());
        assert_eq!(chain.generation(), 1);
        assert_ne!(chain.back_buffer(0).unwrap().id(), id);
        assert_eq!(chain.back_buffer(1).unwrap().dimensions(), Some((96, 48)));
        assert_eq!(backend.live_resources(), BUFFER_COUNT as usize);
    }

    #[test]
    fn back_buffers_follow_the_clamped_extent() {
        let backend = HeadlessBackend::create(
            HeadlessDesc {
                max_extent: Some((48, 48)),
                ..Default::default()
            },
            false,
        )
        .unwrap();
        let mut chain = SwapChain::initialize(&backend, &desc()).unwrap();
        assert_eq!((chain.width(), chain.height()), (48, 32));
        assert_eq!(chain.requested_size(), (64, 32));
        assert_eq!(chain.back_buffer(0).unwrap().dimensions(), Some((48, 32)));

        assert!(!chain.resize(&backend, 64, 32).unwrap());
        assert!(chain.resize(&backend, 100, 10).unwrap());
        assert_eq!((chain.width(), chain.height()), (48, 10));
        assert_eq!(chain.back_buffer(1).unwrap().dimensions(), Some((48, 10)));
    }

    #[test]
    fn restoring_the_previous_size_clears_the_deferred_resize() {
        let backend = HeadlessBackend::create(HeadlessDesc::default(), false).unwrap();
        let mut chain = SwapChain::initialize(&backend, &desc()).unwrap();
        assert!(!chain.resize(&backend, 0, 0).unwrap());
        assert!(!chain.resize(&backend, 64, 32).unwrap());
        assert_eq!(chain.pending_size(), None);
        assert_eq!(chain.generation(), 0);
    }

    #[test]
    fn zero_size_is_deferred() {
        let backend = HeadlessBackend::create(HeadlessDesc::default(), false).unwrap();
        let mut chain = SwapChain::initialize(&backend, &desc()).unwrap();
        assert!(!chain.resize(&backend, 0, 32).unwrap());
        assert_eq!(chain.pending_size(), Some((0, 32)));
        assert_eq!((chain.width(), chain.height()), (64, 32));
    }
}
