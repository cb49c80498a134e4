use std::sync::Arc;
use std::time::Instant;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use glam::Vec4;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use sable::renderer::backend::vulkan::{VulkanBackend, VulkanDesc};
use sable::renderer::{ErrorKind, FrameOrchestrator, RenderConfig};

pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<FrameOrchestrator<VulkanBackend>>,
    event_loop: Option<EventLoop<()>>,
    config: RenderConfig,

    // State
    start_time: Instant,
    request_redraws: bool,
    close_requested: bool,
    error: Option<color_eyre::Report>,
}

impl App {
    pub fn new() -> Result<Self> {
        let event_loop = EventLoop::new()?;

        Ok(Self {
            window: None,
            renderer: None,
            event_loop: Some(event_loop),
            config: RenderConfig::default(),

            start_time: Instant::now(),
            request_redraws: false,
            close_requested: false,
            error: None,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| eyre!("event loop is already running"))?;
        event_loop.run_app(self)?;

        // Tear the renderer down while the window still exists.
        self.renderer = None;
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn init_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_none() {
            let attributes = Window::default_attributes().with_title("sable");
            self.window = Some(Arc::new(event_loop.create_window(attributes)?));
        }
        let window = self.window.clone().ok_or_else(|| eyre!("window was not created"))?;

        if self.renderer.is_none() {
            let PhysicalSize { width, height } = window.inner_size();
            let renderer = FrameOrchestrator::initialize(
                VulkanDesc { window },
                width.max(1),
                height.max(1),
                &self.config,
            )?;
            self.renderer = Some(renderer);
        }
        Ok(())
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        if let Some(renderer) = self.renderer.as_mut() {
            if renderer.resize(size.width, size.height)? {
                log::info!("resized to {}x{}", size.width, size.height);
            }
        }
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        if renderer.swap_chain().pending_size().is_some() {
            return Ok(());
        }

        let t = self.start_time.elapsed().as_secs_f32();
        renderer.set_clear_color(Vec4::new(0.5 + 0.5 * t.sin(), 0.2, 0.5 + 0.5 * (t * 0.7).cos(), 1.0));

        match render_frame(renderer) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::SurfaceOutdated => {
                log::debug!("surface outdated, recreating the swap chain and skipping the frame");
                renderer.wait_idle()?;
                renderer.recreate_swap_chain()?;
                Ok(())
            }
            Err(err) if !err.is_fatal() => {
                log::warn!("frame dropped: {}", err);
                renderer.wait_idle()?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: color_eyre::Report) {
        log::error!("{err:#}");
        self.error = Some(err);
        event_loop.exit();
    }
}

/// Clears the back buffer and presents it. Drawing would go between
/// `pre_draw` and `post_draw`.
fn render_frame(renderer: &mut FrameOrchestrator<VulkanBackend>) -> sable::renderer::Result<()> {
    renderer.pre_draw()?;
    renderer.post_draw()?;
    renderer.command_execute()
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, cause: StartCause) {
        if matches!(cause, StartCause::Init) {
            self.start_time = Instant::now();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.init_renderer(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                Ok(())
            }
            WindowEvent::Resized(new_size) => self.resize(new_size),
            WindowEvent::ScaleFactorChanged { .. } => match self.window.as_ref() {
                Some(window) => {
                    let size = window.inner_size();
                    self.resize(size)
                }
                None => Ok(()),
            },
            WindowEvent::RedrawRequested => self.draw(),
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                match key.as_ref() {
                    Key::Character("r") => {
                        self.request_redraws = !self.request_redraws;
                        log::info!("request_redraws: {}", self.request_redraws);
                    }
                    Key::Named(NamedKey::Escape) => {
                        self.close_requested = true;
                    }
                    _ => {}
                }
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(err) = result {
            self.fail(event_loop, err);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.request_redraws {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }

        if self.close_requested {
            event_loop.exit();
        }
    }
}
