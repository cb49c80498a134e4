use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::renderer::error::{Error, Result};
use crate::renderer::types::ResourceState;

use super::memory::{byte_range, decode_texels, encode_texels, Allocation, AllocationKind, Storage};

pub(super) enum Command {
    Barrier {
        target: Arc<Allocation>,
        before: ResourceState,
        after: ResourceState,
    },
    BindTargets {
        color: Arc<Allocation>,
        depth: Option<Arc<Allocation>>,
    },
    ClearColor {
        target: Arc<Allocation>,
        color: [f32; 4],
    },
    ClearDepth {
        target: Arc<Allocation>,
        depth: f32,
        stencil: u8,
    },
    CopyBuffer {
        dst: Arc<Allocation>,
        dst_offset: u64,
        src: Arc<Allocation>,
        src_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        dst: Arc<Allocation>,
        src: Arc<Allocation>,
    },
    CopyTextureToBuffer {
        dst: Arc<Allocation>,
        src: Arc<Allocation>,
    },
}

#[derive(Debug)]
pub struct HeadlessCommandList {
    pub(super) commands: Vec<Command>,
    pub(super) open: bool,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Barrier { target, before, after } => {
                write!(f, "Barrier({} {before} -> {after})", target.name())
            }
            Command::BindTargets { color, .. } => write!(f, "BindTargets({})", color.name()),
            Command::ClearColor { target, .. } => write!(f, "ClearColor({})", target.name()),
            Command::ClearDepth { target, .. } => write!(f, "ClearDepth({})", target.name()),
            Command::CopyBuffer { dst, src, .. } => {
                write!(f, "CopyBuffer({} <- {})", dst.name(), src.name())
            }
            Command::CopyBufferToTexture { dst, src } => {
                write!(f, "CopyBufferToTexture({} <- {})", dst.name(), src.name())
            }
            Command::CopyTextureToBuffer { dst, src } => {
                write!(f, "CopyTextureToBuffer({} <- {})", dst.name(), src.name())
            }
        }
    }
}

/// Monotonic counter written by the queue thread.
#[derive(Debug, Default)]
pub(super) struct FenceInner {
    completed: Mutex<u64>,
    reached: Condvar,
}

#[derive(Debug, Clone)]
pub struct HeadlessFence(pub(super) Arc<FenceInner>);

impl HeadlessFence {
    pub(super) fn new(initial_value: u64) -> Self {
        Self(Arc::new(FenceInner {
            completed: Mutex::new(initial_value),
            reached: Condvar::new(),
        }))
    }

    pub(super) fn completed(&self) -> Result<u64> {
        Ok(*lock(&self.0.completed)?)
    }

    fn signal(&self, value: u64) -> Result<()> {
        let mut completed = lock(&self.0.completed)?;
        *completed = (*completed).max(value);
        self.0.reached.notify_all();
        Ok(())
    }

    pub(super) fn wait(&self, value: u64, timeout: Duration) -> Result<bool> {
        let completed = lock(&self.0.completed)?;
        let (completed, _) = self
            .0
            .reached
            .wait_timeout_while(completed, timeout, |completed| *completed < value)
            .map_err(|e| Error::device(format!("fence poisoned: {e}")))?;
        Ok(*completed >= value)
    }
}

/// Messages produced by the emulated validation layer.
#[derive(Debug, Default)]
pub(super) struct Validation {
    messages: Mutex<Vec<String>>,
}

impl Validation {
    pub(super) fn report(&self, message: String) {
        log::error!("[Validation] {}", message);
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }

    pub(super) fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

/// Lets tests stall the queue to model a wedged device.
#[derive(Debug, Default)]
pub(super) struct QueueGate {
    paused: Mutex<bool>,
    changed: Condvar,
}

impl QueueGate {
    pub(super) fn set_paused(&self, paused: bool) {
        if let Ok(mut guard) = self.paused.lock() {
            *guard = paused;
            self.changed.notify_all();
        }
    }

    fn wait_until_open(&self) {
        if let Ok(guard) = self.paused.lock() {
            let _guard = self.changed.wait_while(guard, |paused| *paused);
        }
    }
}

struct Submission {
    commands: Vec<Command>,
    fence: HeadlessFence,
    value: u64,
}

/// The emulated device timeline: one thread executing submissions in order.
pub(super) struct Queue {
    sender: Option<Sender<Submission>>,
    worker: Option<JoinHandle<()>>,
    idle_fence: HeadlessFence,
    idle_value: Mutex<u64>,
}

impl Queue {
    pub(super) fn spawn(validation: Arc<Validation>, gate: Arc<QueueGate>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Submission>();
        let worker = std::thread::Builder::new()
            .name("headless-queue".into())
            .spawn(move || run(receiver, &validation, &gate))
            .map_err(|e| Error::device_with("failed to spawn the headless queue", e))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            idle_fence: HeadlessFence::new(0),
            idle_value: Mutex::new(0),
        })
    }

    pub(super) fn submit(&self, commands: Vec<Command>, fence: HeadlessFence, value: u64) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::device("headless queue is shut down"))?;
        sender
            .send(Submission { commands, fence, value })
            .map_err(|_| Error::device("headless queue thread exited"))
    }

    /// Pushes a marker submission and waits for it.
    pub(super) fn flush(&self) -> Result<()> {
        let value = {
            let mut idle_value = lock(&self.idle_value)?;
            *idle_value += 1;
            *idle_value
        };
        self.submit(Vec::new(), self.idle_fence.clone(), value)?;
        while !self.idle_fence.wait(value, Duration::from_millis(100))? {}
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("headless queue thread panicked");
            }
        }
    }
}

fn run(receiver: Receiver<Submission>, validation: &Validation, gate: &QueueGate) {
    while let Ok(submission) = receiver.recv() {
        gate.wait_until_open();

        let Submission { commands, fence, value } = submission;
        for command in &commands {
            if let Err(err) = execute(command, validation) {
                validation.report(format!("{command:?} failed: {err}"));
            }
        }
        // Release every reference the list held before the fence is visible.
        drop(commands);

        if let Err(err) = fence.signal(value) {
            log::error!("failed to signal fence value {}: {}", value, err);
        }
    }
    log::debug!("headless queue thread exiting");
}

fn expect_state(validation: &Validation, target: &Allocation, expected: &[ResourceState], usage: &str) -> Result<()> {
    let actual = *target.device_state()?;
    if !expected.contains(&actual) {
        validation.report(format!(
            "{usage} on '{}' requires {expected:?} but the resource is in {actual}",
            target.name()
        ));
    }
    Ok(())
}

fn execute(command: &Command, validation: &Validation) -> Result<()> {
    match command {
        Command::Barrier { target, before, after } => {
            let mut state = target.device_state()?;
            if *state != *before {
                validation.report(format!(
                    "barrier on '{}' names {before} as its before-state but the resource is in {}",
                    target.name(),
                    *state
                ));
            }
            *state = *after;
        }
        Command::BindTargets { color, depth } => {
            expect_state(validation, color, &[ResourceState::RenderTarget], "binding a render target")?;
            if let Some(depth) = depth {
                expect_state(
                    validation,
                    depth,
                    &[ResourceState::DepthWrite, ResourceState::DepthRead],
                    "binding a depth target",
                )?;
            }
        }
        Command::ClearColor { target, color } => {
            expect_state(validation, target, &[ResourceState::RenderTarget], "clearing a render target")?;
            if let Storage::Texels(texels) = &mut *target.storage()? {
                texels.fill(*color);
            }
        }
        Command::ClearDepth { target, depth, stencil } => {
            expect_state(validation, target, &[ResourceState::DepthWrite], "clearing a depth target")?;
            if let Storage::Texels(texels) = &mut *target.storage()? {
                texels.fill([*depth, *stencil as f32, 0.0, 0.0]);
            }
        }
        Command::CopyBuffer { dst, dst_offset, src, src_offset, size } => {
            expect_state(validation, dst, &[ResourceState::CopyDest], "copy destination")?;
            expect_state(
                validation,
                src,
                &[ResourceState::CopySource, ResourceState::GenericRead],
                "copy source",
            )?;
            let bytes = match &*src.storage()? {
                Storage::Bytes(bytes) => {
                    usize::try_from(*size)
                        .ok()
                        .and_then(|size| byte_range(*src_offset, size))
                        .and_then(|range| bytes.get(range))
                        .map(<[u8]>::to_vec)
                        .ok_or_else(|| Error::contract("copy reads past the end of the source buffer"))?
                }
                Storage::Texels(_) => return Err(Error::contract("copy source is not a buffer")),
            };
            match &mut *dst.storage()? {
                Storage::Bytes(out) => {
                    byte_range(*dst_offset, bytes.len())
                        .and_then(|range| out.get_mut(range))
                        .ok_or_else(|| Error::contract("copy writes past the end of the destination buffer"))?
                        .copy_from_slice(&bytes);
                }
                Storage::Texels(_) => return Err(Error::contract("copy destination is not a buffer")),
            }
        }
        Command::CopyBufferToTexture { dst, src } => {
            expect_state(validation, dst, &[ResourceState::CopyDest], "copy destination")?;
            expect_state(
                validation,
                src,
                &[ResourceState::CopySource, ResourceState::GenericRead],
                "copy source",
            )?;
            let AllocationKind::Texture { width, height, format } = dst.kind() else {
                return Err(Error::contract("copy destination is not a texture"));
            };
            let texel_count = width as usize * height as usize;
            let decoded = match &*src.storage()? {
                Storage::Bytes(bytes) => decode_texels(format, bytes, texel_count),
                Storage::Texels(_) => None,
            }
            .ok_or_else(|| Error::contract(format!("cannot upload {format:?} texels from '{}'", src.name())))?;
            if let Storage::Texels(texels) = &mut *dst.storage()? {
                *texels = decoded;
            }
        }
        Command::CopyTextureToBuffer { dst, src } => {
            expect_state(validation, dst, &[ResourceState::CopyDest], "copy destination")?;
            expect_state(validation, src, &[ResourceState::CopySource], "copy source")?;
            let AllocationKind::Texture { format, .. } = src.kind() else {
                return Err(Error::contract("copy source is not a texture"));
            };
            let encoded = match &*src.storage()? {
                Storage::Texels(texels) => encode_texels(format, texels),
                Storage::Bytes(_) => None,
            }
            .ok_or_else(|| Error::contract(format!("cannot read back {format:?} texels")))?;
            match &mut *dst.storage()? {
                Storage::Bytes(out) if out.len() >= encoded.len() => {
                    out[..encoded.len()].copy_from_slice(&encoded);
                }
                _ => return Err(Error::contract("readback buffer is too small for the texture")),
            }
        }
    }
    Ok(())
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| Error::device(format!("headless device state poisoned: {e}")))
}
