use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::renderer::error::{Error, Result};
use crate::renderer::types::{Format, HeapKind, ResourceState};

static NEXT_ALLOCATION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AllocationKind {
    Texture {
        width: u32,
        height: u32,
        format: Format,
    },
    Buffer {
        size: u64,
        heap: HeapKind,
    },
}

pub(super) enum Storage {
    /// One RGBA value per texel. Depth lives in the first channel and
    /// stencil in the second.
    Texels(Vec<[f32; 4]>),
    Bytes(Vec<u8>),
}

/// Memory backing one committed resource, plus the state the device believes
/// the resource is in.
pub struct Allocation {
    id: u64,
    name: String,
    kind: AllocationKind,
    storage: Mutex<Storage>,
    device_state: Mutex<ResourceState>,
    live: Arc<AtomicUsize>,
}

impl Allocation {
    pub(super) fn new(
        name: &str,
        kind: AllocationKind,
        state: ResourceState,
        live: Arc<AtomicUsize>,
    ) -> Self {
        let storage = match kind {
            AllocationKind::Texture { width, height, .. } => {
                Storage::Texels(vec![[0.0; 4]; width as usize * height as usize])
            }
            AllocationKind::Buffer { size, .. } => Storage::Bytes(vec![0; size as usize]),
        };
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            id: NEXT_ALLOCATION_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_owned(),
            kind,
            storage: Mutex::new(storage),
            device_state: Mutex::new(state),
            live,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    pub(super) fn storage(&self) -> Result<MutexGuard<'_, Storage>> {
        self.storage
            .lock()
            .map_err(|e| Error::device(format!("allocation storage poisoned: {e}")))
    }

    pub(super) fn device_state(&self) -> Result<MutexGuard<'_, ResourceState>> {
        self.device_state
            .lock()
            .map_err(|e| Error::device(format!("allocation state poisoned: {e}")))
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A headless committed resource. Cloning shares the allocation.
#[derive(Clone, Debug)]
pub struct HeadlessResource(pub(super) Arc<Allocation>);

impl HeadlessResource {
    pub fn id(&self) -> u64 {
        self.0.id()
    }

    pub fn kind(&self) -> AllocationKind {
        self.0.kind()
    }

    /// The state the device last left this resource in. Lags behind the
    /// tracked state until recorded barriers have executed.
    pub fn device_state(&self) -> Result<ResourceState> {
        Ok(*self.0.device_state()?)
    }

    /// Copy of the texel contents of a texture.
    pub fn texels(&self) -> Result<Vec<[f32; 4]>> {
        match &*self.0.storage()? {
            Storage::Texels(texels) => Ok(texels.clone()),
            Storage::Bytes(_) => Err(Error::contract(format!(
                "'{}' is a buffer and has no texels",
                self.0.name()
            ))),
        }
    }

    /// Captures a color texture as an 8-bit RGBA image.
    pub fn capture(&self) -> Result<image::RgbaImage> {
        let AllocationKind::Texture { width, height, format } = self.kind() else {
            return Err(Error::contract(format!("'{}' is not a texture", self.0.name())));
        };
        if format.is_depth() {
            return Err(Error::contract(format!(
                "'{}' is a depth texture and cannot be captured as color",
                self.0.name()
            )));
        }
        let texels = self.texels()?;
        Ok(image::RgbaImage::from_fn(width, height, |x, y| {
            let texel = texels[(y * width + x) as usize];
            image::Rgba(texel.map(unorm_to_u8))
        }))
    }
}

/// `offset..offset + len` as a slice range, or `None` if it does not fit in
/// the address space.
pub(super) fn byte_range(offset: u64, len: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    Some(start..start.checked_add(len)?)
}

pub(super) fn unorm_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Decodes a tightly packed row-major upload into texels.
pub(super) fn decode_texels(format: Format, bytes: &[u8], texel_count: usize) -> Option<Vec<[f32; 4]>> {
    let stride = format.bytes_per_texel() as usize;
    if bytes.len() < stride * texel_count {
        return None;
    }
    let bytes = &bytes[..stride * texel_count];
    let texels = match format {
        Format::Rgba8Unorm | Format::Rgba8UnormSrgb => bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]].map(|v| v as f32 / 255.0))
            .collect(),
        Format::Bgra8Unorm | Format::Bgra8UnormSrgb => bytes
            .chunks_exact(4)
            .map(|c| [c[2], c[1], c[0], c[3]].map(|v| v as f32 / 255.0))
            .collect(),
        Format::Rgba32Float => bytes
            .chunks_exact(16)
            .map(|c| {
                let v: [f32; 4] = bytemuck::pod_read_unaligned(c);
                v
            })
            .collect(),
        Format::R32Float | Format::D32Float => bytes
            .chunks_exact(4)
            .map(|c| [bytemuck::pod_read_unaligned::<f32>(c), 0.0, 0.0, 1.0])
            .collect(),
        Format::Rgba16Float | Format::D24UnormS8Uint => return None,
    };
    Some(texels)
}

/// Encodes texels into the tightly packed layout of `format`.
pub(super) fn encode_texels(format: Format, texels: &[[f32; 4]]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(texels.len() * format.bytes_per_texel() as usize);
    for texel in texels {
        match format {
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb => {
                out.extend_from_slice(&texel.map(unorm_to_u8));
            }
            Format::Bgra8Unorm | Format::Bgra8UnormSrgb => {
                let [r, g, b, a] = texel.map(unorm_to_u8);
                out.extend_from_slice(&[b, g, r, a]);
            }
            Format::Rgba32Float => out.extend_from_slice(bytemuck::cast_slice(texel)),
            Format::R32Float | Format::D32Float => {
                out.extend_from_slice(bytemuck::bytes_of(&texel[0]));
            }
            Format::Rgba16Float | Format::D24UnormS8Uint => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_count_follows_allocations() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = Allocation::new(
            "a",
            AllocationKind::Buffer { size: 16, heap: HeapKind::Upload },
            ResourceState::GenericRead,
            live.clone(),
        );
        assert_eq!(live.load(Ordering::SeqCst), 1);
        drop(a);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bgra_swizzles_on_encode_and_decode() {
        let texels = [[1.0, 0.0, 0.5, 1.0]];
        let bytes = encode_texels(Format::Bgra8Unorm, &texels).unwrap();
        assert_eq!(bytes, vec![128, 0, 255, 255]);
        let back = decode_texels(Format::Bgra8Unorm, &bytes, 1).unwrap();
        assert_eq!(back[0][0], 1.0);
        assert_eq!(back[0][2], 128.0 / 255.0);
    }

    #[test]
    fn byte_ranges_that_overflow_are_none() {
        assert_eq!(byte_range(4, 8), Some(4..12));
        assert_eq!(byte_range(u64::MAX, 1), None);
    }

    #[test]
    fn short_uploads_are_rejected() {
        assert!(decode_texels(Format::Rgba8Unorm, &[0; 7], 2).is_none());
    }
}
