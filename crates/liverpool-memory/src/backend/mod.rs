//! Host graphics capability the object cache is built on.
//!
//! The cache never talks to a graphics API directly; the embedder injects a [`HostBackend`]
//! (Vulkan in the emulator, [`SoftwareBackend`] in tests).

mod software;

use bitflags::bitflags;
use thiserror::Error;

pub use software::{LiveHandles, SoftwareBackend};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
        const HOST_CACHED = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const INDEX = 1 << 2;
        const VERTEX = 1 << 3;
        const STORAGE = 1 << 4;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostFormat {
    B8G8R8A8Srgb,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    R32Sfloat,
    R32G32B32A32Sfloat,
    D16Unorm,
    D16UnormS8Uint,
    D32Sfloat,
    D32SfloatS8Uint,
}

impl HostFormat {
    /// Bytes per texel as uploaded; depth/stencil formats report their packed transfer size.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::D16Unorm => 2,
            Self::B8G8R8A8Srgb
            | Self::R8G8B8A8Unorm
            | Self::R8G8B8A8Srgb
            | Self::R32Sfloat
            | Self::D16UnormS8Uint
            | Self::D32Sfloat => 4,
            Self::D32SfloatS8Uint => 8,
            Self::R32G32B32A32Sfloat => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Self::D16Unorm | Self::D16UnormS8Uint | Self::D32Sfloat | Self::D32SfloatS8Uint
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub format: HostFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub usage: ImageUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    pub memory_type_bits: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageViewHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryHandle(pub u64);

/// One device memory allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceMemory {
    pub handle: MemoryHandle,
    pub requirements: MemoryRequirements,
    pub properties: MemoryPropertyFlags,
    pub offset: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("out of device memory allocating {size} bytes ({properties:?})")]
    OutOfMemory { size: u64, properties: MemoryPropertyFlags },

    #[error("invalid {kind} handle {handle}")]
    InvalidHandle { kind: &'static str, handle: u64 },

    #[error("{kind} {handle} is already bound to memory")]
    AlreadyBound { kind: &'static str, handle: u64 },

    #[error("{kind} {handle} is not bound to memory")]
    NotBound { kind: &'static str, handle: u64 },

    #[error("memory {0} is not host visible")]
    NotHostVisible(u64),

    #[error("allocation of {available} bytes cannot back a {required}-byte resource")]
    InsufficientMemory { required: u64, available: u64 },

    #[error("transfer of {actual} bytes does not match the {expected}-byte level")]
    SizeMismatch { expected: u64, actual: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Device memory, image and buffer primitives.
///
/// Every call is synchronous and either succeeds or reports a [`BackendError`]; the object
/// cache treats any error as fatal for the operation in progress.
pub trait HostBackend {
    fn allocate(&mut self, requirements: &MemoryRequirements, properties: MemoryPropertyFlags) -> BackendResult<DeviceMemory>;
    fn free(&mut self, memory: &DeviceMemory);

    /// Maps a host-visible allocation. The mapping stays valid until [`HostBackend::unmap`].
    fn map(&mut self, memory: &DeviceMemory) -> BackendResult<&mut [u8]>;
    fn unmap(&mut self, memory: &DeviceMemory);

    fn create_image(&mut self, desc: &ImageDesc) -> BackendResult<(ImageHandle, MemoryRequirements)>;
    fn destroy_image(&mut self, image: ImageHandle);
    fn create_image_view(&mut self, image: ImageHandle, format: HostFormat) -> BackendResult<ImageViewHandle>;
    fn destroy_image_view(&mut self, view: ImageViewHandle);

    fn create_buffer(&mut self, desc: &BufferDesc) -> BackendResult<(BufferHandle, MemoryRequirements)>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn bind_image_memory(&mut self, image: ImageHandle, memory: &DeviceMemory) -> BackendResult<()>;
    fn bind_buffer_memory(&mut self, buffer: BufferHandle, memory: &DeviceMemory) -> BackendResult<()>;

    /// Replaces the contents of one mip level with tightly packed texels.
    fn upload_image(&mut self, image: ImageHandle, level: u32, data: &[u8]) -> BackendResult<()>;
    /// Reads one mip level back as tightly packed texels.
    fn download_image(&mut self, image: ImageHandle, level: u32, out: &mut [u8]) -> BackendResult<()>;
}
