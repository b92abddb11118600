//! Guest GPU object kinds and how each maps onto a host resource.
//!
//! Each variant is a small parameter struct implementing [`GpuObject`]. `create`, `equal` and
//! `delete` are mandatory; `update` and `write_back` are optional and exposed as
//! `Option<fn>` so "immutable after creation" stays visible in the type.

mod buffer;
mod depth_stencil;
mod label;
mod texture;
mod video_out;

use core::fmt;

use liverpool_shader::GuestRange;

use crate::backend::{
    BufferDesc, BufferHandle, BufferUsage, DeviceMemory, HostBackend, HostFormat, ImageDesc, ImageHandle,
    ImageUsage, ImageViewHandle, MemoryPropertyFlags,
};
use crate::context::GraphicContext;
use crate::error::{GpuMemoryError, Result};

pub use buffer::{IndexBufferObject, IndexType, StorageBufferObject, VertexBufferObject};
pub use depth_stencil::{DepthFormat, DepthStencilBufferObject};
pub use label::LabelObject;
pub use texture::TextureObject;
pub use video_out::{VideoOutBufferObject, VIDEO_OUT_FORMAT_B8G8R8A8_SRGB};

/// Number of parameter words every object carries.
pub const OBJECT_PARAMS: usize = 8;

pub type ObjectParams = [u64; OBJECT_PARAMS];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GpuObjectType {
    VideoOutBuffer,
    DepthStencilBuffer,
    Label,
    IndexBuffer,
    VertexBuffer,
    StorageBuffer,
    Texture,
}

/// Refreshes host content from guest memory.
pub type UpdateFn = fn(&mut GraphicContext<'_>, &ObjectParams, &[GuestRange], &HostResource) -> Result<()>;

/// Copies host content back into guest memory.
pub type WriteBackFn = fn(&mut GraphicContext<'_>, &ObjectParams, &[GuestRange], &HostResource) -> Result<()>;

/// A requested guest GPU object.
pub trait GpuObject: fmt::Debug {
    fn object_type(&self) -> GpuObjectType;

    fn params(&self) -> ObjectParams;

    /// The GPU never writes the host resource.
    fn read_only(&self) -> bool;

    /// Reuse re-hashes guest content and refreshes on change.
    fn check_hash(&self) -> bool {
        false
    }

    /// Whether a cached object created with `existing` can serve this request.
    fn equal(&self, existing: &ObjectParams) -> bool;

    fn create(&self, ctx: &mut GraphicContext<'_>, ranges: &[GuestRange]) -> Result<HostResource>;

    fn updater(&self) -> Option<UpdateFn> {
        None
    }

    fn write_backer(&self) -> Option<WriteBackFn> {
        None
    }

    fn delete(&self, backend: &mut dyn HostBackend, resource: HostResource) {
        resource.destroy(backend);
    }

    fn clone_box(&self) -> Box<dyn GpuObject>;
}

impl Clone for Box<dyn GpuObject> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostImage {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub format: HostFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub memory: DeviceMemory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostBuffer {
    pub buffer: BufferHandle,
    pub size: u64,
    pub memory: DeviceMemory,
}

/// Host resource backing one cached object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostResource {
    Image(HostImage),
    Buffer(HostBuffer),
}

impl HostResource {
    pub fn as_image(&self) -> Option<&HostImage> {
        match self {
            Self::Image(image) => Some(image),
            Self::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&HostBuffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            Self::Image(_) => None,
        }
    }

    pub(crate) fn destroy(self, backend: &mut dyn HostBackend) {
        match self {
            Self::Image(image) => {
                backend.destroy_image_view(image.view);
                backend.destroy_image(image.image);
                backend.free(&image.memory);
            }
            Self::Buffer(buffer) => {
                backend.destroy_buffer(buffer.buffer);
                backend.free(&buffer.memory);
            }
        }
    }
}

pub(crate) fn expect_image(object: GpuObjectType, resource: &HostResource) -> Result<&HostImage> {
    resource
        .as_image()
        .ok_or_else(|| GpuMemoryError::CacheConsistency(format!("{object:?} is not backed by an image")))
}

pub(crate) fn expect_buffer(object: GpuObjectType, resource: &HostResource) -> Result<&HostBuffer> {
    resource
        .as_buffer()
        .ok_or_else(|| GpuMemoryError::CacheConsistency(format!("{object:?} is not backed by a buffer")))
}

pub(crate) fn total_size(ranges: &[GuestRange]) -> u64 {
    ranges.iter().map(|r| r.size).sum()
}

/// Creates an image plus its memory and view, releasing whatever was built if a later step fails.
pub(crate) fn create_image(
    backend: &mut dyn HostBackend,
    object: GpuObjectType,
    desc: &ImageDesc,
    max_size: Option<u64>,
) -> Result<HostImage> {
    let alloc_err = |source| GpuMemoryError::Allocation { object, source };

    let (image, requirements) = backend.create_image(desc).map_err(alloc_err)?;
    if let Some(max) = max_size {
        if requirements.size > max {
            backend.destroy_image(image);
            return Err(GpuMemoryError::not_implemented(
                object,
                "host image larger than its guest allocation",
                format!("{} > {max} bytes", requirements.size),
            ));
        }
    }
    let memory = match backend.allocate(&requirements, MemoryPropertyFlags::DEVICE_LOCAL) {
        Ok(memory) => memory,
        Err(e) => {
            backend.destroy_image(image);
            return Err(alloc_err(e));
        }
    };
    let view = backend
        .bind_image_memory(image, &memory)
        .and_then(|()| backend.create_image_view(image, desc.format));
    let view = match view {
        Ok(view) => view,
        Err(e) => {
            backend.destroy_image(image);
            backend.free(&memory);
            return Err(alloc_err(e));
        }
    };
    Ok(HostImage {
        image,
        view,
        format: desc.format,
        width: desc.width,
        height: desc.height,
        mip_levels: desc.mip_levels,
        memory,
    })
}

/// Creates a host-visible buffer bound to fresh memory.
pub(crate) fn create_buffer(
    backend: &mut dyn HostBackend,
    object: GpuObjectType,
    size: u64,
    usage: BufferUsage,
) -> Result<HostBuffer> {
    let alloc_err = |source| GpuMemoryError::Allocation { object, source };

    let (buffer, requirements) = backend
        .create_buffer(&BufferDesc { size, usage })
        .map_err(alloc_err)?;
    let memory = match backend.allocate(
        &requirements,
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
    ) {
        Ok(memory) => memory,
        Err(e) => {
            backend.destroy_buffer(buffer);
            return Err(alloc_err(e));
        }
    };
    if let Err(e) = backend.bind_buffer_memory(buffer, &memory) {
        backend.destroy_buffer(buffer);
        backend.free(&memory);
        return Err(alloc_err(e));
    }
    Ok(HostBuffer { buffer, size, memory })
}

/// Copies the guest ranges, back to back, into a host-visible buffer.
pub(crate) fn upload_buffer(
    ctx: &mut GraphicContext<'_>,
    object: GpuObjectType,
    ranges: &[GuestRange],
    resource: &HostResource,
) -> Result<()> {
    let buffer = expect_buffer(object, resource)?;
    let data = liverpool_shader::guest_memory::read_ranges(ctx.guest, ranges)?;
    let mapped = ctx.backend.map(&buffer.memory)?;
    let len = data.len().min(mapped.len());
    mapped[..len].copy_from_slice(&data[..len]);
    ctx.backend.unmap(&buffer.memory);
    Ok(())
}

/// Scatters a host-visible buffer back over the guest ranges.
pub(crate) fn download_buffer(
    ctx: &mut GraphicContext<'_>,
    object: GpuObjectType,
    ranges: &[GuestRange],
    resource: &HostResource,
) -> Result<()> {
    let buffer = expect_buffer(object, resource)?;
    let size = (buffer.size as usize).min(total_size(ranges) as usize);
    let data = {
        let mapped = ctx.backend.map(&buffer.memory)?;
        mapped[..size.min(mapped.len())].to_vec()
    };
    ctx.backend.unmap(&buffer.memory);
    liverpool_shader::guest_memory::write_ranges(ctx.guest, ranges, &data)?;
    Ok(())
}

pub(crate) fn sampled_usage() -> ImageUsage {
    ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC
}
