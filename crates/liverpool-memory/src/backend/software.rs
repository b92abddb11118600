use hashbrown::HashMap;

use super::{
    BackendError, BackendResult, BufferDesc, BufferHandle, DeviceMemory, HostBackend, HostFormat, ImageDesc,
    ImageHandle, ImageViewHandle, MemoryHandle, MemoryPropertyFlags, MemoryRequirements,
};

const IMAGE_ALIGNMENT: u64 = 256;
const BUFFER_ALIGNMENT: u64 = 16;
const MEMORY_TYPE_BITS: u32 = 0b11;

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn level_size(desc: &ImageDesc, level: u32) -> u64 {
    let w = (desc.width >> level).max(1);
    let h = (desc.height >> level).max(1);
    u64::from(w) * u64::from(h) * u64::from(desc.format.bytes_per_texel())
}

struct Allocation {
    bytes: Vec<u8>,
    properties: MemoryPropertyFlags,
    mapped: bool,
}

struct SoftImage {
    desc: ImageDesc,
    memory: Option<MemoryHandle>,
    levels: Vec<Vec<u8>>,
}

struct SoftBuffer {
    desc: BufferDesc,
    memory: Option<DeviceMemory>,
}

/// Number of live objects of each kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveHandles {
    pub allocations: usize,
    pub images: usize,
    pub image_views: usize,
    pub buffers: usize,
}

impl LiveHandles {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// CPU-only [`HostBackend`]: images keep their texels per level, buffers live in their
/// allocation's bytes.
#[derive(Default)]
pub struct SoftwareBackend {
    next_handle: u64,
    allocations: HashMap<u64, Allocation>,
    images: HashMap<u64, SoftImage>,
    views: HashMap<u64, ImageHandle>,
    buffers: HashMap<u64, SoftBuffer>,
    fail_allocations: u32,
    allocated_bytes: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Makes the next `count` allocations fail with [`BackendError::OutOfMemory`].
    pub fn fail_next_allocations(&mut self, count: u32) {
        self.fail_allocations = count;
    }

    pub fn live_handles(&self) -> LiveHandles {
        LiveHandles {
            allocations: self.allocations.len(),
            images: self.images.len(),
            image_views: self.views.len(),
            buffers: self.buffers.len(),
        }
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub fn image_desc(&self, image: ImageHandle) -> Option<ImageDesc> {
        self.images.get(&image.0).map(|i| i.desc)
    }

    pub fn image_level(&self, image: ImageHandle, level: u32) -> Option<&[u8]> {
        let image = self.images.get(&image.0)?;
        image.levels.get(level as usize).map(Vec::as_slice)
    }

    /// Stands in for a GPU write to an image.
    pub fn image_level_mut(&mut self, image: ImageHandle, level: u32) -> Option<&mut [u8]> {
        let image = self.images.get_mut(&image.0)?;
        image.levels.get_mut(level as usize).map(Vec::as_mut_slice)
    }

    fn buffer_range(&self, buffer: BufferHandle) -> Option<(u64, std::ops::Range<usize>)> {
        let b = self.buffers.get(&buffer.0)?;
        let memory = b.memory?;
        let start = memory.offset as usize;
        Some((memory.handle.0, start..start + b.desc.size as usize))
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        let (memory, range) = self.buffer_range(buffer)?;
        self.allocations.get(&memory)?.bytes.get(range)
    }

    /// Stands in for a GPU write to a buffer.
    pub fn buffer_contents_mut(&mut self, buffer: BufferHandle) -> Option<&mut [u8]> {
        let (memory, range) = self.buffer_range(buffer)?;
        self.allocations.get_mut(&memory)?.bytes.get_mut(range)
    }

    fn allocation(&self, memory: &DeviceMemory) -> BackendResult<&Allocation> {
        self.allocations.get(&memory.handle.0).ok_or(BackendError::InvalidHandle {
            kind: "memory",
            handle: memory.handle.0,
        })
    }

    fn check_binding(&self, memory: &DeviceMemory, required: u64) -> BackendResult<()> {
        let available = self.allocation(memory)?.bytes.len() as u64 - memory.offset;
        if available < required {
            return Err(BackendError::InsufficientMemory { required, available });
        }
        Ok(())
    }

    fn image_mut(&mut self, image: ImageHandle) -> BackendResult<&mut SoftImage> {
        self.images.get_mut(&image.0).ok_or(BackendError::InvalidHandle {
            kind: "image",
            handle: image.0,
        })
    }
}

impl HostBackend for SoftwareBackend {
    fn allocate(&mut self, requirements: &MemoryRequirements, properties: MemoryPropertyFlags) -> BackendResult<DeviceMemory> {
        if self.fail_allocations > 0 {
            self.fail_allocations -= 1;
            return Err(BackendError::OutOfMemory {
                size: requirements.size,
                properties,
            });
        }
        let handle = self.handle();
        self.allocations.insert(
            handle,
            Allocation {
                bytes: vec![0; requirements.size as usize],
                properties,
                mapped: false,
            },
        );
        self.allocated_bytes += requirements.size;
        Ok(DeviceMemory {
            handle: MemoryHandle(handle),
            requirements: *requirements,
            properties,
            offset: 0,
        })
    }

    fn free(&mut self, memory: &DeviceMemory) {
        if let Some(a) = self.allocations.remove(&memory.handle.0) {
            self.allocated_bytes -= a.bytes.len() as u64;
        }
    }

    fn map(&mut self, memory: &DeviceMemory) -> BackendResult<&mut [u8]> {
        let offset = memory.offset as usize;
        let a = self
            .allocations
            .get_mut(&memory.handle.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "memory",
                handle: memory.handle.0,
            })?;
        if !a.properties.contains(MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(BackendError::NotHostVisible(memory.handle.0));
        }
        a.mapped = true;
        Ok(&mut a.bytes[offset..])
    }

    fn unmap(&mut self, memory: &DeviceMemory) {
        if let Some(a) = self.allocations.get_mut(&memory.handle.0) {
            a.mapped = false;
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> BackendResult<(ImageHandle, MemoryRequirements)> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::Unsupported(format!("empty image {desc:?}")));
        }
        let levels: Vec<Vec<u8>> = (0..desc.mip_levels)
            .map(|l| vec![0; level_size(desc, l) as usize])
            .collect();
        let size = levels.iter().map(|l| align_up(l.len() as u64, IMAGE_ALIGNMENT)).sum();
        let handle = self.handle();
        self.images.insert(
            handle,
            SoftImage {
                desc: *desc,
                memory: None,
                levels,
            },
        );
        Ok((
            ImageHandle(handle),
            MemoryRequirements {
                size,
                alignment: IMAGE_ALIGNMENT,
                memory_type_bits: MEMORY_TYPE_BITS,
            },
        ))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.images.remove(&image.0);
    }

    fn create_image_view(&mut self, image: ImageHandle, format: HostFormat) -> BackendResult<ImageViewHandle> {
        let desc = self.image_mut(image)?.desc;
        if desc.format != format {
            return Err(BackendError::Unsupported(format!(
                "view format {format:?} on a {:?} image",
                desc.format
            )));
        }
        let handle = self.handle();
        self.views.insert(handle, image);
        Ok(ImageViewHandle(handle))
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        self.views.remove(&view.0);
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BackendResult<(BufferHandle, MemoryRequirements)> {
        if desc.size == 0 {
            return Err(BackendError::Unsupported("zero-sized buffer".into()));
        }
        let handle = self.handle();
        self.buffers.insert(handle, SoftBuffer { desc: *desc, memory: None });
        Ok((
            BufferHandle(handle),
            MemoryRequirements {
                size: align_up(desc.size, BUFFER_ALIGNMENT),
                alignment: BUFFER_ALIGNMENT,
                memory_type_bits: MEMORY_TYPE_BITS,
            },
        ))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn bind_image_memory(&mut self, image: ImageHandle, memory: &DeviceMemory) -> BackendResult<()> {
        let required = {
            let img = self.image_mut(image)?;
            if img.memory.is_some() {
                return Err(BackendError::AlreadyBound {
                    kind: "image",
                    handle: image.0,
                });
            }
            img.levels.iter().map(|l| align_up(l.len() as u64, IMAGE_ALIGNMENT)).sum()
        };
        self.check_binding(memory, required)?;
        self.image_mut(image)?.memory = Some(memory.handle);
        Ok(())
    }

    fn bind_buffer_memory(&mut self, buffer: BufferHandle, memory: &DeviceMemory) -> BackendResult<()> {
        let size = match self.buffers.get(&buffer.0) {
            None => {
                return Err(BackendError::InvalidHandle {
                    kind: "buffer",
                    handle: buffer.0,
                })
            }
            Some(b) if b.memory.is_some() => {
                return Err(BackendError::AlreadyBound {
                    kind: "buffer",
                    handle: buffer.0,
                })
            }
            Some(b) => b.desc.size,
        };
        self.check_binding(memory, size)?;
        if let Some(b) = self.buffers.get_mut(&buffer.0) {
            b.memory = Some(*memory);
        }
        Ok(())
    }

    fn upload_image(&mut self, image: ImageHandle, level: u32, data: &[u8]) -> BackendResult<()> {
        let img = self.image_mut(image)?;
        if img.memory.is_none() {
            return Err(BackendError::NotBound {
                kind: "image",
                handle: image.0,
            });
        }
        let dst = img
            .levels
            .get_mut(level as usize)
            .ok_or_else(|| BackendError::Unsupported(format!("mip level {level} of image {}", image.0)))?;
        if dst.len() != data.len() {
            return Err(BackendError::SizeMismatch {
                expected: dst.len() as u64,
                actual: data.len(),
            });
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    fn download_image(&mut self, image: ImageHandle, level: u32, out: &mut [u8]) -> BackendResult<()> {
        let img = self.image_mut(image)?;
        let src = img
            .levels
            .get(level as usize)
            .ok_or_else(|| BackendError::Unsupported(format!("mip level {level} of image {}", image.0)))?;
        if src.len() != out.len() {
            return Err(BackendError::SizeMismatch {
                expected: src.len() as u64,
                actual: out.len(),
            });
        }
        out.copy_from_slice(src);
        Ok(())
    }
}
